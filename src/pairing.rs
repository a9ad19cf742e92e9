//! Pairing virtual nodes with host entries.
//!
//! Directories keep their host link for the lifetime of the node; regular
//! files are re-resolved on every open and never retain one. When a host
//! entry is missing, the shared resolve path queues a fetch and sleeps,
//! retrying the lookup exactly once after the helper reports completion.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use log::debug;
use log::warn;

use crate::Error;
use crate::FileKind;
use crate::NodeId;
use crate::OpenFlags;
use crate::Result;
use crate::fetch::Enqueue;
use crate::host::HostDir;
use crate::host::HostFile;
use crate::host::HostIdent;
use crate::host::HostNode;
use crate::manifest::MANIFEST_NAME;
use crate::manifest::MAX_MANIFEST_SIZE;
use crate::manifest::Manifest;
use crate::session::Request;
use crate::session::Superblock;

pub(crate) fn stale() -> Error {
    Error::Io(io::Error::from_raw_os_error(libc::ENOENT))
}

fn eio() -> Error {
    Error::Io(io::Error::from_raw_os_error(libc::EIO))
}

/// Outcome of resolving a virtual node to the host.
pub(crate) enum HostRef {
    /// The node's cached host directory link.
    Dir(Arc<dyn HostDir>),
    /// A freshly looked-up host entry.
    Entry(Box<dyn HostNode>),
}

/// Resolve `id` to its host entry, queuing a fetch and sleeping when the
/// host lookup is negative. The parent's host link must already be live;
/// every path to a node goes through a populated parent directory.
pub(crate) fn resolve_host(sb: &Superblock, req: &Request, id: NodeId) -> Result<HostRef> {
    let (name, parent_host) = {
        let tree = sb.tree.read();
        let node = tree.get(id).ok_or_else(stale)?;
        if let Some(host) = &node.host {
            return Ok(HostRef::Dir(host.clone()));
        }
        let parent = match node.parent {
            Some(parent) => parent,
            // The root's host link is set at mount time.
            None => return Ok(HostRef::Dir(sb.host_root.clone())),
        };
        let parent_host = tree
            .get(parent)
            .and_then(|parent| parent.host.clone())
            .ok_or_else(eio)?;
        (node.name.clone(), parent_host)
    };

    let mut first_try = true;
    loop {
        {
            // Another task may have paired this directory while we slept.
            let tree = sb.tree.read();
            if let Some(host) = tree.get(id).and_then(|node| node.host.clone()) {
                return Ok(HostRef::Dir(host));
            }
        }
        if let Some(entry) = parent_host.lookup(&name)? {
            return Ok(HostRef::Entry(entry));
        }
        if !first_try {
            // The fetch completed but the host entry never appeared.
            return Err(eio());
        }
        first_try = false;

        if !sb.grab(id) {
            return Err(stale());
        }
        match sb.queue.enqueue_or_join(id, req.uid()) {
            Enqueue::NoHelper => {
                sb.put(id);
                return Err(Error::NoHelper);
            }
            Enqueue::Joined => sb.put(id),
            Enqueue::Queued => debug!("queued fetch for node {id}"),
        }
        sb.queue.wait_fetch(id, req.interrupt_ref())?;
    }
}

/// Make the children of `dir` reflect the host's `...` listing, pairing the
/// directory with its host first if needed. An unchanged listing is not
/// re-read.
pub(crate) fn ensure_populated(sb: &Superblock, req: &Request, dir: NodeId) -> Result<()> {
    let host = match resolve_host(sb, req, dir)? {
        HostRef::Dir(host) => host,
        HostRef::Entry(entry) => {
            if entry.kind() != FileKind::Directory {
                return Err(Error::KindMismatch);
            }
            sb.set_host_link(dir, entry.open_dir()?)
        }
    };

    let listing = match host.lookup(OsStr::new(MANIFEST_NAME))? {
        Some(node) if matches!(node.kind(), FileKind::Regular | FileKind::Executable) => node,
        _ => {
            warn!("no '...' listing in the host directory for node {dir}");
            return Err(Error::NoManifest);
        }
    };

    let token = listing.ident();
    {
        let tree = sb.tree.read();
        if tree.get(dir).ok_or_else(stale)?.manifest_token == Some(token) {
            return Ok(());
        }
    }

    if listing.size() > MAX_MANIFEST_SIZE {
        warn!("'...' listing for node {dir} is too big");
        return Err(Error::TooLarge);
    }
    let blob = read_listing(&*listing)?;
    let manifest = Manifest::parse(&blob)
        .inspect_err(|_| warn!("'...' listing for node {dir} is invalid"))?;
    reconcile(sb, dir, manifest, token);
    Ok(())
}

/// Open the host file behind a regular virtual node with the caller's open
/// flags, fetching it first if the host lookup is negative. The host's
/// kind must agree exactly with the node's declared kind: a plain file and
/// an executable are different entries as far as the listing is concerned.
pub(crate) fn open_regular(
    sb: &Superblock,
    req: &Request,
    id: NodeId,
    flags: OpenFlags,
) -> Result<Box<dyn HostFile>> {
    let declared = {
        let tree = sb.tree.read();
        tree.get(id).ok_or_else(stale)?.kind
    };
    debug_assert!(matches!(
        declared,
        FileKind::Regular | FileKind::Executable
    ));
    let entry = match resolve_host(sb, req, id)? {
        HostRef::Entry(entry) => entry,
        // A regular node never owns a directory link.
        HostRef::Dir(_) => return Err(Error::KindMismatch),
    };
    if entry.kind() != declared {
        return Err(Error::KindMismatch);
    }
    Ok(entry.open_file(flags)?)
}

fn read_listing(listing: &dyn HostNode) -> Result<Vec<u8>> {
    let file = listing.open_file(OpenFlags::read_only())?;
    let size = listing.size() as usize;
    let mut blob = Vec::new();
    blob.try_reserve_exact(size).map_err(|_| Error::OutOfMemory)?;
    blob.resize(size, 0);
    let mut offset = 0;
    while offset < size {
        let got = file.read_at(offset as u64, &mut blob[offset..])?;
        if got == 0 {
            break;
        }
        offset += got;
    }
    blob.truncate(offset);
    Ok(blob)
}

fn reconcile(sb: &Superblock, dir: NodeId, manifest: Manifest, token: HostIdent) {
    let mut tree = sb.tree.write();
    let entries = match manifest {
        Manifest::Dynamic => {
            if let Some(node) = tree.get_mut(dir) {
                node.dynamic = true;
                node.manifest_token = Some(token);
            }
            return;
        }
        Manifest::Static(entries) => entries,
    };

    for entry in &entries {
        let kind = FileKind::from(entry.kind);
        match tree.lookup_child(dir, &entry.name) {
            Some(child) => {
                if let Some(node) = tree.get_mut(child) {
                    if node.placeholder {
                        node.kind = kind;
                        node.placeholder = false;
                    } else if node.kind != kind {
                        warn!("{:?} already exists with a different kind", entry.name);
                    } else {
                        debug!("{:?} already exists", entry.name);
                    }
                }
            }
            None => {
                if let Err(err) = tree.insert_child(dir, kind, &entry.name) {
                    warn!("could not add {:?}: {err}", entry.name);
                }
            }
        }
    }

    let keep: HashSet<OsString> = entries.into_iter().map(|entry| entry.name).collect();
    tree.sweep_absent(dir, &keep, sb.helper_ino);
    if let Some(node) = tree.get_mut(dir) {
        node.dynamic = false;
        node.manifest_token = Some(token);
    }
}
