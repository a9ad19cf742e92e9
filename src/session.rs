//! The filesystem surface.
//!
//! A mounted lazy filesystem exposes lookup, readdir and read-only file
//! operations over the virtual tree, plus the helper-control rendezvous
//! endpoint the fetch helper binds to. Handles own their resources: an open
//! file owns its host file, a helper session owns the helper slot and its
//! outstanding request handles, and dropping any of them releases what it
//! owns.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use log::info;
use log::warn;
use nix::unistd::getgid;
use nix::unistd::getuid;
use parking_lot::Mutex;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::Attr;
use crate::Error;
use crate::FileKind;
use crate::NodeId;
use crate::OpenFlags;
use crate::Result;
use crate::fetch::Enqueue;
use crate::fetch::FetchQueue;
use crate::fetch::Interrupt;
use crate::host::DiskDir;
use crate::host::HostDir;
use crate::host::HostFile;
use crate::host::HostMapping;
use crate::pairing;
use crate::pairing::stale;
use crate::tree::NodeTable;

/// Mount parameter version this crate understands.
pub const MOUNT_VERSION: u32 = 1;

/// Leaf name of the synthetic helper rendezvous entry under the root.
pub const HELPER_CONTROL_NAME: &str = "helper-control";

/// Minimum buffer a helper read must supply.
const HELPER_MIN_READ: usize = 20;

/// Versioned mount parameters.
pub struct MountParams {
    /// Parameter struct version; must equal [`MOUNT_VERSION`].
    pub version: u32,
    /// The backing host directory.
    pub host: Arc<dyn HostDir>,
}

impl MountParams {
    /// Parameters for mounting over an already-opened host directory.
    pub fn new(host: Arc<dyn HostDir>) -> MountParams {
        MountParams {
            version: MOUNT_VERSION,
            host,
        }
    }

    /// Parameters for mounting over the directory at `path`.
    pub fn from_path(path: &Path) -> io::Result<MountParams> {
        Ok(MountParams::new(Arc::new(DiskDir::open(path)?)))
    }
}

impl fmt::Debug for MountParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountParams")
            .field("version", &self.version)
            .finish()
    }
}

/// Parameters of one filesystem operation: the caller's credentials and the
/// cancellation token for any sleep the operation enters.
#[derive(Clone, Debug)]
pub struct Request {
    uid: u32,
    gid: u32,
    interrupt: Interrupt,
}

impl Request {
    /// The uid of the calling task, reported to the helper on a fetch.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// The gid of the calling task.
    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// A clone of the cancellation token, for raising from another thread.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub(crate) fn interrupt_ref(&self) -> &Interrupt {
        &self.interrupt
    }
}

/// One mount's shared state.
pub(crate) struct Superblock {
    pub(crate) host_root: Arc<dyn HostDir>,
    pub(crate) tree: RwLock<NodeTable>,
    pub(crate) queue: Arc<FetchQueue>,
    pub(crate) helper_ino: NodeId,
}

impl Superblock {
    pub(crate) fn grab(&self, id: NodeId) -> bool {
        self.tree.write().grab(id)
    }

    pub(crate) fn put(&self, id: NodeId) {
        self.tree.write().put(id);
    }

    /// Back a virtual directory with its host directory. The first link
    /// wins; a racing resolver adopts it.
    pub(crate) fn set_host_link(&self, id: NodeId, host: Arc<dyn HostDir>) -> Arc<dyn HostDir> {
        let mut tree = self.tree.write();
        let Some(node) = tree.get_mut(id) else {
            return host;
        };
        debug_assert_eq!(node.kind, FileKind::Directory);
        match &node.host {
            Some(existing) => existing.clone(),
            None => {
                node.host = Some(host.clone());
                host
            }
        }
    }
}

/// A mounted lazy filesystem.
pub struct LazyFs {
    sb: Arc<Superblock>,
}

impl LazyFs {
    /// Mount over the backing directory described by `params`. The root is
    /// paired with the host immediately; everything below materialises on
    /// demand.
    pub fn mount(params: MountParams) -> Result<LazyFs> {
        if params.version != MOUNT_VERSION {
            warn!("bad mount parameter version {}", params.version);
            return Err(Error::InvalidArgument);
        }
        let mut table = NodeTable::new();
        // The root is paired before the superblock is shared with anyone,
        // so the first-link race set_host_link arbitrates cannot arise
        // here; every other directory must go through set_host_link.
        if let Some(root) = table.get_mut(NodeId::ROOT) {
            root.host = Some(params.host.clone());
        }
        let helper_ino =
            table.insert_child(NodeId::ROOT, FileKind::Regular, OsStr::new(HELPER_CONTROL_NAME))?;
        debug!("mounted, helper control at node {helper_ino}");
        Ok(LazyFs {
            sb: Arc::new(Superblock {
                host_root: params.host,
                tree: RwLock::new(table),
                queue: Arc::new(FetchQueue::new()),
                helper_ino,
            }),
        })
    }

    /// The root node of the mount.
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// The synthetic helper-control node.
    pub fn helper_control(&self) -> NodeId {
        self.sb.helper_ino
    }

    /// Build a request context carrying the current task's credentials.
    pub fn request(&self) -> Request {
        self.request_from(getuid().as_raw(), getgid().as_raw())
    }

    /// Build a request context on behalf of the given credentials.
    pub fn request_from(&self, uid: u32, gid: u32) -> Request {
        Request {
            uid,
            gid,
            interrupt: Interrupt::new(self.sb.queue.clone()),
        }
    }

    /// Look up `name` under the directory `parent`, populating the parent's
    /// children from its host listing first. `Ok(None)` is a negative
    /// lookup.
    pub fn lookup(&self, req: &Request, parent: NodeId, name: &OsStr) -> Result<Option<NodeId>> {
        if parent == NodeId::ROOT && name == OsStr::new(HELPER_CONTROL_NAME) {
            return Ok(Some(self.sb.helper_ino));
        }
        {
            let tree = self.sb.tree.read();
            let node = tree.get(parent).ok_or_else(stale)?;
            if node.kind != FileKind::Directory {
                return Err(Error::Io(io::Error::from_raw_os_error(libc::ENOTDIR)));
            }
        }
        pairing::ensure_populated(&self.sb, req, parent)?;

        let (hit, dynamic) = {
            let tree = self.sb.tree.read();
            let hit = tree
                .lookup_child(parent, name)
                .filter(|&child| tree.get(child).is_some_and(|node| !node.placeholder));
            let dynamic = tree.get(parent).ok_or_else(stale)?.dynamic;
            (hit, dynamic)
        };
        if let Some(child) = hit {
            return Ok(Some(child));
        }
        if dynamic {
            return self.lookup_dynamic(req, parent, name);
        }
        Ok(None)
    }

    /// Lookup in a dynamic directory: the helper authors entries here on
    /// demand, so a miss consults the host directly, and a host miss kicks
    /// off a fetch without waiting for it.
    fn lookup_dynamic(
        &self,
        req: &Request,
        parent: NodeId,
        name: &OsStr,
    ) -> Result<Option<NodeId>> {
        let host = {
            let tree = self.sb.tree.read();
            tree.get(parent)
                .and_then(|node| node.host.clone())
                .ok_or_else(stale)?
        };

        if let Some(entry) = host.lookup(name)? {
            let mut tree = self.sb.tree.write();
            let id = match tree.lookup_child(parent, name) {
                Some(child) => {
                    if let Some(node) = tree.get_mut(child) {
                        if node.placeholder {
                            node.kind = entry.kind();
                            node.size = entry.size();
                            node.placeholder = false;
                        }
                    }
                    child
                }
                None => {
                    let id = tree.insert_child(parent, entry.kind(), name)?;
                    if let Some(node) = tree.get_mut(id) {
                        node.size = entry.size();
                    }
                    id
                }
            };
            return Ok(Some(id));
        }

        if self.sb.queue.helper_bound() {
            let id = {
                let mut tree = self.sb.tree.write();
                match tree.lookup_child(parent, name) {
                    Some(child) => child,
                    None => {
                        let id = tree.insert_child(parent, FileKind::Regular, name)?;
                        if let Some(node) = tree.get_mut(id) {
                            node.placeholder = true;
                        }
                        id
                    }
                }
            };
            if self.sb.grab(id) {
                match self.sb.queue.enqueue_or_join(id, req.uid()) {
                    Enqueue::Queued => debug!("queued dynamic fetch for node {id}"),
                    Enqueue::Joined | Enqueue::NoHelper => self.sb.put(id),
                }
            }
        }
        Ok(None)
    }

    /// Attributes of a node.
    pub fn getattr(&self, ino: NodeId) -> Result<Attr> {
        let tree = self.sb.tree.read();
        let node = tree.get(ino).ok_or_else(stale)?;
        let perm = if ino == self.sb.helper_ino {
            0o600
        } else {
            match node.kind {
                FileKind::Directory | FileKind::Executable => 0o555,
                FileKind::Regular | FileKind::Symlink => 0o444,
            }
        };
        Ok(Attr {
            ino,
            size: node.size,
            mtime: node.mtime,
            kind: node.kind,
            perm,
            nlink: 1,
            uid: 0,
            gid: 0,
        })
    }

    /// Open a directory, populating its children from the host listing so
    /// the subsequent readdir stream is authoritative for the open moment.
    pub fn opendir(&self, req: &Request, ino: NodeId) -> Result<DirHandle> {
        {
            let tree = self.sb.tree.read();
            let node = tree.get(ino).ok_or_else(stale)?;
            if node.kind != FileKind::Directory {
                return Err(Error::Io(io::Error::from_raw_os_error(libc::ENOTDIR)));
            }
        }
        pairing::ensure_populated(&self.sb, req, ino)?;

        let (parent, entries) = {
            let tree = self.sb.tree.read();
            let node = tree.get(ino).ok_or_else(stale)?;
            let parent = node.parent.unwrap_or(ino);
            let entries = node
                .children
                .iter()
                .filter_map(|&child| {
                    let node = tree.get(child)?;
                    if node.placeholder {
                        return None;
                    }
                    Some(DirEntry {
                        ino: child,
                        kind: node.kind,
                        name: node.name.clone(),
                    })
                })
                .collect();
            (parent, entries)
        };
        if !self.sb.grab(ino) {
            return Err(stale());
        }
        Ok(DirHandle {
            sb: self.sb.clone(),
            ino,
            parent,
            entries,
        })
    }

    /// Open a regular file read-only, pairing it with its host file. The
    /// mount is read-only: any write access is refused.
    pub fn open(&self, req: &Request, ino: NodeId, flags: OpenFlags) -> Result<FileHandle> {
        if ino == self.sb.helper_ino {
            // The rendezvous endpoint is bound through open_helper.
            return Err(Error::NotSupported);
        }
        if flags.wants_write() {
            return Err(Error::NotSupported);
        }
        {
            let tree = self.sb.tree.read();
            let node = tree.get(ino).ok_or_else(stale)?;
            match node.kind {
                FileKind::Regular | FileKind::Executable => {}
                FileKind::Directory => {
                    return Err(Error::Io(io::Error::from_raw_os_error(libc::EISDIR)));
                }
                FileKind::Symlink => return Err(Error::NotSupported),
            }
        }
        let host = pairing::open_regular(&self.sb, req, ino, flags)?;
        if !self.sb.grab(ino) {
            return Err(stale());
        }
        Ok(FileHandle {
            sb: self.sb.clone(),
            ino,
            host,
        })
    }

    /// Bind the helper rendezvous endpoint. At most one helper may be bound
    /// at a time; a second binder gets [`Error::Busy`].
    pub fn open_helper(&self) -> Result<HelperSession> {
        self.sb.queue.bind_helper()?;
        info!("new helper arrived");
        Ok(HelperSession {
            sb: self.sb.clone(),
            handles: Mutex::new(HandleTable {
                // Ids mimic descriptor numbers; 0-2 are taken.
                next: 3,
                map: HashMap::new(),
            }),
        })
    }

    /// Tear the mount down. Open handles keep their resources alive until
    /// they drop.
    pub fn unmount(self) {
        debug!("unmounting");
    }
}

impl fmt::Debug for LazyFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFs")
            .field("queue", &self.sb.queue)
            .finish()
    }
}

/// One directory entry as emitted by readdir.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntry {
    /// Node the entry refers to.
    pub ino: NodeId,
    /// Kind of the entry.
    pub kind: FileKind,
    /// Name of the entry.
    pub name: OsString,
}

/// An open directory stream.
///
/// The entry set is a snapshot taken when the directory was opened; entries
/// appearing later are served by the next open.
pub struct DirHandle {
    sb: Arc<Superblock>,
    ino: NodeId,
    parent: NodeId,
    entries: Vec<DirEntry>,
}

impl DirHandle {
    /// The directory this stream reads.
    pub fn ino(&self) -> NodeId {
        self.ino
    }

    /// Entries from `offset` on: `.`, `..`, then the children known at open
    /// time, at stable ascending positions.
    pub fn readdir(&self, offset: usize) -> Vec<DirEntry> {
        let dot = DirEntry {
            ino: self.ino,
            kind: FileKind::Directory,
            name: OsString::from("."),
        };
        let dotdot = DirEntry {
            ino: self.parent,
            kind: FileKind::Directory,
            name: OsString::from(".."),
        };
        [dot, dotdot]
            .into_iter()
            .chain(self.entries.iter().cloned())
            .skip(offset)
            .collect()
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        self.sb.put(self.ino);
    }
}

impl fmt::Debug for DirHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirHandle")
            .field("ino", &self.ino)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// An open regular file, paired with its host file for its whole lifetime.
pub struct FileHandle {
    sb: Arc<Superblock>,
    ino: NodeId,
    host: Box<dyn HostFile>,
}

impl FileHandle {
    /// The node this handle reads.
    pub fn ino(&self) -> NodeId {
        self.ino
    }

    /// Current length of the backing host file.
    pub fn len(&self) -> Result<u64> {
        Ok(self.host.len()?)
    }

    /// Whether the backing host file is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read from the backing host file.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.host.read_at(offset, buf)?)
    }

    /// Map the file. The first successful map aliases the virtual node to
    /// the host mapping; later maps share it. Once aliased, the node is
    /// never re-aliased: a handle whose host differs gets [`Error::Busy`].
    pub fn mmap(&self) -> Result<Arc<HostMapping>> {
        let want = self.host.ident();
        {
            let tree = self.sb.tree.read();
            if let Some(mapping) = &tree.get(self.ino).ok_or_else(stale)?.mapped {
                return if mapping.ident() == want {
                    Ok(mapping.clone())
                } else {
                    Err(Error::Busy)
                };
            }
        }
        let fresh = self.host.mmap()?;
        let mut tree = self.sb.tree.write();
        let node = tree.get_mut(self.ino).ok_or_else(stale)?;
        match &node.mapped {
            Some(mapping) => {
                // Lost the race; adopt the winner if it aliases our host.
                if mapping.ident() == want {
                    Ok(mapping.clone())
                } else {
                    Err(Error::Busy)
                }
            }
            None => {
                node.mapped = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.sb.put(self.ino);
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle").field("ino", &self.ino).finish()
    }
}

struct HandleTable {
    next: u64,
    map: HashMap<u64, Arc<FetchRequest>>,
}

/// The helper's bound rendezvous endpoint.
///
/// Dropping the session unbinds the helper slot, drains every request still
/// pending (their sleepers observe the missing helper), and releases every
/// outstanding request handle it still holds; each release counts as a
/// completion.
pub struct HelperSession {
    sb: Arc<Superblock>,
    handles: Mutex<HandleTable>,
}

impl HelperSession {
    /// Block until a fetch request is pending, claim the oldest one, and
    /// write `"<handle-id> uid=<uid>\0"` into `buf`. Requires at least a
    /// 20-byte buffer; a shorter one is refused without consuming anything.
    pub fn read_request(&self, req: &Request, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < HELPER_MIN_READ {
            return Err(Error::InvalidArgument);
        }
        let entry = self.sb.queue.next_request(req.interrupt_ref())?;
        let id = {
            let mut handles = self.handles.lock();
            let id = handles.next;
            handles.next += 1;
            id
        };
        let message = format!("{id} uid={}", entry.uid);
        if message.len() + 1 > buf.len() {
            self.sb.queue.requeue_front(entry);
            return Err(Error::InvalidArgument);
        }
        let path = path_of(&self.sb, entry.node);
        debug!(
            "sending fetch request {id} for {:?}",
            OsStr::from_bytes(&path)
        );
        let request = Arc::new(FetchRequest {
            sb: self.sb.clone(),
            node: entry.node,
            path,
        });
        self.handles.lock().map.insert(id, request);
        buf[..message.len()].copy_from_slice(message.as_bytes());
        buf[message.len()] = 0;
        Ok(message.len() + 1)
    }

    /// The outstanding request handle with the given id.
    pub fn request(&self, id: u64) -> Option<Arc<FetchRequest>> {
        self.handles.lock().map.get(&id).cloned()
    }

    /// Close the request handle with the given id. Unless the helper still
    /// holds a clone, this completes the fetch and wakes its sleepers.
    pub fn close_request(&self, id: u64) -> bool {
        self.handles.lock().map.remove(&id).is_some()
    }
}

impl Drop for HelperSession {
    fn drop(&mut self) {
        let drained = self.sb.queue.unbind_helper();
        for entry in &drained {
            debug!("discarding pending fetch for node {}", entry.node);
            self.sb.put(entry.node);
        }
        info!("helper left");
    }
}

impl fmt::Debug for HelperSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperSession")
            .field("outstanding", &self.handles.lock().map.len())
            .finish()
    }
}

/// One in-flight fetch as seen by the helper.
///
/// Reading yields the mount-relative path of the node being fetched,
/// NUL-terminated. Dropping the last clone is the completion signal:
/// success is presumed and the woken producers revalidate against the host.
pub struct FetchRequest {
    sb: Arc<Superblock>,
    node: NodeId,
    path: Vec<u8>,
}

impl FetchRequest {
    /// The mount-relative path of the node being fetched.
    pub fn path(&self) -> &OsStr {
        OsStr::from_bytes(&self.path)
    }

    /// Read the NUL-terminated path, starting at `offset`.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> usize {
        let total = self.path.len() + 1;
        let offset = offset.min(total as u64) as usize;
        let mut n = 0;
        for i in offset..total.min(offset + buf.len()) {
            buf[n] = if i < self.path.len() { self.path[i] } else { 0 };
            n += 1;
        }
        n
    }
}

impl Drop for FetchRequest {
    fn drop(&mut self) {
        // The release path always succeeds; producers revalidate on wake.
        self.sb.queue.complete(self.node);
        self.sb.put(self.node);
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("node", &self.node)
            .field("path", &self.path())
            .finish()
    }
}

/// Mount-relative path of a node, assembled root-down with a leading slash.
fn path_of(sb: &Superblock, id: NodeId) -> Vec<u8> {
    let tree = sb.tree.read();
    let mut segments: SmallVec<[OsString; 8]> = SmallVec::new();
    let mut cursor = id;
    while let Some(node) = tree.get(cursor) {
        match node.parent {
            Some(parent) => {
                segments.push(node.name.clone());
                cursor = parent;
            }
            None => break,
        }
    }
    let mut path = Vec::new();
    for segment in segments.iter().rev() {
        path.push(b'/');
        path.extend_from_slice(segment.as_bytes());
    }
    if path.is_empty() {
        path.push(b'/');
    }
    path
}
