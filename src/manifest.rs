//! Directory listing (`...`) parsing and serialization.
//!
//! Every backing host directory carries a small listing file naming the
//! virtual entries of that directory. The format is bit-exact: a magic line,
//! then zero or more records of a kind byte followed by a NUL-terminated
//! name. A dynamic variant of the magic marks a directory whose contents are
//! authored by the helper on demand instead of being listed statically.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;

use num_enum::TryFromPrimitive;

use crate::Error;
use crate::FileKind;
use crate::Result;

/// Well-known leaf name of the per-directory listing file.
pub const MANIFEST_NAME: &str = "...";

/// Listings larger than this are rejected with [`Error::TooLarge`].
pub const MAX_MANIFEST_SIZE: u64 = 100 * 1024;

const MAGIC: &[u8] = b"LazyFS\n";
const MAGIC_DYNAMIC: &[u8] = b"LazyFS Dynamic\n";

/// Kind byte of a manifest record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum EntryKind {
    /// `f`: a regular file.
    Regular = b'f',
    /// `x`: a regular file with execute permission.
    Executable = b'x',
    /// `d`: a directory.
    Directory = b'd',
    /// `l`: a symbolic link.
    Symlink = b'l',
}

impl From<EntryKind> for FileKind {
    fn from(kind: EntryKind) -> FileKind {
        match kind {
            EntryKind::Regular => FileKind::Regular,
            EntryKind::Executable => FileKind::Executable,
            EntryKind::Directory => FileKind::Directory,
            EntryKind::Symlink => FileKind::Symlink,
        }
    }
}

impl From<FileKind> for EntryKind {
    fn from(kind: FileKind) -> EntryKind {
        match kind {
            FileKind::Regular => EntryKind::Regular,
            FileKind::Executable => EntryKind::Executable,
            FileKind::Directory => EntryKind::Directory,
            FileKind::Symlink => EntryKind::Symlink,
        }
    }
}

/// One record of a static listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestEntry {
    /// Kind of the listed entry.
    pub kind: EntryKind,
    /// Name of the listed entry, unique within its listing.
    pub name: OsString,
}

impl ManifestEntry {
    /// Convenience constructor used by tests and helpers authoring listings.
    pub fn new(kind: EntryKind, name: impl Into<OsString>) -> ManifestEntry {
        ManifestEntry {
            kind,
            name: name.into(),
        }
    }
}

/// A decoded `...` listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Manifest {
    /// The directory's entries, in listing order.
    Static(Vec<ManifestEntry>),
    /// The directory has no statically listed children; the helper authors
    /// entries on demand.
    Dynamic,
}

impl Manifest {
    /// Decode a listing blob.
    ///
    /// The blob must end immediately after the final record's terminating
    /// NUL; a trailing partial record, an unknown kind byte, or an empty
    /// name all reject the whole listing.
    pub fn parse(blob: &[u8]) -> Result<Manifest> {
        if blob == MAGIC_DYNAMIC {
            return Ok(Manifest::Dynamic);
        }
        let Some(mut rest) = blob.strip_prefix(MAGIC) else {
            return Err(Error::InvalidManifest);
        };
        let mut entries = Vec::new();
        while !rest.is_empty() {
            let kind = EntryKind::try_from(rest[0]).map_err(|_| Error::InvalidManifest)?;
            rest = &rest[1..];
            let Some(nul) = memchr::memchr(0, rest) else {
                // Last record not terminated.
                return Err(Error::InvalidManifest);
            };
            if nul == 0 {
                return Err(Error::InvalidManifest);
            }
            entries.push(ManifestEntry {
                kind,
                name: OsStr::from_bytes(&rest[..nul]).to_os_string(),
            });
            rest = &rest[nul + 1..];
        }
        Ok(Manifest::Static(entries))
    }

    /// Encode the listing back into its on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Manifest::Dynamic => MAGIC_DYNAMIC.to_vec(),
            Manifest::Static(entries) => {
                let mut out = MAGIC.to_vec();
                for entry in entries {
                    out.push(entry.kind as u8);
                    out.extend_from_slice(entry.name.as_bytes());
                    out.push(0);
                }
                out
            }
        }
    }
}
