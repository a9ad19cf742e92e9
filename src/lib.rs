//! Lazy, on-demand virtual filesystem core.
//!
//! Presents a hierarchical namespace whose contents are only materialised
//! when first accessed. The virtual tree is reconstructed from per-directory
//! `...` listing files found in a backing host directory; reads and memory
//! mappings of regular files are forwarded to host files paired at open
//! time. When a requested entry is absent from the host, the accessing task
//! sleeps while the resource name is handed to a cooperating user-space
//! fetch helper over the `helper-control` rendezvous endpoint; closing the
//! per-request handle wakes the sleeper, which revalidates against the host.
//!
//! The mount is read-only to its users: mutation happens only through
//! helper activity on the backing store.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

#[cfg(feature = "serializable")]
use serde::Deserialize;
#[cfg(feature = "serializable")]
use serde::Serialize;

pub use crate::errno::Errno;
pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::fetch::Interrupt;
pub use crate::host::DiskDir;
pub use crate::host::HostDir;
pub use crate::host::HostFile;
pub use crate::host::HostIdent;
pub use crate::host::HostMapping;
pub use crate::host::HostNode;
pub use crate::manifest::EntryKind;
pub use crate::manifest::MANIFEST_NAME;
pub use crate::manifest::MAX_MANIFEST_SIZE;
pub use crate::manifest::Manifest;
pub use crate::manifest::ManifestEntry;
pub use crate::open_flags::OpenFlags;
pub use crate::session::DirEntry;
pub use crate::session::DirHandle;
pub use crate::session::FetchRequest;
pub use crate::session::FileHandle;
pub use crate::session::HELPER_CONTROL_NAME;
pub use crate::session::HelperSession;
pub use crate::session::LazyFs;
pub use crate::session::MOUNT_VERSION;
pub use crate::session::MountParams;
pub use crate::session::Request;
pub use crate::tree::NodeId;

mod errno;
mod error;
mod fetch;
mod host;
mod manifest;
mod open_flags;
mod pairing;
mod session;
mod tree;

/// Kinds of entries the namespace exposes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum FileKind {
    /// Directory (`d` in a listing).
    Directory,
    /// Regular file (`f` in a listing).
    Regular,
    /// Regular file with execute permission (`x` in a listing).
    Executable,
    /// Symbolic link (`l` in a listing).
    Symlink,
}

/// Attributes of a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Attr {
    /// The node these attributes describe.
    pub ino: NodeId,
    /// Size in bytes, as declared by the enclosing listing.
    pub size: u64,
    /// Modification time in seconds since the epoch; 0 for the synthesised
    /// root and for entries the listing carries no time for.
    pub mtime: i64,
    /// Kind of the node.
    pub kind: FileKind,
    /// Permission bits. Everything is readable and nothing is writable.
    pub perm: u16,
    /// Number of hard links; always 1, the namespace has no hard links.
    pub nlink: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
}

/// Mount a lazy filesystem over the backing host directory described by
/// `params`.
/// # Errors
/// Rejects parameter structs with an unknown version, and fails if the root
/// cannot be set up.
pub fn mount(params: MountParams) -> Result<LazyFs> {
    LazyFs::mount(params)
}
