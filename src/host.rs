//! The host filesystem seam.
//!
//! The core proxies a backing "host" directory tree but never inspects host
//! internals beyond these traits: a directory that can look up names, an
//! entry that can be opened, and an open file that can be read and mapped.
//! [`DiskDir`] is the fd-based implementation over a real directory; tests
//! are free to substitute their own host.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::os::fd::OwnedFd;
use std::os::unix::fs::FileExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use libc::c_void;
use nix::fcntl::AtFlags;
use nix::fcntl::OFlag;
use nix::fcntl::open;
use nix::fcntl::openat;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::stat::FileStat;
use nix::sys::stat::Mode;
use nix::sys::stat::fstatat;

use crate::FileKind;
use crate::OpenFlags;

/// Identity of a host filesystem object, stable for the object's lifetime.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct HostIdent {
    /// Device the object lives on.
    pub dev: u64,
    /// Inode number on that device.
    pub ino: u64,
}

/// A host directory the core can resolve names in.
pub trait HostDir: Send + Sync {
    /// Look up `name` among this directory's entries. `Ok(None)` is a
    /// negative lookup; symbolic links are not followed.
    fn lookup(&self, name: &OsStr) -> io::Result<Option<Box<dyn HostNode>>>;
}

/// An existing host entry returned from [`HostDir::lookup`].
pub trait HostNode: Send {
    /// Identity of the entry.
    fn ident(&self) -> HostIdent;
    /// Kind of the entry.
    fn kind(&self) -> FileKind;
    /// Size of the entry in bytes.
    fn size(&self) -> u64;
    /// Open the entry as a directory.
    fn open_dir(&self) -> io::Result<Arc<dyn HostDir>>;
    /// Open the entry as a file with the caller's open flags.
    fn open_file(&self, flags: OpenFlags) -> io::Result<Box<dyn HostFile>>;
}

/// An open host file a virtual file handle delegates to.
pub trait HostFile: Send + Sync {
    /// Identity of the open file.
    fn ident(&self) -> HostIdent;
    /// Current length of the file.
    fn len(&self) -> io::Result<u64>;
    /// Read at `offset`, returning the number of bytes read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
    /// Map the whole file read-only and shared.
    fn mmap(&self) -> io::Result<Arc<HostMapping>>;
}

/// A read-only shared memory mapping of a host file.
///
/// The bytes view the live host file, so they change if the helper rewrites
/// the file in place; the mapping's identity never does.
pub struct HostMapping {
    ptr: Option<NonNull<c_void>>,
    map_len: usize,
    len: usize,
    ident: HostIdent,
}

// The mapping is read-only and owned; the raw pointer is only ever shared
// behind &self.
unsafe impl Send for HostMapping {}
unsafe impl Sync for HostMapping {}

impl HostMapping {
    /// Map `len` bytes of `fd` read-only and shared. A zero-length file
    /// yields an empty mapping without touching the page tables.
    pub fn map_file<F: AsFd>(fd: F, len: usize, ident: HostIdent) -> io::Result<HostMapping> {
        if len == 0 {
            return Ok(HostMapping {
                ptr: None,
                map_len: 0,
                len: 0,
                ident,
            });
        }
        let page = page_size::get();
        let map_len = len.div_ceil(page) * page;
        let length = NonZeroUsize::new(map_len)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        }
        .map_err(io::Error::from)?;
        Ok(HostMapping {
            ptr: Some(ptr),
            map_len,
            len,
            ident,
        })
    }

    /// Identity of the host file this mapping aliases.
    pub fn ident(&self) -> HostIdent {
        self.ident
    }

    /// Length of the mapped contents in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        match self.ptr {
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr().cast::<u8>(), self.len) },
            None => &[],
        }
    }
}

impl Drop for HostMapping {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            let _ = unsafe { munmap(ptr, self.map_len) };
        }
    }
}

impl fmt::Debug for HostMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMapping")
            .field("len", &self.len)
            .field("ident", &self.ident)
            .finish()
    }
}

fn kind_of_mode(mode: libc::mode_t) -> Option<FileKind> {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => Some(FileKind::Directory),
        libc::S_IFREG => Some(if mode & 0o111 != 0 {
            FileKind::Executable
        } else {
            FileKind::Regular
        }),
        libc::S_IFLNK => Some(FileKind::Symlink),
        _ => None,
    }
}

/// A host directory backed by an open directory descriptor.
#[derive(Clone, Debug)]
pub struct DiskDir {
    fd: Arc<OwnedFd>,
}

impl DiskDir {
    /// Open `path` as a backing directory.
    pub fn open(path: &Path) -> io::Result<DiskDir> {
        let fd = open(
            path,
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(io::Error::from)?;
        Ok(DiskDir { fd: Arc::new(fd) })
    }
}

impl HostDir for DiskDir {
    fn lookup(&self, name: &OsStr) -> io::Result<Option<Box<dyn HostNode>>> {
        let stat = match fstatat(&*self.fd, name, AtFlags::AT_SYMLINK_NOFOLLOW) {
            Ok(stat) => stat,
            Err(nix::errno::Errno::ENOENT) => return Ok(None),
            Err(err) => return Err(io::Error::from(err)),
        };
        if kind_of_mode(stat.st_mode).is_none() {
            // Sockets, fifos and devices have no place in a backing store.
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(Some(Box::new(DiskNode {
            dir: self.fd.clone(),
            name: name.to_os_string(),
            stat,
        })))
    }
}

struct DiskNode {
    dir: Arc<OwnedFd>,
    name: OsString,
    stat: FileStat,
}

impl HostNode for DiskNode {
    fn ident(&self) -> HostIdent {
        HostIdent {
            dev: self.stat.st_dev,
            ino: self.stat.st_ino,
        }
    }

    fn kind(&self) -> FileKind {
        kind_of_mode(self.stat.st_mode).expect("checked at lookup time")
    }

    fn size(&self) -> u64 {
        self.stat.st_size.max(0) as u64
    }

    fn open_dir(&self) -> io::Result<Arc<dyn HostDir>> {
        let fd = openat(
            &*self.dir,
            self.name.as_os_str(),
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(io::Error::from)?;
        Ok(Arc::new(DiskDir { fd: Arc::new(fd) }))
    }

    fn open_file(&self, flags: OpenFlags) -> io::Result<Box<dyn HostFile>> {
        let oflag =
            OFlag::from_bits_truncate(flags.0) | OFlag::O_CLOEXEC | OFlag::O_NOFOLLOW;
        let fd = openat(&*self.dir, self.name.as_os_str(), oflag, Mode::empty())
            .map_err(io::Error::from)?;
        let file = File::from(fd);
        let meta = file.metadata()?;
        Ok(Box::new(DiskFile {
            ident: HostIdent {
                dev: meta.dev(),
                ino: meta.ino(),
            },
            file,
        }))
    }
}

struct DiskFile {
    ident: HostIdent,
    file: File,
}

impl HostFile for DiskFile {
    fn ident(&self) -> HostIdent {
        self.ident
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        FileExt::read_at(&self.file, buf, offset)
    }

    fn mmap(&self) -> io::Result<Arc<HostMapping>> {
        let len = self.file.metadata()?.len() as usize;
        Ok(Arc::new(HostMapping::map_file(&self.file, len, self.ident)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn lookup_kinds_and_negatives() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("plain"), b"x").unwrap();
        fs::write(tmp.path().join("tool"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(tmp.path().join("tool"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();

        let dir = DiskDir::open(tmp.path()).unwrap();
        let plain = dir.lookup(OsStr::new("plain")).unwrap().unwrap();
        assert_eq!(plain.kind(), FileKind::Regular);
        assert_eq!(plain.size(), 1);
        let tool = dir.lookup(OsStr::new("tool")).unwrap().unwrap();
        assert_eq!(tool.kind(), FileKind::Executable);
        let sub = dir.lookup(OsStr::new("sub")).unwrap().unwrap();
        assert_eq!(sub.kind(), FileKind::Directory);
        assert!(dir.lookup(OsStr::new("missing")).unwrap().is_none());
    }

    #[test]
    fn read_and_map() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("data"), b"hello, mapping").unwrap();

        let dir = DiskDir::open(tmp.path()).unwrap();
        let node = dir.lookup(OsStr::new("data")).unwrap().unwrap();
        let file = node.open_file(OpenFlags::read_only()).unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(file.read_at(7, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"mappi");

        let mapping = file.mmap().unwrap();
        assert_eq!(mapping.bytes(), b"hello, mapping");
        assert_eq!(mapping.ident(), file.ident());
    }

    #[test]
    fn empty_file_maps_empty() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("empty"), b"").unwrap();
        let dir = DiskDir::open(tmp.path()).unwrap();
        let node = dir.lookup(OsStr::new("empty")).unwrap().unwrap();
        let file = node.open_file(OpenFlags::read_only()).unwrap();
        let mapping = file.mmap().unwrap();
        assert!(mapping.is_empty());
        assert_eq!(mapping.bytes(), b"");
    }
}
