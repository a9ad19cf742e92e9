use std::fmt;
use std::io;

use libc::c_int;

/// An OS error code, as surfaced to callers of the filesystem operations.
///
/// Every [`Error`](crate::Error) in this crate maps onto one of these via
/// [`Error::errno`](crate::Error::errno), mirroring how the operations of a
/// kernel filesystem report failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Errno(pub c_int);

impl Errno {
    /// Argument list too long / object too big.
    pub const E2BIG: Errno = Errno(libc::E2BIG);
    /// Device or resource busy.
    pub const EBUSY: Errno = Errno(libc::EBUSY);
    /// File exists.
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    /// Interrupted system call.
    pub const EINTR: Errno = Errno(libc::EINTR);
    /// Invalid argument.
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    /// Input/output error.
    pub const EIO: Errno = Errno(libc::EIO);
    /// Is a directory.
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    /// No such file or directory.
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    /// Out of memory.
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    /// Not a directory.
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    /// Read-only filesystem.
    pub const EROFS: Errno = Errno(libc::EROFS);

    /// The raw OS error code.
    pub fn code(self) -> c_int {
        self.0
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}

impl From<Errno> for io::Error {
    fn from(errno: Errno) -> io::Error {
        io::Error::from_raw_os_error(errno.0)
    }
}

impl From<&io::Error> for Errno {
    fn from(err: &io::Error) -> Errno {
        Errno(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_round_trip() {
        let err = io::Error::from(Errno::EBUSY);
        assert_eq!(Errno::from(&err), Errno::EBUSY);
    }
}
