use std::error;
use std::fmt;
use std::io;

use crate::Errno;

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error that may occur while operating on the lazy filesystem.
///
/// Each variant carries the reason a surface operation failed; the errno a
/// caller of the filesystem would observe is available via [`Error::errno`].
#[derive(Debug)]
pub enum Error {
    /// A fetch was needed but no helper is bound.
    NoHelper,
    /// The host directory is missing its `...` listing file.
    NoManifest,
    /// The `...` listing file does not follow the manifest grammar.
    InvalidManifest,
    /// The manifest-declared kind disagrees with the host entry's kind.
    KindMismatch,
    /// The `...` listing file exceeds the size cap.
    TooLarge,
    /// Allocation failed while loading a manifest or creating a node.
    OutOfMemory,
    /// A second helper tried to bind, or a mapping would be re-aliased to a
    /// different host file.
    Busy,
    /// The task was cancelled while sleeping.
    Interrupted,
    /// The operation falls outside the read-only surface.
    NotSupported,
    /// A sibling of that name already exists.
    Exists,
    /// A malformed argument, such as a helper read buffer below the minimum.
    InvalidArgument,
    /// An error from the host filesystem.
    Io(io::Error),
}

impl Error {
    /// The OS error code this error surfaces as.
    pub fn errno(&self) -> Errno {
        match self {
            Error::NoHelper => Errno::EIO,
            Error::NoManifest => Errno::EIO,
            Error::InvalidManifest => Errno::EIO,
            Error::KindMismatch => Errno::EIO,
            Error::TooLarge => Errno::E2BIG,
            Error::OutOfMemory => Errno::ENOMEM,
            Error::Busy => Errno::EBUSY,
            Error::Interrupted => Errno::EINTR,
            Error::NotSupported => Errno::EROFS,
            Error::Exists => Errno::EEXIST,
            Error::InvalidArgument => Errno::EINVAL,
            Error::Io(err) => Errno::from(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoHelper => write!(f, "no fetch helper is bound"),
            Error::NoManifest => write!(f, "host directory has no '...' listing"),
            Error::InvalidManifest => write!(f, "'...' listing file is invalid"),
            Error::KindMismatch => write!(f, "host entry kind disagrees with the listing"),
            Error::TooLarge => write!(f, "'...' listing file is too big"),
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::Busy => write!(f, "resource busy"),
            Error::Interrupted => write!(f, "interrupted while sleeping"),
            Error::NotSupported => write!(f, "operation not supported on a read-only mount"),
            Error::Exists => write!(f, "sibling of that name already exists"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::Io(err) => write!(f, "host I/O error: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
