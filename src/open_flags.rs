use std::fmt;

/// Flags that mutate the opened file even under a read-only access mode.
const WRITE_SIDE_EFFECTS: i32 = libc::O_TRUNC | libc::O_APPEND | libc::O_CREAT;

/// Open flags as passed to the open operation and forwarded to the host
/// file at pairing time.
///
/// The mount is read-only, so the only question the surface ever asks of
/// the flags is whether they smuggle in write access; everything else
/// rides through to the host open untouched.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct OpenFlags(pub i32);

impl OpenFlags {
    /// Plain read-only open, the common case on this surface.
    pub fn read_only() -> OpenFlags {
        OpenFlags(libc::O_RDONLY)
    }

    /// Whether the flags request any write access, either through the
    /// access mode or through a side-effecting flag like `O_TRUNC`.
    pub fn wants_write(self) -> bool {
        (self.0 & libc::O_ACCMODE) != libc::O_RDONLY || (self.0 & WRITE_SIDE_EFFECTS) != 0
    }
}

impl fmt::Debug for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpenFlags({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_detection() {
        assert!(!OpenFlags::read_only().wants_write());
        assert!(!OpenFlags(libc::O_RDONLY | libc::O_NOFOLLOW).wants_write());
        assert!(OpenFlags(libc::O_WRONLY).wants_write());
        assert!(OpenFlags(libc::O_RDWR).wants_write());
        assert!(OpenFlags(libc::O_RDONLY | libc::O_TRUNC).wants_write());
        assert!(OpenFlags(libc::O_RDONLY | libc::O_CREAT).wants_write());
    }
}
