//! Kernel-wide error type.
//!
//! Internal APIs return [`KernelResult`]; the discriminant is collapsed to
//! `-1` exactly once, at the system-call boundary.

use core::fmt;

/// Everything that can go wrong inside the kernel, as seen by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Name did not resolve to a directory entry.
    NotFound,
    /// File exists but does not start with the ELF magic.
    NotExecutable,
    /// A fixed-capacity table (process slots, file descriptors) is full.
    NoFreeSlot,
    /// File descriptor out of range or not in use.
    InvalidFd,
    /// Null or out-of-window buffer, bad length, unknown syscall number.
    InvalidArg,
    /// Operation is forbidden (e.g. closing fd 0 or 1).
    Permission,
    /// Write to the read-only file system or an unsupported device.
    Io,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFound => "not found",
            Self::NotExecutable => "not an executable",
            Self::NoFreeSlot => "no free slot",
            Self::InvalidFd => "invalid file descriptor",
            Self::InvalidArg => "invalid argument",
            Self::Permission => "permission denied",
            Self::Io => "I/O error",
        };
        f.write_str(msg)
    }
}

impl KernelError {
    /// The architectural return value user code sees for any failure.
    pub const fn as_retval(self) -> i32 {
        -1
    }
}
