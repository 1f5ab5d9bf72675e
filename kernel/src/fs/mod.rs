//! Read-only file system.
//!
//! The boot shim hands over the address and length of the in-memory file
//! system image; [`bind`] wraps it in a [`volume::Volume`] that the loader
//! and the file syscalls read through.

pub mod volume;

use spin::Once;

use crate::error::{KernelError, KernelResult};
use volume::Volume;

static ROOT: Once<Volume<'static>> = Once::new();

/// Adopt the boot-time file system image.
pub fn bind(image: &'static [u8]) -> KernelResult<()> {
    let volume = Volume::new(image)?;
    let mut fresh = false;
    ROOT.call_once(|| {
        fresh = true;
        volume
    });
    if fresh {
        log::info!(
            "file system: {} dentries, {} inodes, {} data blocks",
            root()?.dentry_count(),
            root()?.inode_count(),
            root()?.data_block_count()
        );
        Ok(())
    } else {
        Err(KernelError::InvalidArg)
    }
}

/// The mounted volume.
pub fn root() -> KernelResult<&'static Volume<'static>> {
    ROOT.get().ok_or(KernelError::Io)
}
