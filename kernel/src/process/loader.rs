//! Program loader.
//!
//! `load` resolves a name, checks the ELF magic, claims a process slot
//! (which switches CR3 to the new address space) and copies the whole image
//! into the user window. The entry point is the 32-bit little-endian word
//! at header offset 24.

use crate::error::{KernelError, KernelResult};
use crate::fs;
use crate::mm::paging;
use crate::process::pcb::Pid;

/// Virtual address executables are linked for.
pub const LOAD_ADDR: u32 = 0x0804_8000;
/// Initial user stack pointer, at the top of the user window.
pub const USER_STACK_TOP: u32 = paging::USER_VIRT_BASE + paging::USER_WINDOW_SIZE;

/// Bytes of header consulted before committing to a load.
pub const HEADER_LEN: usize = 40;
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ENTRY_OFFSET: usize = 24;

/// A freshly loaded program: the slot it owns and where it starts.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    pub pid: Pid,
    pub entry: u32,
}

/// Validate the magic prefix and extract the entry point.
pub fn validate_header(head: &[u8; HEADER_LEN]) -> KernelResult<u32> {
    if head[..4] != ELF_MAGIC {
        return Err(KernelError::NotExecutable);
    }
    Ok(u32::from_le_bytes([
        head[ENTRY_OFFSET],
        head[ENTRY_OFFSET + 1],
        head[ENTRY_OFFSET + 2],
        head[ENTRY_OFFSET + 3],
    ]))
}

/// Load `name` into a fresh address space.
///
/// On success CR3 points at the new task's directory and the image sits at
/// [`LOAD_ADDR`]. Failures before slot allocation leave paging untouched;
/// a copy failure releases the slot and switches back to the caller's
/// address space.
pub fn load(name: &[u8]) -> KernelResult<LoadedImage> {
    let volume = fs::root()?;
    let dentry = volume.read_dentry_by_name(name)?;

    let mut head = [0u8; HEADER_LEN];
    if volume.read_bytes(dentry.inode, 0, &mut head) != HEADER_LEN {
        return Err(KernelError::NotExecutable);
    }
    let entry = validate_header(&head)?;
    let size = volume.inode_len(dentry.inode) as usize;
    if size > (USER_STACK_TOP - LOAD_ADDR) as usize {
        return Err(KernelError::Io);
    }

    let pid = paging::new_address_space()?;

    #[cfg(target_arch = "x86")]
    {
        // SAFETY: new_address_space just mapped this task's 4 MiB window
        // and the size check above keeps the copy inside it.
        let window = unsafe { core::slice::from_raw_parts_mut(LOAD_ADDR as *mut u8, size) };
        if volume.read_bytes(dentry.inode, 0, window) != size {
            paging::release_slot(pid);
            if let Some(caller) = crate::process::current_pid() {
                paging::switch_to(caller);
            }
            return Err(KernelError::Io);
        }
    }

    Ok(LoadedImage { pid, entry })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(magic: &[u8; 4], entry: u32) -> [u8; HEADER_LEN] {
        let mut head = [0u8; HEADER_LEN];
        head[..4].copy_from_slice(magic);
        head[ENTRY_OFFSET..ENTRY_OFFSET + 4].copy_from_slice(&entry.to_le_bytes());
        head
    }

    #[test]
    fn accepts_elf_magic_and_reads_entry_little_endian() {
        let head = header_with(&[0x7F, b'E', b'L', b'F'], 0x0804_90A4);
        assert_eq!(validate_header(&head).unwrap(), 0x0804_90A4);
    }

    #[test]
    fn rejects_non_elf_images() {
        let head = header_with(b"#!sh", 0x0804_8000);
        assert_eq!(
            validate_header(&head).unwrap_err(),
            KernelError::NotExecutable
        );
        let almost = header_with(&[0x7F, b'E', b'L', b'G'], 0);
        assert!(validate_header(&almost).is_err());
    }
}
