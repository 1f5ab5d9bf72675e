//! System-call dispatch.
//!
//! The trampoline at vector 0x80 hands over `(eax, ebx, ecx, edx)`;
//! [`syscall_dispatch`] validates the number, checks every user pointer
//! against the user window, and maps any [`KernelError`] to `-1` on the
//! way back to the accumulator.

pub mod file;

use crate::console;
use crate::error::{KernelError, KernelResult};
use crate::mm::paging::{self, USER_VIRT_BASE, USER_WINDOW_SIZE, VIDEO_PHYS};
use crate::process::{self, pcb};

/// Highest assigned system-call number (9 and 10 are reserved and fail).
pub const MAX_SYSCALL: u32 = 10;

/// Scratch for a copied-in command line: name, separator, argument string.
const COMMAND_BUF: usize = 192;

/// C-style entry point reached from the vector-0x80 trampoline.
#[no_mangle]
pub extern "C" fn syscall_dispatch(num: u32, a: u32, b: u32, c: u32) -> i32 {
    let result: KernelResult<i32> = match num {
        1 => process::halt(a & 0xFF),
        2 => sys_execute(a),
        3 => sys_read(a, b, c),
        4 => sys_write(a, b, c),
        5 => sys_open(a),
        6 => sys_close(a),
        7 => sys_getargs(a, b),
        8 => sys_vidmap(a),
        _ => Err(KernelError::InvalidArg),
    };
    match result {
        Ok(value) => value,
        Err(err) => err.as_retval(),
    }
}

/// Reject any buffer that does not lie wholly inside the user window.
fn check_user_range(ptr: u32, len: u32) -> KernelResult<()> {
    let end = ptr.checked_add(len).ok_or(KernelError::InvalidArg)?;
    if ptr < USER_VIRT_BASE || end > USER_VIRT_BASE + USER_WINDOW_SIZE {
        return Err(KernelError::InvalidArg);
    }
    Ok(())
}

/// View a user buffer as a mutable slice.
///
/// # Safety
/// The current CR3 must map the user window of the calling task; callers
/// only reach this from that task's own system call.
unsafe fn user_slice_mut(ptr: u32, len: u32) -> KernelResult<&'static mut [u8]> {
    check_user_range(ptr, len)?;
    // SAFETY: range-checked above; the window is mapped per the contract.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as usize as *mut u8, len as usize) })
}

/// View a user buffer as a shared slice.
///
/// # Safety
/// As [`user_slice_mut`].
unsafe fn user_slice(ptr: u32, len: u32) -> KernelResult<&'static [u8]> {
    check_user_range(ptr, len)?;
    // SAFETY: range-checked above; the window is mapped per the contract.
    Ok(unsafe { core::slice::from_raw_parts(ptr as usize as *const u8, len as usize) })
}

/// Copy a NUL-terminated user string into `dst`; returns the byte count.
fn copy_user_cstr(ptr: u32, dst: &mut [u8]) -> KernelResult<usize> {
    check_user_range(ptr, 1)?;
    let window_end = USER_VIRT_BASE + USER_WINDOW_SIZE;
    for (i, slot) in dst.iter_mut().enumerate() {
        let addr = ptr + i as u32;
        if addr >= window_end {
            return Ok(i);
        }
        // SAFETY: addr is inside the mapped user window.
        let byte = unsafe { core::ptr::read_volatile(addr as usize as *const u8) };
        if byte == 0 {
            return Ok(i);
        }
        *slot = byte;
    }
    Ok(dst.len())
}

fn sys_execute(cmd_ptr: u32) -> KernelResult<i32> {
    let mut line = [0u8; COMMAND_BUF];
    let n = copy_user_cstr(cmd_ptr, &mut line)?;
    process::execute(&line[..n])
}

fn sys_read(fd: u32, buf: u32, len: u32) -> KernelResult<i32> {
    let fd = fd as usize;
    file::check_open(fd)?;
    // SAFETY: this task's user window is mapped while it traps.
    let slice = unsafe { user_slice_mut(buf, len)? };
    file::read(fd, slice)
}

fn sys_write(fd: u32, buf: u32, len: u32) -> KernelResult<i32> {
    let fd = fd as usize;
    file::check_open(fd)?;
    // SAFETY: this task's user window is mapped while it traps.
    let slice = unsafe { user_slice(buf, len)? };
    file::write(fd, slice)
}

fn sys_open(path_ptr: u32) -> KernelResult<i32> {
    // One byte longer than a valid name, so an overlong one survives the
    // copy and is rejected by the resolver.
    let mut name = [0u8; 33];
    let n = copy_user_cstr(path_ptr, &mut name)?;
    file::open(&name[..n])
}

fn sys_close(fd: u32) -> KernelResult<i32> {
    file::close(fd as usize)
}

fn sys_getargs(buf: u32, len: u32) -> KernelResult<i32> {
    let (args, arg_len) =
        pcb::with_current(|p| (p.args, p.arg_len)).ok_or(KernelError::InvalidFd)?;
    // Empty arguments and arguments that would not fit (with their NUL)
    // both fail; the child can trust a 0 return completely.
    if arg_len == 0 || arg_len as u32 + 1 > len {
        return Err(KernelError::InvalidArg);
    }
    // SAFETY: this task's user window is mapped while it traps.
    let slice = unsafe { user_slice_mut(buf, len)? };
    slice.fill(0);
    slice[..arg_len].copy_from_slice(&args[..arg_len]);
    Ok(0)
}

fn sys_vidmap(screen_start: u32) -> KernelResult<i32> {
    check_user_range(screen_start, 4)?;
    let pid = pcb::current_pid().ok_or(KernelError::InvalidArg)?;
    let (mapped, terminal) = pcb::with_pcb(pid, |p| (p.video_mapped, p.terminal));
    if mapped {
        return Err(KernelError::InvalidArg);
    }
    // A task whose terminal owns the screen writes the live frame; anyone
    // else gets one of the reserved off-screen backing frames.
    let backing = if console::active_index() == terminal {
        VIDEO_PHYS
    } else {
        paging::alloc_offscreen_video()?
    };
    paging::map_user_video(pid, backing);
    pcb::with_pcb(pid, |p| {
        p.video_mapped = true;
        p.video_backing = Some(backing);
    });
    let addr = paging::user_video_virt(pid);
    // SAFETY: screen_start was range-checked for 4 bytes.
    unsafe { core::ptr::write_volatile(screen_start as usize as *mut u32, addr) };
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::file::tests::with_task;
    use super::*;

    #[test]
    fn unknown_numbers_fail_with_minus_one() {
        for num in [0, 9, 10, 11, 200] {
            assert_eq!(syscall_dispatch(num, 0, 0, 0), -1);
        }
    }

    #[test]
    fn pointers_outside_the_user_window_are_rejected() {
        assert!(check_user_range(0, 16).is_err());
        assert!(check_user_range(0x0040_0000, 16).is_err());
        assert!(check_user_range(USER_VIRT_BASE - 1, 1).is_err());
        assert!(check_user_range(USER_VIRT_BASE + USER_WINDOW_SIZE - 4, 8).is_err());
        assert!(check_user_range(u32::MAX, 2).is_err());
        assert!(check_user_range(USER_VIRT_BASE, USER_WINDOW_SIZE).is_ok());
        assert!(check_user_range(USER_VIRT_BASE + 0x1000, 128).is_ok());
    }

    #[test]
    fn read_with_bad_fd_fails_before_touching_the_buffer() {
        with_task(4, || {
            // fd 7 is free; the kernel pointer in `buf` must never be
            // dereferenced because the fd check fires first.
            assert_eq!(syscall_dispatch(3, 7, 0, 16), -1);
        });
    }

    #[test]
    fn getargs_demands_nonempty_args_that_fit() {
        with_task(4, || {
            pcb::with_current(|p| p.set_args(b"")).unwrap();
            assert_eq!(syscall_dispatch(7, USER_VIRT_BASE, 64, 0), -1);

            pcb::with_current(|p| p.set_args(b"some arguments")).unwrap();
            // 14 bytes of args need at least 15 bytes of buffer.
            assert_eq!(syscall_dispatch(7, USER_VIRT_BASE, 14, 0), -1);
        });
    }

    #[test]
    fn vidmap_validates_the_pointer_cell() {
        with_task(4, || {
            assert_eq!(syscall_dispatch(8, 0, 0, 0), -1);
            assert_eq!(
                syscall_dispatch(8, USER_VIRT_BASE + USER_WINDOW_SIZE - 2, 0, 0),
                -1
            );
        });
    }

    #[test]
    fn execute_rejects_a_command_pointer_outside_the_window() {
        with_task(4, || {
            assert_eq!(syscall_dispatch(2, 0x1000, 0, 0), -1);
        });
    }
}
