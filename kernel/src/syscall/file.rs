//! File-descriptor operations, dispatched on [`FileKind`].
//!
//! One match over the descriptor's kind instead of a table of function
//! pointers, so kernel control flow stays inspectable: terminals read
//! lines and
//! write bytes, regular files read at a position, directories enumerate
//! dentry names one per call, the RTC blocks until its next interrupt.

use crate::console;
use crate::drivers::rtc;
use crate::error::{KernelError, KernelResult};
use crate::fs;
use crate::fs::volume::FileType;
use crate::process::pcb::{self, FileDescriptor, FileKind, MAX_OPEN_FILES};

/// Fail unless `fd` is in range and open in the current task.
pub fn check_open(fd: usize) -> KernelResult<()> {
    descriptor_kind(fd).map(|_| ())
}

fn descriptor_kind(fd: usize) -> KernelResult<FileKind> {
    if fd >= MAX_OPEN_FILES {
        return Err(KernelError::InvalidFd);
    }
    pcb::with_current(|p| {
        if p.files[fd].in_use {
            Ok(p.files[fd].kind)
        } else {
            Err(KernelError::InvalidFd)
        }
    })
    .ok_or(KernelError::InvalidFd)?
}

/// `read(fd, buf, n)`.
pub fn read(fd: usize, buf: &mut [u8]) -> KernelResult<i32> {
    match descriptor_kind(fd)? {
        FileKind::Terminal => {
            // Line input only makes sense on stdin.
            if fd != 0 {
                return Err(KernelError::InvalidFd);
            }
            Ok(console::readline(buf) as i32)
        }
        FileKind::Regular { inode } => {
            let pos = pcb::with_current(|p| p.files[fd].pos).ok_or(KernelError::InvalidFd)?;
            let copied = fs::root()?.read_bytes(inode, pos, buf);
            pcb::with_current(|p| p.files[fd].pos += copied as u32);
            Ok(copied as i32)
        }
        FileKind::Directory => {
            let pos = pcb::with_current(|p| p.files[fd].pos).ok_or(KernelError::InvalidFd)?;
            match fs::root()?.read_dentry_by_index(pos) {
                Ok(dentry) => {
                    let name = dentry.name_bytes();
                    let n = name.len().min(buf.len());
                    buf[..n].copy_from_slice(&name[..n]);
                    pcb::with_current(|p| p.files[fd].pos += 1);
                    Ok(n as i32)
                }
                // The k-th call past the last dentry reads nothing.
                Err(_) => Ok(0),
            }
        }
        FileKind::Rtc => {
            rtc::wait_for_tick();
            Ok(0)
        }
    }
}

/// `write(fd, buf, n)`.
pub fn write(fd: usize, buf: &[u8]) -> KernelResult<i32> {
    match descriptor_kind(fd)? {
        FileKind::Terminal => {
            if fd != 1 {
                return Err(KernelError::InvalidFd);
            }
            Ok(console::write_bytes(buf) as i32)
        }
        // The file system is read-only.
        FileKind::Regular { .. } | FileKind::Directory => Err(KernelError::Io),
        FileKind::Rtc => {
            // The RTC accepts exactly one 4-byte frequency.
            if buf.len() != 4 {
                return Err(KernelError::InvalidArg);
            }
            let hz = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            rtc::set_frequency(hz)?;
            Ok(0)
        }
    }
}

/// `open(path)`: resolve the dentry and claim a descriptor of its type.
pub fn open(name: &[u8]) -> KernelResult<i32> {
    let dentry = fs::root()?.read_dentry_by_name(name)?;
    let kind = match dentry.ftype {
        FileType::Rtc => FileKind::Rtc,
        FileType::Directory => FileKind::Directory,
        FileType::Regular => FileKind::Regular {
            inode: dentry.inode,
        },
    };
    if dentry.ftype == FileType::Rtc {
        rtc::set_frequency(rtc::DEFAULT_HZ)?;
    }
    let fd = pcb::with_current(|p| p.alloc_fd(kind)).ok_or(KernelError::InvalidFd)??;
    Ok(fd as i32)
}

/// `close(fd)`: never 0 or 1; closing a free descriptor fails, so closing
/// twice returns 0 then -1.
pub fn close(fd: usize) -> KernelResult<i32> {
    if fd == 0 || fd == 1 {
        return Err(KernelError::Permission);
    }
    if fd >= MAX_OPEN_FILES {
        return Err(KernelError::InvalidFd);
    }
    pcb::with_current(|p| {
        if !p.files[fd].in_use {
            return Err(KernelError::InvalidFd);
        }
        p.files[fd] = FileDescriptor::closed();
        Ok(0)
    })
    .ok_or(KernelError::InvalidFd)?
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;

    // The PCB table and CURRENT are process-wide; tests that bind a
    // current task take this lock so they cannot interleave.
    pub(in crate::syscall) static CURRENT_TASK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    pub(in crate::syscall) fn with_task<R>(pid: usize, f: impl FnOnce() -> R) -> R {
        let _guard = CURRENT_TASK.lock().unwrap_or_else(|e| e.into_inner());
        pcb::with_pcb(pid, |p| {
            p.reset(None, 0, 0);
            p.bind_stdio();
        });
        pcb::set_current(Some(pid));
        let out = f();
        pcb::set_current(None);
        out
    }

    #[test]
    fn read_of_free_descriptor_is_invalid() {
        with_task(5, || {
            let mut buf = [0u8; 4];
            assert_eq!(read(7, &mut buf).unwrap_err(), KernelError::InvalidFd);
            assert_eq!(read(42, &mut buf).unwrap_err(), KernelError::InvalidFd);
        });
    }

    #[test]
    fn close_is_rejected_for_stdio_and_idempotent_otherwise() {
        with_task(5, || {
            assert_eq!(close(0).unwrap_err(), KernelError::Permission);
            assert_eq!(close(1).unwrap_err(), KernelError::Permission);

            let fd = pcb::with_current(|p| p.alloc_fd(FileKind::Directory))
                .unwrap()
                .unwrap();
            assert_eq!(close(fd).unwrap(), 0);
            assert_eq!(close(fd).unwrap_err(), KernelError::InvalidFd);
        });
    }

    #[test]
    fn terminal_write_requires_stdout() {
        with_task(5, || {
            assert_eq!(write(0, b"x").unwrap_err(), KernelError::InvalidFd);
        });
    }

    #[test]
    fn regular_and_directory_writes_hit_the_readonly_wall() {
        with_task(5, || {
            let fd = pcb::with_current(|p| p.alloc_fd(FileKind::Regular { inode: 0 }))
                .unwrap()
                .unwrap();
            assert_eq!(write(fd, b"data").unwrap_err(), KernelError::Io);
            close(fd).unwrap();

            let fd = pcb::with_current(|p| p.alloc_fd(FileKind::Directory))
                .unwrap()
                .unwrap();
            assert_eq!(write(fd, b"data").unwrap_err(), KernelError::Io);
            close(fd).unwrap();
        });
    }

    #[test]
    fn rtc_write_validates_shape_and_rate() {
        with_task(5, || {
            let fd = pcb::with_current(|p| p.alloc_fd(FileKind::Rtc))
                .unwrap()
                .unwrap();
            assert_eq!(
                write(fd, b"\x02\x00\x00").unwrap_err(),
                KernelError::InvalidArg
            );
            assert_eq!(
                write(fd, &3u32.to_le_bytes()).unwrap_err(),
                KernelError::InvalidArg
            );
            assert_eq!(write(fd, &4u32.to_le_bytes()).unwrap(), 0);
            close(fd).unwrap();
        });
    }

    #[test]
    fn open_without_a_mounted_volume_fails_cleanly() {
        with_task(5, || {
            // No image is bound in the test process; the FD table must be
            // left untouched by the failure.
            assert!(open(b"shell").is_err());
            assert!(pcb::with_current(|p| !p.files[2].in_use).unwrap());
        });
    }
}
