//! Process control blocks.
//!
//! A fixed six-slot arena indexed by pid. Slot occupancy itself is owned by
//! the paging manager (the user PDE's present bit); the arena only carries
//! task state. The per-task kernel stacks keep their fixed addresses at the
//! top of the kernel large page, 8 KiB each, and feed TSS `esp0`.

use spin::Mutex;

use crate::arch::x86::context::Context;
use crate::arch::x86::interrupts::without_interrupts;
use crate::error::{KernelError, KernelResult};
use crate::mm::paging::KERNEL_END;

/// Fixed process-table arity.
pub const MAX_TASKS: usize = 6;
/// Open-file table arity.
pub const MAX_OPEN_FILES: usize = 8;
/// Argument buffer size; matches the keyboard line buffer's payload.
pub const ARG_BUFFER_LEN: usize = 128;
/// Per-task kernel stack size.
pub const KSTACK_SIZE: u32 = 0x2000;

pub type Pid = usize;

const NO_TASK: usize = usize::MAX;

/// What an open file descriptor is attached to. An in-use descriptor
/// always carries a valid variant, which is the vtable-non-null invariant
/// by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// FDs 0 and 1; readline on 0, console write on 1.
    Terminal,
    /// Regular file with a byte position.
    Regular { inode: u32 },
    /// Directory: position counts dentries.
    Directory,
    /// The RTC periodic device.
    Rtc,
}

/// One open-file-table entry.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    pub in_use: bool,
    pub kind: FileKind,
    pub pos: u32,
}

impl FileDescriptor {
    pub const fn closed() -> Self {
        Self {
            in_use: false,
            kind: FileKind::Terminal,
            pos: 0,
        }
    }

    pub const fn open(kind: FileKind) -> Self {
        Self {
            in_use: true,
            kind,
            pos: 0,
        }
    }
}

/// Per-task state.
pub struct Pcb {
    pub pid: Pid,
    /// None for the three bootstrap shells.
    pub parent: Option<Pid>,
    pub files: [FileDescriptor; MAX_OPEN_FILES],
    /// Kernel stack of the `execute` invocation that spawned this task;
    /// `halt` resumes it.
    pub parent_ctx: Context,
    /// Entry point, kept for restarting a bootstrap shell in place.
    pub entry: u32,
    pub args: [u8; ARG_BUFFER_LEN],
    pub arg_len: usize,
    /// Set once `vidmap` succeeded, so `halt` tears the mapping down.
    pub video_mapped: bool,
    /// Physical frame backing the user-video window, when mapped.
    pub video_backing: Option<u32>,
    /// Virtual terminal this task is bound to.
    pub terminal: usize,
}

impl Pcb {
    pub const fn empty(pid: Pid) -> Self {
        Self {
            pid,
            parent: None,
            files: [FileDescriptor::closed(); MAX_OPEN_FILES],
            parent_ctx: Context::empty(),
            entry: 0,
            args: [0; ARG_BUFFER_LEN],
            arg_len: 0,
            video_mapped: false,
            video_backing: None,
            terminal: 0,
        }
    }

    /// Reinitialize this slot for a newly loaded task.
    pub fn reset(&mut self, parent: Option<Pid>, terminal: usize, entry: u32) {
        self.parent = parent;
        self.files = [FileDescriptor::closed(); MAX_OPEN_FILES];
        self.parent_ctx = Context::empty();
        self.entry = entry;
        self.args = [0; ARG_BUFFER_LEN];
        self.arg_len = 0;
        self.video_mapped = false;
        self.video_backing = None;
        self.terminal = terminal;
    }

    /// Bind FDs 0 and 1 to the terminal device.
    pub fn bind_stdio(&mut self) {
        self.files[0] = FileDescriptor::open(FileKind::Terminal);
        self.files[1] = FileDescriptor::open(FileKind::Terminal);
    }

    /// Record the argument string, bounded at the buffer size.
    pub fn set_args(&mut self, args: &[u8]) {
        let n = args.len().min(ARG_BUFFER_LEN);
        self.args[..n].copy_from_slice(&args[..n]);
        if n < ARG_BUFFER_LEN {
            self.args[n] = 0;
        }
        self.arg_len = n;
    }

    /// First free descriptor from 2 up, claimed for `kind`.
    pub fn alloc_fd(&mut self, kind: FileKind) -> KernelResult<usize> {
        for fd in 2..MAX_OPEN_FILES {
            if !self.files[fd].in_use {
                self.files[fd] = FileDescriptor::open(kind);
                return Ok(fd);
            }
        }
        Err(KernelError::NoFreeSlot)
    }
}

static TABLE: Mutex<[Pcb; MAX_TASKS]> = Mutex::new([
    Pcb::empty(0),
    Pcb::empty(1),
    Pcb::empty(2),
    Pcb::empty(3),
    Pcb::empty(4),
    Pcb::empty(5),
]);

static CURRENT: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(NO_TASK);

/// Pid of the task currently on the CPU, if any task has ever been entered.
pub fn current_pid() -> Option<Pid> {
    let raw = CURRENT.load(core::sync::atomic::Ordering::Relaxed);
    if raw == NO_TASK {
        None
    } else {
        Some(raw)
    }
}

/// Rebind the current task. Scheduler, `execute` and `halt` only.
pub fn set_current(pid: Option<Pid>) {
    CURRENT.store(
        pid.unwrap_or(NO_TASK),
        core::sync::atomic::Ordering::Relaxed,
    );
}

/// Run `f` against one PCB with interrupts disabled.
pub fn with_pcb<R>(pid: Pid, f: impl FnOnce(&mut Pcb) -> R) -> R {
    without_interrupts(|| f(&mut TABLE.lock()[pid]))
}

/// Run `f` against the current task's PCB.
pub fn with_current<R>(f: impl FnOnce(&mut Pcb) -> R) -> Option<R> {
    current_pid().map(|pid| with_pcb(pid, f))
}

/// The virtual terminal owning the current task's output (0 before any
/// task exists).
pub fn current_terminal() -> usize {
    with_current(|pcb| pcb.terminal).unwrap_or(0)
}

/// Raw pointer to a PCB's parent context slot, for the stack-switch stubs.
/// Callers use it with interrupts disabled, after this lock is released.
pub fn parent_ctx_ptr(pid: Pid) -> *mut Context {
    without_interrupts(|| {
        let mut table = TABLE.lock();
        core::ptr::addr_of_mut!(table[pid].parent_ctx)
    })
}

/// Top of task `pid`'s kernel stack: 8 KiB slices carved down from the end
/// of the kernel large page, with a small alignment offset.
pub fn kernel_stack_top(pid: Pid) -> u32 {
    KERNEL_END - pid as u32 * KSTACK_SIZE - 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_tops_descend_by_8k_from_kernel_end() {
        assert_eq!(kernel_stack_top(0), 0x007F_FFF8);
        assert_eq!(kernel_stack_top(1), 0x007F_DFF8);
        assert_eq!(kernel_stack_top(5), 0x007F_5FF8);
    }

    #[test]
    fn fd_allocation_starts_at_2_and_exhausts() {
        let mut pcb = Pcb::empty(0);
        pcb.bind_stdio();
        for expect in 2..MAX_OPEN_FILES {
            assert_eq!(pcb.alloc_fd(FileKind::Directory).unwrap(), expect);
        }
        assert_eq!(
            pcb.alloc_fd(FileKind::Directory).unwrap_err(),
            KernelError::NoFreeSlot
        );
    }

    #[test]
    fn stdio_binding_claims_0_and_1_only() {
        let mut pcb = Pcb::empty(3);
        pcb.bind_stdio();
        assert!(pcb.files[0].in_use && pcb.files[1].in_use);
        assert_eq!(pcb.files[0].kind, FileKind::Terminal);
        assert!(!pcb.files[2].in_use);
    }

    #[test]
    fn args_are_bounded_and_terminated() {
        let mut pcb = Pcb::empty(0);
        pcb.set_args(b"arg1 arg2");
        assert_eq!(pcb.arg_len, 9);
        assert_eq!(&pcb.args[..10], b"arg1 arg2\0");

        let long = [b'x'; 200];
        pcb.set_args(&long);
        assert_eq!(pcb.arg_len, ARG_BUFFER_LEN);
    }

    #[test]
    fn reset_clears_task_state() {
        let mut pcb = Pcb::empty(2);
        pcb.bind_stdio();
        pcb.video_mapped = true;
        pcb.set_args(b"stale");
        pcb.reset(Some(1), 2, 0x0804_8123);
        assert!(!pcb.files[0].in_use);
        assert!(!pcb.video_mapped);
        assert_eq!(pcb.arg_len, 0);
        assert_eq!(pcb.parent, Some(1));
        assert_eq!(pcb.terminal, 2);
        assert_eq!(pcb.entry, 0x0804_8123);
    }
}
