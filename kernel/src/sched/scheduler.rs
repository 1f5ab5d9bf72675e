//! The timer-driven scheduler.
//!
//! Every PIT tick acknowledges the interrupt, then either bootstraps one
//! of the three shells (until slot 2 of the queue is occupied) or rotates
//! the queue to the next enabled task: retarget TSS `esp0`, swap the page
//! directory, rebind the current PCB and switch kernel stacks. The
//! preemption cost is one CR3 load and the TLB flush it implies.
//!
//! Stack discipline: a task leaves the CPU either through
//! [`crate::arch::x86::context::switch`] here, or by parking itself in the
//! bootstrap path before `execute` irets away. Both record the resume
//! point inside this handler, so a task that wins rotation continues right
//! here and falls through the ISR wrapper's iret into whatever it was
//! doing when its own quantum ended.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch::x86::context::{self, Context};
use crate::arch::x86::gdt;
use crate::arch::x86::interrupts::{self, without_interrupts};
use crate::console;
use crate::drivers::pic;
use crate::drivers::pit::PIT_IRQ;
use crate::mm::paging;
use crate::process::pcb;
use crate::sched::queue::{QueueEntry, TaskQueue, TaskState};

static QUEUE: Mutex<TaskQueue> = Mutex::new(TaskQueue::new());

/// Terminal index handed to the next bootstrap shell.
static SHELL_TERMINAL: AtomicUsize = AtomicUsize::new(0);

/// Bootstrap is done once a task occupies queue slot 2: all three shells
/// have been started.
pub fn bootstrap_complete() -> bool {
    without_interrupts(|| QUEUE.lock().slot(2).is_some())
}

/// `execute` path: child takes the queue front so it preempts its parent
/// immediately; a real parent sleeps until `halt` wakes it.
pub fn install_child(pid: pcb::Pid, sleep_parent: bool) {
    without_interrupts(|| {
        QUEUE
            .lock()
            .install_front(QueueEntry::running(pid), sleep_parent)
    });
}

/// `halt` path: the exiting head is replaced by its parent, runnable again.
pub fn promote(parent: pcb::Pid) {
    without_interrupts(|| QUEUE.lock().promote_to_front(parent));
}

/// The PIT tick handler body, entered through the ISR wrapper.
pub extern "C" fn timer_tick() {
    pic::eoi(PIT_IRQ);

    let bootstrapping = QUEUE.lock().slot(2).is_none();
    if bootstrapping {
        spawn_shell();
        return;
    }

    let switch_pair = {
        let mut q = QUEUE.lock();
        let current = match q.head() {
            Some(head) => head.pid,
            None => return,
        };
        if let Some(head) = q.head_mut() {
            head.state = TaskState::Runnable;
        }
        if !q.advance() {
            // Nothing else is runnable; the current head keeps its quantum.
            if let Some(head) = q.head_mut() {
                head.state = TaskState::Running;
            }
            return;
        }
        let next = match q.head() {
            Some(head) => head.pid,
            None => return,
        };
        if let Some(head) = q.head_mut() {
            head.state = TaskState::Running;
        }
        match (q.ctx_ptr_of(current), q.ctx_ptr_of(next)) {
            (Some(save), Some(load)) => Some((save, load as *const Context, next)),
            _ => None,
        }
    };
    let Some((save, load, next)) = switch_pair else {
        return;
    };

    gdt::set_kernel_stack(pcb::kernel_stack_top(next));
    paging::switch_to(next);
    pcb::set_current(Some(next));
    // SAFETY: both pointers target live queue entries; interrupts are
    // disabled (interrupt gate) and stay so until the iret of whichever
    // task runs next. When this task wins rotation again, execution
    // continues here and unwinds through the ISR wrapper.
    unsafe { context::switch(save, load) };
}

/// One bootstrap step: park the preempted task (if any), then start a
/// shell bound to the next virtual terminal. `execute` irets straight into
/// the new shell, so this never returns on success.
fn spawn_shell() {
    let parked = QUEUE.lock().head_ctx_ptr();
    if let Some(ctx) = parked {
        // SAFETY: ctx points at the head entry of the static queue; the
        // recording pass returns 0, and a later rotation reenters here
        // with a nonzero value, unwinding this invocation to its iret.
        if unsafe { context::save(ctx) } != 0 {
            return;
        }
    }

    interrupts::enable();
    let terminal = SHELL_TERMINAL.fetch_add(1, Ordering::Relaxed);
    console::set_override(terminal);
    console::switch_to(terminal);
    if let Err(err) = crate::process::execute(b"shell") {
        log::error!("shell spawn on terminal {} failed: {}", terminal, err);
    }
}
