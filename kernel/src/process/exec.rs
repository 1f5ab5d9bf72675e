//! `execute` and `halt`: the user/kernel boundary of task lifetimes.
//!
//! `execute` parses the command line, loads the image, builds the child
//! PCB, installs the child at the front of the ready queue and irets to
//! ring 3. The parent's kernel stack is parked in the child's PCB; `halt`
//! resumes it there, so from the parent's point of view `execute` simply
//! returns the child's status much later.

use crate::arch::x86::context::{self, Context};
use crate::arch::x86::gdt;
use crate::arch::x86::interrupts;
use crate::console;
use crate::error::{KernelError, KernelResult};
use crate::mm::paging;
use crate::process::loader::{self, USER_STACK_TOP};
use crate::process::pcb::{self, FileDescriptor, MAX_OPEN_FILES};
use crate::sched::scheduler;

/// Maximum command-line name length (a file name).
pub const MAX_NAME: usize = 32;
/// Maximum argument-string length.
pub const MAX_ARGS: usize = pcb::ARG_BUFFER_LEN;

/// A parsed command line.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    name: [u8; MAX_NAME],
    name_len: usize,
    args: [u8; MAX_ARGS],
    args_len: usize,
}

impl Command {
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }

    pub fn args(&self) -> &[u8] {
        &self.args[..self.args_len]
    }
}

/// Split a command line into the program name and its argument string.
///
/// The leading word (bounded at 32 bytes) names the program; separating
/// and trailing spaces are stripped from the remainder, which is bounded
/// at 128 bytes.
pub fn parse_command(line: &[u8]) -> Command {
    let end = line.iter().position(|&b| b == 0).unwrap_or(line.len());
    let line = &line[..end];

    let mut cmd = Command {
        name: [0; MAX_NAME],
        name_len: 0,
        args: [0; MAX_ARGS],
        args_len: 0,
    };

    let mut i = 0;
    while i < line.len() && line[i] != b' ' && cmd.name_len < MAX_NAME {
        cmd.name[cmd.name_len] = line[i];
        cmd.name_len += 1;
        i += 1;
    }
    while i < line.len() && line[i] == b' ' {
        i += 1;
    }
    let mut rest = &line[i..];
    while let [head @ .., b' '] = rest {
        rest = head;
    }
    let n = rest.len().min(MAX_ARGS);
    cmd.args[..n].copy_from_slice(&rest[..n]);
    cmd.args_len = n;
    cmd
}

/// Load and run a program, handing the CPU to it until it halts.
///
/// Returns the child's halt status, or an error without disturbing the
/// ready queue when the load fails.
pub fn execute(command: &[u8]) -> KernelResult<i32> {
    let cmd = parse_command(command);
    if cmd.name().is_empty() {
        return Err(KernelError::InvalidArg);
    }

    interrupts::disable();
    let caller = pcb::current_pid();
    // The three bootstrap shells have no parent, whoever spawned them.
    let parent = if scheduler::bootstrap_complete() {
        caller
    } else {
        None
    };

    let image = loader::load(cmd.name())?;
    let pid = image.pid;

    let terminal = console::take_override()
        .or_else(|| parent.map(|p| pcb::with_pcb(p, |b| b.terminal)))
        .unwrap_or(0)
        .min(console::MAX_TERMINALS - 1);

    pcb::with_pcb(pid, |child| {
        child.reset(parent, terminal, image.entry);
        child.set_args(cmd.args());
        child.bind_stdio();
    });

    // A parent with a live child sleeps until halt wakes it; the child
    // preempts whatever was at the queue front.
    scheduler::install_child(pid, parent.is_some());
    pcb::set_current(Some(pid));
    gdt::set_kernel_stack(pcb::kernel_stack_top(pid));

    let parked = pcb::parent_ctx_ptr(pid);
    // SAFETY: interrupts are disabled and `parked` points into the child's
    // PCB, which outlives the child. This kernel stack frame stays intact
    // while the child runs because the child runs on its own stack.
    let resumed = unsafe { context::save(parked) };
    if resumed != 0 {
        // halt() brought us back; the wake value is status + 1.
        return Ok(resumed as i32 - 1);
    }

    interrupts::enable();
    // SAFETY: the loader placed the image in this address space and the
    // entry point came out of its header.
    unsafe { context::enter_user(image.entry, USER_STACK_TOP) }
}

/// Terminate the current task, resuming its parent with `status`.
///
/// A bootstrap shell (no parent) is restarted in place instead: screen
/// cleared, FD table rebuilt, control handed back to its entry point on a
/// fresh user stack.
pub fn halt(status: u32) -> ! {
    interrupts::disable();
    let pid = match pcb::current_pid() {
        Some(pid) => pid,
        None => {
            log::error!("halt with no current task");
            loop {
                core::hint::spin_loop();
            }
        }
    };
    let (parent, entry, backing) =
        pcb::with_pcb(pid, |p| (p.parent, p.entry, p.video_backing));

    // Shared teardown of the user-video window.
    if let Some(frame) = backing {
        paging::unmap_user_video(pid);
        if frame != paging::VIDEO_PHYS {
            paging::release_offscreen_video(frame);
        }
        pcb::with_pcb(pid, |p| {
            p.video_mapped = false;
            p.video_backing = None;
        });
    }

    // The initial shell of a terminal (no parent, or the very first slot)
    // must not die; it restarts in place instead.
    match parent {
        Some(parent) if pid != 0 => {
            pcb::with_pcb(pid, |p| {
                p.files = [FileDescriptor::closed(); MAX_OPEN_FILES];
            });
            paging::return_to_parent(pid, parent);
            pcb::set_current(Some(parent));
            gdt::set_kernel_stack(pcb::kernel_stack_top(parent));
            scheduler::promote(parent);

            let parked = pcb::with_pcb(pid, |p| p.parent_ctx);
            resume_parent(&parked, status)
        }
        _ => {
            console::clear_current();
            pcb::with_pcb(pid, |p| {
                p.files = [FileDescriptor::closed(); MAX_OPEN_FILES];
                p.bind_stdio();
            });
            // SAFETY: the shell image is still mapped and its entry valid;
            // reusing the slot resets the kernel stack implicitly.
            unsafe { context::enter_user(entry, USER_STACK_TOP) }
        }
    }
}

fn resume_parent(parked: &Context, status: u32) -> ! {
    // SAFETY: `parked` was recorded by execute() on the parent's kernel
    // stack, which slept untouched while the child ran. The wake value is
    // offset by one so the save site can distinguish resumption from the
    // recording pass even for status 0.
    unsafe { context::resume(parked, status.saturating_add(1)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_name_and_argument_string() {
        let cmd = parse_command(b"prog arg1 arg2");
        assert_eq!(cmd.name(), b"prog");
        assert_eq!(cmd.args(), b"arg1 arg2");
    }

    #[test]
    fn strips_separating_and_trailing_spaces() {
        let cmd = parse_command(b"cat    frame0.txt   ");
        assert_eq!(cmd.name(), b"cat");
        assert_eq!(cmd.args(), b"frame0.txt");
    }

    #[test]
    fn bare_name_has_empty_args() {
        let cmd = parse_command(b"ls");
        assert_eq!(cmd.name(), b"ls");
        assert_eq!(cmd.args(), b"");
    }

    #[test]
    fn inner_spaces_in_args_survive() {
        let cmd = parse_command(b"grep very large  ");
        assert_eq!(cmd.args(), b"very large");
    }

    #[test]
    fn stops_at_nul_and_bounds_the_name() {
        let cmd = parse_command(b"shell\0garbage");
        assert_eq!(cmd.name(), b"shell");
        assert_eq!(cmd.args(), b"");

        let long = [b'n'; 40];
        let cmd = parse_command(&long);
        assert_eq!(cmd.name().len(), MAX_NAME);
    }

    #[test]
    fn empty_line_parses_to_empty_name() {
        assert_eq!(parse_command(b"").name(), b"");
        assert_eq!(parse_command(b"   ").name(), b"");
    }
}
