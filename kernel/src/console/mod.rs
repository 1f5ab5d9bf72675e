//! Multi-terminal console.
//!
//! Three virtual terminals share the one VGA text screen. Exactly one is
//! on screen at a time; its cell buffer and physical video memory are kept
//! identical by mirroring every mutation. The split between [`putchar`]
//! (current *task's* terminal) and [`echo`] (the *on-screen* terminal) is
//! what lets a background task keep printing into its own buffer while the
//! keyboard echoes to whatever the user is looking at.
//!
//! All buffer mutations happen inside interrupts-disabled critical
//! sections.

pub mod cell;
pub mod terminal;

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch::x86::interrupts::{self, without_interrupts};
use crate::drivers::keyboard::Modifiers;
use crate::drivers::vga;
use terminal::{Terminal, LINE_BUF_LEN};

pub const COLS: usize = 80;
pub const ROWS: usize = 25;
pub const CELLS: usize = COLS * ROWS;

/// Number of virtual terminals.
pub const MAX_TERMINALS: usize = 3;

static TERMINALS: Mutex<[Terminal; MAX_TERMINALS]> =
    Mutex::new([Terminal::new(0), Terminal::new(1), Terminal::new(2)]);

/// Index of the on-screen terminal.
static ACTIVE: AtomicUsize = AtomicUsize::new(0);

/// One-shot terminal binding consumed by the next `execute`. Only the
/// scheduler's bootstrap path sets this; there is deliberately no syscall
/// that can reach it.
static OVERRIDE: Mutex<Option<usize>> = Mutex::new(None);

fn with_terminals<F, R>(f: F) -> R
where
    F: FnOnce(&mut [Terminal; MAX_TERMINALS]) -> R,
{
    without_interrupts(|| f(&mut TERMINALS.lock()))
}

/// Index of the on-screen terminal.
pub fn active_index() -> usize {
    ACTIVE.load(Ordering::Relaxed)
}

/// Mirror a buffer mutation to the hardware if this terminal owns the
/// screen.
fn apply_effect(t: &Terminal, eff: terminal::PutEffect) {
    if !t.on_screen {
        return;
    }
    if eff.scrolled {
        vga::blit(&t.cells);
    } else if let Some(idx) = eff.cell {
        vga::store_cell(idx, t.cells[idx]);
    }
    vga::set_cursor(t.state.x, t.state.y);
}

/// Bring up the terminal arena: all three present, terminal 0 on screen.
pub fn init() {
    with_terminals(|terms| {
        for t in terms.iter_mut() {
            t.present = true;
            t.state.ready = true;
        }
        terms[0].on_screen = true;
        ACTIVE.store(0, Ordering::Relaxed);
        let eff = terms[0].clear();
        apply_effect(&terms[0], eff);
    });
    vga::set_cursor_type(vga::CursorType::Block);
    vga::enable_cursor(true);
    log::info!("console up: {} virtual terminals", MAX_TERMINALS);
}

/// Write one byte at the current task's terminal cursor.
pub fn putchar(byte: u8) {
    let idx = crate::process::current_terminal();
    with_terminals(|terms| {
        let t = &mut terms[idx];
        if !t.state.ready {
            return;
        }
        let eff = t.put(byte);
        apply_effect(t, eff);
    });
}

/// Write one byte at the on-screen terminal's cursor, regardless of which
/// task is current. Keyboard ISR path; honors the terminal's echo flag.
pub fn echo(byte: u8) {
    with_terminals(|terms| {
        let t = &mut terms[active_index()];
        if !t.state.ready || !t.state.echo_enabled {
            return;
        }
        let eff = t.put(byte);
        apply_effect(t, eff);
    });
}

/// Write a buffer to the current task's terminal. Interrupts stay open
/// between bytes, so a tick can preempt a long write at a cell boundary.
pub fn write_bytes(buf: &[u8]) -> usize {
    for byte in buf {
        putchar(*byte);
    }
    buf.len()
}

/// Clear the on-screen terminal and home its cursor.
pub fn clear_screen() {
    clear_terminal(active_index());
}

/// Clear the current task's terminal, which may be off screen.
pub fn clear_current() {
    clear_terminal(crate::process::current_terminal());
}

fn clear_terminal(idx: usize) {
    with_terminals(|terms| {
        let t = &mut terms[idx];
        let eff = t.clear();
        apply_effect(t, eff);
    });
}

/// Blocking line read into `dst` from the current task's terminal.
///
/// Arms the terminal's input record, pins the backspace stop, then spins
/// with interrupts enabled until the keyboard ISR completes the line. The
/// returned count includes the terminating `\n` and NUL.
pub fn readline(dst: &mut [u8]) -> usize {
    if dst.len() < 2 {
        return 0;
    }
    let limit = dst.len().min(LINE_BUF_LEN - 1);
    let idx = crate::process::current_terminal();
    with_terminals(|terms| terms[idx].arm_input(limit));
    interrupts::enable();
    loop {
        let complete = with_terminals(|terms| terms[idx].input.complete);
        if complete {
            break;
        }
        core::hint::spin_loop();
    }
    with_terminals(|terms| {
        let t = &mut terms[idx];
        let n = t.line_len().min(dst.len());
        dst[..n].copy_from_slice(&t.line[..n]);
        t.disarm_input();
        n
    })
}

/// Route one decoded key from the keyboard ISR: echo with modifier
/// decoration, then run the on-screen terminal's line discipline.
pub fn handle_char(byte: u8, mods: Modifiers) {
    match byte {
        0x08 => with_terminals(|terms| {
            let t = &mut terms[ACTIVE.load(Ordering::Relaxed)];
            let cleared = t.backspace();
            if t.on_screen {
                vga::store_cell(cleared, t.cells[cleared]);
                vga::set_cursor(t.state.x, t.state.y);
            }
            t.feed(0x08);
        }),
        b'\n' | b'\r' => with_terminals(|terms| {
            let t = &mut terms[ACTIVE.load(Ordering::Relaxed)];
            let scrolled = t.line_return();
            if t.on_screen {
                if scrolled {
                    vga::blit(&t.cells);
                }
                vga::set_cursor(t.state.x, t.state.y);
            }
            t.feed(b'\n');
        }),
        0x1B => {
            echo(b'^');
            echo(b'[');
        }
        b' '..=b'~' | b'\t' => {
            if mods.ctrl || mods.alt {
                echo(b'^');
                let upper = byte.to_ascii_uppercase();
                if mods.ctrl && upper == b'L' {
                    clear_screen();
                    return;
                }
                echo(upper);
            } else {
                echo(byte);
            }
            // The line records the undecorated byte even under ctrl/alt.
            with_terminals(|terms| {
                terms[ACTIVE.load(Ordering::Relaxed)].feed(byte);
            });
        }
        _ => {}
    }
}

/// Swap the screen to terminal `new`: video memory is saved into the
/// outgoing buffer, the incoming buffer replaces it, and the hardware
/// cursor jumps to the incoming terminal's saved position.
pub fn switch_to(new: usize) -> bool {
    if new >= MAX_TERMINALS {
        return false;
    }
    with_terminals(|terms| {
        if !terms[new].present {
            return false;
        }
        let old = ACTIVE.load(Ordering::Relaxed);
        if old == new {
            return true;
        }
        vga::snapshot(&mut terms[old].cells);
        terms[old].on_screen = false;
        terms[new].on_screen = true;
        ACTIVE.store(new, Ordering::Relaxed);
        vga::blit(&terms[new].cells);
        vga::set_cursor(terms[new].state.x, terms[new].state.y);
        vga::enable_cursor(terms[new].state.cursor_visible);
        true
    })
}

/// Bind the next spawned task to terminal `idx`. Kernel-internal.
pub(crate) fn set_override(idx: usize) {
    without_interrupts(|| {
        *OVERRIDE.lock() = Some(idx);
    });
}

/// Consume the one-shot terminal override.
pub(crate) fn take_override() -> Option<usize> {
    without_interrupts(|| OVERRIDE.lock().take())
}

struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7E | b'\n' | 0x08 => putchar(byte),
                _ => putchar(0xFE),
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    // ConsoleWriter is infallible.
    let _ = ConsoleWriter.write_fmt(args);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_one_shot() {
        set_override(2);
        assert_eq!(take_override(), Some(2));
        assert_eq!(take_override(), None);
    }
}
