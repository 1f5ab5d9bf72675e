//! Interrupt-flag control.
//!
//! Every mutation of a shared singleton in this kernel happens inside
//! [`without_interrupts`]; on a single CPU that is the whole concurrency
//! story between kernel threads and interrupt handlers.

#[cfg(target_arch = "x86")]
use core::arch::asm;

/// Are maskable interrupts currently enabled (EFLAGS.IF)?
#[cfg(target_arch = "x86")]
pub fn are_enabled() -> bool {
    let eflags: u32;
    // SAFETY: reading EFLAGS via the stack has no side effects.
    unsafe {
        asm!(
            "pushfd",
            "pop {}",
            out(reg) eflags,
            options(nomem, preserves_flags)
        );
    }
    eflags & 0x200 != 0
}

/// Enable maskable interrupts.
#[cfg(target_arch = "x86")]
pub fn enable() {
    // SAFETY: `sti` only sets EFLAGS.IF.
    unsafe { asm!("sti", options(nomem, nostack)) };
}

/// Disable maskable interrupts.
#[cfg(target_arch = "x86")]
pub fn disable() {
    // SAFETY: `cli` only clears EFLAGS.IF.
    unsafe { asm!("cli", options(nomem, nostack)) };
}

#[cfg(not(target_arch = "x86"))]
pub fn are_enabled() -> bool {
    false
}

#[cfg(not(target_arch = "x86"))]
pub fn enable() {}

#[cfg(not(target_arch = "x86"))]
pub fn disable() {}

/// Run `f` with interrupts disabled, restoring the previous state after.
///
/// This is the mandatory wrapper around every acquisition of a kernel
/// spinlock: an interrupt handler taking the same lock on this CPU would
/// otherwise deadlock against its own interrupted thread.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let saved = are_enabled();
    if saved {
        disable();
    }
    let ret = f();
    if saved {
        enable();
    }
    ret
}
