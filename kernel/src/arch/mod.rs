//! Architecture support.
//!
//! Everything that touches the machine lives under [`x86`]. Each submodule
//! pairs its real implementation (gated on `target_arch = "x86"`) with an
//! inert stub so the hardware-independent subsystems compile and unit test
//! on the build host.

pub mod x86;

/// Halt the CPU until the next interrupt.
#[cfg(target_arch = "x86")]
pub fn halt() {
    // SAFETY: `hlt` only pauses the CPU; it resumes on the next interrupt.
    unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
}

#[cfg(not(target_arch = "x86"))]
pub fn halt() {}
