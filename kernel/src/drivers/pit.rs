//! Programmable interval timer: the scheduler clock.
//!
//! Channel 0 runs in rate-generator mode at [`QUANTUM_HZ`]; every expiry
//! raises IRQ 0 and lands in the scheduler's tick handler.

#[cfg(target_arch = "x86")]
use crate::arch::x86::port;
#[cfg(target_arch = "x86")]
use crate::drivers::pic;

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 2 (rate generator), binary.
const CMD_RATE_GENERATOR: u8 = 0x34;

/// Input clock of the PIT in Hz.
pub const PIT_CLOCK_HZ: u32 = 1_193_180;
/// Scheduler quantum frequency: one preemption every 10 ms.
pub const QUANTUM_HZ: u32 = 100;

/// IRQ line of channel 0.
pub const PIT_IRQ: u8 = 0;

/// Reload value programmed into channel 0.
pub const fn divisor() -> u32 {
    PIT_CLOCK_HZ / QUANTUM_HZ
}

#[cfg(target_arch = "x86")]
crate::arch::x86::idt::isr_entry!(timer_stub, crate::sched::scheduler::timer_tick);

/// Program channel 0 and claim IRQ 0. Starting this is what starts
/// preemption, so it runs last in the boot sequence.
#[cfg(target_arch = "x86")]
pub fn init() {
    pic::disable(PIT_IRQ);

    let reload = divisor();
    // SAFETY: mode/command then the 16-bit reload value, low byte first, per
    // the 8253/8254 programming interface. IRQ 0 is masked while we do it.
    unsafe {
        port::outb(COMMAND, CMD_RATE_GENERATOR);
        port::outb(CHANNEL0_DATA, (reload & 0xFF) as u8);
        port::outb(CHANNEL0_DATA, (reload >> 8) as u8);
    }

    crate::arch::x86::idt::register_interrupt(crate::arch::x86::idt::IRQ_BASE, timer_stub);
    pic::enable(PIT_IRQ);
    log::info!("PIT channel 0 at {} Hz (divisor {})", QUANTUM_HZ, reload);
}

#[cfg(not(target_arch = "x86"))]
pub fn init() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_matches_quantum() {
        // 1193180 / 100 = 11931: one IRQ every ~10 ms.
        assert_eq!(divisor(), 11_931);
    }
}
