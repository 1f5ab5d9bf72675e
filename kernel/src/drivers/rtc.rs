//! Real-time clock periodic device.
//!
//! Backs the `rtc` device file: `open` drops the rate to 2 Hz, `read`
//! blocks until the next periodic interrupt, `write` reprograms the rate to
//! any power of two in [2, 1024] Hz. The ISR must read status register C or
//! the chip never raises the line again.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86::interrupts::without_interrupts;
use crate::arch::x86::port;
#[cfg(target_arch = "x86")]
use crate::drivers::pic;
use crate::error::{KernelError, KernelResult};

const INDEX_PORT: u16 = 0x70;
const DATA_PORT: u16 = 0x71;

// Register selectors with NMI disabled (bit 7).
const REG_A: u8 = 0x8A;
const REG_B: u8 = 0x8B;
const REG_C: u8 = 0x0C;

const REG_B_PERIODIC: u8 = 0x40;

/// IRQ line of the RTC.
pub const RTC_IRQ: u8 = 8;
/// Rate installed by `open` on the device file.
pub const DEFAULT_HZ: u32 = 2;

/// One-shot flag armed by a blocking read, cleared by the ISR.
static TICK_PENDING: AtomicBool = AtomicBool::new(false);

/// Map a frequency to the divider value for register A's low nibble.
///
/// The chip emits `32768 >> (rate - 1)` interrupts per second, so a power
/// of two `hz` needs `rate = 16 - log2(hz)`. Anything that is not a power
/// of two in [2, 1024] is rejected.
pub fn rate_for(hz: u32) -> KernelResult<u8> {
    if !(2..=1024).contains(&hz) || !hz.is_power_of_two() {
        return Err(KernelError::InvalidArg);
    }
    Ok((16 - hz.trailing_zeros()) as u8)
}

/// Reprogram the periodic rate.
pub fn set_frequency(hz: u32) -> KernelResult<()> {
    let rate = rate_for(hz)?;
    without_interrupts(|| {
        // SAFETY: index/data access to CMOS register A with NMI held off;
        // only the low nibble (the rate) is replaced.
        unsafe {
            port::outb(INDEX_PORT, REG_A);
            let prev = port::inb(DATA_PORT);
            port::outb(INDEX_PORT, REG_A);
            port::outb(DATA_PORT, (prev & 0xF0) | rate);
        }
    });
    Ok(())
}

/// Block until the next periodic interrupt. The caller must be running
/// with interrupts enabled or this never terminates.
pub fn wait_for_tick() {
    TICK_PENDING.store(true, Ordering::Release);
    crate::arch::x86::interrupts::enable();
    while TICK_PENDING.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }
}

#[cfg(target_arch = "x86")]
extern "C" fn rtc_interrupt() {
    // SAFETY: reading register C acknowledges the interrupt inside the
    // chip; without it no further IRQ 8 arrives.
    unsafe {
        port::outb(INDEX_PORT, REG_C);
        let _ = port::inb(DATA_PORT);
    }
    pic::eoi(RTC_IRQ);
    TICK_PENDING.store(false, Ordering::Release);
}

#[cfg(target_arch = "x86")]
crate::arch::x86::idt::isr_entry!(rtc_stub, rtc_interrupt);

/// Enable the periodic interrupt and claim IRQ 8.
#[cfg(target_arch = "x86")]
pub fn init() {
    pic::disable(RTC_IRQ);
    without_interrupts(|| {
        // SAFETY: set the periodic-interrupt-enable bit in register B,
        // preserving the rest, with NMI held off during the sequence.
        unsafe {
            port::outb(INDEX_PORT, REG_B);
            let prev = port::inb(DATA_PORT);
            port::outb(INDEX_PORT, REG_B);
            port::outb(DATA_PORT, prev | REG_B_PERIODIC);
        }
    });
    crate::arch::x86::idt::register_interrupt(
        crate::arch::x86::idt::IRQ_BASE + RTC_IRQ as usize,
        rtc_stub,
    );
    pic::enable(RTC_IRQ);
    log::info!("RTC periodic interrupt enabled");
}

#[cfg(not(target_arch = "x86"))]
pub fn init() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_cover_the_supported_band() {
        assert_eq!(rate_for(2).unwrap(), 15);
        assert_eq!(rate_for(1024).unwrap(), 6);
        assert_eq!(rate_for(256).unwrap(), 8);
    }

    #[test]
    fn rejects_out_of_band_and_non_powers() {
        assert!(rate_for(0).is_err());
        assert!(rate_for(1).is_err());
        assert!(rate_for(3).is_err());
        assert!(rate_for(2048).is_err());
    }
}
