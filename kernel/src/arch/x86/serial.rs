//! Polled COM1 output.
//!
//! Carries the kernel log stream; the VGA text console belongs to the
//! user-facing virtual terminals.

use core::fmt;

use spin::Mutex;

use super::port;

const COM1: u16 = 0x3F8;

/// A polled 16550-style UART.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self { base }
    }

    /// Program 38400 8N1, FIFO on, no interrupts (the port is polled).
    pub fn init(&mut self) {
        // SAFETY: the standard 16550 bring-up sequence against COM1's
        // well-known register block; the port is owned by this driver.
        unsafe {
            port::outb(self.base + 1, 0x00); // disable UART interrupts
            port::outb(self.base + 3, 0x80); // DLAB on
            port::outb(self.base, 0x03); // divisor 3 -> 38400 baud
            port::outb(self.base + 1, 0x00);
            port::outb(self.base + 3, 0x03); // 8 bits, no parity, one stop
            port::outb(self.base + 2, 0xC7); // FIFO on, cleared, 14-byte threshold
            port::outb(self.base + 4, 0x0B); // DTR | RTS | OUT2
        }
    }

    /// Busy-wait for the transmit holding register, then send one byte.
    pub fn write_byte(&mut self, byte: u8) {
        #[cfg(target_arch = "x86")]
        // SAFETY: polls the line-status register and writes the transmit
        // buffer of an initialized UART.
        unsafe {
            while port::inb(self.base + 5) & 0x20 == 0 {
                core::hint::spin_loop();
            }
            port::outb(self.base, byte);
        }
        #[cfg(not(target_arch = "x86"))]
        let _ = byte;
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

static COM1_PORT: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

/// Initialize COM1. Called once, before the logger is installed.
pub fn init() {
    COM1_PORT.lock().init();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    use super::interrupts;

    interrupts::without_interrupts(|| {
        // Serial output must never fail; the Write impl is infallible.
        let _ = COM1_PORT.lock().write_fmt(args);
    });
}
