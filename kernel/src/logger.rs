//! Kernel logger: `log` records over the polled COM1 port.
//!
//! The VGA console belongs to the user's virtual terminals, so subsystem
//! bring-up chatter and fault reports go to serial where a capture survives
//! the machine wedging.

use log::{LevelFilter, Metadata, Record};

use crate::arch::x86::serial;

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        serial::_print(format_args!(
            "[{:5}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Bring up COM1 and route `log` records to it.
pub fn init() {
    serial::init();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
