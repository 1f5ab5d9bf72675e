//! PS/2 keyboard driver.
//!
//! IRQ 1 reads one scancode byte from port 0x60 and feeds it to the
//! `pc_keyboard` set-1 decoder (which assembles 0xE0 sequences and break
//! codes). On top of the decoder sit this kernel's keyboard semantics: the
//! modifier record, auto-repeat suppression for printables, Alt+F1..F3
//! terminal switching, and delivery of decoded bytes to the console's line
//! discipline.

use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyState, Keyboard, ScancodeSet1};
use spin::Mutex;

#[cfg(target_arch = "x86")]
use crate::arch::x86::port;
use crate::console;
#[cfg(target_arch = "x86")]
use crate::drivers::pic;

#[cfg(target_arch = "x86")]
mod controller {
    pub const DATA_PORT: u16 = 0x60;
    pub const STATUS_PORT: u16 = 0x64;

    pub const STATUS_INPUT_FULL: u8 = 0x02;
    pub const CMD_DISABLE_PORT1: u8 = 0xAD;
    pub const CMD_ENABLE_PORT1: u8 = 0xAE;
    pub const CMD_WRITE_CONFIG: u8 = 0x60;

    /// Port-1 interrupt on, port-1 clock on, translation to set 1.
    pub const CONFIG: u8 = 0x01 | 0x10 | 0x40;
}

/// IRQ line of the first PS/2 port.
pub const KEYBOARD_IRQ: u8 = 1;

/// Current state of the modifier keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub capslock: bool,
}

static MODIFIERS: Mutex<Modifiers> = Mutex::new(Modifiers {
    ctrl: false,
    alt: false,
    shift: false,
    capslock: false,
});

/// Most recently pressed non-modifier key, until its release; the
/// controller's typematic repeat re-sends make codes and the line
/// discipline wants one character per physical press.
static LAST_PRESSED: Mutex<Option<KeyCode>> = Mutex::new(None);

lazy_static! {
    static ref KEYBOARD: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
        Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
    );
}

/// Snapshot of the modifier record.
pub fn modifiers() -> Modifiers {
    *MODIFIERS.lock()
}

/// Track modifier keys from the raw key event, before unicode decoding.
/// Returns true if the event was a modifier (and is fully handled).
fn update_modifiers(code: KeyCode, down: bool) -> bool {
    let mut mods = MODIFIERS.lock();
    match code {
        KeyCode::LShift | KeyCode::RShift => {
            mods.shift = down;
            true
        }
        KeyCode::LControl | KeyCode::RControl => {
            mods.ctrl = down;
            true
        }
        KeyCode::LAlt | KeyCode::RAltGr => {
            mods.alt = down;
            true
        }
        KeyCode::CapsLock => {
            if down {
                mods.capslock = !mods.capslock;
            }
            true
        }
        _ => false,
    }
}

/// Decide whether a press is typematic repeat. Backspace may repeat.
fn suppress_repeat(code: KeyCode) -> bool {
    if code == KeyCode::Backspace {
        return false;
    }
    let mut last = LAST_PRESSED.lock();
    if *last == Some(code) {
        true
    } else {
        *last = Some(code);
        false
    }
}

fn clear_repeat(code: KeyCode) {
    let mut last = LAST_PRESSED.lock();
    if *last == Some(code) {
        *last = None;
    }
}

/// Feed one raw scancode byte through the decoder and act on the result.
pub fn handle_scancode(scancode: u8) {
    let decoded = {
        let mut kb = KEYBOARD.lock();
        match kb.add_byte(scancode) {
            Ok(Some(event)) => {
                let key = kb.process_keyevent(event.clone());
                Some((event, key))
            }
            _ => None,
        }
    };
    let Some((event, key)) = decoded else {
        return;
    };

    let down = event.state == KeyState::Down;
    if update_modifiers(event.code, down) {
        return;
    }
    if !down {
        clear_repeat(event.code);
        return;
    }

    // Alt+F1..F3 swaps the on-screen terminal.
    let mods = modifiers();
    if mods.alt {
        let target = match event.code {
            KeyCode::F1 => Some(0),
            KeyCode::F2 => Some(1),
            KeyCode::F3 => Some(2),
            _ => None,
        };
        if let Some(idx) = target {
            console::switch_to(idx);
            return;
        }
    }

    if suppress_repeat(event.code) {
        return;
    }

    if let Some(DecodedKey::Unicode(ch)) = key {
        if ch.is_ascii() {
            console::handle_char(ch as u8, mods);
        }
    }
}

#[cfg(target_arch = "x86")]
extern "C" fn keyboard_interrupt() {
    // SAFETY: IRQ 1 guarantees the output buffer holds a scancode byte.
    let scancode = unsafe { port::inb(controller::DATA_PORT) };
    handle_scancode(scancode);
    pic::eoi(KEYBOARD_IRQ);
}

#[cfg(target_arch = "x86")]
crate::arch::x86::idt::isr_entry!(keyboard_stub, keyboard_interrupt);

#[cfg(target_arch = "x86")]
fn wait_input_clear() {
    // SAFETY: polling the controller status register.
    while unsafe { port::inb(controller::STATUS_PORT) } & controller::STATUS_INPUT_FULL != 0 {
        core::hint::spin_loop();
    }
}

/// Bring up the PS/2 controller and claim IRQ 1.
#[cfg(target_arch = "x86")]
pub fn init() {
    pic::disable(KEYBOARD_IRQ);
    // SAFETY: standard 8042 bring-up: disable the port, drain the output
    // buffer, install the config byte, re-enable. Writes are spaced by the
    // input-buffer-clear poll.
    unsafe {
        port::outb(controller::STATUS_PORT, controller::CMD_DISABLE_PORT1);
        port::io_wait();
        let _ = port::inb(controller::DATA_PORT);
        wait_input_clear();
        port::outb(controller::STATUS_PORT, controller::CMD_WRITE_CONFIG);
        wait_input_clear();
        port::outb(controller::DATA_PORT, controller::CONFIG);
        wait_input_clear();
        port::outb(controller::STATUS_PORT, controller::CMD_ENABLE_PORT1);
    }
    crate::arch::x86::idt::register_interrupt(
        crate::arch::x86::idt::IRQ_BASE + KEYBOARD_IRQ as usize,
        keyboard_stub,
    );
    pic::enable(KEYBOARD_IRQ);
    log::info!("PS/2 keyboard on IRQ 1, scancode set 1");
}

#[cfg(not(target_arch = "x86"))]
pub fn init() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_of_same_key_is_suppressed_until_release() {
        // Distinct keycode from other tests: global state is shared.
        assert!(!suppress_repeat(KeyCode::Q));
        assert!(suppress_repeat(KeyCode::Q));
        clear_repeat(KeyCode::Q);
        assert!(!suppress_repeat(KeyCode::Q));
        clear_repeat(KeyCode::Q);
    }

    #[test]
    fn backspace_always_repeats() {
        assert!(!suppress_repeat(KeyCode::Backspace));
        assert!(!suppress_repeat(KeyCode::Backspace));
    }

    #[test]
    fn capslock_toggles_on_press_only() {
        let before = modifiers().capslock;
        update_modifiers(KeyCode::CapsLock, true);
        assert_eq!(modifiers().capslock, !before);
        update_modifiers(KeyCode::CapsLock, false);
        assert_eq!(modifiers().capslock, !before);
        // Restore for other tests.
        update_modifiers(KeyCode::CapsLock, true);
        update_modifiers(KeyCode::CapsLock, false);
    }

    #[test]
    fn shift_follows_press_and_release() {
        update_modifiers(KeyCode::LShift, true);
        assert!(modifiers().shift);
        update_modifiers(KeyCode::LShift, false);
        assert!(!modifiers().shift);
    }
}
