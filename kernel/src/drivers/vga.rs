//! VGA text-mode hardware access.
//!
//! Volatile cell stores into the frame buffer at 0xB8000 and CRTC cursor
//! programming. Which cells to write is decided by the console layer; this
//! module is only the mirror. On non-x86 hosts everything is a no-op so the
//! console's buffer logic can be unit tested.

use crate::console::cell::Cell;
use crate::console::CELLS;

/// Physical (and identity-mapped virtual) address of text video memory.
pub const VIDEO_PHYS: usize = 0xB8000;

const CRTC_INDEX: u16 = 0x3D4;
const CRTC_DATA: u16 = 0x3D5;

const REG_MAX_SCANLINE: u8 = 0x09;
const REG_CURSOR_START: u8 = 0x0A;
const REG_CURSOR_END: u8 = 0x0B;
const REG_CURSOR_HIGH: u8 = 0x0E;
const REG_CURSOR_LOW: u8 = 0x0F;

const CURSOR_DISABLE_BIT: u8 = 1 << 5;
const MAX_SCANLINE_MASK: u8 = 0x1F;

/// Hardware cursor shapes, selected by scanline start/end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorType {
    Underline,
    HalfBlock,
    Block,
}

#[cfg(target_arch = "x86")]
mod hw {
    use super::*;
    use crate::arch::x86::port;
    use crate::console::{COLS, ROWS};

    fn crtc_read(reg: u8) -> u8 {
        // SAFETY: CRTC index/data protocol on the color-mode ports.
        unsafe {
            port::outb(CRTC_INDEX, reg);
            port::inb(CRTC_DATA)
        }
    }

    fn crtc_write(reg: u8, value: u8) {
        // SAFETY: CRTC index/data protocol on the color-mode ports.
        unsafe {
            port::outb(CRTC_INDEX, reg);
            port::io_wait();
            port::outb(CRTC_DATA, value);
            port::io_wait();
        }
    }

    fn frame_buffer() -> *mut u16 {
        VIDEO_PHYS as *mut u16
    }

    /// Write one cell straight to video memory.
    pub fn store_cell(index: usize, cell: Cell) {
        if index >= CELLS {
            return;
        }
        // SAFETY: bounded index into the 80x25 text frame buffer, which is
        // identity mapped; volatile because it is memory-mapped I/O.
        unsafe { core::ptr::write_volatile(frame_buffer().add(index), cell.raw()) };
    }

    /// Replace the whole frame buffer with `cells`.
    pub fn blit(cells: &[Cell; CELLS]) {
        for (i, cell) in cells.iter().enumerate() {
            // SAFETY: i < CELLS by construction.
            unsafe { core::ptr::write_volatile(frame_buffer().add(i), cell.raw()) };
        }
    }

    /// Copy the frame buffer out into `cells`.
    pub fn snapshot(cells: &mut [Cell; CELLS]) {
        for (i, cell) in cells.iter_mut().enumerate() {
            // SAFETY: i < CELLS by construction.
            *cell = Cell::from_raw(unsafe { core::ptr::read_volatile(frame_buffer().add(i)) });
        }
    }

    pub fn set_cursor(x: usize, y: usize) {
        if x >= COLS || y >= ROWS {
            return;
        }
        let cell = (y * COLS + x) as u16;
        crtc_write(REG_CURSOR_HIGH, (cell >> 8) as u8);
        crtc_write(REG_CURSOR_LOW, (cell & 0xFF) as u8);
    }

    pub fn enable_cursor(on: bool) {
        let start = crtc_read(REG_CURSOR_START);
        let start = if on {
            start & !CURSOR_DISABLE_BIT
        } else {
            start | CURSOR_DISABLE_BIT
        };
        crtc_write(REG_CURSOR_START, start);
    }

    pub fn set_cursor_type(shape: CursorType) {
        let max = crtc_read(REG_MAX_SCANLINE) & MAX_SCANLINE_MASK;
        let start = match shape {
            CursorType::Underline => max.saturating_sub(1),
            CursorType::HalfBlock => max / 2,
            CursorType::Block => 0,
        };
        let enable = crtc_read(REG_CURSOR_START) & CURSOR_DISABLE_BIT;
        crtc_write(REG_CURSOR_START, enable | (start & MAX_SCANLINE_MASK));
        let skew = crtc_read(REG_CURSOR_END) & 0x60;
        crtc_write(REG_CURSOR_END, skew | max);
    }
}

#[cfg(target_arch = "x86")]
pub use hw::{blit, enable_cursor, set_cursor, set_cursor_type, snapshot, store_cell};

#[cfg(not(target_arch = "x86"))]
mod stub {
    use super::*;

    pub fn store_cell(_index: usize, _cell: Cell) {}
    pub fn blit(_cells: &[Cell; CELLS]) {}
    pub fn snapshot(_cells: &mut [Cell; CELLS]) {}
    pub fn set_cursor(_x: usize, _y: usize) {}
    pub fn enable_cursor(_on: bool) {}
    pub fn set_cursor_type(_shape: CursorType) {}
}

#[cfg(not(target_arch = "x86"))]
pub use stub::{blit, enable_cursor, set_cursor, set_cursor_type, snapshot, store_cell};
