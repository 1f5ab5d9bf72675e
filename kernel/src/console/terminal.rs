//! One virtual terminal: an 80x25 cell buffer, cursor/console state, and
//! the line-input record the keyboard ISR fills.
//!
//! Everything here mutates only the terminal's own memory and reports what
//! changed; mirroring to video memory is the console layer's job. That
//! split is what lets the whole write/scroll/backspace/line-discipline
//! surface run under the host test harness.

use super::cell::{Cell, Style};
use super::{CELLS, COLS, ROWS};

/// Capacity of the per-terminal input line, including `\n` and NUL.
pub const LINE_BUF_LEN: usize = 129;

/// Cursor and behavior flags of one terminal.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleState {
    pub x: usize,
    pub y: usize,
    pub cursor_visible: bool,
    pub echo_enabled: bool,
    pub autoincrement: bool,
    pub wrap: bool,
    pub scroll: bool,
    pub ready: bool,
    /// Column the user may not backspace past while a line read is armed;
    /// 0 means unrestricted.
    pub backspace_stop: usize,
    pub style: Style,
}

impl ConsoleState {
    pub const fn boot() -> Self {
        Self {
            x: 0,
            y: 0,
            cursor_visible: true,
            echo_enabled: true,
            autoincrement: true,
            wrap: true,
            scroll: true,
            ready: false,
            backspace_stop: 0,
            style: Style::default_text(),
        }
    }
}

/// The record coordinating a blocked `readline` with the keyboard ISR.
#[derive(Debug, Clone, Copy)]
pub struct LineInput {
    /// Caller's buffer size; chars stop accumulating at `limit - 2`.
    pub limit: usize,
    /// Next free index in the line buffer (== chars accumulated).
    pub next: usize,
    pub complete: bool,
    pub active: bool,
}

impl LineInput {
    pub const fn idle() -> Self {
        Self {
            limit: 0,
            next: 0,
            complete: false,
            active: false,
        }
    }
}

/// What a buffer mutation changed, for the mirror layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutEffect {
    /// Index of a single written cell, if only one changed.
    pub cell: Option<usize>,
    /// The whole buffer moved (scroll or clear); re-blit everything.
    pub scrolled: bool,
}

impl PutEffect {
    const fn none() -> Self {
        Self {
            cell: None,
            scrolled: false,
        }
    }
}

/// Line-discipline outcome for one decoded byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResult {
    /// Byte stored in the line buffer.
    Buffered,
    /// Line terminated (`\n` arrived or the buffer filled); reader may wake.
    Completed,
    /// A backspace removed the last buffered byte.
    Retracted,
    /// No read armed, or nothing to do.
    Ignored,
}

/// One virtual terminal.
pub struct Terminal {
    pub present: bool,
    pub id: usize,
    pub on_screen: bool,
    pub state: ConsoleState,
    pub cells: [Cell; CELLS],
    pub input: LineInput,
    pub line: [u8; LINE_BUF_LEN],
}

impl Terminal {
    pub const fn new(id: usize) -> Self {
        Self {
            present: false,
            id,
            on_screen: false,
            state: ConsoleState::boot(),
            cells: [Cell::blank(Style::default_text()); CELLS],
            input: LineInput::idle(),
            line: [0; LINE_BUF_LEN],
        }
    }

    fn cursor_index(&self) -> usize {
        self.state.y * COLS + self.state.x
    }

    /// Put `byte` at the cursor without moving it.
    fn write_at_cursor(&mut self, byte: u8) -> usize {
        let idx = self.cursor_index();
        self.cells[idx] = Cell::new(byte, self.state.style);
        idx
    }

    /// Move the cursor one cell to the right, honoring the wrap and scroll
    /// flags. Returns true when the buffer scrolled.
    fn advance(&mut self) -> bool {
        if self.state.x + 1 >= COLS {
            if !self.state.wrap {
                return false;
            }
            if self.state.y + 1 >= ROWS {
                let scrolled = self.state.scroll;
                if scrolled {
                    self.scroll_up();
                }
                self.state.y = ROWS - 1;
                self.state.x = 0;
                scrolled
            } else {
                self.state.y += 1;
                self.state.x = 0;
                false
            }
        } else {
            self.state.x += 1;
            false
        }
    }

    /// Newline: cursor to column 0 of the next row, scrolling off the
    /// bottom when allowed.
    pub fn line_return(&mut self) -> bool {
        self.state.x = 0;
        if self.state.y + 1 >= ROWS {
            let scrolled = self.state.scroll;
            if scrolled {
                self.scroll_up();
            }
            self.state.y = ROWS - 1;
            scrolled
        } else {
            self.state.y += 1;
            false
        }
    }

    /// Full `putchar` semantics against this terminal's buffer.
    pub fn put(&mut self, byte: u8) -> PutEffect {
        if byte == b'\n' {
            let scrolled = self.line_return();
            return PutEffect {
                cell: None,
                scrolled,
            };
        }
        let idx = self.write_at_cursor(byte);
        let scrolled = if self.state.autoincrement {
            self.advance()
        } else {
            false
        };
        PutEffect {
            cell: Some(idx),
            scrolled,
        }
    }

    /// Copy rows 1..=24 up one row and blank the last row.
    pub fn scroll_up(&mut self) {
        self.cells.copy_within(COLS..CELLS, 0);
        let blank = Cell::blank(self.state.style);
        for cell in &mut self.cells[CELLS - COLS..] {
            *cell = blank;
        }
    }

    /// Backspace: retreat the cursor (wrapping to the previous row's last
    /// column when allowed, never past the backspace stop) and blank the
    /// cell under it.
    pub fn backspace(&mut self) -> usize {
        if self.state.x == 0 {
            if self.state.y > 0 && self.state.wrap {
                self.state.y -= 1;
                self.state.x = COLS - 1;
            }
        } else if self.state.backspace_stop == 0 || self.state.x > self.state.backspace_stop {
            self.state.x -= 1;
        }
        let idx = self.cursor_index();
        self.cells[idx] = Cell::blank(self.state.style);
        idx
    }

    /// Blank the buffer and home the cursor.
    pub fn clear(&mut self) -> PutEffect {
        let blank = Cell::blank(self.state.style);
        for cell in &mut self.cells {
            *cell = blank;
        }
        self.state.x = 0;
        self.state.y = 0;
        PutEffect {
            cell: None,
            scrolled: true,
        }
    }

    /// Arm the input record for a read of up to `limit` bytes and pin the
    /// backspace stop at the current column.
    pub fn arm_input(&mut self, limit: usize) {
        self.input = LineInput {
            limit,
            next: 0,
            complete: false,
            active: true,
        };
        self.state.backspace_stop = self.state.x;
    }

    /// Disarm after the reader has copied the line out.
    pub fn disarm_input(&mut self) {
        self.input.active = false;
        self.input.complete = false;
        self.state.backspace_stop = 0;
    }

    fn terminate_line(&mut self) {
        let n = self.input.next;
        self.line[n] = b'\n';
        self.line[n + 1] = 0;
        self.input.complete = true;
    }

    /// Line discipline for one decoded byte from the keyboard ISR.
    ///
    /// `0x08` retracts, `\n` completes, anything else accumulates; when
    /// `limit - 2` bytes have accumulated the line is terminated in place
    /// exactly as if the user had pressed return.
    pub fn feed(&mut self, byte: u8) -> FeedResult {
        if !self.input.active || self.input.complete {
            return FeedResult::Ignored;
        }
        match byte {
            b'\n' => {
                self.terminate_line();
                FeedResult::Completed
            }
            0x08 => {
                if self.input.next > 0 {
                    self.input.next -= 1;
                    FeedResult::Retracted
                } else {
                    FeedResult::Ignored
                }
            }
            _ => {
                if self.input.limit < 2 {
                    return FeedResult::Ignored;
                }
                if self.input.next + 2 >= self.input.limit {
                    self.terminate_line();
                    FeedResult::Completed
                } else {
                    self.line[self.input.next] = byte;
                    self.input.next += 1;
                    FeedResult::Buffered
                }
            }
        }
    }

    /// Bytes the completed line occupies, newline and NUL included.
    pub fn line_len(&self) -> usize {
        self.input.next + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(t: &mut Terminal, s: &str) -> FeedResult {
        let mut last = FeedResult::Ignored;
        for b in s.bytes() {
            last = t.feed(b);
        }
        last
    }

    #[test]
    fn put_advances_and_records_cell() {
        let mut t = Terminal::new(0);
        let eff = t.put(b'h');
        assert_eq!(eff.cell, Some(0));
        assert!(!eff.scrolled);
        assert_eq!(t.state.x, 1);
        assert_eq!(t.cells[0].byte(), b'h');
    }

    #[test]
    fn newline_moves_to_next_row_start() {
        let mut t = Terminal::new(0);
        t.put(b'a');
        t.put(b'\n');
        assert_eq!((t.state.x, t.state.y), (0, 1));
    }

    #[test]
    fn wrap_at_column_80() {
        let mut t = Terminal::new(0);
        for _ in 0..COLS {
            t.put(b'x');
        }
        assert_eq!((t.state.x, t.state.y), (0, 1));
    }

    #[test]
    fn no_wrap_pins_cursor_at_last_column() {
        let mut t = Terminal::new(0);
        t.state.wrap = false;
        for _ in 0..COLS + 5 {
            t.put(b'x');
        }
        assert_eq!((t.state.x, t.state.y), (COLS - 1, 0));
    }

    #[test]
    fn bottom_row_newline_scrolls_content_up() {
        let mut t = Terminal::new(0);
        t.put(b'A');
        t.state.x = 0;
        t.state.y = ROWS - 1;
        t.put(b'B');
        let eff = t.put(b'\n');
        assert!(eff.scrolled);
        // 'A' moved from row 0 off the top; 'B' moved from row 24 to 23.
        assert_eq!(t.cells[(ROWS - 2) * COLS].byte(), b'B');
        assert_eq!((t.state.x, t.state.y), (0, ROWS - 1));
        // The freshly blanked last row really is blank.
        assert!(t.cells[CELLS - COLS..].iter().all(|c| c.byte() == b' '));
    }

    #[test]
    fn scroll_disabled_overwrites_last_row() {
        let mut t = Terminal::new(0);
        t.state.scroll = false;
        t.state.y = ROWS - 1;
        t.put(b'Z');
        let eff = t.put(b'\n');
        assert!(!eff.scrolled);
        assert_eq!((t.state.x, t.state.y), (0, ROWS - 1));
        assert_eq!(t.cells[(ROWS - 1) * COLS].byte(), b'Z');
    }

    #[test]
    fn backspace_respects_stop_column() {
        let mut t = Terminal::new(0);
        t.state.x = 10;
        t.state.backspace_stop = 8;
        t.backspace();
        assert_eq!(t.state.x, 9);
        t.backspace();
        assert_eq!(t.state.x, 8);
        t.backspace();
        assert_eq!(t.state.x, 8);
    }

    #[test]
    fn backspace_wraps_to_previous_row() {
        let mut t = Terminal::new(0);
        t.state.x = 0;
        t.state.y = 3;
        t.backspace();
        assert_eq!((t.state.x, t.state.y), (COLS - 1, 2));
        assert_eq!(t.cells[2 * COLS + COLS - 1].byte(), b' ');
    }

    #[test]
    fn line_completes_on_newline_with_terminator() {
        let mut t = Terminal::new(0);
        t.arm_input(16);
        assert_eq!(feed_str(&mut t, "hello"), FeedResult::Buffered);
        assert_eq!(t.feed(b'\n'), FeedResult::Completed);
        assert_eq!(&t.line[..7], b"hello\n\0");
        assert_eq!(t.line_len(), 7);
    }

    #[test]
    fn line_completes_when_buffer_fills() {
        let mut t = Terminal::new(0);
        t.arm_input(16);
        // 14 bytes fit; the 15th forces termination.
        for _ in 0..14 {
            assert_eq!(t.feed(b'a'), FeedResult::Buffered);
        }
        assert_eq!(t.feed(b'a'), FeedResult::Completed);
        assert_eq!(t.line[14], b'\n');
        assert_eq!(t.line[15], 0);
        assert_eq!(t.line_len(), 16);
    }

    #[test]
    fn backspace_retracts_buffered_byte() {
        let mut t = Terminal::new(0);
        t.arm_input(16);
        feed_str(&mut t, "ab");
        assert_eq!(t.feed(0x08), FeedResult::Retracted);
        t.feed(b'\n');
        assert_eq!(&t.line[..3], b"a\n\0");
    }

    #[test]
    fn feed_without_armed_read_is_ignored() {
        let mut t = Terminal::new(0);
        assert_eq!(t.feed(b'x'), FeedResult::Ignored);
    }

    #[test]
    fn completed_line_ignores_further_input() {
        let mut t = Terminal::new(0);
        t.arm_input(8);
        feed_str(&mut t, "ok");
        t.feed(b'\n');
        assert_eq!(t.feed(b'z'), FeedResult::Ignored);
        assert_eq!(&t.line[..4], b"ok\n\0");
    }
}
