//! Mirrored panel state
//!
//! The daemon answers queries from this cache instead of asking the
//! panel. It is updated only after the panel has acknowledged the
//! corresponding command, so it never runs ahead of the hardware.

use irpanel_protocol::{LCD_COLS, LCD_ROWS};

pub const ROWS: usize = LCD_ROWS as usize;
pub const COLS: usize = LCD_COLS as usize;

/// Screen size in characters
pub const LCD_SIZE: usize = ROWS * COLS;

/// Host-side cache of cursor, dim level, and screen contents
#[derive(Debug, Clone)]
pub struct LcdMirror {
    x: u8,
    y: u8,
    dim: u8,
    screen: [[u8; COLS]; ROWS],
}

impl LcdMirror {
    /// Fresh mirror: cursor at the origin, screen blank, dim level at
    /// the firmware's power-on duty
    pub fn new() -> Self {
        Self {
            x: 0,
            y: 0,
            dim: 128,
            screen: [[b' '; COLS]; ROWS],
        }
    }

    pub fn cursor(&self) -> (u8, u8) {
        (self.x, self.y)
    }

    pub fn dim(&self) -> u8 {
        self.dim
    }

    /// Record an acknowledged cursor move
    pub fn set_cursor(&mut self, x: u8, y: u8) {
        self.x = x;
        self.y = y;
    }

    /// Record an acknowledged dim change
    pub fn set_dim(&mut self, dim: u8) {
        self.dim = dim;
    }

    /// Record an acknowledged clear
    pub fn clear(&mut self) {
        self.x = 0;
        self.y = 0;
        self.screen = [[b' '; COLS]; ROWS];
    }

    /// Record an acknowledged home
    pub fn home(&mut self) {
        self.x = 0;
        self.y = 0;
    }

    /// Record acknowledged text at the cursor, without moving it
    ///
    /// The caller sizes chunks to the row, so clamping here only guards
    /// against a cursor at the right edge.
    pub fn write_chunk(&mut self, text: &[u8]) {
        let row = &mut self.screen[self.y as usize % ROWS];
        let start = self.x as usize % COLS;
        let n = text.len().min(COLS - start);
        row[start..start + n].copy_from_slice(&text[..n]);
    }

    /// The entire screen contents as one line, row after row
    pub fn contents(&self) -> String {
        self.screen
            .iter()
            .flat_map(|row| row.iter())
            .map(|&byte| byte as char)
            .collect()
    }
}

impl Default for LcdMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let mirror = LcdMirror::new();
        assert_eq!(mirror.cursor(), (0, 0));
        assert_eq!(mirror.dim(), 128);
        assert_eq!(mirror.contents(), " ".repeat(LCD_SIZE));
    }

    #[test]
    fn test_write_chunk_at_cursor() {
        let mut mirror = LcdMirror::new();
        mirror.set_cursor(2, 1);
        mirror.write_chunk(b"hello");

        let contents = mirror.contents();
        assert_eq!(&contents[COLS + 2..COLS + 7], "hello");
        // Cursor does not move on its own
        assert_eq!(mirror.cursor(), (2, 1));
    }

    #[test]
    fn test_write_chunk_clamps_to_row() {
        let mut mirror = LcdMirror::new();
        mirror.set_cursor(18, 0);
        mirror.write_chunk(b"abcdef");

        let contents = mirror.contents();
        assert_eq!(&contents[18..20], "ab");
        // Nothing spills into the next row
        assert_eq!(&contents[20..26], "      ");
    }

    #[test]
    fn test_clear_resets_everything_but_dim() {
        let mut mirror = LcdMirror::new();
        mirror.set_cursor(5, 2);
        mirror.set_dim(200);
        mirror.write_chunk(b"x");

        mirror.clear();
        assert_eq!(mirror.cursor(), (0, 0));
        assert_eq!(mirror.contents(), " ".repeat(LCD_SIZE));
        assert_eq!(mirror.dim(), 200);
    }

    #[test]
    fn test_home_keeps_screen() {
        let mut mirror = LcdMirror::new();
        mirror.write_chunk(b"keep");
        mirror.set_cursor(9, 3);

        mirror.home();
        assert_eq!(mirror.cursor(), (0, 0));
        assert_eq!(&mirror.contents()[..4], "keep");
    }
}
