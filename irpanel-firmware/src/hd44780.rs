//! HD44780 character LCD driver
//!
//! Minimal write-only 4-bit driver (6 GPIO lines: RS, E, D4-D7) for the
//! 4x20 text panel. The busy flag is never read back; fixed delays pace
//! the controller instead.

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};

/// HD44780 commands
#[allow(dead_code)]
pub mod cmd {
    pub const CLEAR: u8 = 0x01;
    pub const HOME: u8 = 0x02;
    pub const ENTRY_MODE: u8 = 0x04;
    pub const DISPLAY_CTRL: u8 = 0x08;
    pub const SHIFT: u8 = 0x10;
    pub const FUNCTION: u8 = 0x20;
    pub const SET_CGRAM: u8 = 0x40;
    pub const SET_DDRAM: u8 = 0x80;

    // entry mode args
    pub const ENTRY_SHIFT: u8 = 0x01;
    pub const ENTRY_INC: u8 = 0x02;

    // display control args
    pub const CTRL_BLINK: u8 = 0x01;
    pub const CTRL_CURSOR: u8 = 0x02;
    pub const CTRL_DISPLAY: u8 = 0x04;

    // function args
    pub const FUNC_FONT: u8 = 0x04;
    pub const FUNC_2LINE: u8 = 0x08;
    pub const FUNC_8BIT: u8 = 0x10;
}

/// DDRAM address of the start of each row (SET_DDRAM bit included)
const ROW_ADDR: [u8; 4] = [0x80, 0xC0, 0x94, 0xD4];

/// HD44780 driver over direct GPIO
pub struct Hd44780<'d> {
    rs: Output<'d>,
    en: Output<'d>,
    data: [Output<'d>; 4],
}

impl<'d> Hd44780<'d> {
    /// Create a new driver; `data` holds D4..D7 in order
    pub fn new(rs: Output<'d>, en: Output<'d>, data: [Output<'d>; 4]) -> Self {
        Self { rs, en, data }
    }

    /// Latch one nibble (data is taken on the falling enable edge)
    async fn send_nibble(&mut self, nibble: u8) {
        self.en.set_high();
        for (i, pin) in self.data.iter_mut().enumerate() {
            if (nibble >> i) & 1 != 0 {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        Timer::after(Duration::from_micros(1)).await;
        self.en.set_low();
        Timer::after(Duration::from_micros(1)).await;
    }

    /// Send a raw byte to the controller
    ///
    /// `is_char` selects the data register instead of the instruction
    /// register; `wait` adds the long delay that clear/home need.
    pub async fn send_byte(&mut self, data: u8, is_char: bool, wait: bool) {
        if is_char {
            self.rs.set_high();
        }
        self.send_nibble(data >> 4).await;
        self.send_nibble(data & 0x0F).await;
        if is_char {
            self.rs.set_low();
        }
        Timer::after(Duration::from_millis(1)).await;
        if wait {
            Timer::after(Duration::from_millis(5)).await;
        }
    }

    /// Initialise the controller
    ///
    /// The standard 3x 0x03 wake-up, switch to 4-bit mode, then
    /// function/display/clear/entry setup.
    pub async fn init(&mut self) {
        for _ in 0..3 {
            self.send_nibble(0x03).await;
            Timer::after(Duration::from_millis(1)).await;
        }
        self.send_nibble(0x02).await;
        Timer::after(Duration::from_millis(1)).await;

        for byte in [
            cmd::FUNCTION | cmd::FUNC_2LINE,
            cmd::DISPLAY_CTRL | cmd::CTRL_DISPLAY,
            cmd::CLEAR,
            cmd::ENTRY_MODE | cmd::ENTRY_INC,
        ] {
            self.send_byte(byte, false, true).await;
        }
    }

    /// Move the cursor; both coordinates 0-indexed, not range checked
    pub async fn goto(&mut self, x: u8, y: u8) {
        let addr = ROW_ADDR.get(y as usize).copied().unwrap_or(0);
        self.send_byte(addr.wrapping_add(x), false, false).await;
    }

    /// Write a character string at the current cursor position
    pub async fn write_bytes(&mut self, text: &[u8]) {
        for &ch in text {
            self.send_byte(ch, true, false).await;
        }
    }
}
