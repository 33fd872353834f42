//! Keyboard matrix and control ports.
//!
//! The keyboard is an 8×8 switch matrix between CIA1 port A (columns,
//! driven low to select) and port B (rows, read). Joysticks share the
//! CIA1 port lines and can pull them low independently of the matrix.

/// 8×8 keyboard matrix.
pub struct KeyboardMatrix {
    /// One bit per row, per column. Set bit = key held.
    columns: [u8; 8],
    /// RESTORE is wired straight to NMI, outside the matrix.
    restore_held: bool,
}

impl KeyboardMatrix {
    #[must_use]
    pub fn new() -> Self {
        Self {
            columns: [0; 8],
            restore_held: false,
        }
    }

    /// Press or release the key at (column, row).
    pub fn set_key(&mut self, col: u8, row: u8, held: bool) {
        let col = (col & 7) as usize;
        let mask = 1 << (row & 7);
        if held {
            self.columns[col] |= mask;
        } else {
            self.columns[col] &= !mask;
        }
    }

    pub fn release_all(&mut self) {
        self.columns = [0; 8];
    }

    #[must_use]
    pub fn key_held(&self, col: u8, row: u8) -> bool {
        self.columns[(col & 7) as usize] & (1 << (row & 7)) != 0
    }

    /// Row lines for a column select mask (0 bit = column driven low).
    /// Pressed keys on selected columns pull their row low.
    #[must_use]
    pub fn scan_rows(&self, column_mask: u8) -> u8 {
        let mut rows = 0xFF;
        for (col, &keys) in self.columns.iter().enumerate() {
            if column_mask & (1 << col) == 0 {
                rows &= !keys;
            }
        }
        rows
    }

    /// Column lines for a row select mask (the matrix is symmetric and
    /// software may scan it in either direction).
    #[must_use]
    pub fn scan_columns(&self, row_mask: u8) -> u8 {
        let mut cols = 0xFF;
        for (col, &keys) in self.columns.iter().enumerate() {
            if keys & !row_mask != 0 {
                cols &= !(1 << col);
            }
        }
        cols
    }

    pub fn set_restore(&mut self, held: bool) {
        self.restore_held = held;
    }

    #[must_use]
    pub fn restore_held(&self) -> bool {
        self.restore_held
    }
}

impl Default for KeyboardMatrix {
    fn default() -> Self {
        Self::new()
    }
}

/// One digital control (joystick) port. Active lines pull CIA pins low.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlPort {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub fire: bool,
}

impl ControlPort {
    /// Pin mask: 0 bits are pulled low.
    #[must_use]
    pub fn line_mask(self) -> u8 {
        let mut mask = 0xFF;
        if self.up {
            mask &= !0x01;
        }
        if self.down {
            mask &= !0x02;
        }
        if self.left {
            mask &= !0x04;
        }
        if self.right {
            mask &= !0x08;
        }
        if self.fire {
            mask &= !0x10;
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unselected_columns_do_not_scan() {
        let mut kbd = KeyboardMatrix::new();
        kbd.set_key(1, 2, true);
        // Column 1 not selected (all high): rows stay high.
        assert_eq!(kbd.scan_rows(0xFF), 0xFF);
        // Column 1 selected: row 2 pulled low.
        assert_eq!(kbd.scan_rows(!0x02), 0xFF & !0x04);
    }

    #[test]
    fn release_restores_lines() {
        let mut kbd = KeyboardMatrix::new();
        kbd.set_key(3, 3, true);
        kbd.set_key(3, 3, false);
        assert_eq!(kbd.scan_rows(0x00), 0xFF);
    }

    #[test]
    fn reverse_scan_sees_same_key() {
        let mut kbd = KeyboardMatrix::new();
        kbd.set_key(5, 1, true);
        assert_eq!(kbd.scan_columns(!0x02), 0xFF & !0x20);
    }

    #[test]
    fn joystick_mask() {
        let port = ControlPort {
            up: true,
            fire: true,
            ..ControlPort::default()
        };
        assert_eq!(port.line_mask(), 0xFF & !0x11);
    }
}
