//! Expansion-port cartridges and the CRT container.
//!
//! A CRT file is a 64-byte header (`"C64 CARTRIDGE   "`, header length,
//! version, hardware type, EXROM/GAME levels, name) followed by CHIP
//! packets (`"CHIP"`, packet length, chip type, bank, load address,
//! size, ROM data).
//!
//! Hardware variants differ mostly in how writes to the I/O areas flip
//! ROM banks in and out. Instead of one type per variant, a single
//! `Cartridge` carries its ROM packets and a `CartridgeKind` tag; the
//! kind-specific behavior lives in the `peek_io`/`poke_io` dispatch
//! below.

use std::fmt;

/// CRT hardware type ids we implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeKind {
    /// Plain 8K/16K/Ultimax ROM defined by the EXROM/GAME levels.
    Standard,
    /// Simons' Basic: 16K with GAME toggled through $DE00.
    SimonsBasic,
    /// Ocean type 1: up to 512K, bank select at $DE00.
    Ocean,
    /// Magic Desk: 8K banks, select + disable at $DE00.
    MagicDesk,
}

impl CartridgeKind {
    fn from_crt_type(hw_type: u16) -> Option<Self> {
        match hw_type {
            0 => Some(CartridgeKind::Standard),
            4 => Some(CartridgeKind::SimonsBasic),
            5 => Some(CartridgeKind::Ocean),
            19 => Some(CartridgeKind::MagicDesk),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum CrtError {
    /// Signature mismatch.
    NotCrt,
    /// File shorter than a header or packet claims.
    Truncated,
    /// Hardware type we have no dispatch entry for.
    UnsupportedType(u16),
    /// CHIP packet with a load address outside cartridge space.
    BadChipPacket,
}

impl fmt::Display for CrtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCrt => write!(f, "not a CRT image"),
            Self::Truncated => write!(f, "truncated CRT image"),
            Self::UnsupportedType(t) => write!(f, "unsupported cartridge hardware type {t}"),
            Self::BadChipPacket => write!(f, "CHIP packet with invalid load address"),
        }
    }
}

impl std::error::Error for CrtError {}

/// One ROM bank from a CHIP packet.
struct RomPacket {
    bank: u16,
    load_address: u16,
    data: Vec<u8>,
}

/// An inserted cartridge.
pub struct Cartridge {
    kind: CartridgeKind,
    packets: Vec<RomPacket>,
    /// Current bank for the switchable kinds.
    bank: u16,
    /// ROM visible (Magic Desk can switch itself off).
    rom_enabled: bool,
    /// /EXROM and /GAME levels the cartridge asserts (true = high).
    exrom_line: bool,
    game_line: bool,
    /// Initial line levels from the CRT header, for reset.
    initial_exrom: bool,
    initial_game: bool,
}

impl Cartridge {
    /// Parse a CRT image.
    pub fn from_crt(bytes: &[u8]) -> Result<Self, CrtError> {
        if bytes.len() < 0x40 {
            return Err(CrtError::Truncated);
        }
        if &bytes[0..16] != b"C64 CARTRIDGE   " {
            return Err(CrtError::NotCrt);
        }
        let hw_type = u16::from_be_bytes([bytes[0x16], bytes[0x17]]);
        let kind = CartridgeKind::from_crt_type(hw_type)
            .ok_or(CrtError::UnsupportedType(hw_type))?;
        // Header stores the line levels as 0/1 bytes (1 = high).
        let exrom = bytes[0x18] != 0;
        let game = bytes[0x19] != 0;

        let mut packets = Vec::new();
        let mut pos = u32::from_be_bytes([bytes[0x10], bytes[0x11], bytes[0x12], bytes[0x13]])
            .max(0x40) as usize;
        while pos + 0x10 <= bytes.len() {
            if &bytes[pos..pos + 4] != b"CHIP" {
                return Err(CrtError::NotCrt);
            }
            let packet_len =
                u32::from_be_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
                    as usize;
            let bank = u16::from_be_bytes([bytes[pos + 0x0A], bytes[pos + 0x0B]]);
            let load_address = u16::from_be_bytes([bytes[pos + 0x0C], bytes[pos + 0x0D]]);
            let rom_size = u16::from_be_bytes([bytes[pos + 0x0E], bytes[pos + 0x0F]]) as usize;
            if pos + 0x10 + rom_size > bytes.len() || packet_len < 0x10 + rom_size {
                return Err(CrtError::Truncated);
            }
            if !matches!(load_address, 0x8000..=0x9FFF | 0xA000..=0xBFFF | 0xE000..=0xFFFF) {
                return Err(CrtError::BadChipPacket);
            }
            packets.push(RomPacket {
                bank,
                load_address,
                data: bytes[pos + 0x10..pos + 0x10 + rom_size].to_vec(),
            });
            pos += packet_len.max(0x10);
        }
        if packets.is_empty() {
            return Err(CrtError::Truncated);
        }

        Ok(Self {
            kind,
            packets,
            bank: 0,
            rom_enabled: true,
            exrom_line: exrom,
            game_line: game,
            initial_exrom: exrom,
            initial_game: game,
        })
    }

    /// Build a bare 8K/16K/Ultimax cartridge from raw ROM (for tests and
    /// direct attachment).
    #[must_use]
    pub fn from_rom(kind: CartridgeKind, rom: Vec<u8>, exrom: bool, game: bool) -> Self {
        let mut packets = vec![RomPacket {
            bank: 0,
            load_address: 0x8000,
            data: rom.clone(),
        }];
        if rom.len() > 0x2000 {
            packets[0].data.truncate(0x2000);
            packets.push(RomPacket {
                bank: 0,
                load_address: if !game && exrom { 0xE000 } else { 0xA000 },
                data: rom[0x2000..].to_vec(),
            });
        }
        Self {
            kind,
            packets,
            bank: 0,
            rom_enabled: true,
            exrom_line: exrom,
            game_line: game,
            initial_exrom: exrom,
            initial_game: game,
        }
    }

    #[must_use]
    pub fn kind(&self) -> CartridgeKind {
        self.kind
    }

    /// /EXROM level asserted by the cartridge.
    #[must_use]
    pub fn exrom_line(&self) -> bool {
        if self.rom_enabled {
            self.exrom_line
        } else {
            true
        }
    }

    /// /GAME level asserted by the cartridge.
    #[must_use]
    pub fn game_line(&self) -> bool {
        if self.rom_enabled {
            self.game_line
        } else {
            true
        }
    }

    /// Restore the power-on configuration.
    pub fn reset_config(&mut self) {
        self.bank = 0;
        self.rom_enabled = true;
        self.exrom_line = self.initial_exrom;
        self.game_line = self.initial_game;
    }

    /// Freeze-button press (cartridges with one pull /GAME low).
    pub fn press_button(&mut self) {
        // None of the implemented kinds has a freeze button; the hook
        // exists so the expansion port can route it.
    }

    fn packet_at(&self, bank: u16, address: u16) -> Option<&RomPacket> {
        self.packets.iter().find(|p| {
            p.bank == bank
                && address >= p.load_address
                && usize::from(address - p.load_address) < p.data.len()
        })
    }

    /// Read cartridge low ROM ($8000-$9FFF).
    #[must_use]
    pub fn peek_rom_l(&self, address: u16) -> u8 {
        let address = 0x8000 | (address & 0x1FFF);
        self.packet_at(self.bank, address)
            .map_or(0xFF, |p| p.data[usize::from(address - p.load_address)])
    }

    /// Read cartridge high ROM ($A000-$BFFF, or $E000-$FFFF in ultimax).
    #[must_use]
    pub fn peek_rom_h(&self, address: u16) -> u8 {
        let offset = address & 0x1FFF;
        // The high bank may be stored at either load address.
        for base in [0xA000u16, 0xE000] {
            if let Some(p) = self.packet_at(self.bank, base | offset) {
                return p.data[usize::from((base | offset) - p.load_address)];
            }
        }
        // 16K packets store the high half in the same packet.
        if let Some(p) = self.packet_at(self.bank, 0x8000) {
            let index = usize::from(offset) + 0x2000;
            if index < p.data.len() {
                return p.data[index];
            }
        }
        0xFF
    }

    /// Read from I/O 1 ($DE00-$DEFF).
    #[must_use]
    pub fn peek_io1(&self, _address: u16) -> u8 {
        0xFF
    }

    /// Read from I/O 2 ($DF00-$DFFF).
    #[must_use]
    pub fn peek_io2(&self, _address: u16) -> u8 {
        0xFF
    }

    /// Write to I/O 1. Returns true if the memory map changed.
    pub fn poke_io1(&mut self, _address: u16, value: u8) -> bool {
        match self.kind {
            CartridgeKind::Standard => false,
            CartridgeKind::SimonsBasic => {
                // Any write maps the second 8K in or out via /GAME.
                let game = value == 0;
                let changed = self.game_line != game;
                self.game_line = game;
                changed
            }
            CartridgeKind::Ocean => {
                self.bank = u16::from(value & 0x3F);
                false
            }
            CartridgeKind::MagicDesk => {
                let enabled = value & 0x80 == 0;
                let changed = self.rom_enabled != enabled;
                self.bank = u16::from(value & 0x3F);
                self.rom_enabled = enabled;
                changed
            }
        }
    }

    /// Write to I/O 2. Returns true if the memory map changed.
    pub fn poke_io2(&mut self, _address: u16, _value: u8) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crt_image(hw_type: u16, exrom: u8, game: u8, chips: &[(u16, u16, &[u8])]) -> Vec<u8> {
        let mut out = vec![0u8; 0x40];
        out[0..16].copy_from_slice(b"C64 CARTRIDGE   ");
        out[0x10..0x14].copy_from_slice(&0x40u32.to_be_bytes());
        out[0x14] = 1; // Version 1.0
        out[0x16..0x18].copy_from_slice(&hw_type.to_be_bytes());
        out[0x18] = exrom;
        out[0x19] = game;
        for (bank, load, data) in chips {
            out.extend_from_slice(b"CHIP");
            out.extend_from_slice(&((0x10 + data.len()) as u32).to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes()); // Chip type: ROM
            out.extend_from_slice(&bank.to_be_bytes());
            out.extend_from_slice(&load.to_be_bytes());
            out.extend_from_slice(&(data.len() as u16).to_be_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn reject_wrong_signature() {
        assert!(matches!(
            Cartridge::from_crt(&vec![0u8; 0x50]),
            Err(CrtError::NotCrt)
        ));
    }

    #[test]
    fn reject_unknown_hardware() {
        let rom = [0u8; 0x2000];
        let img = crt_image(99, 1, 0, &[(0, 0x8000, &rom)]);
        assert!(matches!(
            Cartridge::from_crt(&img),
            Err(CrtError::UnsupportedType(99))
        ));
    }

    #[test]
    fn parse_standard_8k() {
        let mut rom = [0u8; 0x2000];
        rom[0] = 0xAA;
        rom[0x1FFF] = 0xBB;
        let img = crt_image(0, 0, 1, &[(0, 0x8000, &rom)]);
        let cart = Cartridge::from_crt(&img).expect("valid CRT");
        assert_eq!(cart.kind(), CartridgeKind::Standard);
        assert!(!cart.exrom_line()); // 8K: /EXROM low, /GAME high
        assert!(cart.game_line());
        assert_eq!(cart.peek_rom_l(0x8000), 0xAA);
        assert_eq!(cart.peek_rom_l(0x9FFF), 0xBB);
    }

    #[test]
    fn parse_ultimax() {
        let lo = [0x11u8; 0x2000];
        let hi = [0x22u8; 0x2000];
        let img = crt_image(0, 1, 0, &[(0, 0x8000, &lo), (0, 0xE000, &hi)]);
        let cart = Cartridge::from_crt(&img).expect("valid CRT");
        assert!(cart.exrom_line());
        assert!(!cart.game_line());
        assert_eq!(cart.peek_rom_l(0x8123), 0x11);
        assert_eq!(cart.peek_rom_h(0xE456), 0x22);
    }

    #[test]
    fn truncated_chip_rejected() {
        let rom = [0u8; 0x2000];
        let mut img = crt_image(0, 0, 1, &[(0, 0x8000, &rom)]);
        img.truncate(img.len() - 100);
        assert!(matches!(Cartridge::from_crt(&img), Err(CrtError::Truncated)));
    }

    #[test]
    fn ocean_bank_switching() {
        let bank0 = [0xB0u8; 0x2000];
        let bank1 = [0xB1u8; 0x2000];
        let img = crt_image(5, 0, 1, &[(0, 0x8000, &bank0), (1, 0x8000, &bank1)]);
        let mut cart = Cartridge::from_crt(&img).expect("valid CRT");
        assert_eq!(cart.peek_rom_l(0x8000), 0xB0);
        cart.poke_io1(0xDE00, 0x01);
        assert_eq!(cart.peek_rom_l(0x8000), 0xB1);
        cart.reset_config();
        assert_eq!(cart.peek_rom_l(0x8000), 0xB0);
    }

    #[test]
    fn magic_desk_disable_releases_lines() {
        let rom = [0x5Au8; 0x2000];
        let img = crt_image(19, 0, 1, &[(0, 0x8000, &rom)]);
        let mut cart = Cartridge::from_crt(&img).expect("valid CRT");
        assert!(!cart.exrom_line());
        let changed = cart.poke_io1(0xDE00, 0x80); // Bit 7: ROM off
        assert!(changed);
        assert!(cart.exrom_line(), "lines released when disabled");
        assert!(cart.game_line());
    }

    #[test]
    fn simons_basic_toggles_game() {
        let lo = [0u8; 0x2000];
        let hi = [0u8; 0x2000];
        let img = crt_image(4, 0, 0, &[(0, 0x8000, &lo), (0, 0xA000, &hi)]);
        let mut cart = Cartridge::from_crt(&img).expect("valid CRT");
        assert!(!cart.game_line());
        cart.poke_io1(0xDE00, 0x01);
        assert!(cart.game_line());
        cart.poke_io1(0xDE00, 0x00);
        assert!(!cart.game_line());
    }
}
