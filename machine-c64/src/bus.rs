//! The C64 bus: address decoding and chip wiring.
//!
//! Owns every memory-mapped component. The CPU reaches them through the
//! `emu_core::Bus` trait; the dispatch goes through the memory lookup
//! tables, with the I/O page sub-dispatched here.

#![allow(clippy::cast_possible_truncation)]

use drive_1541::IecBus;
use emu_core::Bus;

use crate::cartridge::Cartridge;
use crate::cia::Cia;
use crate::config::C64Config;
use crate::keyboard::{ControlPort, KeyboardMatrix};
use crate::mem::{C64Memory, MemSource};
use crate::sid::SidSink;
use crate::vic::Vic;

/// Everything the CPU can address, plus the IEC bus shared with the
/// drive.
pub struct C64Bus {
    pub mem: C64Memory,
    pub vic: Vic,
    pub cia1: Cia,
    pub cia2: Cia,
    pub sid: SidSink,
    pub keyboard: KeyboardMatrix,
    pub port1: ControlPort,
    pub port2: ControlPort,
    pub cartridge: Option<Cartridge>,
    pub iec: IecBus,
    /// Current CPU cycle, needed by the processor-port capacitors.
    cycle: u64,
}

impl C64Bus {
    #[must_use]
    pub fn new(config: &C64Config) -> Self {
        let mem = C64Memory::new(
            config.kernal_rom.clone(),
            config.basic_rom.clone(),
            config.char_rom.clone(),
        );
        let mut bus = Self {
            mem,
            vic: Vic::new(config.vic_model, config.glue_logic),
            cia1: Cia::new(config.cia_model, config.timer_b_bug),
            cia2: Cia::new(config.cia_model, config.timer_b_bug),
            sid: SidSink::new(config.vic_model.cpu_frequency(), 48_000),
            keyboard: KeyboardMatrix::new(),
            port1: ControlPort::default(),
            port2: ControlPort::default(),
            cartridge: None,
            iec: IecBus::new(),
            cycle: 0,
        };
        bus.sync_cia2_outputs();
        bus
    }

    /// Advance the bus-side cycle reference.
    pub fn set_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
    }

    /// Attach a cartridge and assert its lines.
    pub fn attach_cartridge(&mut self, cartridge: Cartridge) {
        let game = cartridge.game_line();
        let exrom = cartridge.exrom_line();
        self.cartridge = Some(cartridge);
        self.apply_cartridge_lines(game, exrom);
    }

    /// Detach the cartridge and release its lines.
    pub fn detach_cartridge(&mut self) -> Option<Cartridge> {
        let cart = self.cartridge.take();
        self.apply_cartridge_lines(true, true);
        cart
    }

    fn apply_cartridge_lines(&mut self, game: bool, exrom: bool) {
        self.mem.set_cartridge_lines(game, exrom, self.cycle);
        self.vic.set_ultimax(self.mem.ultimax());
    }

    /// Re-read the cartridge lines after an I/O write flipped banks.
    fn refresh_cartridge_lines(&mut self) {
        let (game, exrom) = self
            .cartridge
            .as_ref()
            .map_or((true, true), |c| (c.game_line(), c.exrom_line()));
        self.apply_cartridge_lines(game, exrom);
    }

    /// CIA2 port A drives the VIC bank (inverted bits 0-1) and the IEC
    /// output lines (bits 3-5 through inverting drivers).
    pub fn sync_cia2_outputs(&mut self) {
        let pa = self.cia2.port_a_output();
        self.vic.set_bank(!pa & 0x03);
        self.iec.set_c64_atn(pa & 0x08 != 0);
        self.iec.set_c64_clk(pa & 0x10 != 0);
        self.iec.set_c64_data(pa & 0x20 != 0);
    }

    /// Latch keyboard and joystick state into CIA1's input pins.
    fn refresh_cia1_inputs(&mut self) {
        self.cia1.pa_in = self.port2.line_mask();
        let columns = self.cia1.port_a();
        self.cia1.pb_in = self.keyboard.scan_rows(columns) & self.port1.line_mask();
    }

    /// Latch the IEC input lines into CIA2 PA bits 6 (CLK) and 7 (DATA).
    fn refresh_cia2_inputs(&mut self) {
        let mut pa_in = 0x3F;
        if self.iec.clk() {
            pa_in |= 0x40;
        }
        if self.iec.data() {
            pa_in |= 0x80;
        }
        self.cia2.pa_in = pa_in;
    }

    /// Run both CIAs for one cycle and refresh their pin inputs.
    pub fn cycle_cias(&mut self) {
        self.refresh_cia1_inputs();
        self.refresh_cia2_inputs();
        self.cia1.execute_cycle();
        self.cia2.execute_cycle();
    }

    fn io_read(&mut self, addr: u16) -> u8 {
        match addr {
            0xD000..=0xD3FF => self.vic.read((addr & 0x3F) as u8),
            0xD400..=0xD7FF => self.sid.read((addr & 0x1F) as u8),
            0xD800..=0xDBFF => self.mem.color_ram_read(addr - 0xD800),
            0xDC00..=0xDCFF => {
                self.refresh_cia1_inputs();
                self.cia1.read((addr & 0x0F) as u8)
            }
            0xDD00..=0xDDFF => {
                self.refresh_cia2_inputs();
                self.cia2.read((addr & 0x0F) as u8)
            }
            0xDE00..=0xDEFF => self
                .cartridge
                .as_ref()
                .map_or_else(|| self.mem.open_bus(), |c| c.peek_io1(addr)),
            0xDF00..=0xDFFF => self
                .cartridge
                .as_ref()
                .map_or_else(|| self.mem.open_bus(), |c| c.peek_io2(addr)),
            _ => self.mem.open_bus(),
        }
    }

    fn io_peek(&self, addr: u16) -> u8 {
        match addr {
            0xD000..=0xD3FF => self.vic.peek((addr & 0x3F) as u8),
            0xD400..=0xD7FF => self.sid.read((addr & 0x1F) as u8),
            0xD800..=0xDBFF => self.mem.color_ram_read(addr - 0xD800),
            0xDC00..=0xDCFF => self.cia1.peek((addr & 0x0F) as u8),
            0xDD00..=0xDDFF => self.cia2.peek((addr & 0x0F) as u8),
            0xDE00..=0xDEFF => self
                .cartridge
                .as_ref()
                .map_or_else(|| self.mem.open_bus(), |c| c.peek_io1(addr)),
            0xDF00..=0xDFFF => self
                .cartridge
                .as_ref()
                .map_or_else(|| self.mem.open_bus(), |c| c.peek_io2(addr)),
            _ => self.mem.open_bus(),
        }
    }

    fn io_write(&mut self, addr: u16, value: u8) {
        match addr {
            0xD000..=0xD3FF => self.vic.write((addr & 0x3F) as u8, value),
            0xD400..=0xD7FF => self.sid.write((addr & 0x1F) as u8, value),
            0xD800..=0xDBFF => self.mem.color_ram_write(addr - 0xD800, value),
            0xDC00..=0xDCFF => self.cia1.write((addr & 0x0F) as u8, value),
            0xDD00..=0xDDFF => {
                self.cia2.write((addr & 0x0F) as u8, value);
                if addr & 0x0F <= 0x03 {
                    self.sync_cia2_outputs();
                }
            }
            0xDE00..=0xDEFF => {
                if let Some(cart) = self.cartridge.as_mut() {
                    if cart.poke_io1(addr, value) {
                        self.refresh_cartridge_lines();
                    }
                }
            }
            0xDF00..=0xDFFF => {
                if let Some(cart) = self.cartridge.as_mut() {
                    if cart.poke_io2(addr, value) {
                        self.refresh_cartridge_lines();
                    }
                }
            }
            _ => {}
        }
    }
}

impl Bus for C64Bus {
    fn read(&mut self, address: u16) -> u8 {
        let value = match address {
            0x0000 => self.mem.port.read_direction(),
            0x0001 => self.mem.port.read(self.cycle),
            _ => match self.mem.peek_source(address) {
                MemSource::Io => self.io_read(address),
                MemSource::CartLo => self
                    .cartridge
                    .as_ref()
                    .map_or_else(|| self.mem.open_bus(), |c| c.peek_rom_l(address)),
                MemSource::CartHi => self
                    .cartridge
                    .as_ref()
                    .map_or_else(|| self.mem.open_bus(), |c| c.peek_rom_h(address)),
                source => self.mem.read_resolved(address, source),
            },
        };
        self.mem.set_open_bus(value);
        value
    }

    fn write(&mut self, address: u16, value: u8) {
        self.mem.set_open_bus(value);
        match address {
            0x0000 => {
                self.mem.port.write_direction(value, self.cycle);
                self.mem.update_lookup_tables(self.cycle);
            }
            0x0001 => {
                self.mem.port.write(value);
                self.mem.update_lookup_tables(self.cycle);
            }
            _ => match self.mem.poke_source(address) {
                MemSource::Io => self.io_write(address, value),
                MemSource::OpenBus => {}
                _ => self.mem.ram_write(address, value),
            },
        }
    }

    fn peek(&self, address: u16) -> u8 {
        match address {
            0x0000 => self.mem.port.read_direction(),
            0x0001 => self.mem.port.read(self.cycle),
            _ => match self.mem.peek_source(address) {
                MemSource::Io => self.io_peek(address),
                MemSource::CartLo => self
                    .cartridge
                    .as_ref()
                    .map_or_else(|| self.mem.open_bus(), |c| c.peek_rom_l(address)),
                MemSource::CartHi => self
                    .cartridge
                    .as_ref()
                    .map_or_else(|| self.mem.open_bus(), |c| c.peek_rom_h(address)),
                source => self.mem.read_resolved(address, source),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::CartridgeKind;

    fn make_bus() -> C64Bus {
        let config = C64Config::pal(
            vec![0xEE; 8192],
            vec![0xBB; 8192],
            vec![0xCC; 4096],
            vec![0; 16384],
        );
        C64Bus::new(&config)
    }

    #[test]
    fn ram_and_rom_routing() {
        let mut bus = make_bus();
        bus.write(0x8000, 0xAB);
        assert_eq!(bus.read(0x8000), 0xAB);
        assert_eq!(bus.read(0xA000), 0xBB);
        assert_eq!(bus.read(0xE000), 0xEE);
    }

    #[test]
    fn rom_writes_land_in_ram() {
        let mut bus = make_bus();
        bus.write(0xA000, 0x42);
        assert_eq!(bus.read(0xA000), 0xBB, "ROM still visible");
        assert_eq!(bus.mem.ram_read(0xA000), 0x42);
    }

    #[test]
    fn vic_and_color_registers() {
        let mut bus = make_bus();
        bus.write(0xD020, 0x06);
        assert_eq!(bus.read(0xD020) & 0x0F, 0x06);
        bus.write(0xD800, 0x05);
        assert_eq!(bus.read(0xD800) & 0x0F, 0x05);
    }

    #[test]
    fn cia_mirrors() {
        let mut bus = make_bus();
        bus.write(0xDC02, 0xFF);
        assert_eq!(bus.read(0xDCF2), 0xFF, "mirrored through $DCFF");
    }

    #[test]
    fn cia2_pa_selects_vic_bank() {
        let mut bus = make_bus();
        bus.write(0xDD02, 0x3F); // DDR: outputs
        bus.write(0xDD00, 0x01); // %01 → inverted = bank 2
        assert_eq!(bus.vic.bank(), 2);
    }

    #[test]
    fn cia2_pa_drives_iec_lines() {
        let mut bus = make_bus();
        bus.write(0xDD02, 0x3F);
        bus.write(0xDD00, 0x08); // ATN out bit set → line pulled low
        assert!(!bus.iec.atn());
        assert!(bus.iec.clk());
        bus.write(0xDD00, 0x00);
        assert!(bus.iec.atn());
    }

    #[test]
    fn iec_lines_read_back_on_cia2_pa() {
        let mut bus = make_bus();
        bus.write(0xDD02, 0x3F);
        bus.iec.set_drive_data(true); // Drive pulls DATA low
        let pa = bus.read(0xDD00);
        assert_eq!(pa & 0x80, 0x00, "DATA in low");
        assert_eq!(pa & 0x40, 0x40, "CLK in high");
    }

    #[test]
    fn keyboard_scan_through_cia1() {
        let mut bus = make_bus();
        bus.write(0xDC02, 0xFF); // Port A: outputs (columns)
        bus.write(0xDC03, 0x00); // Port B: inputs (rows)
        bus.keyboard.set_key(1, 2, true);
        bus.write(0xDC00, !0x02); // Select column 1
        assert_eq!(bus.read(0xDC01) & 0x04, 0, "row 2 pulled low");
        bus.write(0xDC00, 0xFF); // No column selected
        assert_eq!(bus.read(0xDC01) & 0x04, 0x04);
    }

    #[test]
    fn joystick_pulls_cia1_lines() {
        let mut bus = make_bus();
        bus.port2.fire = true;
        assert_eq!(bus.read(0xDC00) & 0x10, 0, "fire pulls PA4");
        bus.port1.up = true;
        bus.write(0xDC00, 0xFF);
        assert_eq!(bus.read(0xDC01) & 0x01, 0);
    }

    #[test]
    fn processor_port_rebuilds_tables() {
        let mut bus = make_bus();
        bus.write(0x0001, 0x30); // All RAM
        bus.mem.ram_write(0xE123, 0x77);
        assert_eq!(bus.read(0xE123), 0x77);
        bus.write(0x0001, 0x37);
        assert_eq!(bus.read(0xE123), 0xEE);
    }

    #[test]
    fn cartridge_rom_visible_when_attached() {
        let mut bus = make_bus();
        let cart = Cartridge::from_rom(CartridgeKind::Standard, vec![0x5A; 0x2000], false, true);
        bus.attach_cartridge(cart);
        assert_eq!(bus.read(0x8000), 0x5A);
        bus.detach_cartridge();
        assert_eq!(bus.read(0x8000), 0x00, "RAM again");
    }

    #[test]
    fn expansion_io_floats_without_cartridge() {
        let mut bus = make_bus();
        let _ = bus.read(0x1234); // Seed the open bus with RAM (0)
        assert_eq!(bus.read(0xDE00), 0x00);
    }

    #[test]
    fn spypeek_does_not_disturb_state() {
        let mut bus = make_bus();
        // Arm a CIA interrupt flag, then peek the ICR.
        bus.cia1.write(0x0E, 0b0001_1001);
        bus.cia1.write(0x04, 2);
        bus.cia1.write(0x05, 0);
        for _ in 0..10 {
            bus.cia1.execute_cycle();
        }
        let flags = bus.cia1.icr_status();
        assert_ne!(flags & 0x01, 0);
        let _ = bus.peek(0xDC0D);
        assert_eq!(bus.cia1.icr_status(), flags);
        // A real read clears them.
        let _ = bus.read(0xDC0D);
        assert_eq!(bus.cia1.icr_status() & 0x01, 0);
    }
}
