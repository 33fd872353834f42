//! VIC-II video chip (6569/6567).
//!
//! One call to [`Vic::cycle`] performs one bus cycle's worth of work:
//! the fetch scheduled for the current `(raster_line, raster_cycle)`
//! pair, eight pixels of output, and the BA decision handed back to the
//! CPU as RDY.
//!
//! # Bad lines
//!
//! A bad line occurs when DEN was seen set during line $30, the raster
//! is inside $30-$F7, and `raster & 7 == YSCROLL`. The chip then steals
//! the bus for the 40 character-matrix fetches, asserting BA three
//! cycles ahead of the first one.
//!
//! # Shadow registers
//!
//! Every write lands in `reg_current`; a pipeline bit copies it into
//! `reg_delayed` at the start of the next cycle, and rendering reads the
//! delayed file. The gray-dot bug writes $F into the delayed color for
//! the one cycle the copy is in flight.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{Observable, Value};

use crate::cartridge::Cartridge;
use crate::config::{GlueLogic, VicModel};
use crate::mem::C64Memory;
use crate::palette::{compute_palette, PaletteSettings};

/// Pipeline bit: copy `reg_current` → `reg_delayed` next cycle.
const DELAY_REG_COPY: u32 = 1 << 0;
/// Pipeline bit: a glue-logic bank transition is in flight.
const DELAY_BANK_SWITCH: u32 = 1 << 1;

/// Widest line any model produces, in pixels.
const MAX_LINE_PX: usize = 65 * 8;

/// What the VIC sees at a 4 KiB page of its address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VicMemSource {
    Ram,
    CharRom,
    CartHi,
}

/// Per-sprite state.
#[derive(Debug, Clone, Copy, Default)]
struct Sprite {
    /// DMA unit active (fetching data each line).
    dma_on: bool,
    /// Display unit active (data drawn this line).
    display_on: bool,
    /// Data counter base, advanced at the end of each fetch line.
    mcbase: u8,
    /// Data counter for the current fetch.
    mc: u8,
    /// Y-expansion flipflop.
    exp_ff: bool,
    /// Data bytes fetched for the upcoming line.
    line_data: [u8; 3],
    /// Data fetched and armed for display.
    pending: bool,
    /// Data latched for the line being drawn (the fetch straddles the
    /// line boundary, so it is taken over once complete).
    display_data: [u8; 3],
    display_pending: bool,
}

/// The VIC-II.
pub struct Vic {
    model: VicModel,
    glue_logic: GlueLogic,
    gray_dot_bug: bool,

    /// Current raster position. `raster_cycle` counts 1..=cycles/line.
    raster_line: u16,
    raster_cycle: u8,
    frame: u64,
    frame_complete: bool,

    /// Shadow register pair ($D000-$D02E).
    reg_current: [u8; 0x2F],
    reg_delayed: [u8; 0x2F],
    delay_pipe: u32,

    /// Interrupt request register ($D019, bits 0-3 + master bit 7).
    irr: u8,
    /// Interrupt mask register ($D01A).
    imr: u8,

    /// Raster line that triggers the raster interrupt.
    raster_compare: u16,

    /// VIC bank (0-3) from CIA2, already inverted.
    bank: u8,
    /// Pending bank for the custom-IC glue logic.
    bank_target: u8,
    mem_src: [VicMemSource; 16],
    ultimax: bool,

    /// DEN seen set during line $30.
    den_latch: bool,
    badline: bool,
    display_state: bool,

    /// Video matrix and color line buffers (c-accesses).
    vm_line: [u8; 40],
    color_line: [u8; 40],
    /// Video counter, its base, and the matrix index.
    vc: u16,
    vc_base: u16,
    vmli: usize,
    /// Row counter within a character row.
    rc: u8,

    /// Graphics data pipe: previous and current g-access bytes.
    gfx_pipe: u16,
    /// (char, color) for the previous and current g-access.
    vm_pipe: [(u8, u8); 2],

    sprites: [Sprite; 8],
    sprite_sprite_coll: u8,
    sprite_bg_coll: u8,

    /// Border unit flipflops.
    main_border_ff: bool,
    vert_border_ff: bool,

    /// Light pen: latched once per frame.
    lp_triggered: bool,
    lp_line: bool,
    lpx: u8,
    lpy: u8,

    ba_low: bool,

    // Per-line pixel bookkeeping.
    fg_line: [bool; MAX_LINE_PX],
    border_line: [bool; MAX_LINE_PX],

    palette_settings: PaletteSettings,
    palette: [u32; 16],
    framebuffer: Vec<u32>,
}

impl Vic {
    #[must_use]
    pub fn new(model: VicModel, glue_logic: GlueLogic) -> Self {
        let width = usize::from(model.cycles_per_line()) * 8;
        let height = usize::from(model.lines_per_frame());
        let settings = PaletteSettings::default();
        let mut vic = Self {
            model,
            glue_logic,
            gray_dot_bug: false,
            raster_line: 0,
            raster_cycle: 1,
            frame: 0,
            frame_complete: false,
            reg_current: [0; 0x2F],
            reg_delayed: [0; 0x2F],
            delay_pipe: 0,
            irr: 0,
            imr: 0,
            raster_compare: 0,
            bank: 0,
            bank_target: 0,
            mem_src: [VicMemSource::Ram; 16],
            ultimax: false,
            den_latch: false,
            badline: false,
            display_state: false,
            vm_line: [0; 40],
            color_line: [0; 40],
            vc: 0,
            vc_base: 0,
            vmli: 0,
            rc: 0,
            gfx_pipe: 0,
            vm_pipe: [(0, 0); 2],
            sprites: [Sprite::default(); 8],
            sprite_sprite_coll: 0,
            sprite_bg_coll: 0,
            main_border_ff: true,
            vert_border_ff: true,
            lp_triggered: false,
            lp_line: true,
            lpx: 0,
            lpy: 0,
            ba_low: false,
            fg_line: [false; MAX_LINE_PX],
            border_line: [false; MAX_LINE_PX],
            palette_settings: settings,
            palette: [0; 16],
            framebuffer: vec![0xFF00_0000; width * height],
        };
        vic.palette = compute_palette(model, &vic.palette_settings);
        vic.rebuild_mem_table();
        vic
    }

    pub fn reset(&mut self) {
        let model = self.model;
        let glue = self.glue_logic;
        let gray = self.gray_dot_bug;
        let settings = self.palette_settings;
        *self = Self::new(model, glue);
        self.gray_dot_bug = gray;
        self.palette_settings = settings;
        self.palette = compute_palette(model, &settings);
    }

    // --- Configuration ---

    #[must_use]
    pub fn model(&self) -> VicModel {
        self.model
    }

    pub fn set_gray_dot_bug(&mut self, enabled: bool) {
        self.gray_dot_bug = enabled;
    }

    #[must_use]
    pub fn gray_dot_bug(&self) -> bool {
        self.gray_dot_bug
    }

    pub fn set_palette_settings(&mut self, settings: PaletteSettings) {
        self.palette_settings = settings;
        self.palette = compute_palette(self.model, &settings);
    }

    #[must_use]
    pub fn palette_settings(&self) -> PaletteSettings {
        self.palette_settings
    }

    // --- Host-facing output ---

    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    #[must_use]
    pub fn framebuffer_width(&self) -> u32 {
        u32::from(self.model.cycles_per_line()) * 8
    }

    #[must_use]
    pub fn framebuffer_height(&self) -> u32 {
        u32::from(self.model.lines_per_frame())
    }

    /// Frame-complete flag, cleared by reading.
    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub fn raster_line(&self) -> u16 {
        self.raster_line
    }

    /// Current cycle within the line (1-based).
    #[must_use]
    pub fn raster_cycle(&self) -> u8 {
        self.raster_cycle
    }

    #[must_use]
    pub fn bad_line(&self) -> bool {
        self.badline
    }

    #[must_use]
    pub fn ba_low(&self) -> bool {
        self.ba_low
    }

    /// IRQ output: low while any enabled source is pending.
    #[must_use]
    pub fn irq_line_low(&self) -> bool {
        self.irr & 0x80 != 0
    }

    // --- Banking ---

    /// New VIC bank from CIA2 (already inverted to 0-3).
    pub fn set_bank(&mut self, bank: u8) {
        let bank = bank & 0x03;
        match self.glue_logic {
            GlueLogic::Discrete => {
                self.bank = bank;
                self.rebuild_mem_table();
            }
            GlueLogic::CustomIc => {
                // For one cycle the multiplexer presents the OR of the
                // old and new address bits.
                self.bank_target = bank;
                self.bank = self.bank | bank;
                self.delay_pipe |= DELAY_BANK_SWITCH;
                self.rebuild_mem_table();
            }
        }
    }

    #[must_use]
    pub fn bank(&self) -> u8 {
        self.bank
    }

    /// Ultimax line state from the expansion port.
    pub fn set_ultimax(&mut self, ultimax: bool) {
        if self.ultimax != ultimax {
            self.ultimax = ultimax;
            self.rebuild_mem_table();
        }
    }

    /// Rebuild the 16-entry source table over the 64 KiB address space
    /// as seen through the current bank.
    fn rebuild_mem_table(&mut self) {
        let mut table = [VicMemSource::Ram; 16];
        // Character ROM shadows $1000-$1FFF and $9000-$9FFF.
        table[0x1] = VicMemSource::CharRom;
        table[0x9] = VicMemSource::CharRom;
        if self.ultimax {
            table[0x1] = VicMemSource::Ram;
            table[0x9] = VicMemSource::Ram;
            table[0x3] = VicMemSource::CartHi;
            table[0x7] = VicMemSource::CartHi;
            table[0xB] = VicMemSource::CartHi;
            table[0xF] = VicMemSource::CartHi;
        }
        self.mem_src = table;
    }

    /// One VIC bus fetch through the source table.
    fn vic_read(&self, mem: &C64Memory, cart: Option<&Cartridge>, addr14: u16) -> u8 {
        let full = (u16::from(self.bank) << 14) | (addr14 & 0x3FFF);
        match self.mem_src[(full >> 12) as usize] {
            VicMemSource::Ram => mem.ram_read(full),
            VicMemSource::CharRom => mem.char_rom()[(full & 0x0FFF) as usize],
            VicMemSource::CartHi => cart.map_or(0xFF, |c| c.peek_rom_h(full)),
        }
    }

    // --- Light pen ---

    /// Drive the light-pen input (CIA1 PB4). Latches once per frame on
    /// the falling edge.
    pub fn set_lightpen(&mut self, level: bool) {
        if self.lp_line && !level && !self.lp_triggered {
            self.lp_triggered = true;
            self.lpx = (u16::from(self.raster_cycle) * 4) as u8;
            self.lpy = self.raster_line as u8;
            self.set_interrupt(0x08);
        }
        self.lp_line = level;
    }

    // --- Register access ---

    /// Read a VIC register (with side effects on $D01E/$D01F).
    pub fn read(&mut self, reg: u8) -> u8 {
        let reg = reg & 0x3F;
        match reg {
            0x1E => {
                let v = self.sprite_sprite_coll;
                self.sprite_sprite_coll = 0;
                v
            }
            0x1F => {
                let v = self.sprite_bg_coll;
                self.sprite_bg_coll = 0;
                v
            }
            _ => self.peek(reg),
        }
    }

    /// Side-effect-free register read with the documented masks.
    #[must_use]
    pub fn peek(&self, reg: u8) -> u8 {
        let reg = reg & 0x3F;
        match reg {
            0x11 => {
                (self.reg_current[0x11] & 0x7F) | (((self.raster_line >> 8) as u8) << 7)
            }
            0x12 => self.raster_line as u8,
            0x13 => self.lpx,
            0x14 => self.lpy,
            0x16 => self.reg_current[0x16] | 0xC0,
            0x18 => self.reg_current[0x18] | 0x01,
            0x19 => self.irr | 0x70,
            0x1A => self.imr | 0xF0,
            0x1E => self.sprite_sprite_coll,
            0x1F => self.sprite_bg_coll,
            0x20..=0x2E => self.reg_current[reg as usize] | 0xF0,
            0x2F..=0x3F => 0xFF,
            _ => self.reg_current[reg as usize],
        }
    }

    /// Write a VIC register.
    pub fn write(&mut self, reg: u8, value: u8) {
        let reg = reg & 0x3F;
        if reg >= 0x2F {
            return;
        }
        match reg {
            0x11 => {
                self.reg_current[0x11] = value;
                self.raster_compare =
                    (self.raster_compare & 0x00FF) | (u16::from(value & 0x80) << 1);
                // DEN is sampled continuously during line $30.
                if self.raster_line == 0x30 && value & 0x10 != 0 {
                    self.den_latch = true;
                }
            }
            0x12 => {
                self.raster_compare = (self.raster_compare & 0x0100) | u16::from(value);
                self.reg_current[0x12] = value;
            }
            0x19 => {
                // Writing 1s acknowledges those sources.
                self.irr &= !(value & 0x0F);
                self.update_irq_master();
            }
            0x1A => {
                self.imr = value & 0x0F;
                self.update_irq_master();
            }
            0x20..=0x2E => {
                self.reg_current[reg as usize] = value & 0x0F;
                if self.gray_dot_bug {
                    // The delayed nibble shows gray for one cycle.
                    self.reg_delayed[reg as usize] = 0x0F;
                }
            }
            _ => self.reg_current[reg as usize] = value,
        }
        self.delay_pipe |= DELAY_REG_COPY;
    }

    fn set_interrupt(&mut self, bit: u8) {
        self.irr |= bit;
        self.update_irq_master();
    }

    fn update_irq_master(&mut self) {
        if self.irr & self.imr & 0x0F != 0 {
            self.irr |= 0x80;
        } else {
            self.irr &= 0x7F;
        }
    }

    // --- The cycle ---

    /// Execute one VIC cycle. Returns the BA level (true = bus stolen,
    /// CPU must stall on reads).
    pub fn cycle(&mut self, mem: &C64Memory, cart: Option<&Cartridge>) -> bool {
        // Shift the delay pipeline: delayed registers catch up, a glue
        // transition bank settles.
        if self.delay_pipe & DELAY_REG_COPY != 0 {
            self.reg_delayed = self.reg_current;
        }
        if self.delay_pipe & DELAY_BANK_SWITCH != 0 {
            self.bank = self.bank_target;
            self.rebuild_mem_table();
        }
        self.delay_pipe = 0;

        let cpl = self.model.cycles_per_line();
        let cycle = self.raster_cycle;
        let line = self.raster_line;

        // Raster interrupt fires at the start of the line (cycle 2 on
        // line 0, where the counter wraps late).
        let irq_cycle = if line == 0 { 2 } else { 1 };
        if cycle == irq_cycle && line == self.raster_compare {
            self.set_interrupt(0x01);
        }

        // DEN latch and the bad-line condition.
        let den = self.reg_current[0x11] & 0x10 != 0;
        if line == 0x30 && den {
            self.den_latch = true;
        }
        let yscroll = u16::from(self.reg_current[0x11] & 0x07);
        self.badline =
            self.den_latch && (0x30..=0xF7).contains(&line) && (line & 7) == yscroll;
        if self.badline {
            self.display_state = true;
        }

        // Sprite fetches straddle the line wrap (pointers for sprites
        // 0-2 at the end of the previous line, 3-7 at the start of this
        // one); by cycle 10 they are complete and get latched for
        // display on this line.
        if cycle == 10 {
            for sprite in &mut self.sprites {
                sprite.display_pending = sprite.pending;
                sprite.display_data = sprite.line_data;
                sprite.pending = false;
            }
        }

        // Scheduled fetches.
        match cycle {
            14 => {
                self.vc = self.vc_base;
                self.vmli = 0;
                if self.badline {
                    self.rc = 0;
                }
            }
            15..=54 => {
                if self.badline {
                    // c-access: video matrix + color line.
                    let vm_base = u16::from(self.reg_delayed[0x18] & 0xF0) << 6;
                    let ch = self.vic_read(mem, cart, vm_base | (self.vc & 0x3FF));
                    self.vm_line[self.vmli] = ch;
                    self.color_line[self.vmli] = mem.color_nibble(self.vc & 0x3FF);
                }
            }
            58 => {
                if self.rc == 7 {
                    self.vc_base = self.vc;
                    if !self.badline {
                        self.display_state = false;
                    }
                }
                if self.display_state {
                    self.rc = (self.rc + 1) & 7;
                }
                // Sprite display decisions.
                for i in 0..8 {
                    let sprite = &mut self.sprites[i];
                    sprite.mc = sprite.mcbase;
                    if sprite.dma_on {
                        let y = self.reg_delayed[1 + i * 2];
                        if u16::from(y) == (line & 0xFF) {
                            sprite.display_on = true;
                        }
                    } else {
                        sprite.display_on = false;
                    }
                }
            }
            _ => {}
        }

        // g-access window.
        if (16..=55).contains(&cycle) {
            self.g_access(mem, cart);
        }

        // Sprite DMA on/off checks in cycles 55/56.
        if cycle == 55 {
            for i in 0..8 {
                if self.reg_delayed[0x17] & (1 << i) != 0 {
                    self.sprites[i].exp_ff = !self.sprites[i].exp_ff;
                }
            }
        }
        if cycle == 55 || cycle == 56 {
            for i in 0..8 {
                let enabled = self.reg_delayed[0x15] & (1 << i) != 0;
                let y = self.reg_delayed[1 + i * 2];
                let sprite = &mut self.sprites[i];
                if enabled && u16::from(y) == (line & 0xFF) && !sprite.dma_on {
                    sprite.dma_on = true;
                    sprite.mcbase = 0;
                    if self.reg_delayed[0x17] & (1 << i) != 0 {
                        sprite.exp_ff = false;
                    }
                }
            }
        }

        // Sprite pointer and data fetches.
        self.sprite_accesses(mem, cart, cycle, cpl);

        // MCBASE advance (end of a sprite fetch line).
        if cycle == 16 {
            for i in 0..8 {
                let sprite = &mut self.sprites[i];
                if sprite.exp_ff || self.reg_delayed[0x17] & (1 << i) == 0 {
                    sprite.mcbase = sprite.mc;
                    if sprite.mcbase == 63 {
                        sprite.dma_on = false;
                    }
                }
            }
        }

        // Render this cycle's eight pixels.
        self.render_pixels(cycle, line);

        // BA: character DMA and sprite DMA windows.
        let char_ba = self.badline && (12..=54).contains(&cycle);
        let sprite_ba = self.sprite_ba(cycle, cpl);
        self.ba_low = char_ba || sprite_ba;

        // Advance the beam.
        self.raster_cycle += 1;
        if self.raster_cycle > cpl {
            self.raster_cycle = 1;
            self.finish_line(line);
        }

        self.ba_low
    }

    /// One graphics access, feeding the pixel pipe.
    fn g_access(&mut self, mem: &C64Memory, cart: Option<&Cartridge>) {
        let reg11 = self.reg_delayed[0x11];
        let ecm = reg11 & 0x40 != 0;
        let bmm = reg11 & 0x20 != 0;

        let byte = if self.display_state {
            let addr = if bmm {
                let bitmap_base = u16::from(self.reg_delayed[0x18] & 0x08) << 10;
                bitmap_base | ((self.vc & 0x3FF) << 3) | u16::from(self.rc)
            } else {
                let char_base = u16::from(self.reg_delayed[0x18] & 0x0E) << 10;
                let mut index = u16::from(self.vm_line[self.vmli]);
                if ecm {
                    index &= 0x3F;
                }
                char_base | (index << 3) | u16::from(self.rc)
            };
            let b = self.vic_read(mem, cart, addr);
            self.vm_pipe[0] = self.vm_pipe[1];
            self.vm_pipe[1] = (self.vm_line[self.vmli], self.color_line[self.vmli]);
            self.vc = (self.vc + 1) & 0x3FF;
            self.vmli = (self.vmli + 1) & 0x3F;
            b
        } else {
            // Idle access.
            let addr = if ecm { 0x39FF } else { 0x3FFF };
            self.vm_pipe[0] = self.vm_pipe[1];
            self.vm_pipe[1] = (0, 0);
            self.vic_read(mem, cart, addr)
        };

        self.gfx_pipe = (self.gfx_pipe << 8) | u16::from(byte);
    }

    /// Sprite p- and s-accesses for this cycle.
    fn sprite_accesses(
        &mut self,
        mem: &C64Memory,
        cart: Option<&Cartridge>,
        cycle: u8,
        cpl: u8,
    ) {
        let first_p = cpl - 5;
        for i in 0..8u8 {
            let p_cycle = Self::wrap_cycle(first_p + 2 * i, cpl);
            if cycle != p_cycle {
                continue;
            }
            let idx = usize::from(i);
            // p-access: pointer from the video matrix tail.
            let vm_base = u16::from(self.reg_delayed[0x18] & 0xF0) << 6;
            let ptr = self.vic_read(mem, cart, vm_base | 0x03F8 | u16::from(i));
            if self.sprites[idx].dma_on {
                // Three s-accesses fill the line data.
                let base = u16::from(ptr) * 64;
                for byte in 0..3usize {
                    let mc = u16::from(self.sprites[idx].mc);
                    self.sprites[idx].line_data[byte] =
                        self.vic_read(mem, cart, base + mc);
                    self.sprites[idx].mc = (self.sprites[idx].mc + 1) & 0x3F;
                }
                if self.sprites[idx].display_on {
                    self.sprites[idx].pending = true;
                }
            }
        }
    }

    fn wrap_cycle(cycle: u8, cpl: u8) -> u8 {
        if cycle > cpl {
            cycle - cpl
        } else {
            cycle
        }
    }

    /// BA for sprite DMA: asserted from three cycles before the
    /// p-access until the fetch is done.
    fn sprite_ba(&self, cycle: u8, cpl: u8) -> bool {
        let first_p = cpl - 5;
        for i in 0..8u8 {
            if !self.sprites[usize::from(i)].dma_on {
                continue;
            }
            let p_cycle = first_p + 2 * i;
            // Window: [p - 3, p + 1] in unwrapped cycle numbers.
            for offset in 0..5u8 {
                if Self::wrap_cycle(p_cycle + offset, cpl) == Self::wrap_cycle(cycle + 3, cpl) {
                    return true;
                }
            }
        }
        false
    }

    /// Draw eight pixels and track the border unit.
    fn render_pixels(&mut self, cycle: u8, line: u16) {
        let reg11 = self.reg_delayed[0x11];
        let reg16 = self.reg_delayed[0x16];
        let ecm = reg11 & 0x40 != 0;
        let bmm = reg11 & 0x20 != 0;
        let mcm = reg16 & 0x10 != 0;
        let xscroll = reg16 & 0x07;
        let csel = reg16 & 0x08 != 0;
        let rsel = reg11 & 0x08 != 0;
        let den = reg11 & 0x10 != 0;

        let (left, right) = if csel { (24i32, 344i32) } else { (31, 335) };
        let (top, bottom) = if rsel { (51u16, 251u16) } else { (55, 247) };

        let fb_base = usize::from(line) * usize::from(self.model.cycles_per_line()) * 8;
        let in_window = (16..=55).contains(&cycle);

        for p in 0..8u8 {
            let fb_x = (usize::from(cycle) - 1) * 8 + usize::from(p);
            let x = (i32::from(cycle) - 13) * 8 + i32::from(p);

            // Border unit rules.
            if x == right {
                self.main_border_ff = true;
            }
            if x == left {
                if line == bottom {
                    self.vert_border_ff = true;
                }
                if line == top && den {
                    self.vert_border_ff = false;
                }
                if !self.vert_border_ff {
                    self.main_border_ff = false;
                }
            }

            let (color, foreground) = if in_window && !self.vert_border_ff {
                self.graphics_pixel(p, xscroll, ecm, bmm, mcm)
            } else {
                (self.reg_delayed[0x21] & 0x0F, false)
            };

            self.fg_line[fb_x] = foreground;
            self.border_line[fb_x] = self.main_border_ff;
            if let Some(px) = self.framebuffer.get_mut(fb_base + fb_x) {
                *px = self.palette[usize::from(color)];
            }
        }

        // Vertical border checks at the end of the line, for lines where
        // the left-edge comparison never ran.
        if usize::from(cycle) == usize::from(self.model.cycles_per_line()) {
            if line == bottom {
                self.vert_border_ff = true;
            }
            if line == top && den {
                self.vert_border_ff = false;
            }
        }
    }

    /// One graphics pixel from the pipe.
    fn graphics_pixel(&self, p: u8, xscroll: u8, ecm: bool, bmm: bool, mcm: bool) -> (u8, bool) {
        // Bit position within the 16-bit pipe (prev byte | cur byte).
        let pos = 8 + i16::from(p) - i16::from(xscroll);
        let (ch, color) = if pos >= 8 {
            self.vm_pipe[1]
        } else {
            self.vm_pipe[0]
        };
        let bit_at = |idx: i16| -> u8 {
            if !(0..16).contains(&idx) {
                return 0;
            }
            ((self.gfx_pipe >> (15 - idx)) & 1) as u8
        };

        let bg0 = self.reg_delayed[0x21] & 0x0F;

        if ecm && (bmm || mcm) {
            // Invalid mode: black output, foreground from the raw bit.
            return (0, bit_at(pos) != 0);
        }

        if bmm {
            if mcm {
                // Multicolor bitmap: double-wide pixels from bit pairs.
                let pair = (bit_at(pos & !1) << 1) | bit_at((pos & !1) + 1);
                let color_pixel = match pair {
                    0 => (bg0, false),
                    1 => (ch >> 4, false),
                    2 => (ch & 0x0F, true),
                    _ => (color, true),
                };
                return color_pixel;
            }
            // Hires bitmap: char byte holds both colors.
            let bit = bit_at(pos);
            return if bit != 0 {
                (ch >> 4, true)
            } else {
                (ch & 0x0F, false)
            };
        }

        if ecm {
            // ECM text: background from the char index top bits.
            let bit = bit_at(pos);
            if bit != 0 {
                return (color, true);
            }
            let bg_index = (ch >> 6) & 0x03;
            return (self.reg_delayed[0x21 + usize::from(bg_index)] & 0x0F, false);
        }

        if mcm && color & 0x08 != 0 {
            // Multicolor text (color bit 3 set): pairs.
            let pair = (bit_at(pos & !1) << 1) | bit_at((pos & !1) + 1);
            return match pair {
                0 => (bg0, false),
                1 => (self.reg_delayed[0x22] & 0x0F, false),
                2 => (self.reg_delayed[0x23] & 0x0F, true),
                _ => (color & 0x07, true),
            };
        }

        // Standard text.
        let bit = bit_at(pos);
        if bit != 0 {
            (color, true)
        } else {
            (bg0, false)
        }
    }

    /// End of line: overlay sprites, apply the border, advance counters.
    fn finish_line(&mut self, line: u16) {
        self.overlay_sprites(line);

        // Apply the border on top of everything.
        let fb_base = usize::from(line) * usize::from(self.model.cycles_per_line()) * 8;
        let border_color = self.reg_delayed[0x20] & 0x0F;
        let width = usize::from(self.model.cycles_per_line()) * 8;
        for fb_x in 0..width {
            if self.border_line[fb_x] {
                if let Some(px) = self.framebuffer.get_mut(fb_base + fb_x) {
                    *px = self.palette[usize::from(border_color)];
                }
            }
        }

        self.raster_line += 1;
        if self.raster_line >= self.model.lines_per_frame() {
            self.raster_line = 0;
            self.frame += 1;
            self.frame_complete = true;
            self.den_latch = false;
            self.lp_triggered = false;
            self.vc_base = 0;
        }
    }

    /// Draw the sprites fetched for this line, latching collisions.
    fn overlay_sprites(&mut self, line: u16) {
        let fb_base = usize::from(line) * usize::from(self.model.cycles_per_line()) * 8;
        let width = usize::from(self.model.cycles_per_line()) * 8;
        let mut coverage = [0u8; MAX_LINE_PX];

        // Highest-numbered sprites have the lowest priority: draw 7→0.
        for i in (0..8usize).rev() {
            if !self.sprites[i].display_pending {
                continue;
            }
            self.sprites[i].display_pending = false;

            let data = self.sprites[i].display_data;
            let msb = self.reg_delayed[0x10] & (1 << i) != 0;
            let x = u16::from(self.reg_delayed[i * 2]) | if msb { 0x100 } else { 0 };
            let x_expand = self.reg_delayed[0x1D] & (1 << i) != 0;
            let multicolor = self.reg_delayed[0x1C] & (1 << i) != 0;
            let behind_bg = self.reg_delayed[0x1B] & (1 << i) != 0;
            let sprite_color = self.reg_delayed[0x27 + i] & 0x0F;
            let mc0 = self.reg_delayed[0x25] & 0x0F;
            let mc1 = self.reg_delayed[0x26] & 0x0F;

            let bits = (u32::from(data[0]) << 16) | (u32::from(data[1]) << 8) | u32::from(data[2]);
            let render_width = if x_expand { 48usize } else { 24 };

            for out in 0..render_width {
                let source = if x_expand { out / 2 } else { out };
                // Screen x 24 maps to framebuffer column 120.
                let fb_x = usize::from(x) + 96 + out;
                if fb_x >= width {
                    continue;
                }

                let (opaque, color) = if multicolor {
                    let pair_index = (source / 2) * 2;
                    let pair = ((bits >> (22 - pair_index)) & 0x03) as u8;
                    match pair {
                        0 => (false, 0),
                        1 => (true, mc0),
                        2 => (true, sprite_color),
                        _ => (true, mc1),
                    }
                } else {
                    let bit = (bits >> (23 - source)) & 1;
                    (bit != 0, sprite_color)
                };

                if !opaque {
                    continue;
                }

                // Collision latches fire even where nothing is drawn.
                if coverage[fb_x] != 0 {
                    let was = self.sprite_sprite_coll;
                    self.sprite_sprite_coll |= coverage[fb_x] | (1 << i);
                    if was == 0 {
                        self.set_interrupt(0x04);
                    }
                }
                coverage[fb_x] |= 1 << i;

                if self.fg_line[fb_x] {
                    let was = self.sprite_bg_coll;
                    self.sprite_bg_coll |= 1 << i;
                    if was == 0 {
                        self.set_interrupt(0x02);
                    }
                }

                // Priority: behind-background sprites lose to foreground.
                if behind_bg && self.fg_line[fb_x] {
                    continue;
                }
                if let Some(px) = self.framebuffer.get_mut(fb_base + fb_x) {
                    *px = self.palette[usize::from(color)];
                }
            }
        }
    }

    /// Snapshot access: the full shadow register file and position.
    #[must_use]
    pub fn state_for_snapshot(&self) -> VicSnapshotView {
        VicSnapshotView {
            reg_current: self.reg_current,
            reg_delayed: self.reg_delayed,
            raster_line: self.raster_line,
            raster_cycle: self.raster_cycle,
            raster_compare: self.raster_compare,
            irr: self.irr,
            imr: self.imr,
            bank: self.bank,
            vc: self.vc,
            vc_base: self.vc_base,
            rc: self.rc,
            den_latch: self.den_latch,
            display_state: self.display_state,
            vm_line: self.vm_line,
            color_line: self.color_line,
            sprite_sprite_coll: self.sprite_sprite_coll,
            sprite_bg_coll: self.sprite_bg_coll,
        }
    }

    /// Restore from a snapshot view.
    pub fn restore(&mut self, view: &VicSnapshotView) {
        self.reg_current = view.reg_current;
        self.reg_delayed = view.reg_delayed;
        self.raster_line = view.raster_line;
        self.raster_cycle = view.raster_cycle;
        self.raster_compare = view.raster_compare;
        self.irr = view.irr;
        self.imr = view.imr;
        self.bank = view.bank;
        self.vc = view.vc;
        self.vc_base = view.vc_base;
        self.rc = view.rc;
        self.den_latch = view.den_latch;
        self.display_state = view.display_state;
        self.vm_line = view.vm_line;
        self.color_line = view.color_line;
        self.sprite_sprite_coll = view.sprite_sprite_coll;
        self.sprite_bg_coll = view.sprite_bg_coll;
        self.rebuild_mem_table();
    }
}

/// Flattened VIC state for the snapshot writer.
pub struct VicSnapshotView {
    pub reg_current: [u8; 0x2F],
    pub reg_delayed: [u8; 0x2F],
    pub raster_line: u16,
    pub raster_cycle: u8,
    pub raster_compare: u16,
    pub irr: u8,
    pub imr: u8,
    pub bank: u8,
    pub vc: u16,
    pub vc_base: u16,
    pub rc: u8,
    pub den_latch: bool,
    pub display_state: bool,
    pub vm_line: [u8; 40],
    pub color_line: [u8; 40],
    pub sprite_sprite_coll: u8,
    pub sprite_bg_coll: u8,
}

impl Observable for Vic {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "line" => Some(self.raster_line.into()),
            "cycle" => Some(u16::from(self.raster_cycle).into()),
            "frame" => Some(self.frame.into()),
            "badline" => Some(self.badline.into()),
            "ba" => Some(self.ba_low.into()),
            "bank" => Some(self.bank.into()),
            "irr" => Some(self.irr.into()),
            "imr" => Some(self.imr.into()),
            "raster_compare" => Some(self.raster_compare.into()),
            "display" => Some(self.display_state.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "line", "cycle", "frame", "badline", "ba", "bank", "irr", "imr", "raster_compare",
            "display",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_vic() -> (Vic, C64Memory) {
        let vic = Vic::new(VicModel::Pal6569, GlueLogic::Discrete);
        let mem = C64Memory::new(vec![0; 8192], vec![0; 8192], vec![0; 4096]);
        (vic, mem)
    }

    fn run_cycles(vic: &mut Vic, mem: &C64Memory, n: usize) {
        for _ in 0..n {
            vic.cycle(mem, None);
        }
    }

    fn run_to(vic: &mut Vic, mem: &C64Memory, line: u16, cycle: u8) {
        // Runs at most one frame looking for the target position.
        for _ in 0..vic.model().cycles_per_frame() + 70 {
            if vic.raster_line() == line && vic.raster_cycle() == cycle {
                return;
            }
            vic.cycle(mem, None);
        }
        panic!("position ({line}, {cycle}) never reached");
    }

    #[test]
    fn frame_has_model_cycle_count() {
        let (mut vic, mem) = make_vic();
        let mut cycles = 0u32;
        loop {
            vic.cycle(&mem, None);
            cycles += 1;
            if vic.take_frame_complete() {
                break;
            }
        }
        assert_eq!(cycles, VicModel::Pal6569.cycles_per_frame());
    }

    #[test]
    fn badline_condition() {
        let (mut vic, mem) = make_vic();
        vic.write(0x11, 0x1B); // DEN=1, YSCROLL=3
        run_to(&mut vic, &mem, 0x33, 20);
        assert!(vic.bad_line(), "line 0x33 & 7 == 3");
        run_to(&mut vic, &mem, 0x34, 20);
        assert!(!vic.bad_line());
    }

    #[test]
    fn no_badline_without_den() {
        let (mut vic, mem) = make_vic();
        vic.write(0x11, 0x0B); // DEN=0
        run_to(&mut vic, &mem, 0x33, 20);
        assert!(!vic.bad_line());
    }

    #[test]
    fn den_latched_during_line_30_only() {
        let (mut vic, mem) = make_vic();
        // Enable the display after line $30 has passed: no bad lines
        // this frame.
        run_to(&mut vic, &mem, 0x40, 1);
        vic.write(0x11, 0x1B);
        run_to(&mut vic, &mem, 0x43, 20);
        assert!(!vic.bad_line());
        // Next frame picks it up.
        run_to(&mut vic, &mem, 0x33, 20);
        assert!(vic.bad_line());
    }

    #[test]
    fn badline_asserts_ba_in_fetch_window() {
        let (mut vic, mem) = make_vic();
        vic.write(0x11, 0x1B);
        run_to(&mut vic, &mem, 0x33, 12);
        assert!(!vic.ba_low(), "cycle 11 leaves BA high");
        vic.cycle(&mem, None); // Cycle 12: three cycles before c-access
        assert!(vic.ba_low());
        run_to(&mut vic, &mem, 0x33, 56);
        assert!(!vic.ba_low(), "released after cycle 54");
    }

    #[test]
    fn raster_irq_fires_at_configured_line() {
        let (mut vic, mem) = make_vic();
        vic.write(0x1A, 0x01); // Enable raster IRQ
        vic.write(0x12, 0x64); // Compare line $64
        run_to(&mut vic, &mem, 0x63, 60);
        assert!(!vic.irq_line_low());
        run_to(&mut vic, &mem, 0x64, 2);
        assert!(vic.irq_line_low());
        // Acknowledge.
        vic.write(0x19, 0x01);
        assert!(!vic.irq_line_low());
    }

    #[test]
    fn raster_irq_fires_once_per_frame_per_line() {
        let (mut vic, mem) = make_vic();
        vic.write(0x1A, 0x01);
        vic.write(0x12, 0x64);
        let mut count = 0;
        let frames = 2;
        for _ in 0..VicModel::Pal6569.cycles_per_frame() * frames {
            vic.cycle(&mem, None);
            if vic.irq_line_low() {
                count += 1;
                vic.write(0x19, 0x01);
            }
        }
        assert_eq!(count, frames);
    }

    #[test]
    fn raster_compare_msb_in_d011() {
        let (mut vic, mem) = make_vic();
        vic.write(0x1A, 0x01);
        vic.write(0x12, 0x10);
        vic.write(0x11, 0x80 | 0x1B); // Raster bit 8
        run_to(&mut vic, &mem, 0x110, 2);
        assert!(vic.irq_line_low());
    }

    #[test]
    fn reading_d011_d012_returns_position() {
        let (mut vic, mem) = make_vic();
        run_to(&mut vic, &mem, 0x105, 10);
        assert_eq!(vic.peek(0x12), 0x05);
        assert_eq!(vic.peek(0x11) & 0x80, 0x80);
    }

    #[test]
    fn unused_register_bits_read_high() {
        let (vic, _mem) = make_vic();
        assert_eq!(vic.peek(0x16) & 0xC0, 0xC0);
        assert_eq!(vic.peek(0x18) & 0x01, 0x01);
        assert_eq!(vic.peek(0x19) & 0x70, 0x70);
        assert_eq!(vic.peek(0x1A) & 0xF0, 0xF0);
        assert_eq!(vic.peek(0x20) & 0xF0, 0xF0);
        assert_eq!(vic.peek(0x2F), 0xFF);
    }

    #[test]
    fn delayed_register_copy_after_one_cycle() {
        let (mut vic, mem) = make_vic();
        vic.write(0x20, 0x05);
        assert_ne!(vic.reg_delayed[0x20], 0x05);
        vic.cycle(&mem, None);
        assert_eq!(vic.reg_delayed[0x20], 0x05);
    }

    #[test]
    fn gray_dot_writes_f_into_delayed_nibble() {
        let (mut vic, mem) = make_vic();
        vic.set_gray_dot_bug(true);
        vic.write(0x21, 0x06);
        vic.cycle(&mem, None);
        vic.write(0x21, 0x02);
        assert_eq!(vic.reg_delayed[0x21], 0x0F, "gray for one cycle");
        vic.cycle(&mem, None);
        assert_eq!(vic.reg_delayed[0x21], 0x02);
    }

    #[test]
    fn collision_registers_clear_on_read() {
        let (mut vic, _mem) = make_vic();
        vic.sprite_sprite_coll = 0x03;
        assert_eq!(vic.read(0x1E), 0x03);
        assert_eq!(vic.read(0x1E), 0x00);
    }

    #[test]
    fn sprite_dma_turns_on_at_y_match() {
        let (mut vic, mem) = make_vic();
        vic.write(0x15, 0x01); // Enable sprite 0
        vic.write(0x01, 100); // Sprite 0 Y
        run_to(&mut vic, &mem, 100, 57);
        assert!(vic.sprites[0].dma_on);
    }

    #[test]
    fn sprite_dma_ends_after_21_lines() {
        let (mut vic, mem) = make_vic();
        vic.write(0x15, 0x01);
        vic.write(0x01, 100);
        run_to(&mut vic, &mem, 122, 20);
        assert!(!vic.sprites[0].dma_on, "63 bytes fetched, DMA off");
    }

    #[test]
    fn sprite_ba_near_fetch_cycles() {
        let (mut vic, mem) = make_vic();
        vic.write(0x15, 0x01);
        vic.write(0x01, 100);
        // Sprite 0 p-access at cycle 58: BA from cycle 55.
        run_to(&mut vic, &mem, 100, 56);
        assert!(vic.ba_low());
    }

    #[test]
    fn ultimax_routes_high_pages_to_cartridge() {
        let (mut vic, mut mem) = make_vic();
        let cart = Cartridge::from_rom(
            crate::cartridge::CartridgeKind::Standard,
            vec![0x7E; 0x4000],
            true,
            false,
        );
        mem.ram_write(0x3FFF, 0x12);
        vic.set_ultimax(true);
        assert_eq!(vic.vic_read(&mem, Some(&cart), 0x3FFF), 0x7E);
        vic.set_ultimax(false);
        assert_eq!(vic.vic_read(&mem, Some(&cart), 0x3FFF), 0x12);
    }

    #[test]
    fn char_rom_visible_in_banks_0_and_2() {
        let (mut vic, mut mem) = make_vic();
        // Char ROM shadows $1000 in bank 0.
        assert_eq!(vic.vic_read(&mem, None, 0x1000), mem.char_rom()[0]);
        // Bank 1 sees RAM at the same VIC address.
        mem.ram_write(0x5000, 0x9A);
        vic.set_bank(1);
        assert_eq!(vic.vic_read(&mem, None, 0x1000), 0x9A);
    }

    #[test]
    fn glue_logic_custom_ic_transitions_through_or() {
        let mem = C64Memory::new(vec![0; 8192], vec![0; 8192], vec![0; 4096]);
        let mut vic = Vic::new(VicModel::Pal6569, GlueLogic::CustomIc);
        vic.set_bank(1);
        vic.cycle(&mem, None);
        assert_eq!(vic.bank(), 1);
        // Switching 1 → 2 shows bank 3 (1|2) for one cycle.
        vic.set_bank(2);
        assert_eq!(vic.bank(), 3);
        vic.cycle(&mem, None);
        assert_eq!(vic.bank(), 2);
    }

    #[test]
    fn discrete_glue_switches_immediately() {
        let (mut vic, _mem) = make_vic();
        vic.set_bank(2);
        assert_eq!(vic.bank(), 2);
    }

    #[test]
    fn lightpen_latches_once_per_frame() {
        let (mut vic, mem) = make_vic();
        run_to(&mut vic, &mem, 100, 20);
        vic.set_lightpen(false);
        let (x1, y1) = (vic.peek(0x13), vic.peek(0x14));
        assert_eq!(y1, 100);
        vic.set_lightpen(true);
        run_cycles(&mut vic, &mem, 63 * 4);
        vic.set_lightpen(false);
        assert_eq!(vic.peek(0x13), x1);
        assert_eq!(vic.peek(0x14), y1, "second trigger ignored");
    }

    #[test]
    fn display_window_renders_background_color() {
        let (mut vic, mut mem) = make_vic();
        vic.write(0x11, 0x1B); // DEN, 25 rows
        vic.write(0x16, 0x08); // 40 columns
        vic.write(0x20, 0x02); // Red border
        vic.write(0x21, 0x06); // Blue background
        mem.ram_write(0x0400, 0x20); // Space character
        // Render a full frame plus the visible top.
        run_cycles(&mut vic, &mem, 63 * 312 + 63 * 60);
        let width = vic.framebuffer_width() as usize;
        let line_base = 100 * width;
        let border_px = vic.framebuffer()[line_base + 8];
        let window_px = vic.framebuffer()[line_base + 200];
        assert_eq!(border_px, vic.palette[2]);
        assert_eq!(window_px, vic.palette[6]);
    }
}
