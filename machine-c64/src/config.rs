//! Machine configuration: chip revisions and ROM images.

use std::fmt;

/// VIC-II revision. Selects raster geometry and the gray-dot behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VicModel {
    /// PAL 6569: 63 cycles/line, 312 lines.
    Pal6569,
    /// NTSC 6567: 65 cycles/line, 263 lines.
    Ntsc6567,
    /// Early NTSC 6567R56A: 64 cycles/line, 262 lines.
    Ntsc6567R56A,
}

impl VicModel {
    #[must_use]
    pub fn cycles_per_line(self) -> u8 {
        match self {
            VicModel::Pal6569 => 63,
            VicModel::Ntsc6567 => 65,
            VicModel::Ntsc6567R56A => 64,
        }
    }

    #[must_use]
    pub fn lines_per_frame(self) -> u16 {
        match self {
            VicModel::Pal6569 => 312,
            VicModel::Ntsc6567 => 263,
            VicModel::Ntsc6567R56A => 262,
        }
    }

    #[must_use]
    pub fn cycles_per_frame(self) -> u32 {
        u32::from(self.cycles_per_line()) * u32::from(self.lines_per_frame())
    }

    #[must_use]
    pub fn is_pal(self) -> bool {
        matches!(self, VicModel::Pal6569)
    }

    /// CPU clock in Hz for this video timing.
    #[must_use]
    pub fn cpu_frequency(self) -> u64 {
        if self.is_pal() {
            985_248
        } else {
            1_022_727
        }
    }

    /// Duration of one CPU cycle in tenths of a nanosecond, for the
    /// drive interleave.
    #[must_use]
    pub fn cycle_duration_tenth_ns(self) -> u64 {
        10_000_000_000 / self.cpu_frequency()
    }

    /// TOD pin frequency: the power line, 50 Hz PAL / 60 Hz NTSC.
    #[must_use]
    pub fn power_frequency(self) -> u8 {
        if self.is_pal() {
            50
        } else {
            60
        }
    }
}

/// CIA revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiaModel {
    /// NMOS 6526: timer B bug, single-cycle ICR clear.
    Mos6526,
    /// CMOS 8521: no timer B bug, two-cycle acknowledge.
    Mos8521,
}

/// VIC bank-switch glue logic variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlueLogic {
    /// Discrete logic: bank switches take effect immediately.
    Discrete,
    /// Custom IC: the switch passes through a one-cycle transition bank.
    CustomIc,
}

/// Power-on validation failures.
#[derive(Debug)]
pub enum ConfigError {
    /// A required ROM is absent or has the wrong size.
    RomMissing(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomMissing(which) => write!(f, "ROM missing or wrong size: {which}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything needed to construct a C64.
pub struct C64Config {
    pub vic_model: VicModel,
    pub cia_model: CiaModel,
    pub glue_logic: GlueLogic,
    /// Emulate the NMOS timer B bug (meaningful for `Mos6526`).
    pub timer_b_bug: bool,
    /// Kernal ROM, 8192 bytes.
    pub kernal_rom: Vec<u8>,
    /// BASIC ROM, 8192 bytes.
    pub basic_rom: Vec<u8>,
    /// Character ROM, 4096 bytes.
    pub char_rom: Vec<u8>,
    /// 1541 DOS ROM, 16384 bytes.
    pub drive_rom: Vec<u8>,
}

impl C64Config {
    /// A PAL machine with the given ROM set.
    #[must_use]
    pub fn pal(kernal: Vec<u8>, basic: Vec<u8>, chargen: Vec<u8>, drive: Vec<u8>) -> Self {
        Self {
            vic_model: VicModel::Pal6569,
            cia_model: CiaModel::Mos6526,
            glue_logic: GlueLogic::Discrete,
            timer_b_bug: true,
            kernal_rom: kernal,
            basic_rom: basic,
            char_rom: chargen,
            drive_rom: drive,
        }
    }

    /// Check all ROM images. Power-on is refused if any is missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kernal_rom.len() != 8192 {
            return Err(ConfigError::RomMissing("kernal"));
        }
        if self.basic_rom.len() != 8192 {
            return Err(ConfigError::RomMissing("basic"));
        }
        if self.char_rom.len() != 4096 {
            return Err(ConfigError::RomMissing("chargen"));
        }
        if self.drive_rom.len() != 16384 {
            return Err(ConfigError::RomMissing("1541 dos"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_per_model() {
        assert_eq!(VicModel::Pal6569.cycles_per_frame(), 19_656);
        assert_eq!(VicModel::Ntsc6567.cycles_per_frame(), 17_095);
        assert_eq!(VicModel::Ntsc6567R56A.cycles_per_frame(), 16_768);
    }

    #[test]
    fn validation_catches_bad_roms() {
        let cfg = C64Config::pal(vec![0; 8192], vec![0; 8192], vec![0; 4096], vec![0; 16384]);
        assert!(cfg.validate().is_ok());
        let cfg = C64Config::pal(vec![0; 100], vec![0; 8192], vec![0; 4096], vec![0; 16384]);
        assert!(matches!(cfg.validate(), Err(ConfigError::RomMissing("kernal"))));
    }
}
