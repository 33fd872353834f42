//! Cycle-accurate Commodore 64 core.
//!
//! The machine couples a 6510 CPU, the VIC-II video chip, two CIA timer
//! chips, 64 KiB RAM with PLA banking, a SID register sink, and a 1541
//! drive with its own CPU and bit-level media. Everything advances in
//! lock-step at the CPU clock; the drive runs on its own 16 MHz-derived
//! schedule, interleaved by timestamp.
//!
//! ```no_run
//! use machine_c64::{C64, C64Config};
//!
//! # fn roms() -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) { unimplemented!() }
//! let (kernal, basic, chargen, dos) = roms();
//! let mut c64 = C64::new(&C64Config::pal(kernal, basic, chargen, dos)).unwrap();
//! c64.power_on();
//! c64.run();
//! loop {
//!     if c64.run_frame().is_some() {
//!         break; // Stopped at an instruction boundary
//!     }
//! }
//! ```

pub mod bus;
pub mod c64;
pub mod cartridge;
pub mod cia;
pub mod config;
pub mod keyboard;
pub mod mem;
pub mod messages;
pub mod palette;
pub mod port;
pub mod prg;
pub mod sid;
pub mod snapshot;
pub mod tod;
pub mod vic;

pub use bus::C64Bus;
pub use c64::{MachineState, RunLoopFlags, C64};
pub use cartridge::{Cartridge, CartridgeKind, CrtError};
pub use cia::Cia;
pub use config::{C64Config, CiaModel, ConfigError, GlueLogic, VicModel};
pub use keyboard::{ControlPort, KeyboardMatrix};
pub use mem::{C64Memory, MemSource};
pub use messages::{Message, MessageQueue};
pub use palette::{PaletteKind, PaletteSettings};
pub use port::ProcessorPort;
pub use sid::SidSink;
pub use snapshot::SnapshotError;
pub use tod::Tod;
pub use vic::Vic;

// Re-exports so hosts can drive the machine without naming the
// underlying crates.
pub use drive_1541::{disk_from_g64, disk_to_g64, Disk, Drive1541, D64};
pub use emu_core::{Bus, ExecResult, Observable, StopReason, Tickable, Value};
