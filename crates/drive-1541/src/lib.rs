//! Commodore 1541 disk drive.
//!
//! A complete drive: its own 6502, 2 KiB RAM, 16 KiB DOS ROM, two VIA
//! 6522 chips (VIA1 = IEC serial bus, VIA2 = head interface), the clock
//! divider chain, and a bit-level model of the 5.25" media.
//!
//! The C64 machine crate owns a [`Drive1541`] and calls
//! [`Drive1541::execute`] with the wall-clock duration of each of its own
//! cycles; the drive replays its 1 MHz CPU schedule and the UE7 carry
//! schedule in timestamp order, so the two machines stay phase-accurate
//! at any clock ratio.

pub mod d64;
pub mod disk;
mod drive;
pub mod g64;
pub mod gcr;
mod iec;
mod mem;

pub use d64::{D64Error, D64};
pub use disk::{Disk, SectorInfo, TrackAnalysis, MAX_HALFTRACK, MAX_TRACK_BITS, MAX_TRACK_BYTES};
pub use drive::{Drive1541, DriveClockState, DriveError};
pub use g64::{disk_from_g64, disk_to_g64, G64Error};
pub use iec::IecBus;
pub use mem::{DriveMemory, ROM_SIZE};
