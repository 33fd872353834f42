//! D64 disk image container.
//!
//! A D64 is a sector dump of a 1541 disk: 683 sectors for the standard
//! 35-track layout, 768 for 40 tracks, 802 for 42 tracks. Each variant
//! may carry one trailing error byte per sector (the "error extension").

use std::fmt;

use crate::gcr::{sectors_on_track, SectorError};

/// Bytes per sector.
pub const SECTOR_SIZE: usize = 256;

/// Sector counts for the three track layouts.
const SECTORS_35: usize = 683;
const SECTORS_40: usize = 768;
const SECTORS_42: usize = 802;

#[derive(Debug)]
pub enum D64Error {
    /// File size matches no known layout.
    InvalidSize(usize),
    /// Track/sector out of range for this image.
    InvalidSector { track: u8, sector: u8 },
}

impl fmt::Display for D64Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize(size) => {
                write!(f, "invalid D64 size: {size} bytes")
            }
            Self::InvalidSector { track, sector } => {
                write!(f, "invalid sector: track {track}, sector {sector}")
            }
        }
    }
}

impl std::error::Error for D64Error {}

/// A parsed D64 disk image.
pub struct D64 {
    data: Vec<u8>,
    num_tracks: u8,
    /// One error byte per sector, if the image carries the extension.
    error_bytes: Vec<u8>,
}

impl D64 {
    /// Parse a D64 image. Accepts the six documented sizes (35/40/42
    /// tracks, with or without error bytes).
    pub fn from_bytes(data: &[u8]) -> Result<Self, D64Error> {
        let (num_tracks, sectors, with_errors) = match data.len() {
            n if n == SECTORS_35 * SECTOR_SIZE => (35, SECTORS_35, false),
            n if n == SECTORS_35 * SECTOR_SIZE + SECTORS_35 => (35, SECTORS_35, true),
            n if n == SECTORS_40 * SECTOR_SIZE => (40, SECTORS_40, false),
            n if n == SECTORS_40 * SECTOR_SIZE + SECTORS_40 => (40, SECTORS_40, true),
            n if n == SECTORS_42 * SECTOR_SIZE => (42, SECTORS_42, false),
            n if n == SECTORS_42 * SECTOR_SIZE + SECTORS_42 => (42, SECTORS_42, true),
            n => return Err(D64Error::InvalidSize(n)),
        };
        let payload = sectors * SECTOR_SIZE;
        let error_bytes = if with_errors {
            data[payload..].to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            data: data[..payload].to_vec(),
            num_tracks,
            error_bytes,
        })
    }

    /// An empty, formatted-blank image with the given track count.
    #[must_use]
    pub fn blank(num_tracks: u8) -> Self {
        let sectors = match num_tracks {
            40 => SECTORS_40,
            42 => SECTORS_42,
            _ => SECTORS_35,
        };
        Self {
            data: vec![0; sectors * SECTOR_SIZE],
            num_tracks: if matches!(num_tracks, 40 | 42) { num_tracks } else { 35 },
            error_bytes: Vec::new(),
        }
    }

    #[must_use]
    pub fn num_tracks(&self) -> u8 {
        self.num_tracks
    }

    /// Linear sector index of (track, sector), or `None` if out of range.
    #[must_use]
    pub fn sector_index(&self, track: u8, sector: u8) -> Option<usize> {
        if track == 0 || track > self.num_tracks || sector >= sectors_on_track(track) {
            return None;
        }
        let mut index = 0usize;
        for t in 1..track {
            index += sectors_on_track(t) as usize;
        }
        Some(index + sector as usize)
    }

    /// Read a 256-byte sector.
    pub fn read_sector(&self, track: u8, sector: u8) -> Result<&[u8], D64Error> {
        let index = self
            .sector_index(track, sector)
            .ok_or(D64Error::InvalidSector { track, sector })?;
        let offset = index * SECTOR_SIZE;
        Ok(&self.data[offset..offset + SECTOR_SIZE])
    }

    /// Write a 256-byte sector.
    pub fn write_sector(&mut self, track: u8, sector: u8, data: &[u8; 256]) -> Result<(), D64Error> {
        let index = self
            .sector_index(track, sector)
            .ok_or(D64Error::InvalidSector { track, sector })?;
        let offset = index * SECTOR_SIZE;
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(data);
        Ok(())
    }

    /// Error-extension code for a sector. `SectorError::None` when the
    /// image has no extension or the sector is clean.
    #[must_use]
    pub fn sector_error(&self, track: u8, sector: u8) -> SectorError {
        match self.sector_index(track, sector) {
            Some(index) if index < self.error_bytes.len() => {
                SectorError::from_code(self.error_bytes[index])
            }
            _ => SectorError::None,
        }
    }

    /// Disk ID from the BAM (track 18, sector 0, bytes $A2/$A3).
    #[must_use]
    pub fn disk_id(&self) -> [u8; 2] {
        match self.read_sector(18, 0) {
            Ok(bam) => [bam[0xA2], bam[0xA3]],
            Err(_) => [0x30, 0x30],
        }
    }

    /// Serialize back to the byte layout it was parsed from.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        out.extend_from_slice(&self.error_bytes);
        out
    }

    /// Raw sector payload (no error bytes).
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
