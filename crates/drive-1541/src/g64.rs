//! G64 image container: raw halftrack bitstreams.
//!
//! Layout:
//!   - 8-byte signature `"GCR-1541"`
//!   - version byte (0)
//!   - number of halftracks (up to 84)
//!   - maximum track size in bytes (u16 LE)
//!   - halftrack offset table (u32 LE each; 0 = track absent)
//!   - speed zone table (u32 LE each)
//!   - per track: u16 LE byte count followed by the data

use std::fmt;

use crate::disk::{Disk, MAX_HALFTRACK, MAX_TRACK_BYTES};
use crate::gcr;

const SIGNATURE: &[u8; 8] = b"GCR-1541";

#[derive(Debug)]
pub enum G64Error {
    /// Signature mismatch or header short.
    NotG64,
    /// Offset table or track data runs past the end of the file.
    Truncated,
    /// A track entry exceeds the maximum track size.
    TrackTooLong(usize),
}

impl fmt::Display for G64Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotG64 => write!(f, "not a G64 image"),
            Self::Truncated => write!(f, "truncated G64 image"),
            Self::TrackTooLong(bytes) => {
                write!(f, "G64 track of {bytes} bytes exceeds {MAX_TRACK_BYTES}")
            }
        }
    }
}

impl std::error::Error for G64Error {}

/// Build a [`Disk`] from a G64 image.
pub fn disk_from_g64(bytes: &[u8]) -> Result<Disk, G64Error> {
    if bytes.len() < 12 || &bytes[0..8] != SIGNATURE {
        return Err(G64Error::NotG64);
    }
    let num_tracks = usize::from(bytes[9]).min(MAX_HALFTRACK);
    let table_base = 12;
    if bytes.len() < table_base + num_tracks * 4 {
        return Err(G64Error::Truncated);
    }

    let mut disk = Disk::new();
    for ht in 0..num_tracks {
        let entry = table_base + ht * 4;
        let offset = u32::from_le_bytes([
            bytes[entry],
            bytes[entry + 1],
            bytes[entry + 2],
            bytes[entry + 3],
        ]) as usize;
        if offset == 0 {
            continue;
        }
        if offset + 2 > bytes.len() {
            return Err(G64Error::Truncated);
        }
        let track_len = usize::from(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]));
        if track_len > MAX_TRACK_BYTES {
            return Err(G64Error::TrackTooLong(track_len));
        }
        if offset + 2 + track_len > bytes.len() {
            return Err(G64Error::Truncated);
        }
        // G64 halftrack index 0 is drive halftrack 1.
        disk.write_halftrack_bytes((ht + 1) as u8, &bytes[offset + 2..offset + 2 + track_len]);
    }
    disk.mark_saved();
    Ok(disk)
}

/// Serialize a [`Disk`] to a G64 image.
///
/// Per-halftrack byte counts round the bit lengths up; speed zones are
/// recorded per track number.
#[must_use]
pub fn disk_to_g64(disk: &Disk) -> Vec<u8> {
    let mut header = Vec::with_capacity(12 + MAX_HALFTRACK * 8);
    header.extend_from_slice(SIGNATURE);
    header.push(0); // Version
    header.push(MAX_HALFTRACK as u8);
    header.extend_from_slice(&(MAX_TRACK_BYTES as u16).to_le_bytes());

    let mut offsets = vec![0u32; MAX_HALFTRACK];
    let mut speeds = vec![0u32; MAX_HALFTRACK];
    let mut body = Vec::new();
    let body_base = 12 + MAX_HALFTRACK * 8;

    for ht in 1..=MAX_HALFTRACK {
        let bits = disk.track_length(ht as u8);
        if bits == 0 {
            continue;
        }
        let data = disk.halftrack_bytes(ht as u8);
        offsets[ht - 1] = (body_base + body.len()) as u32;
        speeds[ht - 1] = u32::from(gcr::speed_zone(crate::disk::track_for_halftrack(ht as u8)));
        body.extend_from_slice(&(data.len() as u16).to_le_bytes());
        body.extend_from_slice(data);
    }

    let mut out = header;
    for offset in &offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    for speed in &speeds {
        out.extend_from_slice(&speed.to_le_bytes());
    }
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d64::D64;

    #[test]
    fn reject_wrong_signature() {
        assert!(matches!(disk_from_g64(b"GCR-1542____"), Err(G64Error::NotG64)));
        assert!(matches!(disk_from_g64(&[]), Err(G64Error::NotG64)));
    }

    #[test]
    fn round_trip_preserves_tracks() {
        let d64 = D64::blank(35);
        let disk = Disk::from_d64(&d64);
        let image = disk_to_g64(&disk);
        let back = disk_from_g64(&image).expect("valid G64");
        for ht in 1..=MAX_HALFTRACK as u8 {
            assert_eq!(back.track_length(ht), disk.track_length(ht), "halftrack {ht}");
            assert_eq!(back.halftrack_bytes(ht), disk.halftrack_bytes(ht));
        }
    }

    #[test]
    fn absent_tracks_have_zero_offsets() {
        let disk = Disk::new();
        let image = disk_to_g64(&disk);
        // All offsets zero: header + empty tables only.
        assert_eq!(image.len(), 12 + MAX_HALFTRACK * 8);
        let back = disk_from_g64(&image).expect("valid G64");
        assert_eq!(back.track_length(1), 0);
    }

    #[test]
    fn truncated_image_rejected() {
        let d64 = D64::blank(35);
        let disk = Disk::from_d64(&d64);
        let image = disk_to_g64(&disk);
        assert!(matches!(
            disk_from_g64(&image[..image.len() - 10]),
            Err(G64Error::Truncated)
        ));
    }
}
