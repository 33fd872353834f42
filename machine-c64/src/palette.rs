//! Color generation.
//!
//! The sixteen palette entries are not constants: each chip revision has
//! its own measured luminance ladder, every chroma color sits at a fixed
//! angle in the U/V plane, and the user can adjust brightness, contrast,
//! and saturation. PAL chips additionally shift the gamma from the
//! broadcast 2.8 toward the 2.2 of a modern display. The YUV model and
//! the measurements follow Pepto's colodore work and the VICE tables.

use crate::config::VicModel;

/// Monochrome display simulations override the chroma plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteKind {
    Color,
    BlackWhite,
    PaperWhite,
    Green,
    Amber,
    Sepia,
}

/// User-adjustable video settings. All three range 0-100 and default to
/// the neutral 50.
#[derive(Debug, Clone, Copy)]
pub struct PaletteSettings {
    pub kind: PaletteKind,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
}

impl Default for PaletteSettings {
    fn default() -> Self {
        Self {
            kind: PaletteKind::Color,
            brightness: 50.0,
            contrast: 100.0,
            saturation: 50.0,
        }
    }
}

/// Luminance voltage triple from the VICE measurements: (level, black,
/// white), scaled to 0-255.
fn luma(level: f64, black: f64, white: f64) -> f64 {
    (level - black) * 256.0 / (white - black)
}

/// Per-revision luminance ladder (index = color number).
fn luma_table(model: VicModel) -> [f64; 16] {
    match model {
        VicModel::Pal6569 => {
            let l = |x| luma(x, 700.0, 1850.0);
            [
                l(700.0), l(1850.0), l(1090.0), l(1480.0),
                l(1180.0), l(1340.0), l(1020.0), l(1620.0),
                l(1180.0), l(1020.0), l(1340.0), l(1090.0),
                l(1300.0), l(1620.0), l(1300.0), l(1480.0),
            ]
        }
        VicModel::Ntsc6567 => {
            let l = |x| luma(x, 590.0, 1825.0);
            [
                l(590.0), l(1825.0), l(950.0), l(1380.0),
                l(1030.0), l(1210.0), l(860.0), l(1560.0),
                l(1030.0), l(860.0), l(1210.0), l(950.0),
                l(1160.0), l(1560.0), l(1160.0), l(1380.0),
            ]
        }
        VicModel::Ntsc6567R56A => {
            let l = |x| luma(x, 560.0, 1825.0);
            [
                l(560.0), l(1825.0), l(840.0), l(1500.0),
                l(1180.0), l(1180.0), l(840.0), l(1500.0),
                l(1180.0), l(840.0), l(1180.0), l(840.0),
                l(1180.0), l(1500.0), l(1180.0), l(1500.0),
            ]
        }
    }
}

/// Chroma angle in the U/V plane, in units of 22.5° + 11.5° offset.
/// `None` marks the grays (no chroma).
fn chroma_angle(nr: usize) -> Option<f64> {
    const STEP: [Option<f64>; 16] = [
        None,
        None,
        Some(4.0),
        Some(12.0),
        Some(2.0),
        Some(10.0),
        Some(15.0),
        Some(7.0),
        Some(5.0),
        Some(6.0),
        Some(4.0),
        None,
        None,
        Some(10.0),
        Some(15.0),
        None,
    ];
    STEP[nr].map(|x| (x * 22.5 + 11.5).to_radians())
}

/// Re-target gamma from `source` to `target` on a 0-255 value.
fn gamma_correct(value: f64, source: f64, target: f64) -> f64 {
    let factor = 255.0_f64.powf(1.0 - source);
    let linear = (factor * value.powf(source)).clamp(0.0, 255.0);
    let factor = 255.0_f64.powf(1.0 - 1.0 / target);
    (factor * linear.powf(1.0 / target)).clamp(0.0, 255.0).round()
}

/// Compute one palette entry as ABGR32 (little-endian RGBA bytes).
#[must_use]
pub fn compute_color(nr: usize, model: VicModel, settings: &PaletteSettings) -> u32 {
    let brightness = settings.brightness - 50.0;
    let contrast = settings.contrast / 100.0 + 0.2;
    let saturation = settings.saturation / 1.25;

    let mut y = luma_table(model)[nr];
    let (mut u, mut v) = match chroma_angle(nr) {
        Some(angle) => (angle.cos() * saturation, angle.sin() * saturation),
        None => (0.0, 0.0),
    };

    y = y * contrast + brightness;
    u *= contrast;
    v *= contrast;

    match settings.kind {
        PaletteKind::Color => {}
        PaletteKind::BlackWhite => {
            u = 0.0;
            v = 0.0;
        }
        PaletteKind::PaperWhite => {
            u = -128.0 + 120.0;
            v = -128.0 + 133.0;
        }
        PaletteKind::Green => {
            u = -128.0 + 29.0;
            v = -128.0 + 64.0;
        }
        PaletteKind::Amber => {
            u = -128.0 + 24.0;
            v = -128.0 + 178.0;
        }
        PaletteKind::Sepia => {
            u = -128.0 + 97.0;
            v = -128.0 + 154.0;
        }
    }

    let mut r = (y + 1.140 * v).clamp(0.0, 255.0);
    let mut g = (y - 0.396 * u - 0.581 * v).clamp(0.0, 255.0);
    let mut b = (y + 2.029 * u).clamp(0.0, 255.0);

    if model.is_pal() {
        r = gamma_correct(r, 2.8, 2.2);
        g = gamma_correct(g, 2.8, 2.2);
        b = gamma_correct(b, 2.8, 2.2);
    }

    u32::from_le_bytes([r as u8, g as u8, b as u8, 0xFF])
}

/// Compute the whole 16-entry table.
#[must_use]
pub fn compute_palette(model: VicModel, settings: &PaletteSettings) -> [u32; 16] {
    let mut table = [0u32; 16];
    for (nr, entry) in table.iter_mut().enumerate() {
        *entry = compute_color(nr, model, settings);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb(color: u32) -> (u8, u8, u8) {
        let [r, g, b, _] = color.to_le_bytes();
        (r, g, b)
    }

    #[test]
    fn black_is_darkest_white_is_brightest() {
        let pal = compute_palette(VicModel::Pal6569, &PaletteSettings::default());
        let lum = |c: u32| {
            let (r, g, b) = rgb(c);
            u32::from(r) + u32::from(g) + u32::from(b)
        };
        for nr in 0..16 {
            assert!(lum(pal[0]) <= lum(pal[nr]), "black not darkest vs {nr}");
            assert!(lum(pal[1]) >= lum(pal[nr]), "white not brightest vs {nr}");
        }
    }

    #[test]
    fn grays_have_no_chroma() {
        let pal = compute_palette(VicModel::Pal6569, &PaletteSettings::default());
        for nr in [0usize, 1, 11, 12, 15] {
            let (r, g, b) = rgb(pal[nr]);
            let spread = r.max(g).max(b) - r.min(g).min(b);
            assert!(spread <= 6, "color {nr} has chroma spread {spread}");
        }
    }

    #[test]
    fn red_is_red() {
        let pal = compute_palette(VicModel::Pal6569, &PaletteSettings::default());
        let (r, g, b) = rgb(pal[2]);
        assert!(r > g && r > b, "entry 2 should be reddish: {r},{g},{b}");
    }

    #[test]
    fn monochrome_palettes_tint_everything() {
        let settings = PaletteSettings {
            kind: PaletteKind::Green,
            ..PaletteSettings::default()
        };
        let pal = compute_palette(VicModel::Pal6569, &settings);
        // All entries share the same hue: green channel dominates.
        for (nr, &c) in pal.iter().enumerate() {
            let (r, g, b) = rgb(c);
            assert!(g >= r && g >= b, "entry {nr} not green-tinted: {r},{g},{b}");
        }
    }

    #[test]
    fn brightness_moves_luminance() {
        let dim = PaletteSettings {
            brightness: 20.0,
            ..PaletteSettings::default()
        };
        let bright = PaletteSettings {
            brightness: 80.0,
            ..PaletteSettings::default()
        };
        let dark = compute_color(5, VicModel::Pal6569, &dim);
        let light = compute_color(5, VicModel::Pal6569, &bright);
        let lum = |c: u32| {
            let (r, g, b) = rgb(c);
            u32::from(r) + u32::from(g) + u32::from(b)
        };
        assert!(lum(light) > lum(dark));
    }

    #[test]
    fn models_differ_in_luma_ladder() {
        let pal = compute_palette(VicModel::Pal6569, &PaletteSettings::default());
        let ntsc = compute_palette(VicModel::Ntsc6567, &PaletteSettings::default());
        assert_ne!(pal, ntsc);
    }
}
