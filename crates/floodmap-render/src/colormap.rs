//! Continuous terrain colormap.
//!
//! The gradient runs from dark blue over cyan, green, pale yellow and brown to
//! white. It is sampled once into a 256-entry lookup table; a normalized value
//! `t` in `[0, 1]` selects entry `floor(t * 256)`, clamped to the table.

use std::sync::OnceLock;

/// Number of entries in the lookup table.
pub const LUT_SIZE: usize = 256;

/// `(position, (r, g, b))` with channels in `[0, 1]`.
const TERRAIN_STOPS: [(f64, (f64, f64, f64)); 6] = [
    (0.00, (0.2, 0.2, 0.6)),
    (0.15, (0.0, 0.6, 1.0)),
    (0.25, (0.0, 0.8, 0.4)),
    (0.50, (1.0, 1.0, 0.6)),
    (0.75, (0.5, 0.36, 0.33)),
    (1.00, (1.0, 1.0, 1.0)),
];

static TERRAIN_LUT: OnceLock<[[u8; 4]; LUT_SIZE]> = OnceLock::new();

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Evaluate the gradient at `x` in `[0, 1]`.
fn gradient(x: f64) -> (f64, f64, f64) {
    let x = x.clamp(0.0, 1.0);
    for pair in TERRAIN_STOPS.windows(2) {
        let (x0, c0) = pair[0];
        let (x1, c1) = pair[1];
        if x <= x1 {
            let t = (x - x0) / (x1 - x0);
            return (lerp(c0.0, c1.0, t), lerp(c0.1, c1.1, t), lerp(c0.2, c1.2, t));
        }
    }
    TERRAIN_STOPS[TERRAIN_STOPS.len() - 1].1
}

fn to_byte(c: f64) -> u8 {
    (c * 255.0) as u8
}

fn build_lut() -> [[u8; 4]; LUT_SIZE] {
    let mut lut = [[0u8; 4]; LUT_SIZE];
    for (i, entry) in lut.iter_mut().enumerate() {
        let (r, g, b) = gradient(i as f64 / (LUT_SIZE - 1) as f64);
        *entry = [to_byte(r), to_byte(g), to_byte(b), 255];
    }
    lut
}

/// The terrain lookup table, built on first use.
pub fn terrain_lut() -> &'static [[u8; 4]; LUT_SIZE] {
    TERRAIN_LUT.get_or_init(build_lut)
}

/// Map `value` linearly onto `[0, 1]` over `[z_min, z_max]`.
///
/// A degenerate range maps everything to 0. The result is not clamped.
pub fn normalize(value: f32, z_min: f32, z_max: f32) -> f32 {
    let span = z_max - z_min;
    if span == 0.0 {
        0.0
    } else {
        (value - z_min) / span
    }
}

/// Opaque RGBA color for a normalized value; out-of-range values clamp to the ends.
pub fn terrain_color(t: f32) -> [u8; 4] {
    let index = (t * LUT_SIZE as f32).floor();
    let index = if index.is_nan() {
        0
    } else {
        index.clamp(0.0, (LUT_SIZE - 1) as f32) as usize
    };
    terrain_lut()[index]
}
