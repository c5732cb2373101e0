//! Elevation payloads and height sampling.
//!
//! Heights arrive as colour-encoded fixed-point values, one sample per pixel
//! of a 256×256 grid. Two byte layouts are accepted:
//!
//! - a raw ARGB32 buffer (`256 * 256 * 4` bytes, alpha first), where sample
//!   `(row, col)` lives at byte `(row * 256 + col) * 4 + 1 ..= +3`
//! - any encoded image the `image` crate can read, sized 256×256

use super::DecodeError;

/// Samples along one edge of an elevation grid.
pub const ELEVATION_GRID_SIZE: usize = 256;

/// Total samples in an elevation grid.
pub const ELEVATION_SAMPLE_COUNT: usize = ELEVATION_GRID_SIZE * ELEVATION_GRID_SIZE;

/// Byte length of a raw ARGB32 elevation buffer.
pub const RAW_ELEVATION_LEN: usize = ELEVATION_SAMPLE_COUNT * 4;

/// Default height offset in metres.
pub const DEFAULT_ELEVATION_OFFSET: f32 = 0.0;

/// Default height resolution in metres per encoded step.
pub const DEFAULT_ELEVATION_RESOLUTION: f32 = 0.1;

/// Fixed-point colour encoding of heights:
/// `height = offset + (r * 65536 + g * 256 + b) * resolution`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationEncoding {
    pub offset: f32,
    pub resolution: f32,
}

impl ElevationEncoding {
    pub fn new(offset: f32, resolution: f32) -> Self {
        Self { offset, resolution }
    }

    /// The common "terrain RGB" encoding, which starts at -10000 m.
    pub fn terrain_rgb() -> Self {
        Self::new(-10_000.0, 0.1)
    }

    /// Decodes one colour-encoded sample into an absolute height.
    #[inline]
    pub fn decode(&self, r: u8, g: u8, b: u8) -> f32 {
        let steps = f64::from(r) * 65_536.0 + f64::from(g) * 256.0 + f64::from(b);
        (f64::from(self.offset) + steps * f64::from(self.resolution)) as f32
    }
}

impl Default for ElevationEncoding {
    fn default() -> Self {
        Self::new(DEFAULT_ELEVATION_OFFSET, DEFAULT_ELEVATION_RESOLUTION)
    }
}

/// A 256×256 grid of absolute heights, row-major.
#[derive(Clone, PartialEq)]
pub struct ElevationGrid {
    samples: Vec<f32>,
    min: f32,
    max: f32,
}

impl ElevationGrid {
    /// Builds a grid from exactly [`ELEVATION_SAMPLE_COUNT`] samples.
    pub fn from_samples(samples: Vec<f32>) -> Result<Self, DecodeError> {
        if samples.len() != ELEVATION_SAMPLE_COUNT {
            return Err(DecodeError::Length {
                actual: samples.len(),
                expected: ELEVATION_SAMPLE_COUNT,
            });
        }
        let (min, max) = samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| {
                (lo.min(*h), hi.max(*h))
            });
        Ok(Self { samples, min, max })
    }

    /// A grid where every sample has the same height.
    pub fn flat(height: f32) -> Self {
        Self {
            samples: vec![height; ELEVATION_SAMPLE_COUNT],
            min: height,
            max: height,
        }
    }

    /// Height at grid cell `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= ELEVATION_GRID_SIZE || col >= ELEVATION_GRID_SIZE {
            return None;
        }
        self.samples.get(row * ELEVATION_GRID_SIZE + col).copied()
    }

    /// Nearest-cell height at normalized tile coordinates `u` (east) and
    /// `v` (south), both in `[0, 1)`. Out-of-range inputs clamp to the edge.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let col = grid_index(u);
        let row = grid_index(v);
        self.samples[row * ELEVATION_GRID_SIZE + col]
    }

    pub fn min_height(&self) -> f32 {
        self.min
    }

    pub fn max_height(&self) -> f32 {
        self.max
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

#[inline]
fn grid_index(t: f32) -> usize {
    let cell = (t * ELEVATION_GRID_SIZE as f32) as i64;
    cell.clamp(0, ELEVATION_GRID_SIZE as i64 - 1) as usize
}

impl std::fmt::Debug for ElevationGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevationGrid")
            .field("min", &self.min)
            .field("max", &self.max)
            .finish()
    }
}

/// Decodes an elevation payload into a height grid.
pub fn decode_elevation(
    bytes: &[u8],
    encoding: &ElevationEncoding,
) -> Result<ElevationGrid, DecodeError> {
    if bytes.len() == RAW_ELEVATION_LEN {
        let samples = bytes
            .chunks_exact(4)
            .map(|argb| encoding.decode(argb[1], argb[2], argb[3]))
            .collect();
        return ElevationGrid::from_samples(samples);
    }

    let image = image::load_from_memory(bytes).map_err(|e| DecodeError::Image(e.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let expected = ELEVATION_GRID_SIZE as u32;
    if width != expected || height != expected {
        return Err(DecodeError::Dimensions {
            width,
            height,
            expected,
        });
    }
    let samples = rgba
        .pixels()
        .map(|px| encoding.decode(px[0], px[1], px[2]))
        .collect();
    ElevationGrid::from_samples(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn raw_buffer(argb: [u8; 4]) -> Vec<u8> {
        argb.iter().copied().cycle().take(RAW_ELEVATION_LEN).collect()
    }

    #[test]
    fn test_zero_colour_decodes_to_zero_height() {
        let grid = decode_elevation(&raw_buffer([255, 0, 0, 0]), &ElevationEncoding::default())
            .unwrap();
        assert_eq!(grid.sample(0.0, 0.0), 0.0);
        assert_eq!(grid.min_height(), 0.0);
        assert_eq!(grid.max_height(), 0.0);
    }

    #[test]
    fn test_raw_buffer_skips_alpha_byte() {
        // r=0, g=1, b=0 → 256 steps → 25.6 m; alpha must be ignored
        let grid = decode_elevation(&raw_buffer([7, 0, 1, 0]), &ElevationEncoding::default())
            .unwrap();
        assert!((grid.sample(0.5, 0.5) - 25.6).abs() < 1e-3);
    }

    #[test]
    fn test_raw_buffer_layout_is_row_major() {
        let mut bytes = raw_buffer([0, 0, 0, 0]);
        // sample at row 3, col 7
        let index = (3 * ELEVATION_GRID_SIZE + 7) * 4;
        bytes[index + 3] = 10;
        let grid = decode_elevation(&bytes, &ElevationEncoding::default()).unwrap();

        assert!((grid.get(3, 7).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(grid.get(7, 3), Some(0.0));
        // u selects the column, v the row
        let u = 7.5 / ELEVATION_GRID_SIZE as f32;
        let v = 3.5 / ELEVATION_GRID_SIZE as f32;
        assert!((grid.sample(u, v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_terrain_rgb_encoding() {
        let encoding = ElevationEncoding::terrain_rgb();
        assert_eq!(encoding.decode(0, 0, 0), -10_000.0);
        // 65536 + 134 * 256 + 161 = 100001 steps of 0.1 above -10000
        let h = encoding.decode(1, 134, 161);
        assert!((h - 0.1).abs() < 0.05, "got {h}");
    }

    #[test]
    fn test_decode_png_elevation() {
        let source = RgbaImage::from_pixel(256, 256, Rgba([0, 0, 100, 255]));
        let mut out = Cursor::new(Vec::new());
        source.write_to(&mut out, ImageFormat::Png).unwrap();

        let grid = decode_elevation(&out.into_inner(), &ElevationEncoding::default()).unwrap();
        assert!((grid.sample(0.25, 0.75) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_png_with_wrong_size_is_rejected() {
        let source = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 255]));
        let mut out = Cursor::new(Vec::new());
        source.write_to(&mut out, ImageFormat::Png).unwrap();

        let result = decode_elevation(&out.into_inner(), &ElevationEncoding::default());
        assert!(matches!(
            result,
            Err(DecodeError::Dimensions {
                width: 16,
                height: 16,
                expected: 256
            })
        ));
    }

    #[test]
    fn test_sample_clamps_out_of_range() {
        let mut samples = vec![0.0; ELEVATION_SAMPLE_COUNT];
        samples[ELEVATION_SAMPLE_COUNT - 1] = 42.0;
        let grid = ElevationGrid::from_samples(samples).unwrap();

        assert_eq!(grid.sample(1.0, 1.0), 42.0);
        assert_eq!(grid.sample(5.0, 9.0), 42.0);
        assert_eq!(grid.sample(-1.0, -1.0), 0.0);
        assert_eq!(grid.max_height(), 42.0);
    }

    #[test]
    fn test_from_samples_checks_length() {
        assert!(matches!(
            ElevationGrid::from_samples(vec![0.0; 10]),
            Err(DecodeError::Length { actual: 10, .. })
        ));
    }
}
