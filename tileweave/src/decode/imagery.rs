//! Imagery payloads.

use std::io::Cursor;

use bytes::Bytes;
use image::ImageFormat;

use super::DecodeError;

/// A decoded RGBA8 image, ready to hand to a render sink.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageHandle {
    width: u32,
    height: u32,
    pixels: Bytes,
}

impl ImageHandle {
    /// Wraps an RGBA8 pixel buffer.
    pub fn from_rgba(
        width: u32,
        height: u32,
        pixels: impl Into<Bytes>,
    ) -> Result<Self, DecodeError> {
        let pixels = pixels.into();
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(DecodeError::Length {
                actual: pixels.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A single-colour image, useful as a loading placeholder.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            pixels: Bytes::from(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 pixels, row-major.
    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// Encodes the image as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, DecodeError> {
        let image = image::RgbaImage::from_raw(self.width, self.height, self.pixels.to_vec())
            .ok_or(DecodeError::Length {
                actual: self.pixels.len(),
                expected: self.width as usize * self.height as usize * 4,
            })?;
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        Ok(out.into_inner())
    }
}

impl std::fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHandle")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decodes an encoded image (PNG, JPEG, WebP, ...) into RGBA8.
pub fn decode_imagery(bytes: &[u8]) -> Result<ImageHandle, DecodeError> {
    let image = image::load_from_memory(bytes).map_err(|e| DecodeError::Image(e.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    ImageHandle::from_rgba(width, height, rgba.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn encode_png(image: &RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let source = RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 255]));
        let handle = decode_imagery(&encode_png(&source)).unwrap();

        assert_eq!(handle.width(), 4);
        assert_eq!(handle.height(), 2);
        assert_eq!(&handle.pixels()[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_imagery(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    #[test]
    fn test_from_rgba_checks_length() {
        let result = ImageHandle::from_rgba(2, 2, vec![0u8; 15]);
        assert!(matches!(
            result,
            Err(DecodeError::Length {
                actual: 15,
                expected: 16
            })
        ));
    }

    #[test]
    fn test_png_encoding_decodes_back() {
        let handle = ImageHandle::solid(5, 3, [200, 100, 50, 255]);
        let decoded = decode_imagery(&handle.encode_png().unwrap()).unwrap();
        assert_eq!(decoded, handle);
    }

    #[test]
    fn test_solid_fills_every_pixel() {
        let handle = ImageHandle::solid(3, 3, [1, 2, 3, 4]);
        assert_eq!(handle.pixels().len(), 36);
        assert!(handle.pixels().chunks(4).all(|px| px == [1, 2, 3, 4]));
    }
}
