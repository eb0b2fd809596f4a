//! Uploaded image decoding and the grayscale frame the face models consume.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("image upload is empty")]
    Empty,
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero width or height")]
    ZeroSized,
}

/// A decoded grayscale image.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Decode an uploaded image of any format the `image` crate sniffs.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        Ok(Self::from_image(&decode_image(bytes)?))
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        Self {
            data: gray.into_raw(),
            width,
            height,
        }
    }

    /// Pixel at (x, y), or 0 outside the frame.
    pub fn pixel(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Decode raw upload bytes, sniffing the format from content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(FrameError::ZeroSized);
    }
    Ok(image)
}

/// Re-encode an image as PNG (stored as the enrollment reference image).
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        encode_png(&image).unwrap()
    }

    #[test]
    fn test_decode_gray_png() {
        let bytes = png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            4,
            3,
            Luma([77]),
        )));
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 12);
        assert!(frame.data.iter().all(|&p| p == 77));
    }

    #[test]
    fn test_decode_color_to_grayscale() {
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            2,
            2,
            Rgb([255, 255, 255]),
        )));
        let frame = Frame::decode(&bytes).unwrap();
        assert!(frame.data.iter().all(|&p| p == 255));
    }

    #[test]
    fn test_decode_empty_is_distinct_error() {
        assert!(matches!(Frame::decode(&[]), Err(FrameError::Empty)));
    }

    #[test]
    fn test_decode_garbage() {
        let err = Frame::decode(b"definitely not an image").err().unwrap();
        assert!(matches!(err, FrameError::Decode(_)));
    }

    #[test]
    fn test_decode_truncated_png() {
        let bytes = png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            16,
            16,
            Luma([1]),
        )));
        assert!(Frame::decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_pixel_out_of_bounds_is_black() {
        let frame = Frame {
            data: vec![9; 4],
            width: 2,
            height: 2,
        };
        assert_eq!(frame.pixel(1, 1), 9);
        assert_eq!(frame.pixel(-1, 0), 0);
        assert_eq!(frame.pixel(2, 0), 0);
        assert_eq!(frame.pixel(0, 2), 0);
    }
}
