//! Image preprocessing shared by training and serving
//!
//! Every image is center-cropped to a square, resized to the model input
//! resolution and scaled to [-1, 1] with `x / 127.5 - 1`.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};

use crate::utils::error::{AgronomicareError, Result};
use crate::{IMAGE_CHANNELS, IMAGE_SIZE};

/// Half of the 8-bit pixel range
pub const PIXEL_SCALE: f32 = 127.5;

/// Map an 8-bit pixel value to [-1, 1]
#[inline]
pub fn normalize_pixel(value: u8) -> f32 {
    value as f32 / PIXEL_SCALE - 1.0
}

/// Center-crop to the target aspect ratio and resize to exactly `size`×`size`
pub fn crop_and_resize(image: &DynamicImage, size: u32, filter: FilterType) -> RgbImage {
    image.resize_to_fill(size, size, filter).to_rgb8()
}

/// Open and decode an image file
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| AgronomicareError::ImageLoadError(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| AgronomicareError::ImageLoadError(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| AgronomicareError::ImageLoadError(path.to_path_buf(), e.to_string()))
}

/// Decode an in-memory image such as an upload
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| AgronomicareError::ImageDecode(e.to_string()))
}

/// Photo formats the upload form accepts
pub const UPLOAD_FORMATS: [ImageFormat; 2] = [ImageFormat::Jpeg, ImageFormat::Png];

/// Decode an uploaded photo, refusing anything but JPEG and PNG
///
/// The format is sniffed from the bytes, not taken from the file name.
pub fn decode_upload(bytes: &[u8]) -> Result<DynamicImage> {
    let format =
        image::guess_format(bytes).map_err(|e| AgronomicareError::ImageDecode(e.to_string()))?;
    if !UPLOAD_FORMATS.contains(&format) {
        return Err(AgronomicareError::ImageDecode(format!(
            "unsupported upload format {:?}, expected jpg, jpeg or png",
            format
        )));
    }
    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| AgronomicareError::ImageDecode(e.to_string()))
}

/// A normalized image tensor in height × width × channel order
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    data: Vec<f32>,
    size: usize,
}

impl PreprocessedImage {
    /// Serving path: Lanczos3 resampling at the model resolution
    pub fn from_image(image: &DynamicImage) -> Self {
        Self::with_filter(image, IMAGE_SIZE, FilterType::Lanczos3)
    }

    /// Crop, resize with `filter` and normalize
    pub fn with_filter(image: &DynamicImage, size: usize, filter: FilterType) -> Self {
        let rgb = crop_and_resize(image, size as u32, filter);
        let data = rgb.as_raw().iter().map(|&v| normalize_pixel(v)).collect();
        Self { data, size }
    }

    /// Decode bytes and preprocess them for serving
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_image(&decode_image(bytes)?))
    }

    /// Load a file and preprocess it for serving
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::from_image(&load_image(path)?))
    }

    /// Tensor shape as `[height, width, channels]`
    pub fn shape(&self) -> [usize; 3] {
        [self.size, self.size, IMAGE_CHANNELS]
    }

    /// Values in HWC order
    pub fn hwc(&self) -> &[f32] {
        &self.data
    }

    /// Values rearranged to CHW order, as the network consumes them
    pub fn to_chw(&self) -> Vec<f32> {
        let plane = self.size * self.size;
        let mut chw = vec![0.0f32; IMAGE_CHANNELS * plane];
        for (i, pixel) in self.data.chunks_exact(IMAGE_CHANNELS).enumerate() {
            for (c, &v) in pixel.iter().enumerate() {
                chw[c * plane + i] = v;
            }
        }
        chw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_normalize_pixel_range() {
        assert_eq!(normalize_pixel(0), -1.0);
        assert_eq!(normalize_pixel(255), 1.0);
        assert!((normalize_pixel(128) - 0.003_921_6).abs() < 1e-5);
    }

    #[test]
    fn test_shape_is_fixed_for_any_input() {
        for (w, h) in [(640, 480), (100, 300), (224, 224), (1, 1)] {
            let img = DynamicImage::ImageRgb8(RgbImage::new(w, h));
            let pre = PreprocessedImage::from_image(&img);
            assert_eq!(pre.shape(), [224, 224, 3]);
            assert_eq!(pre.hwc().len(), 224 * 224 * 3);
        }
    }

    #[test]
    fn test_center_crop_keeps_middle() {
        // Wide image: red left quarter, green centre half, blue right quarter.
        let mut img = RgbImage::new(400, 200);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = match x {
                0..=99 => Rgb([255, 0, 0]),
                100..=299 => Rgb([0, 255, 0]),
                _ => Rgb([0, 0, 255]),
            };
        }

        let cropped = crop_and_resize(&DynamicImage::ImageRgb8(img), 20, FilterType::Nearest);
        assert_eq!(cropped.dimensions(), (20, 20));
        assert!(cropped.pixels().all(|p| p.0 == [0, 255, 0]));
    }

    #[test]
    fn test_chw_layout() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 255])));
        let pre = PreprocessedImage::with_filter(&img, 2, FilterType::Nearest);
        let chw = pre.to_chw();

        assert_eq!(chw.len(), 12);
        assert!(chw[0..4].iter().all(|&v| v == 1.0));
        assert!(chw[4..8].iter().all(|&v| v == -1.0));
        assert!(chw[8..12].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = PreprocessedImage::from_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AgronomicareError::ImageDecode(_)));
    }

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([30, 140, 60])));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_upload_accepts_jpeg_and_png() {
        for format in UPLOAD_FORMATS {
            let image = decode_upload(&encoded(format)).unwrap();
            assert_eq!((image.width(), image.height()), (8, 8));
        }
    }

    #[test]
    fn test_decode_upload_rejects_bmp() {
        let bytes = encoded(ImageFormat::Bmp);
        assert!(decode_image(&bytes).is_ok());

        let err = decode_upload(&bytes).unwrap_err();
        assert!(matches!(err, AgronomicareError::ImageDecode(_)));
        assert!(err.to_string().contains("Bmp"));
    }
}
