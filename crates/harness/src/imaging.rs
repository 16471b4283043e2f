//! Decoded pixel grids with an explicit bit depth
//!
//! Samples are stored as `u16` regardless of the source depth; the declared
//! [`BitDepth`] is what decides the normalization range. Depth is inferred from
//! the stored sample type of the decoded file (8-bit containers normalize by
//! 255, 16-bit containers by 65535) and is never guessed from pixel values.

use std::path::Path;

use image::DynamicImage;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Storage depth of an image's samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    pub fn bits(&self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }

    /// Largest representable sample, used as the normalization divisor
    pub fn max_value(&self) -> f64 {
        match self {
            BitDepth::Eight => 255.0,
            BitDepth::Sixteen => 65535.0,
        }
    }
}

/// Interleaved, row-major pixel grid
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    channels: u8,
    bit_depth: BitDepth,
    data: Vec<u16>,
}

impl ImageBuffer {
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        bit_depth: BitDepth,
        data: Vec<u16>,
    ) -> HarnessResult<Self> {
        if channels == 0 {
            return Err(HarnessError::AlignmentImpossible(
                "image has no channels".to_string(),
            ));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(HarnessError::AlignmentImpossible(format!(
                "{}x{}x{} image needs {} samples, got {}",
                width,
                height,
                channels,
                expected,
                data.len()
            )));
        }
        if bit_depth == BitDepth::Eight && data.iter().any(|&v| v > 255) {
            return Err(HarnessError::AlignmentImpossible(
                "8-bit image holds samples above 255".to_string(),
            ));
        }
        Ok(Self {
            width,
            height,
            channels,
            bit_depth,
            data,
        })
    }

    /// Decode a file. Any decode failure means no comparison is possible.
    pub fn open(path: &Path) -> HarnessResult<Self> {
        let decoded = image::open(path).map_err(|e| {
            HarnessError::AlignmentImpossible(format!("failed to decode {}: {}", path.display(), e))
        })?;
        let buffer = Self::from_dynamic(decoded).map_err(|e| match e {
            HarnessError::AlignmentImpossible(msg) => {
                HarnessError::AlignmentImpossible(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        debug!(
            path = %path.display(),
            width = buffer.width,
            height = buffer.height,
            channels = buffer.channels,
            bits = buffer.bit_depth.bits(),
            "Decoded image"
        );
        Ok(buffer)
    }

    /// Convert a decoded image, dropping any alpha channel
    pub fn from_dynamic(img: DynamicImage) -> HarnessResult<Self> {
        let (width, height) = (img.width(), img.height());
        let widen = |raw: Vec<u8>| raw.into_iter().map(u16::from).collect::<Vec<_>>();

        let (channels, bit_depth, data) = match img {
            DynamicImage::ImageLuma8(buf) => (1, BitDepth::Eight, widen(buf.into_raw())),
            DynamicImage::ImageRgb8(buf) => (3, BitDepth::Eight, widen(buf.into_raw())),
            DynamicImage::ImageLumaA8(_) => (1, BitDepth::Eight, widen(img.to_luma8().into_raw())),
            DynamicImage::ImageRgba8(_) => (3, BitDepth::Eight, widen(img.to_rgb8().into_raw())),
            DynamicImage::ImageLuma16(buf) => (1, BitDepth::Sixteen, buf.into_raw()),
            DynamicImage::ImageRgb16(buf) => (3, BitDepth::Sixteen, buf.into_raw()),
            DynamicImage::ImageLumaA16(_) => (1, BitDepth::Sixteen, img.to_luma16().into_raw()),
            DynamicImage::ImageRgba16(_) => (3, BitDepth::Sixteen, img.to_rgb16().into_raw()),
            other => {
                return Err(HarnessError::AlignmentImpossible(format!(
                    "unsupported sample type {:?}; only 8-bit and 16-bit integer images are compared",
                    other.color()
                )))
            }
        };

        Self::new(width, height, channels, bit_depth, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// (height, width, channels), the order the report prints
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.height, self.width, self.channels as u32)
    }

    /// Copy out the `w` x `h` region whose top-left corner is (`x`, `y`)
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> HarnessResult<Self> {
        if x + w > self.width || y + h > self.height {
            return Err(HarnessError::AlignmentImpossible(format!(
                "crop {}x{}+{}+{} exceeds {}x{} image",
                w, h, x, y, self.width, self.height
            )));
        }

        let c = self.channels as usize;
        let row_len = w as usize * c;
        let mut data = Vec::with_capacity(row_len * h as usize);
        for row in y..y + h {
            let start = (row as usize * self.width as usize + x as usize) * c;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }

        Self::new(w, h, self.channels, self.bit_depth, data)
    }

    /// Samples scaled to [0, 1] by this image's own bit depth
    pub fn normalized(&self) -> Vec<f64> {
        let max = self.bit_depth.max_value();
        self.data.iter().map(|&v| v as f64 / max).collect()
    }

    /// Per-pixel channel mean of the normalized samples
    pub fn luminance(&self) -> Vec<f64> {
        let max = self.bit_depth.max_value();
        let c = self.channels as usize;
        self.data
            .chunks_exact(c)
            .map(|px| px.iter().map(|&v| v as f64).sum::<f64>() / (c as f64 * max))
            .collect()
    }

    /// Display copy for visual artifacts
    pub fn to_rgb8(&self) -> image::RgbImage {
        let max = self.bit_depth.max_value();
        let c = self.channels as usize;
        let to8 = |v: u16| ((v as f64 / max) * 255.0).round().clamp(0.0, 255.0) as u8;

        let mut raw = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(c) {
            if c >= 3 {
                raw.extend(px[..3].iter().map(|&v| to8(v)));
            } else {
                let v = to8(px[0]);
                raw.extend([v, v, v]);
            }
        }

        // Length is width * height * 3 by construction
        image::RgbImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer as Raster, Luma, LumaA, Rgb, Rgba};

    #[test]
    fn test_rgba16_drops_alpha() {
        let img = Raster::from_fn(2, 2, |x, y| Rgba([x as u16 * 1000, y as u16, 7u16, 65535]));
        let buf = ImageBuffer::from_dynamic(DynamicImage::ImageRgba16(img)).unwrap();

        assert_eq!(buf.channels(), 3);
        assert_eq!(buf.bit_depth(), BitDepth::Sixteen);
        assert_eq!(&buf.data()[..6], &[0, 0, 7, 1000, 0, 7]);
    }

    #[test]
    fn test_depth_follows_storage_type() {
        let eight = Raster::from_pixel(1, 1, Rgb([255u8, 0, 0]));
        let sixteen = Raster::from_pixel(1, 1, Rgb([255u16, 0, 0]));

        let a = ImageBuffer::from_dynamic(DynamicImage::ImageRgb8(eight)).unwrap();
        let b = ImageBuffer::from_dynamic(DynamicImage::ImageRgb16(sixteen)).unwrap();

        assert_eq!(a.normalized()[0], 1.0);
        assert!((b.normalized()[0] - 255.0 / 65535.0).abs() < 1e-12);
    }

    #[test]
    fn test_luma_alpha_keeps_single_channel() {
        let img = Raster::from_pixel(3, 1, LumaA([40u8, 0]));
        let buf = ImageBuffer::from_dynamic(DynamicImage::ImageLumaA8(img)).unwrap();
        assert_eq!(buf.shape(), (1, 3, 1));
        assert_eq!(buf.data(), &[40, 40, 40]);
    }

    #[test]
    fn test_float_images_are_rejected() {
        let img = Raster::from_pixel(1, 1, Rgb([0.5f32, 0.5, 0.5]));
        let err = ImageBuffer::from_dynamic(DynamicImage::ImageRgb32F(img)).unwrap_err();
        assert!(matches!(err, HarnessError::AlignmentImpossible(_)));
    }

    #[test]
    fn test_crop_copies_region() {
        let img = Raster::from_fn(4, 3, |x, y| Luma([(y * 4 + x) as u16]));
        let buf = ImageBuffer::from_dynamic(DynamicImage::ImageLuma16(img)).unwrap();

        let cropped = buf.crop(1, 1, 2, 2).unwrap();
        assert_eq!(cropped.data(), &[5, 6, 9, 10]);
        assert!(buf.crop(3, 0, 2, 1).is_err());
    }

    #[test]
    fn test_luminance_is_channel_mean() {
        let buf = ImageBuffer::new(1, 1, 3, BitDepth::Eight, vec![255, 0, 0]).unwrap();
        assert!((buf.luminance()[0] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_open_garbage_is_alignment_impossible() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.tiff");
        std::fs::write(&path, b"not an image").unwrap();

        let err = ImageBuffer::open(&path).unwrap_err();
        assert!(matches!(err, HarnessError::AlignmentImpossible(_)));
    }
}
