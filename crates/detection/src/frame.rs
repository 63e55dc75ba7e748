//! Frame snapshots for alert attachments

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::DetectionError;

/// Default JPEG quality for alert photos
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Decoded RGB frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl FrameImage {
    /// Wrap raw RGB data, checking the buffer length
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, DetectionError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(DetectionError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Encode as JPEG for a photo attachment
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, DetectionError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| DetectionError::Encode(e.to_string()))?;
        Ok(out)
    }
}
