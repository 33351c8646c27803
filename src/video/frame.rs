//! Planar pixel buffers handed from the decoder to the frame pipeline
//!
//! Frames are bi-planar 4:2:0 (NV12): a full resolution luminance plane and an
//! interleaved CbCr plane at half width and half height. Plane storage is a
//! shared `Bytes` buffer so both planes can view a single decoder allocation.

use bytes::Bytes;

use super::time::MediaTime;
use crate::error::PlayerError;

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size of a 4:2:0 chroma plane for this luma size (odd sizes round up)
    pub fn chroma_420(&self) -> FrameSize {
        FrameSize::new(self.width.div_ceil(2), self.height.div_ceil(2))
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of a [`PixelFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit Y plane followed by an interleaved 8-bit CbCr plane, 4:2:0
    Nv12,
}

impl PixelFormat {
    /// Texture format for the luminance plane
    pub fn luma_texture_format(&self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Nv12 => wgpu::TextureFormat::R8Unorm,
        }
    }

    /// Texture format for the chrominance plane
    pub fn chroma_texture_format(&self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Nv12 => wgpu::TextureFormat::Rg8Unorm,
        }
    }

    pub fn luma_bytes_per_pixel(&self) -> u32 {
        1
    }

    pub fn chroma_bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Nv12 => 2,
        }
    }
}

/// One plane of a planar frame
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * bytes_per_pixel`
    pub stride: usize,
    pub bytes_per_pixel: u32,
}

impl Plane {
    pub fn new(data: Bytes, width: u32, height: u32, stride: usize, bytes_per_pixel: u32) -> Self {
        Self {
            data,
            width,
            height,
            stride,
            bytes_per_pixel,
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Meaningful bytes per row (excludes stride padding)
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    /// Whether `data` covers every row
    pub fn is_complete(&self) -> bool {
        if self.height == 0 {
            return true;
        }
        self.stride >= self.row_bytes()
            && self.data.len() >= self.stride * (self.height as usize - 1) + self.row_bytes()
    }

    /// The meaningful bytes of row `y`
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }
}

/// A decoded frame with its presentation timestamp
///
/// Immutable after creation. Ownership moves from the decoder to the frame
/// source and then to the pipeline consumer, which drops it once converted.
#[derive(Debug, Clone)]
pub struct PixelFrame {
    pub format: PixelFormat,
    pub size: FrameSize,
    pub luma: Plane,
    pub chroma: Plane,
    /// Presentation timestamp in media time
    pub timestamp: MediaTime,
    /// Decoder-assigned sequence number, never reused within a session
    pub sequence: u64,
}

impl PixelFrame {
    /// Wrap a tightly packed NV12 buffer (Y rows then CbCr rows)
    pub fn from_nv12(
        size: FrameSize,
        data: impl Into<Bytes>,
        timestamp: MediaTime,
        sequence: u64,
    ) -> Result<Self, PlayerError> {
        let data: Bytes = data.into();
        let chroma_size = size.chroma_420();
        let luma_len = size.pixel_count();
        let chroma_len = chroma_size.pixel_count() * 2;
        if data.len() < luma_len + chroma_len {
            return Err(PlayerError::InvalidFrame(format!(
                "NV12 buffer of {} bytes is too small for {}",
                data.len(),
                size
            )));
        }

        let luma = Plane::new(data.slice(..luma_len), size.width, size.height, size.width as usize, 1);
        let chroma = Plane::new(
            data.slice(luma_len..luma_len + chroma_len),
            chroma_size.width,
            chroma_size.height,
            chroma_size.width as usize * 2,
            2,
        );

        Ok(Self {
            format: PixelFormat::Nv12,
            size,
            luma,
            chroma,
            timestamp,
            sequence,
        })
    }

    /// A frame where every pixel has the same Y, Cb and Cr values
    pub fn filled(size: FrameSize, yuv: [u8; 3], timestamp: MediaTime, sequence: u64) -> Result<Self, PlayerError> {
        let chroma_size = size.chroma_420();
        let mut data = vec![yuv[0]; size.pixel_count()];
        for _ in 0..chroma_size.pixel_count() {
            data.push(yuv[1]);
            data.push(yuv[2]);
        }
        Self::from_nv12(size, data, timestamp, sequence)
    }

    pub fn millis(&self) -> i64 {
        self.timestamp.millis()
    }

    /// Check the 4:2:0 layout the converter relies on
    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.size.is_empty() {
            return Err(PlayerError::InvalidFrame(format!("empty frame {}", self.size)));
        }
        if self.luma.size() != self.size || self.luma.bytes_per_pixel != self.format.luma_bytes_per_pixel() {
            return Err(PlayerError::InvalidFrame(format!(
                "luma plane {} does not match frame {}",
                self.luma.size(),
                self.size
            )));
        }
        let expected_chroma = self.size.chroma_420();
        if self.chroma.size() != expected_chroma
            || self.chroma.bytes_per_pixel != self.format.chroma_bytes_per_pixel()
        {
            return Err(PlayerError::InvalidFrame(format!(
                "chroma plane {} is not half of {} (expected {})",
                self.chroma.size(),
                self.size,
                expected_chroma
            )));
        }
        if !self.luma.is_complete() || !self.chroma.is_complete() {
            return Err(PlayerError::InvalidFrame("plane data is truncated".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroma_size_rounds_up() {
        assert_eq!(FrameSize::new(1920, 1080).chroma_420(), FrameSize::new(960, 540));
        assert_eq!(FrameSize::new(5, 3).chroma_420(), FrameSize::new(3, 2));
    }

    #[test]
    fn test_from_nv12_splits_planes() {
        let size = FrameSize::new(4, 2);
        let mut data = vec![16u8; 8];
        data.extend_from_slice(&[128, 129, 130, 131]);
        let frame = PixelFrame::from_nv12(size, data, MediaTime::from_millis(33), 1).unwrap();

        assert!(frame.validate().is_ok());
        assert_eq!(frame.luma.row(1), &[16, 16, 16, 16]);
        assert_eq!(frame.chroma.row(0), &[128, 129, 130, 131]);
        assert_eq!(frame.millis(), 33);
    }

    #[test]
    fn test_from_nv12_rejects_short_buffer() {
        let err = PixelFrame::from_nv12(FrameSize::new(4, 4), vec![0u8; 10], MediaTime::ZERO, 0);
        assert!(matches!(err, Err(PlayerError::InvalidFrame(_))));
    }

    #[test]
    fn test_validate_rejects_full_size_chroma() {
        let mut frame = PixelFrame::filled(FrameSize::new(8, 8), [16, 128, 128], MediaTime::ZERO, 0).unwrap();
        frame.chroma = Plane::new(Bytes::from(vec![128u8; 128]), 8, 8, 16, 2);
        assert!(matches!(frame.validate(), Err(PlayerError::InvalidFrame(_))));
    }

    #[test]
    fn test_padded_stride_is_complete() {
        let plane = Plane::new(Bytes::from(vec![0u8; 16 * 3 + 10]), 10, 4, 16, 1);
        assert!(plane.is_complete());
        assert_eq!(plane.row(3).len(), 10);
    }
}
