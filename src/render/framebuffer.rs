//! RGB output of a conversion or filter pass

use std::sync::Arc;

use super::texture_cache::{GpuTexture, TextureLease};
use crate::video::{FrameOrientation, FrameSize, MediaTime};

/// Where a framebuffer's pixels live
#[derive(Clone)]
pub enum FrameStorage {
    /// Leased GPU texture (`Rgba8Unorm`), returned to its cache when the last
    /// clone is dropped
    Texture(Arc<TextureLease<GpuTexture>>),
    /// Tightly packed RGBA8 pixels
    Pixels(Arc<Vec<u8>>),
}

impl FrameStorage {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameStorage::Texture(_) => "texture",
            FrameStorage::Pixels(_) => "pixel",
        }
    }
}

/// A completed frame travelling through the operator graph
///
/// The timestamp is the video frame's presentation time, not wall time, and
/// passes through every operator unchanged.
#[derive(Clone)]
pub struct RenderFramebuffer {
    pub size: FrameSize,
    pub timestamp: MediaTime,
    pub orientation: FrameOrientation,
    pub storage: FrameStorage,
}

impl RenderFramebuffer {
    pub fn from_pixels(size: FrameSize, timestamp: MediaTime, pixels: Vec<u8>) -> Self {
        Self {
            size,
            timestamp,
            orientation: FrameOrientation::upright(size),
            storage: FrameStorage::Pixels(Arc::new(pixels)),
        }
    }

    pub fn from_texture(timestamp: MediaTime, lease: TextureLease<GpuTexture>) -> Self {
        let size = lease.size();
        Self {
            size,
            timestamp,
            orientation: FrameOrientation::upright(size),
            storage: FrameStorage::Texture(Arc::new(lease)),
        }
    }

    pub fn with_orientation(mut self, orientation: FrameOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// A new framebuffer carrying this one's timing and orientation
    pub fn derive(&self, size: FrameSize, storage: FrameStorage) -> Self {
        Self {
            size,
            timestamp: self.timestamp,
            orientation: self.orientation,
            storage,
        }
    }

    pub fn millis(&self) -> i64 {
        self.timestamp.millis()
    }

    pub fn pixels(&self) -> Option<&[u8]> {
        match &self.storage {
            FrameStorage::Pixels(pixels) => Some(pixels.as_slice()),
            FrameStorage::Texture(_) => None,
        }
    }

    pub fn texture(&self) -> Option<&GpuTexture> {
        match &self.storage {
            FrameStorage::Texture(lease) => Some(&***lease),
            FrameStorage::Pixels(_) => None,
        }
    }
}

impl std::fmt::Debug for RenderFramebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderFramebuffer")
            .field("size", &self.size)
            .field("millis", &self.millis())
            .field("storage", &self.storage.kind())
            .finish()
    }
}
