use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Wall-clock capture time, comparable across processes
    pub captured_at: SystemTime,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub status: FrameStatus,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum PixelFormat {
    Rgb24 = 1,
    Bgr24 = 2,
    Mono8 = 3,
    Yuyv4 = 4,
    Mjpeg = 5,
    Nv12 = 6,
}

/// Whether the source delivered every byte of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum FrameStatus {
    #[default]
    Complete = 0,
    Incomplete = 1,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed or planar ones.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Mono8 => Some(1),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg | PixelFormat::Nv12 => None,
        }
    }

    pub fn is_color(self) -> bool {
        !matches!(self, PixelFormat::Mono8)
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => PixelFormat::Rgb24,
            2 => PixelFormat::Bgr24,
            3 => PixelFormat::Mono8,
            4 => PixelFormat::Yuyv4,
            5 => PixelFormat::Mjpeg,
            6 => PixelFormat::Nv12,
            _ => return None,
        })
    }
}

impl FrameStatus {
    pub fn from_code(code: u32) -> Self {
        if code == FrameStatus::Incomplete as u32 {
            FrameStatus::Incomplete
        } else {
            FrameStatus::Complete
        }
    }
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            captured_at: SystemTime::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.meta.status == FrameStatus::Complete
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("size", &format_args!("{}x{}", self.meta.width, self.meta.height))
            .field("format", &self.meta.format)
            .field("status", &self.meta.status)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame(id={}, status={:?}, {}x{} {:?})",
            self.meta.sequence, self.meta.status, self.meta.width, self.meta.height, self.meta.format
        )
    }
}
