//! Camera source abstraction: feature access and callback-driven streaming

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::CameraError;
use super::frame::{Frame, PixelFormat};

pub const EXPOSURE_AUTO: &str = "ExposureAuto";
pub const BALANCE_WHITE_AUTO: &str = "BalanceWhiteAuto";
pub const GVSP_ADJUST_PACKET_SIZE: &str = "GVSPAdjustPacketSize";

/// Identity of an opened or enumerated camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub model: String,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera(id={})", self.id)
    }
}

/// Buffer provisioning strategy used when streaming starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllocationMode {
    /// Buffers are allocated by us and announced to the transport layer
    #[default]
    AnnounceFrame,
    /// The transport layer allocates the buffers and announces them
    AllocAndAnnounceFrame,
}

/// Receives frames on the camera's own streaming thread.
///
/// The frame is only lent for the duration of the call: once `on_frame`
/// returns, the underlying buffer goes back to the source for reuse. Cloning
/// the `Frame` keeps the bytes alive without holding up acquisition.
/// Implementations must return quickly; a slow handler stalls the stream.
pub trait FrameHandler: Send {
    fn on_frame(&mut self, camera: &CameraInfo, frame: &Frame);
}

impl<F> FrameHandler for F
where
    F: FnMut(&CameraInfo, &Frame) + Send,
{
    fn on_frame(&mut self, camera: &CameraInfo, frame: &Frame) {
        self(camera, frame)
    }
}

/// Delivers each frame to several handlers in order.
#[derive(Default)]
pub struct HandlerChain(Vec<Box<dyn FrameHandler>>);

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl FrameHandler + 'static) -> Self {
        self.0.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FrameHandler for HandlerChain {
    fn on_frame(&mut self, camera: &CameraInfo, frame: &Frame) {
        for handler in self.0.iter_mut() {
            handler.on_frame(camera, frame);
        }
    }
}

/// An opened camera.
///
/// Features are addressed by their GenICam-style names; a camera that lacks
/// one answers `CameraError::FeatureUnsupported`.
pub trait Camera: Send {
    fn info(&self) -> &CameraInfo;

    /// Set an enumeration feature such as `ExposureAuto` to `value`.
    fn set_enum_feature(&mut self, name: &str, value: &str) -> Result<(), CameraError>;

    /// Start a command feature such as `GVSPAdjustPacketSize`.
    fn run_command(&mut self, name: &str) -> Result<(), CameraError>;

    fn is_command_done(&mut self, name: &str) -> Result<bool, CameraError>;

    fn pixel_formats(&self) -> Vec<PixelFormat>;

    fn pixel_format(&self) -> PixelFormat;

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError>;

    /// Begin asynchronous acquisition, delivering every frame to `handler`.
    fn start_streaming(
        &mut self,
        handler: Box<dyn FrameHandler>,
        buffer_count: u32,
        allocation_mode: AllocationMode,
    ) -> Result<(), CameraError>;

    /// Stop acquisition and wait for the streaming thread to finish.
    fn stop_streaming(&mut self) -> Result<(), CameraError>;

    fn is_streaming(&self) -> bool;
}
