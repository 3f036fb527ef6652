pub mod decoder;
pub mod error;
pub mod frame;
pub mod setup;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use error::CameraError;
pub use frame::{Frame, FrameMetadata, FrameStatus, PixelFormat};
pub use setup::{setup_camera, setup_pixel_format, SetupOptions, SetupReport};
pub use source::{AllocationMode, Camera, CameraInfo, FrameHandler, HandlerChain};
pub use synthetic::SyntheticCamera;

use tracing::info;

use crate::CaptureConfig;

/// Entry point for finding and opening cameras.
pub struct CameraSystem {
    config: CaptureConfig,
}

impl CameraSystem {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn enumerate(&self) -> Vec<CameraInfo> {
        #[allow(unused_mut)]
        let mut cameras = Vec::new();
        #[cfg(feature = "v4l2")]
        cameras.extend(v4l2::enumerate(self.config.max_device_index));
        if self.config.synthetic.enabled {
            cameras.push(SyntheticCamera::describe());
        }
        cameras
    }

    pub fn open(&self, id: &str) -> Result<Box<dyn Camera>, CameraError> {
        if id == synthetic::SYNTHETIC_ID {
            return Ok(Box::new(SyntheticCamera::new(self.config.synthetic.clone())?));
        }
        #[cfg(feature = "v4l2")]
        {
            Ok(Box::new(v4l2::V4l2Camera::open(id)?))
        }
        #[cfg(not(feature = "v4l2"))]
        {
            Err(CameraError::Access(id.into()))
        }
    }

    /// Open `camera_id`, or the first camera found when none is given.
    pub fn get_camera(&self, camera_id: Option<&str>) -> Result<Box<dyn Camera>, CameraError> {
        let camera = match camera_id {
            Some(id) => self
                .open(id)
                .map_err(|_| CameraError::Access(id.to_string()))?,
            None => {
                let first = self
                    .enumerate()
                    .into_iter()
                    .next()
                    .ok_or(CameraError::NoCameras)?;
                self.open(&first.id)?
            }
        };
        info!("Using {}", camera.info());
        Ok(camera)
    }
}
