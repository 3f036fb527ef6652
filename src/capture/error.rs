use std::io;
use std::time::Duration;

use thiserror::Error;

use super::decoder::ConvertError;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Failed to access Camera '{0}'")]
    Access(String),
    #[error("No Cameras accessible")]
    NoCameras,
    #[error("feature {0} is not supported by this camera")]
    FeatureUnsupported(String),
    #[error("feature {feature} did not complete within {waited:?}")]
    Timeout { feature: String, waited: Duration },
    #[error("camera does not support {0}")]
    Unsupported(String),
    #[error("streaming failed: {0}")]
    Stream(String),
    #[error("device error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

impl CameraError {
    /// Errors that mean the optional feature is simply absent or stuck.
    pub fn is_feature_level(&self) -> bool {
        matches!(
            self,
            CameraError::FeatureUnsupported(_) | CameraError::Timeout { .. }
        )
    }
}
