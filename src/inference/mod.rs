//! Detection and tracking on relayed frames

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tracker;
pub mod worker;
pub mod yolo;

pub use tracker::IouTracker;
pub use worker::{InferenceWorker, WorkerState};

use std::path::Path;

use thiserror::Error;

use crate::capture::decoder::ConvertError;
use crate::capture::Frame;
use crate::pipeline::RelayError;
use crate::InferenceConfig;

/// Worker exit code when the model could not be loaded
pub const EXIT_MODEL_LOAD: u8 = 3;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output shape {got}, expected {expected}")]
    Shape { expected: String, got: String },
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// One detected object in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: usize,
    /// Persistent identity, assigned when tracking is enabled
    pub track_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub sequence: u64,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackOptions {
    /// Keep track identities across calls
    pub stream: bool,
    /// Results are meant for display
    pub show: bool,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            stream: true,
            show: false,
        }
    }
}

/// A loaded detection/tracking model.
pub trait Detector: Send {
    fn track(
        &mut self,
        frame: &Frame,
        options: &TrackOptions,
    ) -> Result<Vec<DetectionResult>, InferenceError>;
}

/// Load the model at `path`.
///
/// A missing file is reported before any backend is touched.
pub fn load_model(
    path: &Path,
    config: &InferenceConfig,
) -> Result<Box<dyn Detector>, InferenceError> {
    if !path.is_file() {
        return Err(InferenceError::ModelLoad(format!(
            "model file {} not found",
            path.display()
        )));
    }

    load_backend(path, config)
}

#[cfg(feature = "onnx")]
fn load_backend(
    path: &Path,
    config: &InferenceConfig,
) -> Result<Box<dyn Detector>, InferenceError> {
    Ok(Box::new(onnx::OnnxDetector::load(path, config)?))
}

#[cfg(not(feature = "onnx"))]
fn load_backend(
    path: &Path,
    _config: &InferenceConfig,
) -> Result<Box<dyn Detector>, InferenceError> {
    Err(InferenceError::ModelLoad(format!(
        "cannot run {}: built without the `onnx` feature",
        path.display()
    )))
}
