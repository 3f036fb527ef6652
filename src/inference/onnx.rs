//! YOLOv8 ONNX export run through onnxruntime

use std::path::Path;

use ndarray::Array4;
use ort::{inputs, session::Session, value::TensorRef};
use tracing::{debug, info};

use super::tracker::IouTracker;
use super::yolo::{decode, preprocess};
use super::{Detection, DetectionResult, Detector, InferenceError, TrackOptions};
use crate::capture::{decoder, Frame};
use crate::InferenceConfig;

pub struct OnnxDetector {
    session: Session,
    input_size: u32,
    confidence: f32,
    nms_threshold: f32,
    tracker: IouTracker,
}

impl OnnxDetector {
    pub fn load(path: &Path, config: &InferenceConfig) -> Result<Self, InferenceError> {
        let session = Session::builder()
            .map_err(|e| {
                InferenceError::ModelLoad(format!("failed to create session builder: {}", e))
            })?
            .commit_from_file(path)
            .map_err(|e| {
                InferenceError::ModelLoad(format!("failed to load {}: {}", path.display(), e))
            })?;
        info!("Loaded model {}", path.display());

        Ok(Self {
            session,
            input_size: config.input_size,
            confidence: config.confidence_threshold,
            nms_threshold: config.nms_threshold,
            tracker: IouTracker::new(config.track_iou_threshold, config.track_max_age),
        })
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let rgb = decoder::to_rgb(frame)?;
        let (tensor, letterbox) = preprocess(&rgb, self.input_size);
        let size = self.input_size as usize;
        let input = Array4::from_shape_vec((1, 3, size, size), tensor)
            .map_err(|e| InferenceError::Inference(format!("input tensor: {}", e)))?;

        let input = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::Inference(format!("failed to create tensor ref: {}", e)))?;
        let outputs = self
            .session
            .run(inputs![input])
            .map_err(|e| InferenceError::Inference(e.to_string()))?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| InferenceError::Inference(format!("output is not f32: {}", e)))?;
        let shape = output.shape().to_vec();
        let data: Vec<f32> = output.iter().copied().collect();

        decode(&data, &shape, &letterbox, self.confidence, self.nms_threshold)
    }
}

impl Detector for OnnxDetector {
    fn track(
        &mut self,
        frame: &Frame,
        options: &TrackOptions,
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        let mut detections = self.detect(frame)?;
        if options.stream {
            self.tracker.update(&mut detections);
        }
        debug!("{}: {} detections", frame, detections.len());

        Ok(vec![DetectionResult {
            sequence: frame.meta.sequence,
            detections,
        }])
    }
}
