//! Consumer side of the frame relay: pull, infer, preview, until stopped

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::{load_model, DetectionResult, Detector, InferenceError, TrackOptions};
use crate::capture::Frame;
use crate::display::{NullPreview, Preview};
use crate::pipeline::{FrameRelay, RelayError, StopSignal};
use crate::InferenceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

pub struct InferenceWorker {
    relay: FrameRelay,
    stop: StopSignal,
    detector: Box<dyn Detector>,
    preview: Box<dyn Preview>,
    options: TrackOptions,
    get_timeout: Duration,
    state: WorkerState,
    processed: u64,
}

impl InferenceWorker {
    /// Load the model; fails with `ModelLoad` if it is missing or unusable.
    /// The worker starts headless, see `with_preview`.
    pub fn start(
        relay: FrameRelay,
        model: &Path,
        config: &InferenceConfig,
        show: bool,
    ) -> Result<Self, InferenceError> {
        let detector = load_model(model, config)?;
        Ok(Self::new(
            relay,
            detector,
            Box::new(NullPreview),
            show,
            config.get_timeout(),
        ))
    }

    pub fn new(
        relay: FrameRelay,
        detector: Box<dyn Detector>,
        preview: Box<dyn Preview>,
        show: bool,
        get_timeout: Duration,
    ) -> Self {
        Self {
            stop: relay.stop_signal(),
            relay,
            detector,
            preview,
            options: TrackOptions { stream: true, show },
            get_timeout,
            state: WorkerState::Starting,
            processed: 0,
        }
    }

    /// Replace the preview, e.g. once the model has loaded.
    pub fn with_preview(mut self, preview: Box<dyn Preview>) -> Self {
        self.preview = preview;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Process frames until the stop signal is raised or the user quits the
    /// preview. Returns the number of frames processed.
    #[instrument(skip(self), fields(relay = %self.relay.path().display()))]
    pub fn run(&mut self) -> Result<u64, InferenceError> {
        self.state = WorkerState::Running;
        info!("Inference worker running");

        let result = loop {
            if let Err(e) = self.step() {
                break Err(e);
            }
            if self.state != WorkerState::Running {
                break Ok(self.processed);
            }
        };

        self.drain();
        result
    }

    /// One loop iteration: wait for a frame, process it, check for stop.
    pub fn step(&mut self) -> Result<(), InferenceError> {
        match self.relay.get(self.get_timeout) {
            Ok(frame) => self.process(&frame)?,
            Err(RelayError::QueueEmpty) => {}
            Err(e) => return Err(e.into()),
        }

        if self.stop.is_set() {
            info!("Stop signal observed");
            self.state = WorkerState::Draining;
        } else if self.preview.quit_requested() {
            info!("Quit requested, stopping all processes");
            self.stop.set();
            self.state = WorkerState::Draining;
        }
        Ok(())
    }

    fn process(&mut self, frame: &Frame) -> Result<(), InferenceError> {
        let results = match self.detector.track(frame, &self.options) {
            Ok(results) => results,
            Err(e @ InferenceError::Shape { .. }) => return Err(e),
            Err(e) => {
                warn!("Inference on {} failed: {}", frame, e);
                return Ok(());
            }
        };
        self.processed += 1;
        metrics::counter!("relaycam_frames_inferred").increment(1);
        debug!(
            "{} -> {} detections",
            frame,
            results.iter().map(|r| r.detections.len()).sum::<usize>()
        );

        if self.options.show {
            self.render(frame, &results);
        }
        Ok(())
    }

    fn render(&mut self, frame: &Frame, results: &[DetectionResult]) {
        if let Err(e) = self.preview.show(frame, results) {
            warn!("Preview failed, continuing headless: {}", e);
            self.preview.close();
            self.preview = Box::new(NullPreview);
        }
    }

    fn drain(&mut self) {
        self.state = WorkerState::Draining;
        self.preview.close();
        self.state = WorkerState::Stopped;
        info!("Inference worker stopped after {} frames", self.processed);
    }
}
