use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::capture::frame::Frame;
use crate::capture::source::{CameraInfo, FrameHandler};
use crate::pipeline::relay::{FrameRelay, RelayError};
use crate::pipeline::stop::StopSignal;

/// Camera-callback producer for the frame relay.
///
/// A full relay costs the frame, never the callback: with the default zero
/// timeout `put` returns immediately.
pub struct RelayForwarder {
    relay: Arc<FrameRelay>,
    stop: StopSignal,
    timeout: Duration,
    forwarded: u64,
    dropped: u64,
}

impl RelayForwarder {
    pub fn new(relay: Arc<FrameRelay>, timeout: Duration) -> Self {
        Self {
            stop: relay.stop_signal(),
            relay,
            timeout,
            forwarded: 0,
            dropped: 0,
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Offer one frame to the relay. Returns whether it was enqueued.
    pub fn forward(&mut self, frame: &Frame) -> bool {
        if self.stop.is_set() {
            return false;
        }
        match self.relay.put(frame, self.timeout) {
            Ok(()) => {
                self.forwarded += 1;
                true
            }
            Err(RelayError::QueueFull) => {
                self.dropped += 1;
                metrics::counter!("relaycam_relay_frames_dropped").increment(1);
                debug!("Relay full, dropped {}", frame);
                false
            }
            Err(e) => {
                self.dropped += 1;
                metrics::counter!("relaycam_relay_frames_dropped").increment(1);
                warn!("Failed to forward {}: {}", frame, e);
                false
            }
        }
    }
}

impl FrameHandler for RelayForwarder {
    fn on_frame(&mut self, _camera: &CameraInfo, frame: &Frame) {
        if frame.is_complete() {
            self.forward(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, FrameStatus, PixelFormat};
    use bytes::Bytes;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            Bytes::from_static(&[1, 2, 3]),
            FrameMetadata {
                sequence,
                width: 1,
                height: 1,
                stride: 3,
                format: PixelFormat::Rgb24,
                status: FrameStatus::Complete,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn full_relay_drops_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let relay = Arc::new(FrameRelay::create(&dir.path().join("fwd.relay"), 3, 16).unwrap());
        let mut forwarder = RelayForwarder::new(relay.clone(), Duration::ZERO);

        for seq in 0..5 {
            forwarder.forward(&frame(seq));
        }
        assert_eq!(forwarder.forwarded(), 3);
        assert_eq!(forwarder.dropped(), 2);
        assert_eq!(relay.len(), 3);
        assert_eq!(relay.stats().rejected, 2);

        // oldest frames are the ones kept
        assert_eq!(relay.get(Duration::ZERO).unwrap().meta.sequence, 0);
    }

    #[test]
    fn stops_forwarding_once_stop_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let relay = Arc::new(FrameRelay::create(&dir.path().join("fwd.relay"), 3, 16).unwrap());
        let mut forwarder = RelayForwarder::new(relay.clone(), Duration::ZERO);

        relay.stop_signal().set();
        assert!(!forwarder.forward(&frame(1)));
        assert!(relay.is_empty());
    }
}
