use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use image::ExtendedColorType;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::FileNaming;
use crate::capture::decoder::{self, ConvertError};
use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::source::{CameraInfo, FrameHandler};
use crate::utils::file_timestamp;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("png encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Writes frames as PNG files into one output directory.
///
/// The saver owns its frame index; two savers never share a counter.
#[derive(Debug)]
pub struct FrameSaver {
    dir: PathBuf,
    naming: FileNaming,
    target: Option<PixelFormat>,
    next_index: u64,
}

impl FrameSaver {
    /// Creates `dir` if it does not exist yet.
    pub fn new(dir: impl Into<PathBuf>, naming: FileNaming) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            naming,
            target: None,
            next_index: 0,
        })
    }

    /// Convert every frame to `target` before encoding.
    pub fn with_target(mut self, target: PixelFormat) -> Self {
        self.target = Some(target);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of frames written so far
    pub fn saved(&self) -> u64 {
        self.next_index
    }

    fn file_name(&self, frame: &Frame) -> String {
        let stamp = file_timestamp(frame.captured_at);
        match self.naming {
            FileNaming::Indexed => format!("frame_{:05}_{}.png", self.next_index, stamp),
            FileNaming::Timestamped => format!("frame_{}.png", stamp),
        }
    }

    /// Save one frame. Incomplete frames are skipped and yield `Ok(None)`.
    pub fn save(&mut self, frame: &Frame) -> Result<Option<PathBuf>, SaveError> {
        if !frame.is_complete() {
            debug!("Skipping incomplete {}", frame);
            return Ok(None);
        }

        let target = self.target.unwrap_or(match frame.meta.format {
            PixelFormat::Mono8 => PixelFormat::Mono8,
            _ => PixelFormat::Rgb24,
        });
        let mut image = decoder::convert(frame, target)?;

        // PNG stores RGB order
        let color = match image.format {
            PixelFormat::Mono8 => ExtendedColorType::L8,
            PixelFormat::Bgr24 => {
                for px in image.data.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                ExtendedColorType::Rgb8
            }
            _ => ExtendedColorType::Rgb8,
        };

        let path = self.dir.join(self.file_name(frame));
        image::save_buffer(&path, &image.data, image.width, image.height, color)?;

        self.next_index += 1;
        metrics::counter!("relaycam_frames_saved").increment(1);
        Ok(Some(path))
    }
}

/// Camera-callback side of asynchronous saving.
///
/// `on_frame` only clones the frame handle into a bounded channel; encoding
/// happens on the writer thread. When the channel is full the frame is
/// skipped instead of stalling acquisition.
pub struct SaveHandler {
    tx: flume::Sender<Frame>,
    skipped: u64,
}

/// Writer thread draining a `SaveHandler`.
pub struct SaveWriter {
    handle: JoinHandle<u64>,
}

impl SaveHandler {
    pub fn spawn(mut saver: FrameSaver, queue: usize) -> io::Result<(Self, SaveWriter)> {
        let (tx, rx) = flume::bounded::<Frame>(queue.max(1));

        let handle = thread::Builder::new()
            .name("frame-writer".into())
            .spawn(move || {
                for frame in rx.iter() {
                    match saver.save(&frame) {
                        Ok(Some(path)) => debug!("Saved {} to {}", frame, path.display()),
                        Ok(None) => {}
                        Err(e) => warn!("Failed to save {}: {}", frame, e),
                    }
                }
                saver.saved()
            })?;

        Ok((Self { tx, skipped: 0 }, SaveWriter { handle }))
    }

    /// Frames dropped because the writer fell behind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl FrameHandler for SaveHandler {
    fn on_frame(&mut self, camera: &CameraInfo, frame: &Frame) {
        debug!("{} acquired {}", camera, frame);
        if self.tx.try_send(frame.clone()).is_err() {
            self.skipped += 1;
            metrics::counter!("relaycam_save_queue_dropped").increment(1);
        }
    }
}

impl SaveWriter {
    /// Wait for every queued frame to be written and return the total.
    ///
    /// Returns once all `SaveHandler`s are dropped, i.e. after streaming
    /// stopped and the camera released its handler.
    pub fn finish(self) -> u64 {
        match self.handle.join() {
            Ok(saved) => saved,
            Err(_) => {
                error!("Frame writer thread panicked");
                0
            }
        }
    }
}
