//! Optional live preview for the inference worker

#[cfg(feature = "preview")]
pub mod sdl;

#[cfg(feature = "preview")]
pub use sdl::SdlPreview;

use color_eyre::Result;

use crate::capture::Frame;
use crate::inference::DetectionResult;

/// Window the worker shows processed frames in.
///
/// Drawing detections is not part of the contract; implementations may only
/// summarise them.
pub trait Preview {
    fn show(&mut self, frame: &Frame, results: &[DetectionResult]) -> Result<()>;

    /// Poll window events; true once the user asked to quit.
    fn quit_requested(&mut self) -> bool;

    /// Release window resources. Called once, when the worker drains.
    fn close(&mut self);
}

/// Headless stand-in used when no preview is requested or available
#[derive(Debug, Default)]
pub struct NullPreview;

impl Preview for NullPreview {
    fn show(&mut self, _frame: &Frame, _results: &[DetectionResult]) -> Result<()> {
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        false
    }

    fn close(&mut self) {}
}

/// Open the preview window if requested and compiled in.
pub fn open_preview(show: bool) -> Box<dyn Preview> {
    if !show {
        return Box::new(NullPreview);
    }

    #[cfg(feature = "preview")]
    match SdlPreview::new("relaycam") {
        Ok(preview) => return Box::new(preview),
        Err(e) => tracing::warn!("Preview unavailable, running headless: {}", e),
    }
    #[cfg(not(feature = "preview"))]
    tracing::warn!("Built without the `preview` feature, running headless");

    Box::new(NullPreview)
}
