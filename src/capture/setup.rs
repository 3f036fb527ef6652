//! Best-effort camera configuration before streaming starts

use std::time::Duration;

use tracing::{info, warn};

use super::decoder::convertible_formats;
use super::error::CameraError;
use super::frame::PixelFormat;
use super::source::{Camera, BALANCE_WHITE_AUTO, EXPOSURE_AUTO, GVSP_ADJUST_PACKET_SIZE};
use crate::CaptureConfig;

#[derive(Debug, Clone)]
pub struct SetupOptions {
    pub exposure_auto: String,
    pub balance_white_auto: String,
    pub adjust_packet_size: bool,
    pub poll_interval: Duration,
    pub max_retries: u32,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for SetupOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            exposure_auto: config.exposure_auto.clone(),
            balance_white_auto: config.balance_white_auto.clone(),
            adjust_packet_size: true,
            poll_interval: Duration::from_millis(config.packet_size_poll_interval_ms),
            max_retries: config.packet_size_max_retries,
        }
    }
}

/// Which optional features were applied and which were skipped.
#[derive(Debug, Default)]
pub struct SetupReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<(&'static str, CameraError)>,
}

impl SetupReport {
    pub fn was_applied(&self, feature: &str) -> bool {
        self.applied.iter().any(|f| *f == feature)
    }

    pub fn was_skipped(&self, feature: &str) -> bool {
        self.skipped.iter().any(|(f, _)| *f == feature)
    }

    fn record(&mut self, feature: &'static str, result: Result<(), CameraError>) {
        match result {
            Ok(()) => self.applied.push(feature),
            Err(err) => {
                warn!("Camera feature {} skipped: {}", feature, err);
                self.skipped.push((feature, err));
            }
        }
    }
}

/// Enable auto exposure, auto white balance and GigE packet-size negotiation
/// where the camera supports them. Nothing here is fatal.
pub fn setup_camera(camera: &mut dyn Camera, options: &SetupOptions) -> SetupReport {
    let mut report = SetupReport::default();

    let result = camera.set_enum_feature(EXPOSURE_AUTO, &options.exposure_auto);
    report.record(EXPOSURE_AUTO, result);

    let result = camera.set_enum_feature(BALANCE_WHITE_AUTO, &options.balance_white_auto);
    report.record(BALANCE_WHITE_AUTO, result);

    if options.adjust_packet_size {
        let result = adjust_packet_size(camera, options.poll_interval, options.max_retries);
        report.record(GVSP_ADJUST_PACKET_SIZE, result);
    }

    info!(
        "Camera {} configured ({} applied, {} skipped)",
        camera.info().id,
        report.applied.len(),
        report.skipped.len()
    );
    report
}

fn adjust_packet_size(
    camera: &mut dyn Camera,
    interval: Duration,
    max_retries: u32,
) -> Result<(), CameraError> {
    camera.run_command(GVSP_ADJUST_PACKET_SIZE)?;

    // one poll up front, then one after each sleep
    let mut waited = Duration::ZERO;
    for attempt in 0..=max_retries {
        if camera.is_command_done(GVSP_ADJUST_PACKET_SIZE)? {
            return Ok(());
        }
        if attempt < max_retries {
            std::thread::sleep(interval);
            waited += interval;
        }
    }

    Err(CameraError::Timeout {
        feature: GVSP_ADJUST_PACKET_SIZE.into(),
        waited,
    })
}

/// Select a pixel format that can be converted into `target`: the target
/// itself, then a convertible colour format, then a convertible mono format.
pub fn setup_pixel_format(
    camera: &mut dyn Camera,
    target: PixelFormat,
) -> Result<PixelFormat, CameraError> {
    let formats = camera.pixel_formats();
    let convertible = |f: &&PixelFormat| convertible_formats(**f).contains(&target);

    let chosen = if formats.contains(&target) {
        Some(target)
    } else {
        formats
            .iter()
            .filter(|f| f.is_color())
            .find(convertible)
            .or_else(|| formats.iter().filter(|f| !f.is_color()).find(convertible))
            .copied()
    };

    let format = chosen.ok_or_else(|| {
        CameraError::Unsupported(format!("a pixel format convertible to {:?}", target))
    })?;
    camera.set_pixel_format(format)?;
    info!("Pixel format set to {:?}", format);
    Ok(format)
}
