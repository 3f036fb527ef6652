//! Test-pattern camera that streams without hardware

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use super::error::CameraError;
use super::frame::{Frame, FrameMetadata, FrameStatus, PixelFormat};
use super::source::{
    AllocationMode, Camera, CameraInfo, FrameHandler, BALANCE_WHITE_AUTO, EXPOSURE_AUTO,
    GVSP_ADJUST_PACKET_SIZE,
};
use crate::SyntheticConfig;

pub const SYNTHETIC_ID: &str = "synthetic";

const ENUM_VALUES: [&str; 3] = ["Off", "Once", "Continuous"];

/// Formats the pattern generator can write
const NATIVE_FORMATS: [PixelFormat; 3] = [PixelFormat::Mono8, PixelFormat::Rgb24, PixelFormat::Bgr24];

fn check_format(format: PixelFormat) -> Result<(), CameraError> {
    if NATIVE_FORMATS.contains(&format) {
        Ok(())
    } else {
        Err(CameraError::Unsupported(format!("pixel format {:?}", format)))
    }
}

/// Generates a moving gradient on its own streaming thread.
pub struct SyntheticCamera {
    info: CameraInfo,
    config: SyntheticConfig,
    format: PixelFormat,
    exposure_auto: String,
    balance_white_auto: String,
    packet_size_polls_left: Option<u32>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Result<Self, CameraError> {
        check_format(config.format)?;
        Ok(Self {
            info: Self::describe(),
            format: config.format,
            config,
            exposure_auto: "Off".into(),
            balance_white_auto: "Off".into(),
            packet_size_polls_left: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn describe() -> CameraInfo {
        CameraInfo {
            id: SYNTHETIC_ID.into(),
            name: "Synthetic test pattern".into(),
            model: "relaycam".into(),
        }
    }

    pub fn feature_value(&self, name: &str) -> Option<&str> {
        match name {
            EXPOSURE_AUTO => Some(&self.exposure_auto),
            BALANCE_WHITE_AUTO => Some(&self.balance_white_auto),
            _ => None,
        }
    }
}

impl Camera for SyntheticCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn set_enum_feature(&mut self, name: &str, value: &str) -> Result<(), CameraError> {
        let slot = match name {
            EXPOSURE_AUTO => &mut self.exposure_auto,
            BALANCE_WHITE_AUTO => &mut self.balance_white_auto,
            _ => return Err(CameraError::FeatureUnsupported(name.into())),
        };
        if !ENUM_VALUES.contains(&value) {
            return Err(CameraError::Unsupported(format!("{} = {}", name, value)));
        }
        *slot = value.to_string();
        Ok(())
    }

    fn run_command(&mut self, name: &str) -> Result<(), CameraError> {
        if name != GVSP_ADJUST_PACKET_SIZE {
            return Err(CameraError::FeatureUnsupported(name.into()));
        }
        self.packet_size_polls_left = Some(self.config.packet_size_polls);
        Ok(())
    }

    fn is_command_done(&mut self, name: &str) -> Result<bool, CameraError> {
        if name != GVSP_ADJUST_PACKET_SIZE {
            return Err(CameraError::FeatureUnsupported(name.into()));
        }
        match self.packet_size_polls_left.as_mut() {
            Some(0) | None => Ok(true),
            Some(left) => {
                *left -= 1;
                Ok(false)
            }
        }
    }

    fn pixel_formats(&self) -> Vec<PixelFormat> {
        NATIVE_FORMATS.to_vec()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        check_format(format)?;
        if self.is_streaming() {
            return Err(CameraError::Stream(
                "pixel format cannot change while streaming".into(),
            ));
        }
        self.format = format;
        Ok(())
    }

    fn start_streaming(
        &mut self,
        mut handler: Box<dyn FrameHandler>,
        buffer_count: u32,
        allocation_mode: AllocationMode,
    ) -> Result<(), CameraError> {
        if self.is_streaming() {
            return Err(CameraError::Stream("already streaming".into()));
        }

        let info = self.info.clone();
        let (width, height, format) = (self.config.width, self.config.height, self.format);
        let period = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        info!(
            "Synthetic stream started: {}x{} {:?}, {} buffers, {:?}",
            width, height, format, buffer_count, allocation_mode
        );

        let worker = std::thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || {
                let mut sequence = 0u64;
                let started = Instant::now();
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    let frame = pattern(sequence, width, height, format, started.elapsed());
                    handler.on_frame(&info, &frame);
                    sequence += 1;

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                debug!("Synthetic stream delivered {} frames", sequence);
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CameraError::Stream("streaming thread panicked".into()))?;
            info!("Synthetic stream stopped");
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        let _ = self.stop_streaming();
    }
}

fn pattern(sequence: u64, width: u32, height: u32, format: PixelFormat, at: Duration) -> Frame {
    let bpp = format.bytes_per_pixel().unwrap_or(3) as usize;
    let (w, h) = (width as usize, height as usize);
    let shift = sequence as usize;
    let mut data = Vec::with_capacity(w * h * bpp);

    for y in 0..h {
        for x in 0..w {
            let r = ((x + shift) * 255 / w.max(1)) as u8;
            let g = (y * 255 / h.max(1)) as u8;
            let b = (shift % 256) as u8;
            match format {
                PixelFormat::Mono8 => data.push(((r as u16 + g as u16) / 2) as u8),
                PixelFormat::Bgr24 => data.extend_from_slice(&[b, g, r]),
                _ => data.extend_from_slice(&[r, g, b]),
            }
        }
    }

    Frame::new(
        Bytes::from(data),
        FrameMetadata {
            sequence,
            width,
            height,
            stride: width * bpp as u32,
            format,
            status: FrameStatus::Complete,
            device_timestamp: Some(at),
        },
    )
}
