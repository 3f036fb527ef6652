//! V4L2 camera backend

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::{Flags as BufFlags, Type};
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::{MmapStream, UserptrStream};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::error::CameraError;
use super::frame::{Frame, FrameMetadata, FrameStatus, PixelFormat};
use super::source::{
    AllocationMode, Camera, CameraInfo, FrameHandler, BALANCE_WHITE_AUTO, EXPOSURE_AUTO,
};

const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;

// V4L2 exposure menu entries
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// List capture-capable `/dev/videoN` nodes up to `max_index`.
pub fn enumerate(max_index: u32) -> Vec<CameraInfo> {
    let mut cameras = Vec::new();

    for i in 0..=max_index {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        if let Ok(dev) = Device::with_path(&path) {
            if let Ok(caps) = dev.query_caps() {
                if caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                    debug!("Found capture device: {} - {}", path, caps.card);
                    cameras.push(CameraInfo {
                        id: path,
                        name: caps.card,
                        model: caps.driver,
                    });
                }
            }
        }
    }

    cameras
}

/// Accept either a device path or a bare `/dev/videoN` index.
pub fn device_path(id: &str) -> String {
    if id.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{}", id)
    } else {
        id.to_string()
    }
}

pub struct V4l2Camera {
    device: Device,
    info: CameraInfo,
    format: PixelFormat,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Camera {
    #[instrument]
    pub fn open(id: &str) -> Result<Self, CameraError> {
        let path = device_path(id);
        let device = Device::with_path(&path).map_err(|_| CameraError::Access(id.into()))?;
        let caps = device
            .query_caps()
            .map_err(|_| CameraError::Access(id.into()))?;

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::Access(id.into()));
        }
        info!("Device: {} ({})", caps.card, caps.driver);

        let fmt = device.format()?;
        let format = from_fourcc(fmt.fourcc).ok_or_else(|| {
            CameraError::Unsupported(format!("current pixel format {}", fmt.fourcc))
        })?;

        Ok(Self {
            device,
            info: CameraInfo {
                id: path,
                name: caps.card,
                model: caps.driver,
            },
            format,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    fn has_control(&self, id: u32) -> Result<bool, CameraError> {
        Ok(self.device.query_controls()?.iter().any(|c| c.id == id))
    }
}

impl Camera for V4l2Camera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn set_enum_feature(&mut self, name: &str, value: &str) -> Result<(), CameraError> {
        let control = match (name, value) {
            (EXPOSURE_AUTO, "Continuous") => (CID_EXPOSURE_AUTO, Value::Integer(EXPOSURE_APERTURE_PRIORITY)),
            (EXPOSURE_AUTO, "Off") => (CID_EXPOSURE_AUTO, Value::Integer(EXPOSURE_MANUAL)),
            (BALANCE_WHITE_AUTO, "Continuous") => (CID_AUTO_WHITE_BALANCE, Value::Boolean(true)),
            (BALANCE_WHITE_AUTO, "Off") => (CID_AUTO_WHITE_BALANCE, Value::Boolean(false)),
            (EXPOSURE_AUTO, _) | (BALANCE_WHITE_AUTO, _) => {
                return Err(CameraError::Unsupported(format!("{} = {}", name, value)))
            }
            _ => return Err(CameraError::FeatureUnsupported(name.into())),
        };

        let (id, value) = control;
        if !self.has_control(id)? {
            return Err(CameraError::FeatureUnsupported(name.into()));
        }
        self.device.set_control(Control { id, value })?;
        Ok(())
    }

    fn run_command(&mut self, name: &str) -> Result<(), CameraError> {
        // GigE stream features have no V4L2 counterpart
        Err(CameraError::FeatureUnsupported(name.into()))
    }

    fn is_command_done(&mut self, name: &str) -> Result<bool, CameraError> {
        Err(CameraError::FeatureUnsupported(name.into()))
    }

    fn pixel_formats(&self) -> Vec<PixelFormat> {
        match self.device.enum_formats() {
            Ok(formats) => formats
                .iter()
                .filter_map(|desc| from_fourcc(desc.fourcc))
                .collect(),
            Err(e) => {
                warn!("Failed to enumerate formats: {}", e);
                Vec::new()
            }
        }
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        let mut fmt = self.device.format()?;
        fmt.fourcc = to_fourcc(format);
        let applied = self.device.set_format(&fmt)?;
        if applied.fourcc != fmt.fourcc {
            return Err(CameraError::Unsupported(format!("pixel format {:?}", format)));
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

        let fmt = self.device.format()?;
        let format = from_fourcc(fmt.fourcc).unwrap_or(self.format);
        let info = self.info.clone();
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        // Separate handle for the streaming thread; controls stay on ours
        let device = Device::with_path(&self.info.id)?;
        let (ready_tx, ready_rx) = flume::bounded::<Result<(), CameraError>>(1);

        let worker = std::thread::Builder::new()
            .name("v4l2-stream".into())
            .spawn(move || {
                let layout = Layout {
                    width: fmt.width,
                    height: fmt.height,
                    stride: fmt.stride,
                    format,
                };
                let result = match allocation_mode {
                    AllocationMode::AnnounceFrame => {
                        UserptrStream::with_buffers(&device, Type::VideoCapture, buffer_count)
                            .map(|mut stream| {
                                stream.set_timeout(DEQUEUE_TIMEOUT);
                                let _ = ready_tx.send(Ok(()));
                                pump(&mut stream, &info, &layout, &running, handler.as_mut())
                            })
                    }
                    AllocationMode::AllocAndAnnounceFrame => {
                        MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count)
                            .map(|mut stream| {
                                stream.set_timeout(DEQUEUE_TIMEOUT);
                                let _ = ready_tx.send(Ok(()));
                                pump(&mut stream, &info, &layout, &running, handler.as_mut())
                            })
                    }
                };
                if let Err(e) = result {
                    let _ = ready_tx.send(Err(CameraError::Io(e)));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "Capture stream started with {} buffers ({:?})",
                    buffer_count, allocation_mode
                );
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::Release);
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::Release);
                let _ = worker.join();
                Err(CameraError::Stream("streaming thread exited during startup".into()))
            }
        }
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| CameraError::Stream("streaming thread panicked".into()))?;
            info!("Capture stream stopped");
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        let _ = self.stop_streaming();
    }
}

struct Layout {
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

/// Dequeue buffers until stopped. Each buffer is re-queued by the next
/// `next()` call, after the handler has returned.
fn pump<S>(
    stream: &mut S,
    info: &CameraInfo,
    layout: &Layout,
    running: &AtomicBool,
    handler: &mut dyn FrameHandler,
) where
    S: for<'b> CaptureStream<'b, Item = [u8]>,
{
    while running.load(Ordering::Acquire) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("Capture error: {}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let status = if meta.flags.contains(BufFlags::ERROR) {
            FrameStatus::Incomplete
        } else {
            FrameStatus::Complete
        };

        let frame = Frame {
            data: Bytes::copy_from_slice(&buf[..used]),
            meta: Arc::new(FrameMetadata {
                sequence: meta.sequence as u64,
                width: layout.width,
                height: layout.height,
                stride: layout.stride,
                format: layout.format,
                status,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            }),
            captured_at: SystemTime::now(),
        };

        handler.on_frame(info, &frame);
    }
}

fn from_fourcc(fourcc: FourCC) -> Option<PixelFormat> {
    Some(match &fourcc.repr {
        b"MJPG" => PixelFormat::Mjpeg,
        b"YUYV" => PixelFormat::Yuyv4,
        b"RGB3" => PixelFormat::Rgb24,
        b"BGR3" => PixelFormat::Bgr24,
        b"GREY" => PixelFormat::Mono8,
        b"NV12" => PixelFormat::Nv12,
        _ => return None,
    })
}

fn to_fourcc(format: PixelFormat) -> FourCC {
    FourCC::new(match format {
        PixelFormat::Mjpeg => b"MJPG",
        PixelFormat::Yuyv4 => b"YUYV",
        PixelFormat::Rgb24 => b"RGB3",
        PixelFormat::Bgr24 => b"BGR3",
        PixelFormat::Mono8 => b"GREY",
        PixelFormat::Nv12 => b"NV12",
    })
}
