pub mod capture;
pub mod cli;
pub mod display;
pub mod inference;
pub mod pipeline;
pub mod sink;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use capture::frame::PixelFormat;
use sink::FileNaming;

/// Environment variable naming an optional TOML configuration file
pub const CONFIG_ENV: &str = "RELAYCAM_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "relaycam.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub relay: RelayConfig,
    pub inference: InferenceConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub buffer_count: u32,
    pub exposure_auto: String,
    pub balance_white_auto: String,
    pub packet_size_poll_interval_ms: u64,
    pub packet_size_max_retries: u32,
    /// Highest `/dev/videoN` index probed during enumeration
    pub max_device_index: u32,
    pub synthetic: SyntheticConfig,
}

/// Test-pattern camera, available as camera id `synthetic`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Polls before the packet-size command reports completion
    pub packet_size_polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub capacity: usize,
    /// Largest frame payload a relay slot can hold
    pub slot_bytes: usize,
    /// Backing file; defaults to a per-process file in the temp directory
    pub path: Option<PathBuf>,
    /// How long the camera callback may wait on a full relay
    pub put_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub enabled: bool,
    pub model_path: PathBuf,
    /// Worker executable; defaults to `relaycam-worker` next to the current binary
    pub worker_program: Option<PathBuf>,
    pub show: bool,
    pub get_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub terminate_grace_ms: u64,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub track_iou_threshold: f32,
    pub track_max_age: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Overrides each utility's own naming scheme
    pub naming: Option<FileNaming>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames buffered between the camera callback and the disk writer
    pub save_queue: usize,
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_count: 10,
            exposure_auto: "Continuous".into(),
            balance_white_auto: "Continuous".into(),
            packet_size_poll_interval_ms: 10,
            packet_size_max_retries: 200,
            max_device_index: 63,
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Bgr24,
            packet_size_polls: 3,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            slot_bytes: 1920 * 1200 * 3,
            path: None,
            put_timeout_ms: 0,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: PathBuf::from("yolov8n.onnx"),
            worker_program: None,
            show: true,
            get_timeout_ms: 1000,
            join_timeout_ms: 5000,
            terminate_grace_ms: 1000,
            input_size: 640,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            track_iou_threshold: 0.3,
            track_max_age: 30,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("captured_frames"),
            naming: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            save_queue: 16,
            poll_interval_ms: 200,
        }
    }
}

impl RelayConfig {
    pub fn put_timeout(&self) -> Duration {
        Duration::from_millis(self.put_timeout_ms)
    }

    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("relaycam-{}.relay", std::process::id()))
        })
    }
}

impl InferenceConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Layer defaults, the optional config file and `RELAYCAM__*` variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("RELAYCAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_pipeline() {
        let config = Config::default();
        assert_eq!(config.relay.capacity, 3);
        assert_eq!(config.capture.buffer_count, 10);
        assert_eq!(config.inference.get_timeout(), Duration::from_secs(1));
        assert_eq!(config.relay.put_timeout(), Duration::ZERO);
        assert_eq!(config.output.dir, PathBuf::from("captured_frames"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/relaycam.toml")).unwrap();
        assert_eq!(config.relay.capacity, 3);
    }

    #[test]
    fn file_overrides_single_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[relay]\ncapacity = 5\n\n[output]\nnaming = \"Timestamped\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.relay.capacity, 5);
        assert_eq!(config.output.naming, Some(FileNaming::Timestamped));
        // untouched values keep their defaults
        assert_eq!(config.capture.buffer_count, 10);
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pipeline]\nsave_queue = 7\n\n[inference]\njoin_timeout_ms = 900").unwrap();

        // keys no other test reads, the environment is process-wide
        std::env::set_var("RELAYCAM__PIPELINE__SAVE_QUEUE", "11");
        std::env::set_var("RELAYCAM__INFERENCE__TERMINATE_GRACE_MS", "250");
        let config = Config::load_from(file.path());
        std::env::remove_var("RELAYCAM__PIPELINE__SAVE_QUEUE");
        std::env::remove_var("RELAYCAM__INFERENCE__TERMINATE_GRACE_MS");
        let config = config.unwrap();

        assert_eq!(config.pipeline.save_queue, 11);
        assert_eq!(config.inference.terminate_grace(), Duration::from_millis(250));
        assert_eq!(config.inference.join_timeout(), Duration::from_millis(900));
    }
}
