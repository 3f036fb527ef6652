use std::time::Duration;

use relaycam::capture::{
    setup_camera, setup_pixel_format, AllocationMode, Camera, CameraError, CameraInfo,
    FrameHandler, PixelFormat, SetupOptions,
};

/// Camera exposing only the features listed in `features`.
struct MockCamera {
    info: CameraInfo,
    features: Vec<&'static str>,
    set: Vec<(String, String)>,
    polls_until_done: Option<u32>,
    polls: u32,
    formats: Vec<PixelFormat>,
    format: PixelFormat,
}

impl MockCamera {
    fn new(features: &[&'static str]) -> Self {
        Self {
            info: CameraInfo {
                id: "mock".into(),
                name: "Mock".into(),
                model: "Mock".into(),
            },
            features: features.to_vec(),
            set: Vec::new(),
            polls_until_done: Some(2),
            polls: 0,
            formats: vec![PixelFormat::Mono8],
            format: PixelFormat::Mono8,
        }
    }

    fn has(&self, name: &str) -> Result<(), CameraError> {
        if self.features.contains(&name) {
            Ok(())
        } else {
            Err(CameraError::FeatureUnsupported(name.into()))
        }
    }
}

impl Camera for MockCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn set_enum_feature(&mut self, name: &str, value: &str) -> Result<(), CameraError> {
        self.has(name)?;
        self.set.push((name.into(), value.into()));
        Ok(())
    }

    fn run_command(&mut self, name: &str) -> Result<(), CameraError> {
        self.has(name)
    }

    fn is_command_done(&mut self, name: &str) -> Result<bool, CameraError> {
        self.has(name)?;
        self.polls += 1;
        match self.polls_until_done.as_mut() {
            Some(0) => Ok(true),
            Some(n) => {
                *n -= 1;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn pixel_formats(&self) -> Vec<PixelFormat> {
        self.formats.clone()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        self.format = format;
        Ok(())
    }

    fn start_streaming(
        &mut self,
        _handler: Box<dyn FrameHandler>,
        _buffer_count: u32,
        _allocation_mode: AllocationMode,
    ) -> Result<(), CameraError> {
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        false
    }
}

fn fast_options() -> SetupOptions {
    SetupOptions {
        poll_interval: Duration::from_millis(1),
        max_retries: 5,
        ..SetupOptions::default()
    }
}

#[test]
fn test_missing_exposure_auto_is_only_a_warning() {
    let mut camera = MockCamera::new(&["BalanceWhiteAuto", "GVSPAdjustPacketSize"]);
    let report = setup_camera(&mut camera, &fast_options());

    assert!(report.was_skipped("ExposureAuto"));
    assert!(report.was_applied("BalanceWhiteAuto"));
    assert!(report.was_applied("GVSPAdjustPacketSize"));
    assert_eq!(
        camera.set,
        vec![("BalanceWhiteAuto".to_string(), "Continuous".to_string())]
    );
}

#[test]
fn test_camera_without_features_still_configures() {
    let mut camera = MockCamera::new(&[]);
    let report = setup_camera(&mut camera, &fast_options());
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert!(report.skipped.iter().all(|(_, e)| e.is_feature_level()));
}

#[test]
fn test_packet_size_poll_is_bounded() {
    let mut camera = MockCamera::new(&["GVSPAdjustPacketSize"]);
    camera.polls_until_done = None;

    let report = setup_camera(&mut camera, &fast_options());
    let (_, err) = report
        .skipped
        .iter()
        .find(|(feature, _)| *feature == "GVSPAdjustPacketSize")
        .unwrap();
    assert!(matches!(err, CameraError::Timeout { .. }));
}

#[test]
fn test_packet_size_timeout_reports_time_slept() {
    let mut camera = MockCamera::new(&["GVSPAdjustPacketSize"]);
    camera.polls_until_done = None;

    let report = setup_camera(&mut camera, &fast_options());
    let (_, err) = report
        .skipped
        .iter()
        .find(|(feature, _)| *feature == "GVSPAdjustPacketSize")
        .unwrap();

    // first poll plus one per retry, with a sleep only between polls
    assert_eq!(camera.polls, 6);
    match err {
        CameraError::Timeout { waited, .. } => assert_eq!(*waited, Duration::from_millis(5)),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_pixel_format_prefers_colour_over_mono() {
    let mut camera = MockCamera::new(&[]);
    camera.formats = vec![PixelFormat::Mono8, PixelFormat::Nv12, PixelFormat::Yuyv4];
    assert_eq!(
        setup_pixel_format(&mut camera, PixelFormat::Bgr24).unwrap(),
        PixelFormat::Yuyv4
    );
    assert_eq!(camera.pixel_format(), PixelFormat::Yuyv4);

    camera.formats = vec![PixelFormat::Bgr24, PixelFormat::Yuyv4];
    assert_eq!(
        setup_pixel_format(&mut camera, PixelFormat::Bgr24).unwrap(),
        PixelFormat::Bgr24
    );

    camera.formats = vec![PixelFormat::Mono8];
    assert_eq!(
        setup_pixel_format(&mut camera, PixelFormat::Bgr24).unwrap(),
        PixelFormat::Mono8
    );

    camera.formats = vec![PixelFormat::Nv12];
    assert!(matches!(
        setup_pixel_format(&mut camera, PixelFormat::Bgr24),
        Err(CameraError::Unsupported(_))
    ));
}
