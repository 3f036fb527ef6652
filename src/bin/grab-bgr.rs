//! Stream a camera in a BGR-convertible pixel format and save complete frames

use std::process::ExitCode;

use color_eyre::Result;
use tracing::{info, warn};

use relaycam::capture::{
    setup_camera, setup_pixel_format, AllocationMode, CameraSystem, PixelFormat, SetupOptions,
};
use relaycam::cli::{self, Invocation, EXIT_CAMERA};
use relaycam::sink::{FileNaming, FrameSaver, SaveHandler};
use relaycam::{utils, Config};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    utils::init_tracing();
    utils::print_preamble("Asynchronous Grab with BGR Conversion");

    let usage = cli::GRAB_BGR;
    let camera_id = match usage.parse(std::env::args().skip(1)) {
        Ok(Invocation::Help) => {
            usage.print_usage();
            return Ok(ExitCode::SUCCESS);
        }
        Ok(Invocation::Run { camera_id, .. }) => camera_id,
        Err(e) => return Ok(usage.abort(&e)),
    };

    let config = Config::load()?;
    let system = CameraSystem::new(config.capture.clone());
    let mut camera = match system.get_camera(camera_id.as_deref()) {
        Ok(camera) => camera,
        Err(e) => return Ok(cli::abort(format!("{}. Abort.", e), EXIT_CAMERA)),
    };
    setup_camera(camera.as_mut(), &SetupOptions::from(&config.capture));
    if let Err(e) = setup_pixel_format(camera.as_mut(), PixelFormat::Bgr24) {
        return Ok(cli::abort(
            format!("Camera does not support a BGR compatible format ({}). Abort.", e),
            EXIT_CAMERA,
        ));
    }

    let naming = config.output.naming.unwrap_or(FileNaming::Indexed);
    let saver = FrameSaver::new(&config.output.dir, naming)?.with_target(PixelFormat::Bgr24);
    let (handler, writer) = SaveHandler::spawn(saver, config.pipeline.save_queue)?;

    if let Err(e) = camera.start_streaming(
        Box::new(handler),
        config.capture.buffer_count,
        AllocationMode::AnnounceFrame,
    ) {
        return Ok(cli::abort(format!("{}. Abort.", e), EXIT_CAMERA));
    }
    println!("Streaming... Press Ctrl+C to stop.");
    utils::interrupted().await;
    println!("\nStopping capture...");

    if let Err(e) = camera.stop_streaming() {
        warn!("Failed to stop streaming: {}", e);
    }
    let saved = writer.finish();
    info!("Saved {} frames to {}", saved, config.output.dir.display());

    Ok(ExitCode::SUCCESS)
}
