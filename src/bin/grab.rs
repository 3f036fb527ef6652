//! Stream a camera and save every frame as an indexed PNG

use std::process::ExitCode;

use color_eyre::Result;
use tracing::{info, warn};

use relaycam::capture::{setup_camera, CameraSystem, SetupOptions};
use relaycam::cli::{self, Invocation, EXIT_CAMERA};
use relaycam::sink::{FileNaming, FrameSaver, SaveHandler};
use relaycam::{utils, Config};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    utils::init_tracing();
    utils::print_preamble("Asynchronous Grab & Save");

    let usage = cli::GRAB;
    let (camera_id, allocation_mode) = match usage.parse(std::env::args().skip(1)) {
        Ok(Invocation::Help) => {
            usage.print_usage();
            return Ok(ExitCode::SUCCESS);
        }
        Ok(Invocation::Run {
            camera_id,
            allocation_mode,
        }) => (camera_id, allocation_mode),
        Err(e) => return Ok(usage.abort(&e)),
    };

    let config = Config::load()?;
    let system = CameraSystem::new(config.capture.clone());
    let mut camera = match system.get_camera(camera_id.as_deref()) {
        Ok(camera) => camera,
        Err(e) => return Ok(cli::abort(format!("{}. Abort.", e), EXIT_CAMERA)),
    };
    setup_camera(camera.as_mut(), &SetupOptions::from(&config.capture));

    let naming = config.output.naming.unwrap_or(FileNaming::Indexed);
    let saver = FrameSaver::new(&config.output.dir, naming)?;
    let (handler, writer) = SaveHandler::spawn(saver, config.pipeline.save_queue)?;

    if let Err(e) = camera.start_streaming(
        Box::new(handler),
        config.capture.buffer_count,
        allocation_mode,
    ) {
        return Ok(cli::abort(format!("{}. Abort.", e), EXIT_CAMERA));
    }
    println!("Press <enter> to stop Frame acquisition.");
    utils::wait_for_enter_or_interrupt().await;

    if let Err(e) = camera.stop_streaming() {
        warn!("Failed to stop streaming: {}", e);
    }
    let saved = writer.finish();
    info!("Saved {} frames to {}", saved, config.output.dir.display());

    Ok(ExitCode::SUCCESS)
}
