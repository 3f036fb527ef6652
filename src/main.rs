//! Stream a camera to disk and through the frame relay to an inference worker

use std::process::ExitCode;
use std::sync::Arc;

use color_eyre::Result;
use tracing::{error, info, warn};

use relaycam::capture::{setup_camera, CameraSystem, HandlerChain, SetupOptions};
use relaycam::cli::{self, Invocation, EXIT_CAMERA};
use relaycam::pipeline::{FrameRelay, Orchestrator, WorkerCommand, WorkerSupervisor};
use relaycam::sink::{FileNaming, FrameSaver, RelayForwarder, SaveHandler};
use relaycam::{utils, Config};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    utils::init_tracing();
    utils::print_preamble("Relaycam: Asynchronous Grab with Inference");

    let usage = cli::RELAYCAM;
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

    let relay = Arc::new(FrameRelay::create(
        &config.relay.resolved_path(),
        config.relay.capacity,
        config.relay.slot_bytes,
    )?);

    let mut handlers = HandlerChain::new();
    let mut worker = None;
    if config.inference.enabled {
        let command = WorkerCommand::inference(&config.inference, relay.path())?;
        match WorkerSupervisor::spawn(&command) {
            Ok(spawned) => {
                handlers = handlers.with(RelayForwarder::new(
                    relay.clone(),
                    config.relay.put_timeout(),
                ));
                worker = Some(spawned);
            }
            // acquisition goes on without inference
            Err(e) => error!(
                "Failed to start inference worker {}: {}",
                command.program.display(),
                e
            ),
        }
    }

    let mut writer = None;
    if config.output.enabled {
        let naming = config.output.naming.unwrap_or(FileNaming::Timestamped);
        let saver = FrameSaver::new(&config.output.dir, naming)?;
        let (handler, spawned) = SaveHandler::spawn(saver, config.pipeline.save_queue)?;
        handlers = handlers.with(handler);
        writer = Some(spawned);
    }

    let mut orchestrator = Orchestrator::new(
        relay.stop_signal(),
        worker,
        &config.inference,
        config.pipeline.poll_interval(),
    );

    if let Err(e) = camera.start_streaming(
        Box::new(handlers),
        config.capture.buffer_count,
        allocation_mode,
    ) {
        orchestrator.shutdown().await;
        return Ok(cli::abort(format!("{}. Abort.", e), EXIT_CAMERA));
    }
    println!("Streaming... Press Ctrl+C to stop.");

    let outcome = orchestrator.run(utils::interrupted()).await;
    info!("Acquisition ending: {:?}", outcome);

    if let Err(e) = camera.stop_streaming() {
        warn!("Failed to stop streaming: {}", e);
    }
    orchestrator.shutdown().await;

    if let Some(writer) = writer {
        let saved = writer.finish();
        info!("Saved {} frames to {}", saved, config.output.dir.display());
    }
    let stats = relay.stats();
    info!(
        "Relay: {} frames forwarded, {} inferred, {} dropped",
        stats.written, stats.read, stats.rejected
    );

    Ok(ExitCode::SUCCESS)
}
