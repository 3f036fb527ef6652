//! Inference worker process, spawned by `relaycam`

use std::process::ExitCode;

use clap::Parser;
use color_eyre::Result;
use tracing::error;

use relaycam::cli::WorkerArgs;
use relaycam::display::open_preview;
use relaycam::inference::{InferenceError, InferenceWorker, EXIT_MODEL_LOAD};
use relaycam::pipeline::FrameRelay;
use relaycam::{utils, Config};

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    utils::init_tracing();

    // exits with status 2 on bad arguments
    let args = WorkerArgs::parse();

    let config = Config::load()?;
    let relay = match FrameRelay::attach(&args.relay) {
        Ok(relay) => relay,
        Err(e) => {
            error!("Cannot attach to relay {}: {}", args.relay.display(), e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // the window is only opened once the model is loaded
    let worker = InferenceWorker::start(relay, &args.model, &config.inference, args.show);
    let mut worker = match worker {
        Ok(worker) => worker.with_preview(open_preview(args.show)),
        Err(e @ InferenceError::ModelLoad(_)) => {
            error!("{}", e);
            return Ok(ExitCode::from(EXIT_MODEL_LOAD));
        }
        Err(e) => {
            error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    match worker.run() {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("Inference worker failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
