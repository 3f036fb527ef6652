pub mod orchestrator;
pub mod relay;
mod shm;
pub mod stop;
pub mod supervisor;

pub use orchestrator::{Orchestrator, RunOutcome};
pub use relay::{FrameRelay, RelayError, RelayStats};
pub use stop::StopSignal;
pub use supervisor::{JoinOutcome, WorkerCommand, WorkerSupervisor};
