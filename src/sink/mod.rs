//! Frame consumers attached to the camera callback

pub mod forward;
pub mod save;

pub use forward::RelayForwarder;
pub use save::{FrameSaver, SaveError, SaveHandler};

use serde::{Deserialize, Serialize};

/// How saved frame files are named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileNaming {
    /// `frame_{index:05}_{timestamp}.png`
    #[default]
    Indexed,
    /// `frame_{timestamp}.png`
    Timestamped,
}
