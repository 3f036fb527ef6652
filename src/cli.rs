//! Command-line surface shared by the utilities
//!
//! Options accept both `-x` and `/x` spellings. Help wins over everything,
//! including a bad argument count.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::{ContextKind, ContextValue};
use clap::{ArgAction, Parser};
use thiserror::Error;

use crate::capture::AllocationMode;

pub const EXIT_CAMERA: u8 = 1;
pub const EXIT_USAGE: u8 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("Invalid number of arguments. Abort.")]
    TooManyArguments,
    #[error("Unknown option '{0}'. Abort.")]
    UnknownOption(String),
    #[error("Invalid arguments ({0}). Abort.")]
    Invalid(String),
}

impl UsageError {
    fn from_clap(err: &clap::Error) -> Self {
        match err.get(ContextKind::InvalidArg) {
            Some(ContextValue::String(arg)) => UsageError::UnknownOption(arg.clone()),
            _ => UsageError::Invalid(err.kind().as_str().unwrap_or("unparsable").to_string()),
        }
    }
}

/// Flags shared by the acquisition utilities. `-h` never reaches clap: it is
/// answered with `UsageSpec::usage` before parsing.
#[derive(Parser, Debug)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct UtilityArgs {
    /// Use AllocAndAnnounce mode of buffer allocation
    #[arg(short = 'x', action = ArgAction::SetTrue)]
    alloc_and_announce: bool,
    /// ID of the camera to use; only the first non-empty one counts
    #[arg(value_name = "camera_id")]
    camera_ids: Vec<String>,
}

/// What a utility accepts on its command line
#[derive(Debug, Clone, Copy)]
pub struct UsageSpec {
    pub program: &'static str,
    pub allow_allocation_flag: bool,
    pub max_args: usize,
}

pub const RELAYCAM: UsageSpec = UsageSpec {
    program: "relaycam",
    allow_allocation_flag: true,
    max_args: 2,
};

pub const GRAB: UsageSpec = UsageSpec {
    program: "grab",
    allow_allocation_flag: true,
    max_args: 2,
};

pub const GRAB_BGR: UsageSpec = UsageSpec {
    program: "grab-bgr",
    allow_allocation_flag: false,
    max_args: 1,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help,
    Run {
        camera_id: Option<String>,
        allocation_mode: AllocationMode,
    },
}

/// `/h` and `/x` are accepted as spellings of `-h` and `-x`.
fn normalize(arg: String) -> String {
    match arg.as_str() {
        "/h" => "-h".into(),
        "/x" => "-x".into(),
        _ => arg,
    }
}

impl UsageSpec {
    pub fn parse<I>(&self, args: I) -> Result<Invocation, UsageError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).map(normalize).collect();

        if args.iter().any(|arg| arg == "-h") {
            return Ok(Invocation::Help);
        }
        if args.len() > self.max_args {
            return Err(UsageError::TooManyArguments);
        }

        let parsed = UtilityArgs::try_parse_from(
            std::iter::once(self.program.to_string()).chain(args),
        )
        .map_err(|e| UsageError::from_clap(&e))?;

        if parsed.alloc_and_announce && !self.allow_allocation_flag {
            return Err(UsageError::UnknownOption("-x".into()));
        }

        let allocation_mode = if parsed.alloc_and_announce {
            AllocationMode::AllocAndAnnounceFrame
        } else {
            AllocationMode::AnnounceFrame
        };
        Ok(Invocation::Run {
            camera_id: parsed.camera_ids.into_iter().find(|id| !id.is_empty()),
            allocation_mode,
        })
    }

    pub fn usage(&self) -> String {
        let mut text = String::from("Usage:\n");
        if self.allow_allocation_flag {
            let _ = writeln!(text, "    {} [/x] [-x] [camera_id]", self.program);
        } else {
            let _ = writeln!(text, "    {} [camera_id]", self.program);
        }
        let _ = writeln!(text, "    {} [/h] [-h]", self.program);
        text.push_str("\nParameters:\n");
        if self.allow_allocation_flag {
            text.push_str("    /x, -x      If set, use AllocAndAnnounce mode of buffer allocation\n");
        }
        text.push_str(
            "    camera_id   ID of the camera to use (using first camera if not specified)\n",
        );
        text
    }

    pub fn print_usage(&self) {
        println!("{}", self.usage());
    }

    /// Report a usage error with the usage text; returns the usage exit code.
    pub fn abort(&self, error: &UsageError) -> ExitCode {
        println!("{}\n", error);
        self.print_usage();
        ExitCode::from(EXIT_USAGE)
    }
}

/// Print `reason` and return `code`, for failures past argument parsing.
pub fn abort(reason: impl std::fmt::Display, code: u8) -> ExitCode {
    println!("{}\n", reason);
    ExitCode::from(code)
}

/// Inference worker process, spawned by `relaycam`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "relaycam-worker", version, about)]
pub struct WorkerArgs {
    /// Path of the frame relay created by `relaycam`.
    #[arg(long)]
    pub relay: PathBuf,
    /// YOLOv8 ONNX model to run.
    #[arg(long)]
    pub model: PathBuf,
    /// Open a preview window.
    #[arg(long, default_value_t = false)]
    pub show: bool,
}
