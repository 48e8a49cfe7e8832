//! Error types and the fatal path.
//!
//! The adapter distinguishes two tiers of failure:
//! 1. **Fatal:** conditions with no recovery strategy (interpreter fallback requests,
//!    engine construction failure at the C boundary, reentrant `run`). These log at
//!    `error` level and abort the process through [`fatal`].
//! 2. **Caller-modeled:** read-only memory, raised exceptions and unsupported coprocessor
//!    operations. These are ordinary return values and tags and never become an [`Error`].
//!
//! [`Error`] is only produced by the Rust-facing API, where construction and option parsing
//! can be reported instead of aborting.

use std::fmt;

use thiserror::Error;

/// Errors reported by the Rust-facing wrapper API.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine constructor rejected the assembled configuration.
    #[error(transparent)]
    EngineConstruction(#[from] EngineError),

    /// `run` was entered while the same wrapper was already running.
    ///
    /// Callbacks execute nested inside `run`; only `halt` may re-enter the wrapper.
    #[error("run() re-entered while the engine is already running")]
    AlreadyRunning,

    /// A coprocessor table was given a slot outside 0-15.
    #[error("coprocessor slot {0} is out of range (0-15)")]
    InvalidCoprocessorSlot(usize),

    /// Engine options could not be parsed from JSON.
    #[error("invalid engine options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an engine implementation while it is being constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine construction failed: {message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Creates an engine error carrying a human-readable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the reason supplied by the engine.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Reason for taking the fatal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    /// The engine asked for an interpreter fallback; none exists in this adapter.
    InterpreterFallback {
        /// Guest program counter of the first untranslatable instruction.
        pc: u32,
        /// Number of instructions the engine wanted interpreted.
        num_instructions: usize,
    },
    /// A callback fired before the wrapper handle was bound into the bridge.
    UnboundHandle,
    /// The native engine could not be constructed behind the C constructor.
    ConstructionFailed,
    /// `run` was re-entered from inside a callback through the C surface.
    ReentrantRun,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterpreterFallback {
                pc,
                num_instructions,
            } => write!(
                f,
                "interpreter fallback requested at {pc:#010x} for {num_instructions} instruction(s)"
            ),
            Self::UnboundHandle => {
                write!(f, "callback invoked before the wrapper handle was bound")
            }
            Self::ConstructionFailed => write!(f, "engine construction failed"),
            Self::ReentrantRun => write!(f, "run() re-entered from a callback"),
        }
    }
}

/// Logs `reason` at `error` level and aborts the process. Never unwinds.
#[cold]
#[inline(never)]
pub fn fatal(reason: Fatal) -> ! {
    tracing::error!(%reason, "fatal bridge condition, aborting");
    std::process::abort()
}
