//! C-ABI adapter for an ARM A32 dynamic recompiler.
//!
//! This crate lets a foreign caller drive a recompiling engine through flat tables of
//! function pointers and an opaque handle:
//! 1. **Wire encodings:** `#[repr(C)]` tagged unions for optional and three-way results.
//! 2. **Engine contract:** the callback traits, native result types and lifecycle trait the
//!    engine exposes.
//! 3. **Bridges:** forwarding of memory, trap and tick callbacks and of coprocessor compile
//!    requests from the engine to the caller's tables.
//! 4. **Wrapper:** two-phase construction, run/halt and register access, plus the C surface.
//! 5. **Host helpers:** trampolines that let Rust callers implement the tables as traits.

/// Memory, trap and tick callback table and its bridge.
pub mod callbacks;
/// Engine tunables (defaults, JSON loading).
pub mod config;
/// Coprocessor callback table and its bridge.
pub mod coprocessor;
/// Engine-side contract (callback traits, native results, lifecycle).
pub mod engine;
/// Recoverable errors and the fatal path.
pub mod error;
/// Exported `extern "C"` functions and the constructor macro.
pub mod ffi;
/// Trait-based trampolines for Rust callers.
pub mod host;
/// Tagged wire encodings.
pub mod tagged;
/// Wrapper lifecycle and the opaque handle.
pub mod wrapper;

/// Flat memory/trap callback table filled in by the caller.
pub use crate::callbacks::Callbacks;
/// Engine tunables; use `Options::default()` or load from JSON.
pub use crate::config::Options;
/// Flat per-slot coprocessor table filled in by the caller.
pub use crate::coprocessor::CoprocessorCallbacks;
/// Engine-side types consumed by engine implementations.
pub use crate::engine::{Engine, Exception, UserConfig};
/// Error types.
pub use crate::error::{EngineError, Error, Result};
/// Rust-side helpers for implementing the tables.
pub use crate::host::{CallbackHandler, HostCallbacks, HostCoprocessor, Primitive};
/// Wire encodings returned from coprocessor compile calls.
pub use crate::tagged::{FfiCallback, FfiCallbackOrAccess, FfiOption, RawCallback};
/// Wrapper, handle and owning pointer.
pub use crate::wrapper::{Jit, JitBuilder, JitWrapper, OwnedWrapper, RunState};
