//! Tagged wire encodings shared with foreign callers.
//!
//! Every optional or multi-way result that crosses the boundary is a `#[repr(C)]` enum:
//! a C `int` discriminant followed by a union of the per-variant payloads. The C
//! equivalent of [`FfiCallbackOrAccess<T>`] is:
//!
//! ```c
//! struct {
//!     enum { None = 0, Callback = 1, Access = 2 } tag;
//!     union { RawCallback callback; T access; } payload;
//! };
//! ```
//!
//! Decoding always matches on the discriminant first, so an inactive payload member is
//! never read. The two-word access payload (`[*mut u32; 2]`) has the same size as a
//! [`RawCallback`]; only the tag tells them apart.

use std::ffi::c_void;

use crate::engine::{Callback, CallbackOrAccess, RawCallbackFn};
use crate::wrapper::Jit;

/// Discriminant values of [`FfiOption`] and [`FfiCallback`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionTag {
    /// No payload.
    None = 0,
    /// Payload present.
    Some = 1,
}

/// Discriminant values of [`FfiCallbackOrAccess`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessTag {
    /// Operation unsupported; no payload.
    None = 0,
    /// Payload is a [`RawCallback`].
    Callback = 1,
    /// Payload is one or two raw word locations.
    Access = 2,
}

/// Presence flag plus payload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FfiOption<T> {
    /// Absent.
    None,
    /// Present.
    Some(T),
}

impl<T> FfiOption<T> {
    /// Returns the discriminant.
    pub const fn tag(&self) -> OptionTag {
        match self {
            Self::None => OptionTag::None,
            Self::Some(_) => OptionTag::Some,
        }
    }

    /// Converts into a Rust [`Option`].
    pub fn into_option(self) -> Option<T> {
        self.into()
    }
}

impl<T> From<Option<T>> for FfiOption<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Some(v),
            None => Self::None,
        }
    }
}

impl<T> From<FfiOption<T>> for Option<T> {
    fn from(value: FfiOption<T>) -> Self {
        match value {
            FfiOption::Some(v) => Some(v),
            FfiOption::None => None,
        }
    }
}

/// A (function, user argument) pair supplied by the caller for deferred execution.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RawCallback {
    /// Function invoked when the compiled instruction executes.
    pub function: RawCallbackFn,
    /// Passed back to `function` unchanged.
    pub user_arg: *mut c_void,
}

impl RawCallback {
    /// Pairs a function with its user argument.
    pub const fn new(function: RawCallbackFn, user_arg: *mut c_void) -> Self {
        Self { function, user_arg }
    }

    /// Binds the callback to the wrapper handle that will be passed at execution time.
    pub const fn bind(self, jit: *mut Jit) -> Callback {
        Callback {
            function: self.function,
            user_arg: self.user_arg,
            jit,
        }
    }
}

/// Optional deferred callback: `None` means the operation is unsupported.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub enum FfiCallback {
    /// Unsupported.
    None,
    /// Invoke this callback at execution time.
    Some(RawCallback),
}

impl FfiCallback {
    /// Returns the discriminant.
    pub const fn tag(&self) -> OptionTag {
        match self {
            Self::None => OptionTag::None,
            Self::Some(_) => OptionTag::Some,
        }
    }

    /// Decodes into the engine form, binding any callback to `jit`.
    pub const fn decode(self, jit: *mut Jit) -> Option<Callback> {
        match self {
            Self::None => None,
            Self::Some(raw) => Some(raw.bind(jit)),
        }
    }
}

impl From<Option<RawCallback>> for FfiCallback {
    fn from(value: Option<RawCallback>) -> Self {
        match value {
            Some(raw) => Self::Some(raw),
            None => Self::None,
        }
    }
}

/// Three-way coprocessor transfer result.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub enum FfiCallbackOrAccess<T> {
    /// Unsupported.
    None,
    /// Invoke this callback at execution time.
    Callback(RawCallback),
    /// Let the engine access these host locations directly.
    Access(T),
}

impl<T> FfiCallbackOrAccess<T> {
    /// Returns the discriminant.
    pub const fn tag(&self) -> AccessTag {
        match self {
            Self::None => AccessTag::None,
            Self::Callback(_) => AccessTag::Callback,
            Self::Access(_) => AccessTag::Access,
        }
    }

    /// Decodes into the engine form, binding any callback to `jit`.
    ///
    /// The variant chosen by the caller is preserved as-is.
    pub fn decode(self, jit: *mut Jit) -> CallbackOrAccess<T> {
        match self {
            Self::None => CallbackOrAccess::Unsupported,
            Self::Callback(raw) => CallbackOrAccess::Callback(raw.bind(jit)),
            Self::Access(access) => CallbackOrAccess::Access(access),
        }
    }
}

/// Single-word transfer result (MCR/MRC).
pub type FfiCallbackOrAccessOneWord = FfiCallbackOrAccess<*mut u32>;

/// Two-word transfer result (MCRR/MRRC); the pair is (low word, high word).
pub type FfiCallbackOrAccessTwoWords = FfiCallbackOrAccess<[*mut u32; 2]>;
