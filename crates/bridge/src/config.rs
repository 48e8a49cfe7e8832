//! Engine options.
//!
//! Options are carried inside [`UserConfig`](crate::engine::UserConfig) to the engine. The
//! adapter never interprets them; it only guarantees they arrive unchanged. They can be
//! supplied from JSON so hosts can keep them next to the rest of their configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default option values.
mod defaults {
    /// Fast dispatch through the engine's block lookup table is on unless disabled.
    pub const ENABLE_FAST_DISPATCH: bool = true;

    /// Guest memory is little-endian regardless of the CPSR E bit.
    pub const ALWAYS_LITTLE_ENDIAN: bool = true;
}

/// Tunables forwarded to the engine at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Allow the engine to jump between compiled blocks without returning to its dispatcher.
    pub enable_fast_dispatch: bool,

    /// Report hint instructions (YIELD, WFE, WFI, SEV) through `exception_raised`.
    pub hook_hint_instructions: bool,

    /// Give UNPREDICTABLE encodings a defined behaviour instead of raising
    /// `UnpredictableInstruction`.
    pub define_unpredictable_behaviour: bool,

    /// Check the halt flag after every memory access rather than only at block boundaries.
    pub check_halt_on_memory_access: bool,

    /// Treat guest memory as little-endian regardless of the CPSR E bit.
    pub always_little_endian: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enable_fast_dispatch: defaults::ENABLE_FAST_DISPATCH,
            hook_hint_instructions: false,
            define_unpredictable_behaviour: false,
            check_halt_on_memory_access: false,
            always_little_endian: defaults::ALWAYS_LITTLE_ENDIAN,
        }
    }
}

impl Options {
    /// Parses options from a JSON object. Missing keys take their default value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`](crate::Error::InvalidOptions) when the input is not
    /// a JSON object of the expected shape.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
