//! Runtime configuration types.
//!
//! A [`RuntimeConfig`] fixes the resource limits of one VM instance. It can be
//! built in code or loaded from a TOML document; missing keys fall back to
//! the defaults.
//!
//! ```toml
//! max_stack_depth = 4096
//! max_call_depth = 128
//! heap_budget = 1048576
//! instruction_budget = 1000000
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vm::VmError;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] VmError),
}

/// Runtime configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum operand-stack depth
    pub max_stack_depth: usize,
    /// Maximum number of nested calls
    pub max_call_depth: usize,
    /// Heap budget in bytes
    pub heap_budget: usize,
    /// Locals available to every frame
    pub locals_per_frame: usize,
    /// Halt with `BudgetExhausted` after this many instructions (None = unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_budget: Option<u64>,
    /// Count executed instructions per opcode
    pub profile_opcodes: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 1024,
            max_call_depth: 256,
            heap_budget: 16 * 1024 * 1024,
            locals_per_frame: 16,
            instruction_budget: None,
            profile_opcodes: false,
        }
    }
}

impl RuntimeConfig {
    /// Configuration with explicit stack, call and heap limits; everything
    /// else defaulted.
    pub fn with_limits(max_stack_depth: usize, max_call_depth: usize, heap_budget: usize) -> Self {
        Self {
            max_stack_depth,
            max_call_depth,
            heap_budget,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), VmError> {
        if self.max_stack_depth == 0 {
            return Err(VmError::InvalidConfig("max_stack_depth must be positive"));
        }
        if self.max_call_depth == 0 {
            return Err(VmError::InvalidConfig("max_call_depth must be positive"));
        }
        if self.locals_per_frame > usize::from(u8::MAX) + 1 {
            return Err(VmError::InvalidConfig(
                "locals_per_frame exceeds the addressable 256 locals",
            ));
        }
        Ok(())
    }
}
