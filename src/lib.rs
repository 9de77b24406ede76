//! bcvm - execution core of a stack-based bytecode virtual machine
//!
//! This library provides the value model, operand stack, managed heap,
//! bytecode decoder, call frames and the run loop. For C/C++ embedding, use
//! the FFI module functions.

pub mod config;
pub mod ffi;
pub mod vm;

// Re-export commonly used types
pub use config::{ConfigError, RuntimeConfig};
pub use vm::{ExecutionResult, ExecutionStats, Instruction, RunOutcome, Value, Vm, VmError, VmState};

// Re-export FFI types for C bindings
pub use ffi::*;
