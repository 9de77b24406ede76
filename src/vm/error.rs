//! Error taxonomy for the execution core.
//!
//! Every fallible operation in the VM returns a [`VmError`]. Nothing in the
//! core panics on malformed bytecode; the first error raised while executing
//! an instruction halts the loop and is reported together with the `ip` of
//! the failing instruction.

use thiserror::Error;

use super::heap::HeapHandle;

/// Result alias used throughout the VM.
pub type VmResult<T> = std::result::Result<T, VmError>;

/// Errors raised by the stack, heap, decoder, frame stack and run loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// A push would exceed the configured maximum stack depth.
    #[error("stack overflow: depth limit {max} reached")]
    StackOverflow { max: usize },

    /// A pop or peek went past depth 0 or below the current frame's floor.
    #[error("stack underflow")]
    StackUnderflow,

    /// `ret` executed with no caller frame to return to.
    #[error("frame underflow: return from the root frame")]
    FrameUnderflow,

    /// A call would exceed the configured maximum call depth.
    #[error("call depth exceeded: limit {max}")]
    CallDepthExceeded { max: usize },

    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),

    /// The immediate operand of the instruction at `offset` runs past the end
    /// of the buffer.
    #[error("truncated operand for opcode 0x{opcode:02x} at offset {offset}")]
    TruncatedOperand { opcode: u8, offset: usize },

    /// An instruction pointer or control-transfer target lies outside the buffer.
    #[error("offset {offset} out of range (bytecode size {len})")]
    OffsetOutOfRange { offset: usize, len: usize },

    /// The handle does not name a live heap object (freed, stale or forged).
    #[error("invalid heap handle {0}")]
    InvalidHeapHandle(HeapHandle),

    #[error("field {field} out of range (object has {len})")]
    FieldOutOfRange { field: usize, len: usize },

    #[error("type mismatch in {op}: found {found}")]
    TypeMismatch {
        op: &'static str,
        found: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    /// An allocation would push the heap past its byte budget.
    #[error("out of memory: {requested} bytes requested, budget {budget}")]
    OutOfMemory { requested: usize, budget: usize },

    #[error("local {index} outside frame window of {window}")]
    InvalidLocal { index: usize, window: usize },

    /// `run` was invoked on a VM that already reached a terminal state.
    #[error("vm already halted")]
    AlreadyHalted,

    #[error("vm destroyed")]
    Destroyed,

    /// The configured instruction budget ran out before the program halted.
    #[error("instruction budget of {budget} exhausted")]
    BudgetExhausted { budget: u64 },

    #[error("bytecode is empty")]
    EmptyBytecode,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Field-less discriminant of [`VmError`], used for FFI result codes and
/// cheap comparisons in host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StackOverflow,
    StackUnderflow,
    FrameUnderflow,
    CallDepthExceeded,
    InvalidOpcode,
    TruncatedOperand,
    OffsetOutOfRange,
    InvalidHeapHandle,
    FieldOutOfRange,
    TypeMismatch,
    DivisionByZero,
    OutOfMemory,
    InvalidLocal,
    AlreadyHalted,
    Destroyed,
    BudgetExhausted,
    EmptyBytecode,
    InvalidConfig,
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::StackOverflow { .. } => ErrorKind::StackOverflow,
            VmError::StackUnderflow => ErrorKind::StackUnderflow,
            VmError::FrameUnderflow => ErrorKind::FrameUnderflow,
            VmError::CallDepthExceeded { .. } => ErrorKind::CallDepthExceeded,
            VmError::InvalidOpcode(_) => ErrorKind::InvalidOpcode,
            VmError::TruncatedOperand { .. } => ErrorKind::TruncatedOperand,
            VmError::OffsetOutOfRange { .. } => ErrorKind::OffsetOutOfRange,
            VmError::InvalidHeapHandle(_) => ErrorKind::InvalidHeapHandle,
            VmError::FieldOutOfRange { .. } => ErrorKind::FieldOutOfRange,
            VmError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            VmError::DivisionByZero => ErrorKind::DivisionByZero,
            VmError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            VmError::InvalidLocal { .. } => ErrorKind::InvalidLocal,
            VmError::AlreadyHalted => ErrorKind::AlreadyHalted,
            VmError::Destroyed => ErrorKind::Destroyed,
            VmError::BudgetExhausted { .. } => ErrorKind::BudgetExhausted,
            VmError::EmptyBytecode => ErrorKind::EmptyBytecode,
            VmError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}
