//! FFI type definitions for the C API.

use std::ffi::CString;

use crate::vm::{BytecodeBuffer, ErrorKind, ExecutionResult, Vm, VmError};

/// Result codes for FFI operations.
///
/// One code per [`ErrorKind`], plus `ErrorInvalidArg` for bad arguments
/// at the boundary itself (null VM pointer and the like).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcvmResult {
    /// Execution completed normally
    Ok = 0,
    ErrorStackOverflow = 1,
    ErrorStackUnderflow = 2,
    ErrorFrameUnderflow = 3,
    ErrorCallDepthExceeded = 4,
    ErrorInvalidOpcode = 5,
    ErrorTruncatedOperand = 6,
    ErrorOffsetOutOfRange = 7,
    ErrorInvalidHeapHandle = 8,
    ErrorFieldOutOfRange = 9,
    ErrorTypeMismatch = 10,
    ErrorDivisionByZero = 11,
    ErrorOutOfMemory = 12,
    ErrorInvalidLocal = 13,
    ErrorAlreadyHalted = 14,
    ErrorDestroyed = 15,
    ErrorBudgetExhausted = 16,
    ErrorEmptyBytecode = 17,
    ErrorInvalidConfig = 18,
    /// Invalid argument passed to function
    ErrorInvalidArg = 19,
}

impl BcvmResult {
    pub fn is_ok(self) -> bool {
        self == BcvmResult::Ok
    }

    pub fn is_err(self) -> bool {
        self != BcvmResult::Ok
    }
}

impl From<ErrorKind> for BcvmResult {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::StackOverflow => BcvmResult::ErrorStackOverflow,
            ErrorKind::StackUnderflow => BcvmResult::ErrorStackUnderflow,
            ErrorKind::FrameUnderflow => BcvmResult::ErrorFrameUnderflow,
            ErrorKind::CallDepthExceeded => BcvmResult::ErrorCallDepthExceeded,
            ErrorKind::InvalidOpcode => BcvmResult::ErrorInvalidOpcode,
            ErrorKind::TruncatedOperand => BcvmResult::ErrorTruncatedOperand,
            ErrorKind::OffsetOutOfRange => BcvmResult::ErrorOffsetOutOfRange,
            ErrorKind::InvalidHeapHandle => BcvmResult::ErrorInvalidHeapHandle,
            ErrorKind::FieldOutOfRange => BcvmResult::ErrorFieldOutOfRange,
            ErrorKind::TypeMismatch => BcvmResult::ErrorTypeMismatch,
            ErrorKind::DivisionByZero => BcvmResult::ErrorDivisionByZero,
            ErrorKind::OutOfMemory => BcvmResult::ErrorOutOfMemory,
            ErrorKind::InvalidLocal => BcvmResult::ErrorInvalidLocal,
            ErrorKind::AlreadyHalted => BcvmResult::ErrorAlreadyHalted,
            ErrorKind::Destroyed => BcvmResult::ErrorDestroyed,
            ErrorKind::BudgetExhausted => BcvmResult::ErrorBudgetExhausted,
            ErrorKind::EmptyBytecode => BcvmResult::ErrorEmptyBytecode,
            ErrorKind::InvalidConfig => BcvmResult::ErrorInvalidConfig,
        }
    }
}

impl From<&ExecutionResult> for BcvmResult {
    fn from(result: &ExecutionResult) -> Self {
        match result {
            ExecutionResult::Completed => BcvmResult::Ok,
            ExecutionResult::Error { error, .. } => error.kind().into(),
        }
    }
}

/// Opaque VM instance type.
///
/// All operations require a valid `BcvmVm` pointer created by
/// `bcvm_vm_create()` or `bcvm_vm_create_with_limits()`.
#[repr(C)]
pub struct BcvmVm {
    _private: [u8; 0],
}

/// Internal wrapper that holds the Rust VM and FFI-side error state.
///
/// The bytecode is borrowed from the host for `'static`; the C contract
/// requires the buffer to outlive the VM.
pub(crate) struct VmWrapper {
    pub vm: Vm<BytecodeBuffer<'static>>,
    /// Last error message (as CString for FFI compatibility)
    pub last_error: Option<CString>,
    /// Offset of the instruction that raised the last error
    pub last_error_ip: Option<usize>,
}

impl VmWrapper {
    pub fn new(vm: Vm<BytecodeBuffer<'static>>) -> Self {
        Self {
            vm,
            last_error: None,
            last_error_ip: None,
        }
    }

    /// Record an error raised at `ip`.
    pub fn set_error(&mut self, error: &VmError, ip: usize) {
        // Display output never contains NUL bytes.
        self.last_error = CString::new(error.to_string()).ok();
        self.last_error_ip = Some(ip);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.last_error_ip = None;
    }
}
