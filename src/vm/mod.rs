mod bytecode;
mod error;
mod frame;
mod heap;
mod ops;
mod stack;
mod value;
mod vm;

pub use bytecode::{BytecodeBuffer, InstructionSource, decode, disassemble, encode};
pub use error::{ErrorKind, VmError, VmResult};
pub use frame::{CallFrame, FrameStack};
pub use heap::{FIELD_BYTES, Heap, HeapHandle, HeapObject, OBJECT_HEADER_BYTES, ObjectHeap, ObjectKind};
pub use ops::{Instruction, Opcode};
pub use stack::{BoundedStack, OperandStack};
pub use value::Value;
pub use vm::{ExecutionResult, ExecutionStats, Halt, RunOutcome, Vm, VmState};
