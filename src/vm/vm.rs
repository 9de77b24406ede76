use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeConfig;
use crate::vm::bytecode::{BytecodeBuffer, InstructionSource};
use crate::vm::error::{VmError, VmResult};
use crate::vm::frame::{CallFrame, FrameStack};
use crate::vm::heap::{Heap, HeapHandle, ObjectHeap, ObjectKind};
use crate::vm::ops::Instruction;
use crate::vm::stack::{BoundedStack, OperandStack};
use crate::vm::Value;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// HALT executed, or execution fell off the end of the code.
    Normal,
    /// An instruction failed; `ip` is the offset of that instruction.
    Error { error: VmError, ip: usize },
}

/// Lifecycle state of a VM.
///
/// `Ready --run--> Running --…--> Halted`. `Running` is only observable
/// between budgeted slices (see [`Vm::run_for`]); `Halted` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum VmState {
    Ready,
    Running,
    Halted(Halt),
    Destroyed,
}

/// Result reported to the caller of [`Vm::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Completed,
    Error { error: VmError, ip: usize },
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionResult::Completed)
    }

    pub fn error(&self) -> Option<&VmError> {
        match self {
            ExecutionResult::Completed => None,
            ExecutionResult::Error { error, .. } => Some(error),
        }
    }
}

/// Result of a budgeted slice of execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The slice's fuel ran out; the VM can be resumed.
    Yielded,
    Finished(ExecutionResult),
}

/// Counters maintained while the VM executes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub instructions: u64,
    pub max_stack_depth: usize,
    pub max_call_depth: usize,
    pub heap_objects_live: usize,
    pub heap_bytes_live: usize,
    /// Executed instructions per mnemonic; empty unless profiling is on.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub opcode_counts: BTreeMap<&'static str, u64>,
}

impl ExecutionStats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What the dispatcher wants the loop to do next.
enum Control {
    Next,
    Jump(usize),
    Halt,
}

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "ADD",
            ArithOp::Sub => "SUB",
            ArithOp::Mul => "MUL",
            ArithOp::Div => "DIV",
            ArithOp::Mod => "MOD",
        }
    }
}

#[derive(Clone, Copy)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn name(self) -> &'static str {
        match self {
            CmpOp::Lt => "LT",
            CmpOp::Le => "LE",
            CmpOp::Gt => "GT",
            CmpOp::Ge => "GE",
        }
    }
}

/// The bcvm virtual machine.
///
/// Generic over its instruction source, operand stack and heap so alternate
/// backings can be swapped without touching the dispatch loop. The default
/// parameters are the bounds-checked implementations.
pub struct Vm<C, S = BoundedStack, H = Heap> {
    code: C,
    stack: S,
    heap: H,
    frames: FrameStack,
    ip: usize,
    state: VmState,
    config: RuntimeConfig,
    stats: ExecutionStats,
}

impl<'a> Vm<BytecodeBuffer<'a>> {
    /// Create a VM over borrowed bytecode with the default stack and heap.
    pub fn new(bytecode: &'a [u8], config: RuntimeConfig) -> VmResult<Self> {
        let stack = BoundedStack::new(config.max_stack_depth);
        let heap = Heap::new(config.heap_budget);
        Self::with_parts(BytecodeBuffer::new(bytecode), stack, heap, config)
    }

    /// Create a VM with explicit stack, call and heap limits.
    pub fn create(
        bytecode: &'a [u8],
        max_stack_depth: usize,
        max_call_depth: usize,
        heap_budget: usize,
    ) -> VmResult<Self> {
        Self::new(
            bytecode,
            RuntimeConfig::with_limits(max_stack_depth, max_call_depth, heap_budget),
        )
    }
}

impl<C: InstructionSource, S: OperandStack, H: ObjectHeap> Vm<C, S, H> {
    /// Assemble a VM from caller-supplied components.
    ///
    /// The stack depth and heap budget come from `stack` and `heap`; the
    /// matching fields of `config` are overwritten so `config()` reports the
    /// limits actually enforced.
    pub fn with_parts(code: C, stack: S, heap: H, mut config: RuntimeConfig) -> VmResult<Self> {
        config.max_stack_depth = stack.max_depth();
        config.heap_budget = heap.budget();
        config.validate()?;
        if code.is_empty() {
            return Err(VmError::EmptyBytecode);
        }

        info!(
            code_len = code.len(),
            max_stack_depth = config.max_stack_depth,
            max_call_depth = config.max_call_depth,
            heap_budget = config.heap_budget,
            "vm created"
        );

        Ok(Self {
            frames: FrameStack::new(config.max_call_depth, config.locals_per_frame),
            code,
            stack,
            heap,
            ip: 0,
            state: VmState::Ready,
            config,
            stats: ExecutionStats::default(),
        })
    }

    pub fn state(&self) -> &VmState {
        &self.state
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// Top of the operand stack, if any.
    pub fn top(&self) -> Option<Value> {
        self.stack.top().copied()
    }

    /// Snapshot of the execution counters, including current heap usage.
    pub fn stats(&self) -> ExecutionStats {
        let mut stats = self.stats.clone();
        stats.heap_objects_live = self.heap.live_objects();
        stats.heap_bytes_live = self.heap.bytes_in_use();
        stats
    }

    /// Run until the VM halts.
    ///
    /// Calling `run` on a halted VM reports `AlreadyHalted` and leaves the
    /// recorded terminal state untouched.
    pub fn run(&mut self) -> ExecutionResult {
        loop {
            if let RunOutcome::Finished(result) = self.execute(None) {
                return result;
            }
        }
    }

    /// Execute at most `fuel` instructions.
    ///
    /// This is the host's cancellation point: between slices the VM sits in
    /// `Running` and can be resumed with another `run_for` or `run`.
    pub fn run_for(&mut self, fuel: u64) -> RunOutcome {
        self.execute(Some(fuel))
    }

    /// Execute a single instruction.
    pub fn step(&mut self) -> RunOutcome {
        self.execute(Some(1))
    }

    /// Release heap objects, stack and frame storage.
    ///
    /// Idempotent: destroying an already destroyed VM does nothing. Any
    /// later `run` reports `Destroyed`.
    pub fn destroy(&mut self) {
        if self.state == VmState::Destroyed {
            return;
        }
        self.heap.clear();
        self.stack.release();
        self.frames.release();
        self.state = VmState::Destroyed;
        info!(instructions = self.stats.instructions, "vm destroyed");
    }

    fn execute(&mut self, fuel: Option<u64>) -> RunOutcome {
        match self.state {
            VmState::Ready => {
                self.state = VmState::Running;
                debug!(ip = self.ip, "vm started");
            }
            VmState::Running => {}
            VmState::Halted(_) => {
                return RunOutcome::Finished(ExecutionResult::Error {
                    error: VmError::AlreadyHalted,
                    ip: self.ip,
                });
            }
            VmState::Destroyed => {
                return RunOutcome::Finished(ExecutionResult::Error {
                    error: VmError::Destroyed,
                    ip: self.ip,
                });
            }
        }

        let mut remaining = fuel;
        loop {
            if let Some(budget) = self.config.instruction_budget
                && self.stats.instructions >= budget
            {
                warn!(budget, ip = self.ip, "instruction budget exhausted");
                let ip = self.ip;
                return RunOutcome::Finished(self.halt_with_error(
                    VmError::BudgetExhausted { budget },
                    ip,
                ));
            }
            if let Some(left) = remaining.as_mut() {
                if *left == 0 {
                    return RunOutcome::Yielded;
                }
                *left -= 1;
            }

            let at = self.ip;
            match self.cycle(at) {
                Ok(true) => {}
                Ok(false) => return RunOutcome::Finished(self.halt_normal()),
                Err(error) => return RunOutcome::Finished(self.halt_with_error(error, at)),
            }
        }
    }

    /// One fetch-decode-execute cycle. Returns whether execution continues.
    ///
    /// `ip` only moves once the instruction succeeded, so on error it still
    /// names the failing instruction.
    #[inline]
    fn cycle(&mut self, at: usize) -> VmResult<bool> {
        let (instr, next) = self.code.decode_at(at)?;
        trace!(ip = at, %instr, depth = self.stack.depth(), "dispatch");

        let control = self.dispatch(instr, next)?;
        self.record(&instr);

        match control {
            Control::Next => self.ip = next,
            Control::Jump(target) => self.ip = target,
            Control::Halt => {
                self.ip = next;
                return Ok(false);
            }
        }
        // Running off the end of the code is an implicit HALT.
        Ok(self.ip < self.code.len())
    }

    fn record(&mut self, instr: &Instruction) {
        self.stats.instructions += 1;
        self.stats.max_stack_depth = self.stats.max_stack_depth.max(self.stack.depth());
        self.stats.max_call_depth = self.stats.max_call_depth.max(self.frames.call_depth());
        if self.config.profile_opcodes {
            *self.stats.opcode_counts.entry(instr.name()).or_insert(0) += 1;
        }
    }

    fn halt_normal(&mut self) -> ExecutionResult {
        self.state = VmState::Halted(Halt::Normal);
        debug!(
            ip = self.ip,
            instructions = self.stats.instructions,
            "vm halted"
        );
        ExecutionResult::Completed
    }

    fn halt_with_error(&mut self, error: VmError, ip: usize) -> ExecutionResult {
        self.ip = ip;
        self.state = VmState::Halted(Halt::Error {
            error: error.clone(),
            ip,
        });
        debug!(%error, ip, instructions = self.stats.instructions, "vm halted with error");
        ExecutionResult::Error { error, ip }
    }

    /// Execute one decoded instruction.
    ///
    /// Every arm validates its operands before mutating the stack or heap,
    /// so a failing instruction leaves no partial effects behind.
    fn dispatch(&mut self, instr: Instruction, next: usize) -> VmResult<Control> {
        use Instruction as I;

        match instr {
            I::Nop => {}
            I::Halt => return Ok(Control::Halt),

            // Constants
            I::Push(v) => self.stack.push(Value::Int(v as i64))?,
            I::PushLong(v) => self.stack.push(Value::Int(v))?,
            I::PushFloat(v) => self.stack.push(Value::Float(v))?,
            I::PushNull => self.stack.push(Value::Null)?,

            // Stack manipulation
            I::Pop => {
                self.stack.pop()?;
            }
            I::Dup => {
                let v = *self.stack.peek(0)?;
                self.stack.push(v)?;
            }
            I::Swap => {
                let b = *self.stack.peek(0)?;
                let a = *self.stack.peek(1)?;
                self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push(b)?;
                self.stack.push(a)?;
            }
            I::Pick(depth) => {
                let v = *self.stack.peek(depth as usize)?;
                self.stack.push(v)?;
            }

            // Arithmetic
            I::Add => self.binary(|a, b| arith(ArithOp::Add, a, b))?,
            I::Sub => self.binary(|a, b| arith(ArithOp::Sub, a, b))?,
            I::Mul => self.binary(|a, b| arith(ArithOp::Mul, a, b))?,
            I::Div => self.binary(|a, b| arith(ArithOp::Div, a, b))?,
            I::Mod => self.binary(|a, b| arith(ArithOp::Mod, a, b))?,
            I::Neg => self.unary(|v| match v {
                Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(mismatch("NEG", other)),
            })?,
            I::And => self.binary(|a, b| bitwise("AND", a, b, |x, y| x & y))?,
            I::Or => self.binary(|a, b| bitwise("OR", a, b, |x, y| x | y))?,
            I::Xor => self.binary(|a, b| bitwise("XOR", a, b, |x, y| x ^ y))?,
            I::Shl => self.binary(|a, b| bitwise("SHL", a, b, |x, y| x.wrapping_shl((y & 63) as u32)))?,
            I::Shr => self.binary(|a, b| bitwise("SHR", a, b, |x, y| x.wrapping_shr((y & 63) as u32)))?,

            // Comparison
            I::Eq => self.binary(|a, b| Ok(bool_value(a.eq(&b))))?,
            I::Ne => self.binary(|a, b| Ok(bool_value(!a.eq(&b))))?,
            I::Lt => self.binary(|a, b| compare(CmpOp::Lt, a, b))?,
            I::Le => self.binary(|a, b| compare(CmpOp::Le, a, b))?,
            I::Gt => self.binary(|a, b| compare(CmpOp::Gt, a, b))?,
            I::Ge => self.binary(|a, b| compare(CmpOp::Ge, a, b))?,
            I::Not => self.unary(|v| Ok(bool_value(!v.is_truthy())))?,

            // Conversion
            I::IntToFloat => self.unary(|v| match v {
                Value::Int(n) => Ok(Value::Float(n as f64)),
                other => Err(mismatch("ITOF", other)),
            })?,
            // `as` saturates and maps NaN to 0.
            I::FloatToInt => self.unary(|v| match v {
                Value::Float(f) => Ok(Value::Int(f as i64)),
                other => Err(mismatch("FTOI", other)),
            })?,

            // Control transfer
            I::Jmp(target) => return Ok(Control::Jump(self.jump_target(target)?)),
            I::Jz(target) | I::Jnz(target) => {
                let truthy = self.stack.peek(0)?.is_truthy();
                let taken = if matches!(instr, I::Jz(_)) { !truthy } else { truthy };
                let destination = if taken {
                    Some(self.jump_target(target)?)
                } else {
                    None
                };
                self.stack.pop()?;
                if let Some(destination) = destination {
                    return Ok(Control::Jump(destination));
                }
            }
            I::Call { target, argc } => {
                let target = self.jump_target(target)?;
                self.frames.push_call(&mut self.stack, next, argc as usize)?;
                return Ok(Control::Jump(target));
            }
            I::Ret(count) => {
                let return_ip = self.frames.pop_call(&mut self.stack, count as usize)?;
                return Ok(Control::Jump(return_ip));
            }

            // Locals
            I::Load(index) => {
                let v = self.current_frame()?.local(index as usize)?;
                self.stack.push(v)?;
            }
            I::Store(index) => {
                let v = *self.stack.peek(0)?;
                self.current_frame_mut()?.set_local(index as usize, v)?;
                self.stack.pop()?;
            }

            // Heap
            I::New(fields) => self.allocate(ObjectKind::Record, fields as usize)?,
            I::NewBytes(len) => self.allocate(ObjectKind::Bytes, len as usize)?,
            I::GetField(field) => {
                let handle = self.handle_operand(0, "GETFIELD")?;
                let v = self.heap.read(handle, field as usize)?;
                self.stack.pop()?;
                self.stack.push(v)?;
            }
            I::SetField(field) => {
                let v = *self.stack.peek(0)?;
                let handle = self.handle_operand(1, "SETFIELD")?;
                self.heap.write(handle, field as usize, v)?;
                self.stack.pop()?;
                self.stack.pop()?;
            }
            I::GetIndex => {
                let index = self.index_operand(0, "GETINDEX")?;
                let handle = self.handle_operand(1, "GETINDEX")?;
                let v = self.heap.read(handle, index)?;
                self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push(v)?;
            }
            I::SetIndex => {
                let v = *self.stack.peek(0)?;
                let index = self.index_operand(1, "SETINDEX")?;
                let handle = self.handle_operand(2, "SETINDEX")?;
                self.heap.write(handle, index, v)?;
                self.stack.pop()?;
                self.stack.pop()?;
                self.stack.pop()?;
            }
            I::Len => {
                let handle = self.handle_operand(0, "LEN")?;
                let len = self.heap.len(handle)?;
                self.stack.pop()?;
                self.stack.push(Value::Int(len as i64))?;
            }
            I::Free => {
                let handle = self.handle_operand(0, "FREE")?;
                self.heap.free(handle)?;
                self.stack.pop()?;
            }
        }
        Ok(Control::Next)
    }

    /// Replace the top two values with `f(second, top)`.
    #[inline]
    fn binary(&mut self, f: impl FnOnce(Value, Value) -> VmResult<Value>) -> VmResult<()> {
        let b = *self.stack.peek(0)?;
        let a = *self.stack.peek(1)?;
        let result = f(a, b)?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(result)
    }

    /// Replace the top value with `f(top)`.
    #[inline]
    fn unary(&mut self, f: impl FnOnce(Value) -> VmResult<Value>) -> VmResult<()> {
        let v = *self.stack.peek(0)?;
        let result = f(v)?;
        self.stack.pop()?;
        self.stack.push(result)
    }

    fn jump_target(&self, target: u32) -> VmResult<usize> {
        let target = target as usize;
        self.code.check_offset(target)?;
        Ok(target)
    }

    fn current_frame(&self) -> VmResult<&CallFrame> {
        self.frames.current().ok_or(VmError::FrameUnderflow)
    }

    fn current_frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.frames.current_mut().ok_or(VmError::FrameUnderflow)
    }

    fn allocate(&mut self, kind: ObjectKind, size: usize) -> VmResult<()> {
        // Check for room first so a full stack cannot strand a fresh object.
        if self.stack.depth() >= self.stack.max_depth() {
            return Err(VmError::StackOverflow {
                max: self.stack.max_depth(),
            });
        }
        let handle = self.heap.allocate(kind, size)?;
        self.stack.push(Value::Ref(handle))
    }

    fn handle_operand(&self, depth: usize, op: &'static str) -> VmResult<HeapHandle> {
        match *self.stack.peek(depth)? {
            Value::Ref(handle) => Ok(handle),
            other => Err(mismatch(op, other)),
        }
    }

    /// Negative indices map to `usize::MAX` and fail the heap's range check.
    fn index_operand(&self, depth: usize, op: &'static str) -> VmResult<usize> {
        match *self.stack.peek(depth)? {
            Value::Int(n) => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
            other => Err(mismatch(op, other)),
        }
    }
}

fn mismatch(op: &'static str, found: Value) -> VmError {
    VmError::TypeMismatch {
        op,
        found: found.type_name(),
    }
}

fn bool_value(b: bool) -> Value {
    Value::Int(b as i64)
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_))
}

/// Report whichever operand is not numeric.
fn numeric_mismatch(op: &'static str, a: Value, b: Value) -> VmError {
    if is_numeric(&a) {
        mismatch(op, b)
    } else {
        mismatch(op, a)
    }
}

/// Integer arithmetic wraps; mixed operands promote to float. Division and
/// modulo by zero are errors for both representations.
fn arith(op: ArithOp, a: Value, b: Value) -> VmResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let result = match op {
                ArithOp::Add => x.wrapping_add(y),
                ArithOp::Sub => x.wrapping_sub(y),
                ArithOp::Mul => x.wrapping_mul(y),
                ArithOp::Div | ArithOp::Mod if y == 0 => return Err(VmError::DivisionByZero),
                ArithOp::Div => x.wrapping_div(y),
                ArithOp::Mod => x.wrapping_rem(y),
            };
            Ok(Value::Int(result))
        }
        _ => {
            let (Some(x), Some(y)) = (a.as_float(), b.as_float()) else {
                return Err(numeric_mismatch(op.name(), a, b));
            };
            let result = match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div | ArithOp::Mod if y == 0.0 => return Err(VmError::DivisionByZero),
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
            };
            Ok(Value::Float(result))
        }
    }
}

fn bitwise(op: &'static str, a: Value, b: Value, f: impl FnOnce(i64, i64) -> i64) -> VmResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(f(x, y))),
        (Value::Int(_), other) => Err(mismatch(op, other)),
        (other, _) => Err(mismatch(op, other)),
    }
}

fn compare(op: CmpOp, a: Value, b: Value) -> VmResult<Value> {
    let result = match (a, b) {
        (Value::Int(x), Value::Int(y)) => match op {
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
        },
        _ => {
            let (Some(x), Some(y)) = (a.as_float(), b.as_float()) else {
                return Err(numeric_mismatch(op.name(), a, b));
            };
            match op {
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
            }
        }
    };
    Ok(bool_value(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::encode;

    fn run_code(instrs: &[Instruction]) -> (ExecutionResult, Vec<Value>) {
        let code = encode(instrs);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        let result = vm.run();
        (result, vm.stack().as_slice().to_vec())
    }

    fn run_ok(instrs: &[Instruction]) -> Vec<Value> {
        let (result, stack) = run_code(instrs);
        assert_eq!(result, ExecutionResult::Completed);
        stack
    }

    /// Stack comparison that also checks each value's variant, since
    /// `Value`'s `PartialEq` treats `Int(3)` and `Float(3.0)` as equal.
    fn assert_values(actual: &[Value], expected: &[Value]) {
        let same = actual.len() == expected.len()
            && actual
                .iter()
                .zip(expected)
                .all(|(a, e)| a.type_name() == e.type_name() && a == e);
        assert!(same, "expected {:?}, got {:?}", expected, actual);
    }

    fn run_err(instrs: &[Instruction]) -> VmError {
        let (result, _) = run_code(instrs);
        match result {
            ExecutionResult::Error { error, .. } => error,
            ExecutionResult::Completed => panic!("expected an error"),
        }
    }

    #[test]
    fn test_push_variants() {
        let stack = run_ok(&[
            Instruction::Push(-1),
            Instruction::PushLong(1 << 40),
            Instruction::PushFloat(2.5),
            Instruction::PushNull,
        ]);
        assert_values(
            &stack,
            &[
                Value::Int(-1),
                Value::Int(1 << 40),
                Value::Float(2.5),
                Value::Null,
            ],
        );
    }

    #[test]
    fn test_add() {
        let stack = run_ok(&[Instruction::Push(2), Instruction::Push(3), Instruction::Add]);
        assert_values(&stack, &[Value::Int(5)]);
    }

    #[test]
    fn test_operand_order() {
        let stack = run_ok(&[Instruction::Push(10), Instruction::Push(3), Instruction::Sub]);
        assert_values(&stack, &[Value::Int(7)]);
        let stack = run_ok(&[Instruction::Push(10), Instruction::Push(3), Instruction::Mod]);
        assert_values(&stack, &[Value::Int(1)]);
        let stack = run_ok(&[Instruction::Push(2), Instruction::Push(3), Instruction::Lt]);
        assert_values(&stack, &[Value::Int(1)]);
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let stack = run_ok(&[
            Instruction::PushLong(i64::MAX),
            Instruction::Push(1),
            Instruction::Add,
        ]);
        assert_values(&stack, &[Value::Int(i64::MIN)]);

        let stack = run_ok(&[
            Instruction::PushLong(i64::MIN),
            Instruction::Push(-1),
            Instruction::Div,
        ]);
        assert_values(&stack, &[Value::Int(i64::MIN)]);

        let stack = run_ok(&[Instruction::PushLong(i64::MIN), Instruction::Neg]);
        assert_values(&stack, &[Value::Int(i64::MIN)]);
    }

    #[test]
    fn test_mixed_promotes_to_float() {
        let stack = run_ok(&[
            Instruction::Push(1),
            Instruction::PushFloat(0.5),
            Instruction::Add,
        ]);
        assert_values(&stack, &[Value::Float(1.5)]);
    }

    #[test]
    fn test_float_division_by_zero() {
        assert_eq!(
            run_err(&[
                Instruction::PushFloat(1.0),
                Instruction::PushFloat(0.0),
                Instruction::Div
            ]),
            VmError::DivisionByZero
        );
        assert_eq!(
            run_err(&[Instruction::Push(7), Instruction::Push(0), Instruction::Mod]),
            VmError::DivisionByZero
        );
    }

    #[test]
    fn test_arithmetic_on_reference_is_type_mismatch() {
        let err = run_err(&[Instruction::New(1), Instruction::Push(1), Instruction::Add]);
        assert_eq!(
            err,
            VmError::TypeMismatch {
                op: "ADD",
                found: "ref"
            }
        );
        let err = run_err(&[Instruction::PushNull, Instruction::Neg]);
        assert_eq!(
            err,
            VmError::TypeMismatch {
                op: "NEG",
                found: "null"
            }
        );
    }

    #[test]
    fn test_bitwise_and_shifts() {
        let stack = run_ok(&[
            Instruction::Push(0b1100),
            Instruction::Push(0b1010),
            Instruction::And,
            Instruction::Push(0b1100),
            Instruction::Push(0b1010),
            Instruction::Xor,
            Instruction::Push(1),
            Instruction::Push(65),
            Instruction::Shl,
            Instruction::Push(-8),
            Instruction::Push(1),
            Instruction::Shr,
        ]);
        assert_values(
            &stack,
            &[Value::Int(0b1000), Value::Int(0b0110), Value::Int(2), Value::Int(-4)],
        );
        let err = run_err(&[Instruction::Push(1), Instruction::PushFloat(1.0), Instruction::Or]);
        assert_eq!(err.kind(), crate::vm::ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_equality_and_not() {
        let stack = run_ok(&[
            Instruction::PushNull,
            Instruction::PushNull,
            Instruction::Eq,
            Instruction::Push(1),
            Instruction::PushFloat(1.0),
            Instruction::Ne,
            Instruction::PushNull,
            Instruction::Not,
        ]);
        assert_values(&stack, &[Value::Int(1), Value::Int(0), Value::Int(1)]);
    }

    #[test]
    fn test_conversions() {
        let stack = run_ok(&[
            Instruction::Push(3),
            Instruction::IntToFloat,
            Instruction::PushFloat(-2.9),
            Instruction::FloatToInt,
            Instruction::PushFloat(f64::NAN),
            Instruction::FloatToInt,
        ]);
        assert_values(&stack, &[Value::Float(3.0), Value::Int(-2), Value::Int(0)]);
        let err = run_err(&[Instruction::PushFloat(1.0), Instruction::IntToFloat]);
        assert_eq!(err.kind(), crate::vm::ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_result_types() {
        let stack = run_ok(&[
            Instruction::Push(6),
            Instruction::Push(2),
            Instruction::Mul,
            Instruction::Push(6),
            Instruction::IntToFloat,
            Instruction::Push(2),
            Instruction::Mul,
            Instruction::PushFloat(12.0),
            Instruction::FloatToInt,
        ]);
        assert!(stack[0].is_int());
        assert!(stack[1].is_float());
        assert!(stack[2].is_int());
        assert_eq!(stack[0].as_int(), stack[2].as_int());
        assert_eq!(stack[1].as_int(), None);
    }

    #[test]
    fn test_stack_ops() {
        let stack = run_ok(&[
            Instruction::Push(1),
            Instruction::Push(2),
            Instruction::Swap,
            Instruction::Dup,
            Instruction::Pick(2),
            Instruction::Pop,
        ]);
        assert_values(&stack, &[Value::Int(2), Value::Int(1), Value::Int(1)]);
    }

    #[test]
    fn test_swap_underflow_is_atomic() {
        let code = encode(&[Instruction::Push(1), Instruction::Swap]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        let result = vm.run();
        assert_eq!(
            result,
            ExecutionResult::Error {
                error: VmError::StackUnderflow,
                ip: 5
            }
        );
        assert_values(vm.stack().as_slice(), &[Value::Int(1)]);
    }

    #[test]
    fn test_conditional_jump() {
        // 0: PUSH 0 / 5: JZ 21 / 10: PUSH 1 / 15: JMP 26 / 20: HALT / 21: PUSH 2 / 26: end
        let stack = run_ok(&[
            Instruction::Push(0),
            Instruction::Jz(21),
            Instruction::Push(1),
            Instruction::Jmp(26),
            Instruction::Halt,
            Instruction::Push(2),
            Instruction::Nop,
        ]);
        assert_values(&stack, &[Value::Int(2)]);
    }

    #[test]
    fn test_untaken_branch_ignores_target() {
        let stack = run_ok(&[Instruction::Push(1), Instruction::Jz(9999), Instruction::Push(7)]);
        assert_values(&stack, &[Value::Int(7)]);
    }

    #[test]
    fn test_taken_branch_out_of_range_keeps_condition() {
        let code = encode(&[Instruction::Push(0), Instruction::Jz(9999)]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        let result = vm.run();
        assert_eq!(
            result,
            ExecutionResult::Error {
                error: VmError::OffsetOutOfRange {
                    offset: 9999,
                    len: code.len()
                },
                ip: 5
            }
        );
        assert_eq!(vm.stack().depth(), 1);
    }

    #[test]
    fn test_countdown_loop() {
        // local0 = 10; while local0 != 0 { local0 -= 1 }
        let code = encode(&[
            Instruction::Push(10), // 0
            Instruction::Store(0), // 5
            Instruction::Load(0),  // 7
            Instruction::Jz(29),   // 9
            Instruction::Load(0),  // 14
            Instruction::Push(1),  // 16
            Instruction::Sub,      // 21
            Instruction::Store(0), // 22
            Instruction::Jmp(7),   // 24
            Instruction::Load(0),  // 29
        ]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        assert_eq!(vm.run(), ExecutionResult::Completed);
        assert_values(vm.stack().as_slice(), &[Value::Int(0)]);
        // 2 setup + 10 iterations of 7 + final LOAD/JZ + LOAD
        assert_eq!(vm.stats().instructions, 2 + 10 * 7 + 2 + 1);
    }

    #[test]
    fn test_locals_out_of_window() {
        let code = encode(&[Instruction::Push(1), Instruction::Store(200)]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        assert_eq!(
            vm.run(),
            ExecutionResult::Error {
                error: VmError::InvalidLocal {
                    index: 200,
                    window: 16
                },
                ip: 5
            }
        );
        assert_eq!(vm.stack().depth(), 1);
    }

    #[test]
    fn test_heap_record_roundtrip() {
        let stack = run_ok(&[
            Instruction::New(2),
            Instruction::Dup,
            Instruction::Push(42),
            Instruction::SetField(1),
            Instruction::Dup,
            Instruction::GetField(1),
            Instruction::Swap,
            Instruction::Len,
        ]);
        assert_values(&stack, &[Value::Int(42), Value::Int(2)]);
    }

    #[test]
    fn test_heap_indexed_bytes() {
        let stack = run_ok(&[
            Instruction::NewBytes(4),
            Instruction::Dup,
            Instruction::Push(3),
            Instruction::Push(200),
            Instruction::SetIndex,
            Instruction::Push(3),
            Instruction::GetIndex,
        ]);
        assert_values(&stack, &[Value::Int(200)]);
    }

    #[test]
    fn test_negative_index_is_out_of_range() {
        let err = run_err(&[Instruction::New(1), Instruction::Push(-1), Instruction::GetIndex]);
        assert!(matches!(err, VmError::FieldOutOfRange { len: 1, .. }));
    }

    #[test]
    fn test_use_after_free() {
        let code = encode(&[
            Instruction::New(1),
            Instruction::Dup,
            Instruction::Free,
            Instruction::GetField(0),
        ]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        let result = vm.run();
        let Some(VmError::InvalidHeapHandle(handle)) = result.error().cloned() else {
            panic!("expected InvalidHeapHandle, got {:?}", result);
        };
        assert!(!vm.heap().is_live(handle));
        assert_eq!(vm.heap().live_objects(), 0);
    }

    #[test]
    fn test_getfield_on_null() {
        let err = run_err(&[Instruction::PushNull, Instruction::GetField(0)]);
        assert_eq!(
            err,
            VmError::TypeMismatch {
                op: "GETFIELD",
                found: "null"
            }
        );
    }

    #[test]
    fn test_allocation_with_full_stack_allocates_nothing() {
        let code = encode(&[Instruction::Push(1), Instruction::New(4)]);
        let mut vm = Vm::new(&code, RuntimeConfig::with_limits(1, 4, 1024)).unwrap();
        assert_eq!(
            vm.run().error(),
            Some(&VmError::StackOverflow { max: 1 })
        );
        assert_eq!(vm.heap().live_objects(), 0);
    }

    #[test]
    fn test_out_of_memory() {
        let code = encode(&[Instruction::New(1000)]);
        let mut vm = Vm::new(&code, RuntimeConfig::with_limits(8, 4, 64)).unwrap();
        let result = vm.run();
        assert_eq!(
            result.error().map(VmError::kind),
            Some(crate::vm::ErrorKind::OutOfMemory)
        );
    }

    #[test]
    fn test_call_and_return() {
        // main: PUSH 4, PUSH 5, CALL add/2, HALT ; add: LOAD 0, LOAD 1, ADD, RET 1
        let code = encode(&[
            Instruction::Push(4),                       // 0
            Instruction::Push(5),                       // 5
            Instruction::Call { target: 17, argc: 2 },  // 10
            Instruction::Halt,                          // 16
            Instruction::Load(0),                       // 17
            Instruction::Load(1),                       // 19
            Instruction::Add,                           // 21
            Instruction::Ret(1),                        // 22
        ]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        assert_eq!(vm.run(), ExecutionResult::Completed);
        assert_values(vm.stack().as_slice(), &[Value::Int(9)]);
        assert_eq!(vm.frames().call_depth(), 0);
        assert_eq!(vm.stats().max_call_depth, 1);
    }

    #[test]
    fn test_ret_from_root_frame() {
        let err = run_err(&[Instruction::Push(1), Instruction::Ret(1)]);
        assert_eq!(err, VmError::FrameUnderflow);
    }

    #[test]
    fn test_unbounded_recursion_is_reported() {
        // f: CALL f
        let code = encode(&[Instruction::Call { target: 0, argc: 0 }]);
        let mut vm = Vm::new(&code, RuntimeConfig::with_limits(16, 8, 1024)).unwrap();
        assert_eq!(
            vm.run(),
            ExecutionResult::Error {
                error: VmError::CallDepthExceeded { max: 8 },
                ip: 0
            }
        );
        assert_eq!(vm.frames().call_depth(), 8);
    }

    #[test]
    fn test_callee_cannot_pop_caller_operands() {
        // PUSH 1, CALL 12/0, HALT ; 12: POP
        let code = encode(&[
            Instruction::Push(1),                      // 0
            Instruction::Call { target: 12, argc: 0 }, // 5
            Instruction::Halt,                         // 11
            Instruction::Pop,                          // 12
        ]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        assert_eq!(
            vm.run(),
            ExecutionResult::Error {
                error: VmError::StackUnderflow,
                ip: 12
            }
        );
        assert_eq!(vm.stack().depth(), 1);
    }

    #[test]
    fn test_rerun_after_halt_is_error() {
        let code = encode(&[Instruction::Halt]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        assert_eq!(vm.run(), ExecutionResult::Completed);
        assert_eq!(
            vm.run(),
            ExecutionResult::Error {
                error: VmError::AlreadyHalted,
                ip: 1
            }
        );
        assert_eq!(vm.state(), &VmState::Halted(Halt::Normal));
    }

    #[test]
    fn test_step_and_run_for() {
        let code = encode(&[
            Instruction::Push(1),
            Instruction::Push(2),
            Instruction::Add,
            Instruction::Halt,
        ]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        assert_eq!(vm.state(), &VmState::Ready);
        assert_eq!(vm.step(), RunOutcome::Yielded);
        assert_eq!(vm.state(), &VmState::Running);
        assert_eq!(vm.ip(), 5);
        assert_eq!(vm.run_for(2), RunOutcome::Yielded);
        assert_values(vm.top().as_slice(), &[Value::Int(3)]);
        assert_eq!(
            vm.run_for(10),
            RunOutcome::Finished(ExecutionResult::Completed)
        );
        assert_eq!(vm.stats().instructions, 4);
    }

    #[test]
    fn test_instruction_budget() {
        let code = encode(&[Instruction::Jmp(0)]);
        let config = RuntimeConfig {
            instruction_budget: Some(100),
            ..RuntimeConfig::default()
        };
        let mut vm = Vm::new(&code, config).unwrap();
        assert_eq!(
            vm.run(),
            ExecutionResult::Error {
                error: VmError::BudgetExhausted { budget: 100 },
                ip: 0
            }
        );
        assert_eq!(vm.stats().instructions, 100);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let code = encode(&[Instruction::New(2), Instruction::Push(1)]);
        let mut vm = Vm::new(&code, RuntimeConfig::default()).unwrap();
        assert!(vm.run().is_completed());
        assert_eq!(vm.heap().live_objects(), 1);

        vm.destroy();
        vm.destroy();
        assert_eq!(vm.state(), &VmState::Destroyed);
        assert_eq!(vm.heap().live_objects(), 0);
        assert_eq!(vm.stack().depth(), 0);
        assert_eq!(vm.run().error(), Some(&VmError::Destroyed));
    }

    #[test]
    fn test_empty_bytecode_rejected() {
        assert_eq!(
            Vm::new(&[], RuntimeConfig::default()).err(),
            Some(VmError::EmptyBytecode)
        );
    }

    #[test]
    fn test_opcode_profile() {
        let code = encode(&[Instruction::Push(1), Instruction::Push(2), Instruction::Add]);
        let config = RuntimeConfig {
            profile_opcodes: true,
            ..RuntimeConfig::default()
        };
        let mut vm = Vm::new(&code, config).unwrap();
        vm.run();
        let stats = vm.stats();
        assert_eq!(stats.opcode_counts.get("PUSH"), Some(&2));
        assert_eq!(stats.opcode_counts.get("ADD"), Some(&1));
        assert_eq!(stats.max_stack_depth, 2);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["instructions"], 3);
        assert_eq!(json["opcode_counts"]["PUSH"], 2);
    }
}
