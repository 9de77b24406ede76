//! Bytecode buffer and instruction codec.
//!
//! Binary format (per instruction):
//! - Opcode: u8
//! - Immediate: fixed width determined by the opcode, little-endian
//!   - PUSH / PICK / JMP / JZ / JNZ / NEW / NEWBYTES / GETFIELD / SETFIELD: u32 or i32
//!   - PUSHL / PUSHF: i64 / f64 bits
//!   - CALL: u32 target + u8 argc
//!   - RET / LOAD / STORE: u8
//!
//! No instruction may extend past the end of the buffer. Decoding is pure:
//! it never mutates the buffer and the same offset always yields the same result.

use std::fmt::{self, Write as _};

use super::error::{VmError, VmResult};
use super::ops::{Instruction, Opcode};

/// Capability interface of a read-only instruction source.
pub trait InstructionSource {
    /// Size of the code in bytes.
    fn len(&self) -> usize;

    /// Decode the instruction starting at `offset`, returning it together
    /// with the offset of the following instruction.
    fn decode_at(&self, offset: usize) -> VmResult<(Instruction, usize)>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that `offset` names a byte inside the code.
    fn check_offset(&self, offset: usize) -> VmResult<()> {
        if offset < self.len() {
            Ok(())
        } else {
            Err(VmError::OffsetOutOfRange {
                offset,
                len: self.len(),
            })
        }
    }
}

/// Borrowed, immutable bytecode.
///
/// The buffer never owns the bytes; the caller keeps them alive for as long
/// as any VM executes them, and may share them across VMs and threads.
#[derive(Debug, Clone, Copy)]
pub struct BytecodeBuffer<'a> {
    code: &'a [u8],
}

impl<'a> BytecodeBuffer<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.code
    }
}

impl InstructionSource for BytecodeBuffer<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    fn decode_at(&self, offset: usize) -> VmResult<(Instruction, usize)> {
        decode(self.code, offset)
    }
}

/// Decode one instruction from `code` at `offset`.
pub fn decode(code: &[u8], offset: usize) -> VmResult<(Instruction, usize)> {
    let byte = *code.get(offset).ok_or(VmError::OffsetOutOfRange {
        offset,
        len: code.len(),
    })?;
    let opcode = Opcode::from_byte(byte).ok_or(VmError::InvalidOpcode(byte))?;

    let start = offset + 1;
    let next = start + opcode.operand_width();
    let operand = code.get(start..next).ok_or(VmError::TruncatedOperand {
        opcode: byte,
        offset,
    })?;

    let instr = match opcode {
        Opcode::Nop => Instruction::Nop,
        Opcode::Halt => Instruction::Halt,
        Opcode::Push => Instruction::Push(read_u32(operand, 0) as i32),
        Opcode::PushLong => Instruction::PushLong(read_u64(operand, 0) as i64),
        Opcode::PushFloat => Instruction::PushFloat(f64::from_bits(read_u64(operand, 0))),
        Opcode::PushNull => Instruction::PushNull,
        Opcode::Pop => Instruction::Pop,
        Opcode::Dup => Instruction::Dup,
        Opcode::Swap => Instruction::Swap,
        Opcode::Pick => Instruction::Pick(read_u32(operand, 0)),
        Opcode::Add => Instruction::Add,
        Opcode::Sub => Instruction::Sub,
        Opcode::Mul => Instruction::Mul,
        Opcode::Div => Instruction::Div,
        Opcode::Mod => Instruction::Mod,
        Opcode::Neg => Instruction::Neg,
        Opcode::And => Instruction::And,
        Opcode::Or => Instruction::Or,
        Opcode::Xor => Instruction::Xor,
        Opcode::Shl => Instruction::Shl,
        Opcode::Shr => Instruction::Shr,
        Opcode::Eq => Instruction::Eq,
        Opcode::Ne => Instruction::Ne,
        Opcode::Lt => Instruction::Lt,
        Opcode::Le => Instruction::Le,
        Opcode::Gt => Instruction::Gt,
        Opcode::Ge => Instruction::Ge,
        Opcode::Not => Instruction::Not,
        Opcode::IntToFloat => Instruction::IntToFloat,
        Opcode::FloatToInt => Instruction::FloatToInt,
        Opcode::Jmp => Instruction::Jmp(read_u32(operand, 0)),
        Opcode::Jz => Instruction::Jz(read_u32(operand, 0)),
        Opcode::Jnz => Instruction::Jnz(read_u32(operand, 0)),
        Opcode::Call => Instruction::Call {
            target: read_u32(operand, 0),
            argc: operand[4],
        },
        Opcode::Ret => Instruction::Ret(operand[0]),
        Opcode::Load => Instruction::Load(operand[0]),
        Opcode::Store => Instruction::Store(operand[0]),
        Opcode::New => Instruction::New(read_u32(operand, 0)),
        Opcode::NewBytes => Instruction::NewBytes(read_u32(operand, 0)),
        Opcode::GetField => Instruction::GetField(read_u32(operand, 0)),
        Opcode::SetField => Instruction::SetField(read_u32(operand, 0)),
        Opcode::GetIndex => Instruction::GetIndex,
        Opcode::SetIndex => Instruction::SetIndex,
        Opcode::Len => Instruction::Len,
        Opcode::Free => Instruction::Free,
    };
    Ok((instr, next))
}

impl Instruction {
    /// Append the binary encoding of this instruction to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().byte());
        match *self {
            Instruction::Push(v) => out.extend_from_slice(&v.to_le_bytes()),
            Instruction::PushLong(v) => out.extend_from_slice(&v.to_le_bytes()),
            Instruction::PushFloat(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
            Instruction::Pick(v)
            | Instruction::Jmp(v)
            | Instruction::Jz(v)
            | Instruction::Jnz(v)
            | Instruction::New(v)
            | Instruction::NewBytes(v)
            | Instruction::GetField(v)
            | Instruction::SetField(v) => out.extend_from_slice(&v.to_le_bytes()),
            Instruction::Call { target, argc } => {
                out.extend_from_slice(&target.to_le_bytes());
                out.push(argc);
            }
            Instruction::Ret(v) | Instruction::Load(v) | Instruction::Store(v) => out.push(v),
            _ => {}
        }
    }
}

/// Encode a sequence of instructions into a flat buffer.
pub fn encode(instrs: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instrs.iter().map(Instruction::encoded_len).sum());
    for instr in instrs {
        instr.encode_into(&mut out);
    }
    out
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match *self {
            Instruction::Push(v) => write!(f, "{} {}", name, v),
            Instruction::PushLong(v) => write!(f, "{} {}", name, v),
            Instruction::PushFloat(v) => write!(f, "{} {:?}", name, v),
            Instruction::Pick(v)
            | Instruction::New(v)
            | Instruction::NewBytes(v)
            | Instruction::GetField(v)
            | Instruction::SetField(v) => write!(f, "{} {}", name, v),
            Instruction::Jmp(t) | Instruction::Jz(t) | Instruction::Jnz(t) => {
                write!(f, "{} @{:04}", name, t)
            }
            Instruction::Call { target, argc } => write!(f, "{} @{:04} {}", name, target, argc),
            Instruction::Ret(v) | Instruction::Load(v) | Instruction::Store(v) => {
                write!(f, "{} {}", name, v)
            }
            _ => f.write_str(name),
        }
    }
}

/// Render a listing of `code`, one instruction per line.
///
/// Fails with the first decode error encountered.
pub fn disassemble(code: &[u8]) -> VmResult<String> {
    let buffer = BytecodeBuffer::new(code);
    let mut out = String::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let (instr, next) = buffer.decode_at(offset)?;
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{:04}: {}", offset, instr);
        offset = next;
    }
    Ok(out)
}

// Operand slices are length-checked by `decode` before these run.

#[inline(always)]
fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[pos..pos + 4]);
    u32::from_le_bytes(buf)
}

#[inline(always)]
fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[pos..pos + 8]);
    u64::from_le_bytes(buf)
}
