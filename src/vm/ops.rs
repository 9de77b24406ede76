/// Opcode table for the bcvm instruction set.
///
/// Every instruction is a single opcode byte followed by a fixed-width
/// little-endian immediate. The width is a property of the opcode alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ========================================
    // Control / constants
    // ========================================
    Nop = 0x00,
    Halt = 0x01,
    Push = 0x02,
    PushLong = 0x03,
    PushFloat = 0x04,
    PushNull = 0x05,

    // ========================================
    // Stack manipulation
    // ========================================
    Pop = 0x06,
    Dup = 0x07,
    Swap = 0x08,
    Pick = 0x09,

    // ========================================
    // Arithmetic
    // ========================================
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Mod = 0x14,
    Neg = 0x15,
    And = 0x16,
    Or = 0x17,
    Xor = 0x18,
    Shl = 0x19,
    Shr = 0x1A,

    // ========================================
    // Comparison → Int(0/1)
    // ========================================
    Eq = 0x20,
    Ne = 0x21,
    Lt = 0x22,
    Le = 0x23,
    Gt = 0x24,
    Ge = 0x25,
    Not = 0x26,

    // ========================================
    // Conversion
    // ========================================
    IntToFloat = 0x28,
    FloatToInt = 0x29,

    // ========================================
    // Control transfer
    // ========================================
    Jmp = 0x30,
    Jz = 0x31,
    Jnz = 0x32,
    Call = 0x33,
    Ret = 0x34,

    // ========================================
    // Locals
    // ========================================
    Load = 0x38,
    Store = 0x39,

    // ========================================
    // Heap
    // ========================================
    New = 0x40,
    NewBytes = 0x41,
    GetField = 0x42,
    SetField = 0x43,
    GetIndex = 0x44,
    SetIndex = 0x45,
    Len = 0x46,
    Free = 0x47,
}

impl Opcode {
    pub const ALL: [Opcode; 45] = [
        Opcode::Nop,
        Opcode::Halt,
        Opcode::Push,
        Opcode::PushLong,
        Opcode::PushFloat,
        Opcode::PushNull,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::Swap,
        Opcode::Pick,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Neg,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Not,
        Opcode::IntToFloat,
        Opcode::FloatToInt,
        Opcode::Jmp,
        Opcode::Jz,
        Opcode::Jnz,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Load,
        Opcode::Store,
        Opcode::New,
        Opcode::NewBytes,
        Opcode::GetField,
        Opcode::SetField,
        Opcode::GetIndex,
        Opcode::SetIndex,
        Opcode::Len,
        Opcode::Free,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        let op = match byte {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Halt,
            0x02 => Opcode::Push,
            0x03 => Opcode::PushLong,
            0x04 => Opcode::PushFloat,
            0x05 => Opcode::PushNull,
            0x06 => Opcode::Pop,
            0x07 => Opcode::Dup,
            0x08 => Opcode::Swap,
            0x09 => Opcode::Pick,
            0x10 => Opcode::Add,
            0x11 => Opcode::Sub,
            0x12 => Opcode::Mul,
            0x13 => Opcode::Div,
            0x14 => Opcode::Mod,
            0x15 => Opcode::Neg,
            0x16 => Opcode::And,
            0x17 => Opcode::Or,
            0x18 => Opcode::Xor,
            0x19 => Opcode::Shl,
            0x1A => Opcode::Shr,
            0x20 => Opcode::Eq,
            0x21 => Opcode::Ne,
            0x22 => Opcode::Lt,
            0x23 => Opcode::Le,
            0x24 => Opcode::Gt,
            0x25 => Opcode::Ge,
            0x26 => Opcode::Not,
            0x28 => Opcode::IntToFloat,
            0x29 => Opcode::FloatToInt,
            0x30 => Opcode::Jmp,
            0x31 => Opcode::Jz,
            0x32 => Opcode::Jnz,
            0x33 => Opcode::Call,
            0x34 => Opcode::Ret,
            0x38 => Opcode::Load,
            0x39 => Opcode::Store,
            0x40 => Opcode::New,
            0x41 => Opcode::NewBytes,
            0x42 => Opcode::GetField,
            0x43 => Opcode::SetField,
            0x44 => Opcode::GetIndex,
            0x45 => Opcode::SetIndex,
            0x46 => Opcode::Len,
            0x47 => Opcode::Free,
            _ => return None,
        };
        Some(op)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Width in bytes of the immediate that follows the opcode.
    pub fn operand_width(self) -> usize {
        match self {
            Opcode::Push | Opcode::Pick | Opcode::Jmp | Opcode::Jz | Opcode::Jnz => 4,
            Opcode::New | Opcode::NewBytes | Opcode::GetField | Opcode::SetField => 4,
            Opcode::PushLong | Opcode::PushFloat => 8,
            Opcode::Call => 5,
            Opcode::Ret | Opcode::Load | Opcode::Store => 1,
            _ => 0,
        }
    }

    /// Returns the mnemonic used by the disassembler and profiler.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Halt => "HALT",
            Opcode::Push => "PUSH",
            Opcode::PushLong => "PUSHL",
            Opcode::PushFloat => "PUSHF",
            Opcode::PushNull => "PUSHNULL",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Swap => "SWAP",
            Opcode::Pick => "PICK",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Neg => "NEG",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Le => "LE",
            Opcode::Gt => "GT",
            Opcode::Ge => "GE",
            Opcode::Not => "NOT",
            Opcode::IntToFloat => "ITOF",
            Opcode::FloatToInt => "FTOI",
            Opcode::Jmp => "JMP",
            Opcode::Jz => "JZ",
            Opcode::Jnz => "JNZ",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::New => "NEW",
            Opcode::NewBytes => "NEWBYTES",
            Opcode::GetField => "GETFIELD",
            Opcode::SetField => "SETFIELD",
            Opcode::GetIndex => "GETINDEX",
            Opcode::SetIndex => "SETINDEX",
            Opcode::Len => "LEN",
            Opcode::Free => "FREE",
        }
    }
}

/// A decoded instruction: opcode plus its validated immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Nop,
    Halt,
    Push(i32),
    PushLong(i64),
    PushFloat(f64),
    PushNull,
    Pop,
    Dup,
    Swap,
    Pick(u32),
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    IntToFloat,
    FloatToInt,
    Jmp(u32),
    Jz(u32),
    Jnz(u32),
    Call { target: u32, argc: u8 },
    Ret(u8),
    Load(u8),
    Store(u8),
    New(u32),
    NewBytes(u32),
    GetField(u32),
    SetField(u32),
    GetIndex,
    SetIndex,
    Len,
    Free,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Nop => Opcode::Nop,
            Instruction::Halt => Opcode::Halt,
            Instruction::Push(_) => Opcode::Push,
            Instruction::PushLong(_) => Opcode::PushLong,
            Instruction::PushFloat(_) => Opcode::PushFloat,
            Instruction::PushNull => Opcode::PushNull,
            Instruction::Pop => Opcode::Pop,
            Instruction::Dup => Opcode::Dup,
            Instruction::Swap => Opcode::Swap,
            Instruction::Pick(_) => Opcode::Pick,
            Instruction::Add => Opcode::Add,
            Instruction::Sub => Opcode::Sub,
            Instruction::Mul => Opcode::Mul,
            Instruction::Div => Opcode::Div,
            Instruction::Mod => Opcode::Mod,
            Instruction::Neg => Opcode::Neg,
            Instruction::And => Opcode::And,
            Instruction::Or => Opcode::Or,
            Instruction::Xor => Opcode::Xor,
            Instruction::Shl => Opcode::Shl,
            Instruction::Shr => Opcode::Shr,
            Instruction::Eq => Opcode::Eq,
            Instruction::Ne => Opcode::Ne,
            Instruction::Lt => Opcode::Lt,
            Instruction::Le => Opcode::Le,
            Instruction::Gt => Opcode::Gt,
            Instruction::Ge => Opcode::Ge,
            Instruction::Not => Opcode::Not,
            Instruction::IntToFloat => Opcode::IntToFloat,
            Instruction::FloatToInt => Opcode::FloatToInt,
            Instruction::Jmp(_) => Opcode::Jmp,
            Instruction::Jz(_) => Opcode::Jz,
            Instruction::Jnz(_) => Opcode::Jnz,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Ret(_) => Opcode::Ret,
            Instruction::Load(_) => Opcode::Load,
            Instruction::Store(_) => Opcode::Store,
            Instruction::New(_) => Opcode::New,
            Instruction::NewBytes(_) => Opcode::NewBytes,
            Instruction::GetField(_) => Opcode::GetField,
            Instruction::SetField(_) => Opcode::SetField,
            Instruction::GetIndex => Opcode::GetIndex,
            Instruction::SetIndex => Opcode::SetIndex,
            Instruction::Len => Opcode::Len,
            Instruction::Free => Opcode::Free,
        }
    }

    pub fn name(&self) -> &'static str {
        self.opcode().name()
    }

    /// Size in bytes of the encoded instruction.
    pub fn encoded_len(&self) -> usize {
        1 + self.opcode().operand_width()
    }
}
