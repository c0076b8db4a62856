// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Instruction opcodes and the nodes that function bodies decode into.

use num_enum::TryFromPrimitive;

use crate::arena::{LabelRange, NodeId};

use super::{FuncIdx, GlobalIdx, LabelIdx, LocalIdx, TypeIdx, ValueType};

// Operand type lookup table for efficient instruction decoding. Opcodes not
// mentioned take no immediate operands.
pub(crate) const OPCODE_TO_OPERAND_TYPE: [OperandType; 256] = {
    let mut table = [OperandType::None; 256];

    macro_rules! set {
        ($type:expr, $($op:ident),+) => {
            $(table[Opcode::$op as usize] = $type;)+
        };
    }

    set!(OperandType::BlockType, Block, Loop, If);
    set!(OperandType::Label, Br, BrIf);
    set!(OperandType::BrTable, BrTable);
    set!(OperandType::FuncIdx, Call);
    set!(OperandType::CallIndirect, CallIndirect);
    set!(OperandType::LocalIdx, LocalGet, LocalSet, LocalTee);
    set!(OperandType::GlobalIdx, GlobalGet, GlobalSet);
    set!(OperandType::Reserved, MemorySize, MemoryGrow);
    set!(OperandType::I32, I32Const);
    set!(OperandType::I64, I64Const);
    set!(OperandType::F32, F32Const);
    set!(OperandType::F64, F64Const);

    // Loads and stores occupy a contiguous opcode range.
    let mut op = Opcode::I32Load as usize;
    while op <= Opcode::I64Store32 as usize {
        table[op] = OperandType::MemArg;
        op += 1;
    }
    table
};

/// Immediate operand shapes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum OperandType {
    None,
    BlockType,
    BrTable,
    CallIndirect,
    F32,
    F64,
    FuncIdx,
    GlobalIdx,
    I32,
    I64,
    Label,
    LocalIdx,
    MemArg,
    Reserved,
}

/// Block signature for structured control instructions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockType {
    /// Block produces no results.
    Empty,
    /// Block produces a single result of the given type.
    Result(ValueType),
}

/// Memory access operands for load and store instructions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemArg {
    /// Alignment hint (log2 of the alignment in bytes).
    pub align: u32,
    /// Static offset added to the dynamic address.
    pub offset: u32,
}

/// A constant literal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constant {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Constant {
    /// The type of the literal.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
        }
    }
}

/// Where a branch transfers control to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BranchTarget {
    /// The `block`, `loop` or `if` node the branch exits (or, for a loop,
    /// restarts).
    Construct(NodeId),
    /// The function body itself; equivalent to a return.
    Function,
}

/// Operands for the `br_table` instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BrTableTargets {
    /// The relative depths to branch to, by index; stored in the node arena.
    pub targets: LabelRange,
    /// The relative depth to branch to if the index is out of bounds.
    pub default: LabelIdx,
}

/// The operands of a decoded instruction, after structural resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeKind {
    /// An instruction without operands.
    Plain,
    /// `block`, `loop` or `if`, opening a new nesting level.
    Block(BlockType),
    /// `else`, within the `if` it belongs to.
    Else { construct: NodeId },
    /// `end`, closing the given construct.
    End { construct: NodeId },
    /// `br` or `br_if`.
    Branch {
        depth: LabelIdx,
        target: BranchTarget,
    },
    /// `br_table`.
    BrTable(BrTableTargets),
    /// A direct call.
    Call(FuncIdx),
    /// An indirect call through the default table, checked against the given
    /// signature.
    CallIndirect(TypeIdx),
    /// A constant literal.
    Const(Constant),
    /// A local variable access.
    Local(LocalIdx),
    /// A global variable access.
    Global(GlobalIdx),
    /// A load or store.
    Memory(MemArg),
}

/// A decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
    pub opcode: Opcode,
    /// Offset of the opcode within the module buffer.
    pub offset: usize,
    pub kind: NodeKind,
}

/// Instruction opcode.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
pub enum Opcode {
    // Control instructions
    Unreachable = 0x00,
    Nop = 0x01,
    Block = 0x02,
    Loop = 0x03,
    If = 0x04,
    Else = 0x05,
    End = 0x0b,
    Br = 0x0c,
    BrIf = 0x0d,
    BrTable = 0x0e,
    Return = 0x0f,
    Call = 0x10,
    CallIndirect = 0x11,

    // Parametric instructions
    Drop = 0x1a,
    Select = 0x1b,

    // Variable instructions
    LocalGet = 0x20,
    LocalSet = 0x21,
    LocalTee = 0x22,
    GlobalGet = 0x23,
    GlobalSet = 0x24,

    // Memory instructions
    I32Load = 0x28,
    I64Load = 0x29,
    F32Load = 0x2a,
    F64Load = 0x2b,
    I32Load8S = 0x2c,
    I32Load8U = 0x2d,
    I32Load16S = 0x2e,
    I32Load16U = 0x2f,
    I64Load8S = 0x30,
    I64Load8U = 0x31,
    I64Load16S = 0x32,
    I64Load16U = 0x33,
    I64Load32S = 0x34,
    I64Load32U = 0x35,
    I32Store = 0x36,
    I64Store = 0x37,
    F32Store = 0x38,
    F64Store = 0x39,
    I32Store8 = 0x3a,
    I32Store16 = 0x3b,
    I64Store8 = 0x3c,
    I64Store16 = 0x3d,
    I64Store32 = 0x3e,
    MemorySize = 0x3f,
    MemoryGrow = 0x40,

    // Numeric instructions
    I32Const = 0x41,
    I64Const = 0x42,
    F32Const = 0x43,
    F64Const = 0x44,
    I32Eqz = 0x45,
    I32Eq = 0x46,
    I32Ne = 0x47,
    I32LtS = 0x48,
    I32LtU = 0x49,
    I32GtS = 0x4a,
    I32GtU = 0x4b,
    I32LeS = 0x4c,
    I32LeU = 0x4d,
    I32GeS = 0x4e,
    I32GeU = 0x4f,
    I64Eqz = 0x50,
    I64Eq = 0x51,
    I64Ne = 0x52,
    I64LtS = 0x53,
    I64LtU = 0x54,
    I64GtS = 0x55,
    I64GtU = 0x56,
    I64LeS = 0x57,
    I64LeU = 0x58,
    I64GeS = 0x59,
    I64GeU = 0x5a,
    F32Eq = 0x5b,
    F32Ne = 0x5c,
    F32Lt = 0x5d,
    F32Gt = 0x5e,
    F32Le = 0x5f,
    F32Ge = 0x60,
    F64Eq = 0x61,
    F64Ne = 0x62,
    F64Lt = 0x63,
    F64Gt = 0x64,
    F64Le = 0x65,
    F64Ge = 0x66,
    I32Clz = 0x67,
    I32Ctz = 0x68,
    I32Popcnt = 0x69,
    I32Add = 0x6a,
    I32Sub = 0x6b,
    I32Mul = 0x6c,
    I32DivS = 0x6d,
    I32DivU = 0x6e,
    I32RemS = 0x6f,
    I32RemU = 0x70,
    I32And = 0x71,
    I32Or = 0x72,
    I32Xor = 0x73,
    I32Shl = 0x74,
    I32ShrS = 0x75,
    I32ShrU = 0x76,
    I32Rotl = 0x77,
    I32Rotr = 0x78,
    I64Clz = 0x79,
    I64Ctz = 0x7a,
    I64Popcnt = 0x7b,
    I64Add = 0x7c,
    I64Sub = 0x7d,
    I64Mul = 0x7e,
    I64DivS = 0x7f,
    I64DivU = 0x80,
    I64RemS = 0x81,
    I64RemU = 0x82,
    I64And = 0x83,
    I64Or = 0x84,
    I64Xor = 0x85,
    I64Shl = 0x86,
    I64ShrS = 0x87,
    I64ShrU = 0x88,
    I64Rotl = 0x89,
    I64Rotr = 0x8a,
    F32Abs = 0x8b,
    F32Neg = 0x8c,
    F32Ceil = 0x8d,
    F32Floor = 0x8e,
    F32Trunc = 0x8f,
    F32Nearest = 0x90,
    F32Sqrt = 0x91,
    F32Add = 0x92,
    F32Sub = 0x93,
    F32Mul = 0x94,
    F32Div = 0x95,
    F32Min = 0x96,
    F32Max = 0x97,
    F32Copysign = 0x98,
    F64Abs = 0x99,
    F64Neg = 0x9a,
    F64Ceil = 0x9b,
    F64Floor = 0x9c,
    F64Trunc = 0x9d,
    F64Nearest = 0x9e,
    F64Sqrt = 0x9f,
    F64Add = 0xa0,
    F64Sub = 0xa1,
    F64Mul = 0xa2,
    F64Div = 0xa3,
    F64Min = 0xa4,
    F64Max = 0xa5,
    F64Copysign = 0xa6,
    I32WrapI64 = 0xa7,
    I32TruncF32S = 0xa8,
    I32TruncF32U = 0xa9,
    I32TruncF64S = 0xaa,
    I32TruncF64U = 0xab,
    I64ExtendI32S = 0xac,
    I64ExtendI32U = 0xad,
    I64TruncF32S = 0xae,
    I64TruncF32U = 0xaf,
    I64TruncF64S = 0xb0,
    I64TruncF64U = 0xb1,
    F32ConvertI32S = 0xb2,
    F32ConvertI32U = 0xb3,
    F32ConvertI64S = 0xb4,
    F32ConvertI64U = 0xb5,
    F32DemoteF64 = 0xb6,
    F64ConvertI32S = 0xb7,
    F64ConvertI32U = 0xb8,
    F64ConvertI64S = 0xb9,
    F64ConvertI64U = 0xba,
    F64PromoteF32 = 0xbb,
    I32ReinterpretF32 = 0xbc,
    I64ReinterpretF64 = 0xbd,
    F32ReinterpretI32 = 0xbe,
    F64ReinterpretI64 = 0xbf,
}

impl Opcode {
    /// The operand shape of the opcode.
    pub(crate) const fn operand_type(self) -> OperandType {
        OPCODE_TO_OPERAND_TYPE[self as usize]
    }

    /// Whether the opcode opens a structured control construct.
    pub const fn opens_construct(self) -> bool {
        matches!(self, Self::Block | Self::Loop | Self::If)
    }
}
