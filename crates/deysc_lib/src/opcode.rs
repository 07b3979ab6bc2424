mod tables {
    include!(concat!(env!("OUT_DIR"), "/script_opcodes.rs"));
}

pub use tables::{OpInfo, OperandFmt};

/// What an opcode does, independent of how its operands are encoded.
///
/// Discriminants are grouped into contiguous ranges per class so dispatch can
/// range-test instead of listing every variant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    Nop = 0,

    Add = 1,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    Neg,
    And,
    Or,
    Xor,

    CmpEq = 16,
    CmpNe,
    CmpGt,
    CmpGe,
    CmpLt,
    CmpLe,

    Push = 32,
    Dup,
    Drop,
    PushStr,

    CallN = 48,
    Enter,
    Call,
    Ret,
    Branch,
    BranchZ,
    BranchNe,
    BranchEq,
    BranchGt,
    BranchGe,
    BranchLt,
    BranchLe,
    Switch,
    Catch,
    Throw,
    CallP,

    Explode = 80,
    Implode,
    ArrayGetP,
    ArrayGet,
    ArraySet,
    GetP,
    SetP,
    SetPPeek,
    GetLocalP,
    GetLocal,
    SetLocal,
    GetStaticP,
    GetStatic,
    SetStatic,
    GetGlobalP,
    GetGlobal,
    SetGlobal,
    FieldGetP,
    FieldGet,
    FieldSet,

    ItoF = 112,
    FtoI,
    StrCpy,
    ItoS,
    AppendStr,
    AppendInt,
    MemCpy,

    Unknown = 255,
}

impl OperationKind {
    fn code(self) -> u8 {
        self as u8
    }

    pub fn is_arithmetic(self) -> bool {
        (Self::Add.code()..=Self::Xor.code()).contains(&self.code())
    }

    pub fn is_comparison(self) -> bool {
        (Self::CmpEq.code()..=Self::CmpLe.code()).contains(&self.code())
    }

    pub fn is_branch(self) -> bool {
        (Self::Branch.code()..=Self::BranchLe.code()).contains(&self.code())
    }

    pub fn is_conditional_branch(self) -> bool {
        (Self::BranchZ.code()..=Self::BranchLe.code()).contains(&self.code())
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Self::Not | Self::Neg)
    }

    /// Control flow that ends a basic block (no implicit fall-through edge).
    pub fn ends_block(self) -> bool {
        self.is_branch() || matches!(self, Self::Switch | Self::Ret)
    }
}

pub fn opcode_info(op: u8) -> Option<&'static OpInfo> {
    tables::OPCODE_INFO.get(op as usize)
}

/// Byte size of a fixed-width operand format, excluding the opcode byte.
/// `None` for variable-length formats.
pub fn fixed_operand_size(fmt: OperandFmt) -> Option<usize> {
    match fmt {
        OperandFmt::NONE | OperandFmt::STRING | OperandFmt::IMPLICIT_INT | OperandFmt::IMPLICIT_FLOAT => Some(0),
        OperandFmt::IMM8 => Some(1),
        OperandFmt::IMM8X2 | OperandFmt::IMM16 | OperandFmt::RET | OperandFmt::BRANCH => Some(2),
        OperandFmt::IMM8X3 | OperandFmt::IMM24 | OperandFmt::CALL | OperandFmt::CALLN => Some(3),
        OperandFmt::IMM32 | OperandFmt::IMMF32 => Some(4),
        OperandFmt::ENTER | OperandFmt::SWITCH => None,
    }
}
