use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeyscError {
    #[error("truncated instruction at {address:#010x} (opcode 0x{opcode:02x}): needs {needed} bytes, {remaining} left before end of code")]
    TruncatedInstruction { address: u32, opcode: u8, needed: usize, remaining: usize },

    #[error("code region is {actual} bytes, shorter than the declared length of {declared}")]
    CodeShorterThanDeclared { declared: u32, actual: usize },

    #[error("{function}: `{instruction}` at {address:#010x} returns {count} values, at most one is supported")]
    TooManyReturnValues { function: String, address: u32, instruction: String, count: u8 },

    #[error("{function}: `{instruction}` at {address:#010x} calls {target:#010x}, which is not the start of any function")]
    UnknownCallTarget { function: String, address: u32, instruction: String, target: u32 },

    #[error("{function}: `{instruction}` at {address:#010x} references native #{index}, but the native table has {count} entries")]
    InvalidNativeIndex { function: String, address: u32, instruction: String, index: u16, count: usize },

    #[error("invalid native hash `{0}`")]
    InvalidHash(String),

    #[error("malformed native translation line: `{0}`")]
    InvalidTranslation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Something the decompiler could not be sure about. Recorded alongside the
/// best-effort output instead of aborting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub function: Option<String>,
    pub address: Option<u32>,
    pub kind: DiagnosticKind,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(function) = &self.function {
            write!(f, "{function}: ")?;
        }
        if let Some(address) = self.address {
            write!(f, "{address:#010x}: ")?;
        }
        write!(f, "{}", self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DiagnosticKind {
    #[error("operand stack underflow, substituted a placeholder")]
    StackUnderflow,

    #[error("native {hash:#018x} is not in the catalog, synthesized `{name}`")]
    SynthesizedNative { hash: u64, name: String },

    #[error("native `{name}` takes {expected_in} slots and returns {expected_out}, call site says {found_in} and {found_out}")]
    NativeArityMismatch { name: String, expected_in: usize, expected_out: usize, found_in: u8, found_out: u8 },

    #[error("conflicting types for `{variable}`: keeping `{existing}`, ignoring `{inferred}`")]
    TypeConflict { variable: String, existing: String, inferred: String },

    #[error("block {block:#010x} entered with {found} stack values, expected {expected}")]
    EntryStackMismatch { block: u32, expected: usize, found: usize },

    #[error("unrecognized opcode 0x{opcode:02x}")]
    UnknownOpcode { opcode: u8 },

    #[error("`{instruction}` outside of any function")]
    OrphanInstruction { instruction: String },

    #[error("expected an immediate length operand, found `{found}`")]
    NonImmediateLength { found: String },

    #[error("length {length} exceeds the {limit} slots available, clamped")]
    LengthOutOfRange { length: usize, limit: usize },
}
