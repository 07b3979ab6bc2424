use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod ast;
pub mod disasm;
pub mod emit;
pub mod error;
pub mod function;
pub mod instruction;
pub mod machine;
pub mod native;
pub mod opcode;
mod reader;
pub mod types;

pub use error::{DeyscError, Diagnostic, DiagnosticKind};
pub use function::{Function, Globals, build_functions};
pub use instruction::{Instruction, Operand, decode_code};
pub use machine::Machine;
pub use native::{NativeDb, NativeSpec};
pub use opcode::OperationKind;
pub use types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompileMode {
    Pseudo,
    Disasm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: DecompileMode,
    /// Emit an `asm("…")` comment ahead of each instruction's statements.
    pub annotate: bool,
    /// Drop gotos that jump to the label right after them.
    pub optimize: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            mode: DecompileMode::Pseudo,
            annotate: false,
            optimize: false,
        }
    }
}

/// One compiled script as handed over by the container layer: decrypted code,
/// static initializers, the raw (mangled) native table and the string table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptUnit {
    pub name: String,
    pub code: Vec<u8>,
    pub code_length: u32,
    #[serde(default)]
    pub statics: Vec<i64>,
    #[serde(default)]
    pub natives: Vec<u64>,
    #[serde(default)]
    pub strings: Vec<u8>,
}

impl ScriptUnit {
    pub fn from_json_str(json: &str) -> Result<Self, DeyscError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeyscError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// NUL-terminated string starting at `offset` in the string table.
    pub fn string_at(&self, offset: usize) -> Option<String> {
        let tail = self.strings.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Some(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decompilation {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn decompile_with_mode(unit: &ScriptUnit, natives: &NativeDb, mode: DecompileMode) -> Result<Decompilation, DeyscError> {
    decompile_with_options(
        unit,
        natives,
        DecompileOptions {
            mode,
            ..DecompileOptions::default()
        },
    )
}

pub fn decompile_with_options(
    unit: &ScriptUnit,
    natives: &NativeDb,
    options: DecompileOptions,
) -> Result<Decompilation, DeyscError> {
    let instrs = decode_code(&unit.code, unit.code_length)?;
    debug!(unit = %unit.name, instructions = instrs.len(), "decoded code");

    if options.mode == DecompileMode::Disasm {
        return Ok(Decompilation {
            text: disasm::disassemble(unit, &instrs, natives),
            diagnostics: Vec::new(),
        });
    }

    let mut diagnostics = Vec::new();
    let mut functions = build_functions(instrs, &mut diagnostics);
    let mut globals = Globals::from_statics(&unit.statics);

    Machine::new(unit, natives, &mut functions, &mut globals, &mut diagnostics)
        .annotate(options.annotate)
        .run()?;

    Ok(Decompilation {
        text: emit::render_unit(&functions, &globals, options.optimize),
        diagnostics,
    })
}

pub fn decompile(unit: &ScriptUnit, natives: &NativeDb) -> Result<Decompilation, DeyscError> {
    decompile_with_options(unit, natives, DecompileOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_table_lookup() {
        let unit = ScriptUnit { strings: b"abc\0de\0f".to_vec(), ..Default::default() };
        assert_eq!(unit.string_at(0).as_deref(), Some("abc"));
        assert_eq!(unit.string_at(4).as_deref(), Some("de"));
        assert_eq!(unit.string_at(7).as_deref(), Some("f"));
        assert_eq!(unit.string_at(9), None);
    }

    #[test]
    fn unit_json_defaults_optional_tables() {
        let unit = ScriptUnit::from_json_str(r#"{"name":"x","code":[0],"code_length":1}"#).unwrap();
        assert!(unit.statics.is_empty() && unit.natives.is_empty() && unit.strings.is_empty());
    }
}
