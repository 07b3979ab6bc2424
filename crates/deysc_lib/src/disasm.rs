use crate::ScriptUnit;
use crate::instruction::{Instruction, Operand};
use crate::native::{self, NativeDb};

/// Plain listing of decoded instructions, one function header per `enter`.
pub fn disassemble(unit: &ScriptUnit, instrs: &[Instruction], natives: &NativeDb) -> String {
    let mut out = String::new();

    for ins in instrs {
        if let Operand::Enter { args, locals, name } = &ins.operands {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("function {name} (args={args}, locals={locals})\n"));
            out.push_str("bytecode:\n");
        }

        out.push_str(&format!("{:08x} {:<14}", ins.address, ins.mnemonic));
        let operands = ins.operands.to_string();
        if !operands.is_empty() {
            out.push_str(&format!(" {operands}"));
        }
        if let Some(note) = annotation(unit, ins, natives) {
            out.push_str(&format!(" ; {note}"));
        }
        out.push('\n');
    }

    out
}

fn annotation(unit: &ScriptUnit, ins: &Instruction, natives: &NativeDb) -> Option<String> {
    match ins.operands {
        Operand::Native { index, .. } => {
            let Some(&raw) = unit.natives.get(index as usize) else {
                return Some("<bad native index>".into());
            };
            let hash = native::unmangle(raw, unit.code_length, index as usize);
            Some(match natives.lookup(hash) {
                Some(spec) => format!("{} ({hash:#x})", spec.name),
                None => format!("unk_{hash:x}"),
            })
        }
        _ if ins.opcode > 126 => Some(format!("unknown opcode 0x{:02x}", ins.opcode)),
        _ => None,
    }
}
