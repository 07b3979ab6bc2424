//! Tiny bytecode assembler for building test units.

#![allow(dead_code)]
use std::collections::HashMap;

use deysc_lib::ScriptUnit;

pub mod op {
    pub const NOP: u8 = 0;
    pub const ADDI: u8 = 1;
    pub const SUBI: u8 = 2;
    pub const CMPEQI: u8 = 8;
    pub const ADDV: u8 = 26;
    pub const ITOF: u8 = 34;
    pub const FTOI: u8 = 35;
    pub const PUSHB: u8 = 37;
    pub const PUSHB2: u8 = 38;
    pub const PUSHB3: u8 = 39;
    pub const PUSHI: u8 = 40;
    pub const PUSHF: u8 = 41;
    pub const DUP: u8 = 42;
    pub const DROP: u8 = 43;
    pub const CALLN: u8 = 44;
    pub const ENTER: u8 = 45;
    pub const RET: u8 = 46;
    pub const GETP: u8 = 47;
    pub const SETP: u8 = 48;
    pub const SETPP: u8 = 49;
    pub const EXPLODE: u8 = 50;
    pub const IMPLODE: u8 = 51;
    pub const GETARRAYB: u8 = 53;
    pub const SETARRAYB: u8 = 54;
    pub const GETLOCALPB: u8 = 55;
    pub const GETLOCALB: u8 = 56;
    pub const SETLOCALB: u8 = 57;
    pub const GETSTATICB: u8 = 59;
    pub const SETSTATICB: u8 = 60;
    pub const GETFIELDB: u8 = 65;
    pub const SETFIELDB: u8 = 66;
    pub const GETGLOBALS: u8 = 83;
    pub const B: u8 = 85;
    pub const BZ: u8 = 86;
    pub const BLT: u8 = 91;
    pub const CALL: u8 = 93;
    pub const SWITCH: u8 = 98;
    pub const PUSHSTR: u8 = 99;
    pub const STRCPY: u8 = 101;
    pub const CATCH: u8 = 106;
}

enum Fixup {
    /// i16 relative to the end of a 3-byte branch at `at - 1`.
    Branch { at: usize },
    /// u24 absolute.
    Call { at: usize },
    /// u16 relative to the end of a switch entry.
    Case { at: usize, entry_end: u32 },
}

#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
    labels: HashMap<&'static str, u32>,
    fixups: Vec<(Fixup, &'static str)>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn label(&mut self, name: &'static str) -> &mut Self {
        self.labels.insert(name, self.here());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.raw(&[opcode])
    }

    pub fn op_u8(&mut self, opcode: u8, v: u8) -> &mut Self {
        self.raw(&[opcode, v])
    }

    pub fn enter(&mut self, args: u8, locals: u8, name: &str) -> &mut Self {
        self.raw(&[op::ENTER, args, locals, 0, name.len() as u8]);
        self.raw(name.as_bytes())
    }

    pub fn ret(&mut self, params: u8, values: u8) -> &mut Self {
        self.raw(&[op::RET, params, values])
    }

    /// Shortest encoding: implicit for -1..=7, `pushb` for bytes, `pushi` otherwise.
    pub fn push(&mut self, v: i32) -> &mut Self {
        match v {
            -1..=7 => self.op((110 + v) as u8),
            8..=255 => self.op_u8(op::PUSHB, v as u8),
            _ => {
                self.op(op::PUSHI);
                self.raw(&v.to_le_bytes())
            }
        }
    }

    pub fn pushf(&mut self, v: f32) -> &mut Self {
        self.op(op::PUSHF);
        self.raw(&v.to_le_bytes())
    }

    pub fn branch(&mut self, opcode: u8, target: &'static str) -> &mut Self {
        self.op(opcode);
        self.fixups.push((Fixup::Branch { at: self.code.len() }, target));
        self.raw(&[0, 0])
    }

    pub fn call(&mut self, target: &'static str) -> &mut Self {
        self.op(op::CALL);
        self.fixups.push((Fixup::Call { at: self.code.len() }, target));
        self.raw(&[0, 0, 0])
    }

    pub fn calln(&mut self, in_slots: u8, out_slots: u8, index: u16) -> &mut Self {
        self.raw(&[op::CALLN, (in_slots << 2) | out_slots]);
        self.raw(&index.to_be_bytes())
    }

    pub fn switch(&mut self, cases: &[(u32, &'static str)]) -> &mut Self {
        let start = self.here();
        self.raw(&[op::SWITCH, cases.len() as u8]);
        for (i, (value, target)) in cases.iter().enumerate() {
            self.raw(&value.to_le_bytes());
            let entry_end = start + 2 + (i as u32 + 1) * 6;
            self.fixups.push((Fixup::Case { at: self.code.len(), entry_end }, target));
            self.raw(&[0, 0]);
        }
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        let mut code = self.code.clone();
        for (fixup, name) in &self.fixups {
            let target = *self.labels.get(name).unwrap_or_else(|| panic!("undefined label {name}"));
            match *fixup {
                Fixup::Branch { at } => {
                    let rel = target as i64 - (at as i64 + 2);
                    code[at..at + 2].copy_from_slice(&(rel as i16).to_le_bytes());
                }
                Fixup::Call { at } => {
                    code[at..at + 3].copy_from_slice(&target.to_le_bytes()[..3]);
                }
                Fixup::Case { at, entry_end } => {
                    let rel = target - entry_end;
                    code[at..at + 2].copy_from_slice(&(rel as u16).to_le_bytes());
                }
            }
        }
        code
    }

    pub fn unit(&mut self) -> ScriptUnit {
        let code = self.finish();
        ScriptUnit {
            name: "test".into(),
            code_length: code.len() as u32,
            code,
            ..Default::default()
        }
    }
}

/// Mangles `hash` so that it unmangles back at table position `index`.
pub fn mangle(hash: u64, code_length: u32, index: usize) -> u64 {
    hash.rotate_right(((code_length as u64 + index as u64) % 64) as u32)
}

/// Collapses every whitespace run into a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
