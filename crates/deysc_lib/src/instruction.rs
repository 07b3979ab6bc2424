use std::fmt;

use tracing::warn;

use crate::error::DeyscError;
use crate::opcode::{self, OperandFmt, OperationKind};
use crate::reader::Reader;

/// Code is stored in pages of this many bytes. Two consecutive NOPs end a page.
pub const CODE_PAGE_SIZE: usize = 0x4000;

/// Branch instructions are always 3 bytes long; targets are relative to the
/// end of the instruction.
const BRANCH_LENGTH: i64 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    U8(u8),
    U8x2(u8, u8),
    U8x3(u8, u8, u8),
    U16(u16),
    U24(u32),
    U32(u32),
    F32(f32),
    Branch { relative: i16, target: u32 },
    Call { target: u32 },
    Native { in_slots: u8, out_slots: u8, index: u16 },
    Enter { args: u8, locals: u8, name: String },
    Ret { params: u8, values: u8 },
    /// (match value, absolute target) in encoded order.
    Switch(Vec<(u32, u32)>),
    StringRef,
    ImplicitInt(i32),
    ImplicitFloat(f32),
}

impl Operand {
    /// Integer value of an immediate operand.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Operand::U8(v) => Some(*v as i64),
            Operand::U16(v) => Some(*v as i64),
            Operand::U24(v) => Some(*v as i64),
            Operand::U32(v) => Some(*v as i64),
            Operand::ImplicitInt(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None | Operand::StringRef => Ok(()),
            Operand::U8(v) => write!(f, "{v}"),
            Operand::U8x2(a, b) => write!(f, "{a} {b}"),
            Operand::U8x3(a, b, c) => write!(f, "{a} {b} {c}"),
            Operand::U16(v) => write!(f, "{v}"),
            Operand::U24(v) => write!(f, "{v}"),
            Operand::U32(v) => write!(f, "{v}"),
            Operand::F32(v) => write!(f, "{v:?}"),
            Operand::Branch { target, .. } => write!(f, "{target:08x}"),
            Operand::Call { target } => write!(f, "{target:08x}"),
            Operand::Native { in_slots, out_slots, index } => write!(f, "#{index} {in_slots} {out_slots}"),
            Operand::Enter { args, locals, name } => write!(f, "{args} {locals} <{name}>"),
            Operand::Ret { params, values } => write!(f, "{params} {values}"),
            Operand::Switch(cases) => {
                for (i, (value, target)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}: {target:08x}")?;
                }
                Ok(())
            }
            Operand::ImplicitInt(v) => write!(f, "{v}"),
            Operand::ImplicitFloat(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: u32,
    pub opcode: u8,
    pub operation: OperationKind,
    pub operands: Operand,
    pub mnemonic: &'static str,
    /// 3 for vector arithmetic, 1 otherwise.
    pub lanes: u8,
    /// Encoded length in bytes, opcode included.
    pub size: u32,
}

impl Instruction {
    pub fn next_address(&self) -> u32 {
        self.address + self.size
    }

    pub fn branch_target(&self) -> Option<u32> {
        match self.operands {
            Operand::Branch { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Every address this instruction can jump to, switch targets included.
    pub fn jump_targets(&self) -> Vec<u32> {
        match &self.operands {
            Operand::Branch { target, .. } => vec![*target],
            Operand::Switch(cases) => cases.iter().map(|(_, t)| *t).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operands = self.operands.to_string();
        if operands.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, operands)
        }
    }
}

/// Decodes one instruction at a time from the code region.
pub struct Decoder<'a> {
    reader: Reader<'a>,
}

impl<'a> Decoder<'a> {
    /// `code` must already be cut to the declared code length.
    pub fn new(code: &'a [u8]) -> Self {
        Self { reader: Reader::new(code) }
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    pub fn seek(&mut self, pos: usize) {
        self.reader.seek(pos);
    }

    pub fn is_eof(&self) -> bool {
        self.reader.remaining() == 0
    }

    pub fn decode_next(&mut self) -> Result<Option<Instruction>, DeyscError> {
        let start = self.reader.position();
        let address = start as u32;
        let opcode = match self.reader.get_u8() {
            Some(op) => op,
            None => return Ok(None),
        };

        let info = match opcode::opcode_info(opcode) {
            Some(info) => info,
            None => {
                warn!(address, opcode, "unrecognized opcode");
                return Ok(Some(Instruction {
                    address,
                    opcode,
                    operation: OperationKind::Unknown,
                    operands: Operand::None,
                    mnemonic: "unknown",
                    lanes: 1,
                    size: 1,
                }));
            }
        };

        let operands = self.decode_operand(address, opcode, info.fmt)?;
        let size = (self.reader.position() - start) as u32;

        Ok(Some(Instruction {
            address,
            opcode,
            operation: info.kind,
            operands,
            mnemonic: info.mnemonic,
            lanes: info.lanes,
            size,
        }))
    }

    fn decode_operand(&mut self, address: u32, opcode: u8, fmt: OperandFmt) -> Result<Operand, DeyscError> {
        // Needed and remaining byte counts are both measured from the start of the operand.
        let available = self.reader.remaining();
        let require = |needed: usize| -> Result<(), DeyscError> {
            if available < needed {
                return Err(DeyscError::TruncatedInstruction { address, opcode, needed, remaining: available });
            }
            Ok(())
        };
        let mut needed = opcode::fixed_operand_size(fmt).unwrap_or(0);
        require(needed)?;
        let truncated = |needed: usize| DeyscError::TruncatedInstruction { address, opcode, needed, remaining: available };
        let r = &mut self.reader;

        let operand = match fmt {
            OperandFmt::NONE => Operand::None,
            OperandFmt::STRING => Operand::StringRef,
            OperandFmt::IMPLICIT_INT => Operand::ImplicitInt(opcode as i32 - 110),
            OperandFmt::IMPLICIT_FLOAT => Operand::ImplicitFloat((opcode as i32 - 119) as f32),
            OperandFmt::IMM8 => Operand::U8(r.get_u8().ok_or(truncated(needed))?),
            OperandFmt::IMM8X2 => {
                let a = r.get_u8().ok_or(truncated(needed))?;
                let b = r.get_u8().ok_or(truncated(needed))?;
                Operand::U8x2(a, b)
            }
            OperandFmt::IMM8X3 => {
                let a = r.get_u8().ok_or(truncated(needed))?;
                let b = r.get_u8().ok_or(truncated(needed))?;
                let c = r.get_u8().ok_or(truncated(needed))?;
                Operand::U8x3(a, b, c)
            }
            OperandFmt::IMM16 => Operand::U16(r.get_u16().ok_or(truncated(needed))?),
            OperandFmt::IMM24 => Operand::U24(r.get_u24().ok_or(truncated(needed))?),
            OperandFmt::IMM32 => Operand::U32(r.get_u32().ok_or(truncated(needed))?),
            OperandFmt::IMMF32 => Operand::F32(r.get_f32().ok_or(truncated(needed))?),
            OperandFmt::CALL => Operand::Call { target: r.get_u24().ok_or(truncated(needed))? },
            OperandFmt::CALLN => {
                let packed = r.get_u8().ok_or(truncated(needed))?;
                let index = r.get_u16_be().ok_or(truncated(needed))?;
                Operand::Native { in_slots: packed >> 2, out_slots: packed & 0x3, index }
            }
            OperandFmt::RET => {
                let params = r.get_u8().ok_or(truncated(needed))?;
                let values = r.get_u8().ok_or(truncated(needed))?;
                Operand::Ret { params, values }
            }
            OperandFmt::BRANCH => {
                let relative = r.get_i16().ok_or(truncated(needed))?;
                let target = (address as i64 + relative as i64 + BRANCH_LENGTH) as u32;
                Operand::Branch { relative, target }
            }
            OperandFmt::ENTER => {
                needed = 4;
                require(needed)?;
                let args = r.get_u8().ok_or(truncated(needed))?;
                let locals = r.get_u8().ok_or(truncated(needed))?;
                let _unused = r.get_u8().ok_or(truncated(needed))?;
                let name_len = r.get_u8().ok_or(truncated(needed))? as usize;
                needed += name_len;
                require(needed)?;
                let raw = r.get_bytes(name_len).ok_or(truncated(needed))?;
                let name = String::from_utf8_lossy(raw).trim_end_matches('\0').to_string();
                let name = if name.is_empty() { format!("anonymous_{address:x}") } else { name };
                Operand::Enter { args, locals, name }
            }
            OperandFmt::SWITCH => {
                needed = 1;
                require(needed)?;
                let count = r.get_u8().ok_or(truncated(needed))? as usize;
                needed += count * 6;
                require(needed)?;
                let mut cases = Vec::with_capacity(count);
                for i in 0..count {
                    let value = r.get_u32().ok_or(truncated(needed))?;
                    let relative = r.get_u16().ok_or(truncated(needed))?;
                    let entry_end = address + 2 + ((i as u32 + 1) * 6);
                    cases.push((value, entry_end.wrapping_add(relative as u32)));
                }
                Operand::Switch(cases)
            }
        };
        Ok(operand)
    }
}

/// Decodes the whole code region, page by page.
///
/// Stops at the declared code length, which the buffer must cover. Within a page, a second consecutive NOP
/// marks the end of that page's code and decoding resumes at the next page.
pub fn decode_code(code: &[u8], code_length: u32) -> Result<Vec<Instruction>, DeyscError> {
    let end = code_length as usize;
    if code.len() < end {
        return Err(DeyscError::CodeShorterThanDeclared { declared: code_length, actual: code.len() });
    }
    let mut decoder = Decoder::new(&code[..end]);
    let mut out = Vec::new();

    let mut page_start = 0usize;
    while page_start < end {
        let page_end = page_start + CODE_PAGE_SIZE;
        decoder.seek(page_start.max(decoder.position()));
        let mut nops = 0usize;

        while decoder.position() < page_end && !decoder.is_eof() {
            let ins = match decoder.decode_next()? {
                Some(ins) => ins,
                None => break,
            };
            if ins.operation == OperationKind::Nop {
                nops += 1;
                if nops >= 2 {
                    break;
                }
            } else {
                nops = 0;
            }
            out.push(ins);
        }

        page_start = page_end;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Instruction {
        Decoder::new(bytes).decode_next().unwrap().unwrap()
    }

    #[test]
    fn branch_target_is_relative_to_instruction_end() {
        let mut code = vec![0u8; 0x10];
        // bz -6 at 0x10
        code.extend_from_slice(&[86, 0xfa, 0xff]);
        let mut d = Decoder::new(&code);
        d.seek(0x10);
        let ins = d.decode_next().unwrap().unwrap();
        assert_eq!(ins.operation, OperationKind::BranchZ);
        assert_eq!(ins.operands, Operand::Branch { relative: -6, target: 0x0d });
        assert_eq!(ins.size, 3);
    }

    #[test]
    fn enter_reads_name_and_falls_back_to_anonymous() {
        let ins = decode_one(&[45, 2, 4, 0, 4, b'f', b'o', b'o', 0]);
        assert_eq!(ins.operands, Operand::Enter { args: 2, locals: 4, name: "foo".into() });
        assert_eq!(ins.size, 9);

        let ins = decode_one(&[45, 0, 0, 0, 0]);
        assert_eq!(ins.operands, Operand::Enter { args: 0, locals: 0, name: "anonymous_0".into() });
    }

    #[test]
    fn native_call_unpacks_slot_counts_and_big_endian_index() {
        let ins = decode_one(&[44, (3 << 2) | 1, 0x01, 0x02]);
        assert_eq!(ins.operands, Operand::Native { in_slots: 3, out_slots: 1, index: 0x0102 });
    }

    #[test]
    fn switch_entries_resolve_against_running_address() {
        // two cases: 7 -> +0, 9 -> +4
        let ins = decode_one(&[98, 2, 7, 0, 0, 0, 0, 0, 9, 0, 0, 0, 4, 0]);
        assert_eq!(ins.operands, Operand::Switch(vec![(7, 8), (9, 18)]));
        assert_eq!(ins.size, 14);
    }

    #[test]
    fn implicit_immediates_come_from_the_opcode() {
        assert_eq!(decode_one(&[109]).operands, Operand::ImplicitInt(-1));
        assert_eq!(decode_one(&[115]).operands, Operand::ImplicitInt(5));
        assert_eq!(decode_one(&[121]).operands, Operand::ImplicitFloat(2.0));
    }

    #[test]
    fn truncated_operand_is_fatal() {
        let err = Decoder::new(&[40, 1, 2]).decode_next().unwrap_err();
        assert!(matches!(err, DeyscError::TruncatedInstruction { address: 0, opcode: 40, needed: 4, remaining: 2 }));
    }

    #[test]
    fn truncated_enter_name_counts_from_operand_start() {
        let err = Decoder::new(&[45, 0, 0, 0, 5, b'a', b'b']).decode_next().unwrap_err();
        assert!(matches!(err, DeyscError::TruncatedInstruction { opcode: 45, needed: 9, remaining: 6, .. }));

        let err = Decoder::new(&[98, 2, 1, 0, 0, 0, 0, 0]).decode_next().unwrap_err();
        assert!(matches!(err, DeyscError::TruncatedInstruction { opcode: 98, needed: 13, remaining: 7, .. }));
    }

    #[test]
    fn unknown_opcode_decodes_without_operands() {
        let ins = decode_one(&[200, 1]);
        assert_eq!(ins.operation, OperationKind::Unknown);
        assert_eq!(ins.size, 1);
    }

    #[test]
    fn double_nop_ends_the_page() {
        let mut code = vec![115, 0, 0, 115];
        code.resize(CODE_PAGE_SIZE, 0);
        code.extend_from_slice(&[116, 43]);
        let instrs = decode_code(&code, code.len() as u32).unwrap();
        let addrs: Vec<u32> = instrs.iter().map(|i| i.address).collect();
        assert_eq!(addrs, vec![0, 1, CODE_PAGE_SIZE as u32, CODE_PAGE_SIZE as u32 + 1]);
    }

    #[test]
    fn declared_length_bounds_decoding() {
        let code = [115, 116, 117, 118];
        let instrs = decode_code(&code, 2).unwrap();
        assert_eq!(instrs.len(), 2);
    }

    #[test]
    fn buffer_shorter_than_declared_length_is_fatal() {
        let code = [45, 0, 0, 0, 0, 46, 0, 0];
        let err = decode_code(&code, code.len() as u32 + 500).unwrap_err();
        assert!(matches!(err, DeyscError::CodeShorterThanDeclared { declared: 508, actual: 8 }));
    }
}
