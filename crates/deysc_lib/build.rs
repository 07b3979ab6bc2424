use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn workspace_root(crate_dir: &Path) -> PathBuf {
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("crate directory should be <root>/crates/<name>")
        .to_path_buf()
}

fn take_until_paren_close<'a>(s: &'a str) -> Option<&'a str> {
    let s = s.trim();
    let j = s.find(')')?;
    Some(s[..j].trim())
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let root = workspace_root(&manifest_dir);

    let opcode_path = root.join("opcodes").join("script-opcodes.def");
    println!("cargo:rerun-if-changed={}", opcode_path.display());

    let opcode_src = fs::read_to_string(&opcode_path).expect("read script-opcodes.def");

    let mut fmts: Vec<String> = Vec::new();
    let mut ops: Vec<(u8, String, String, String, u8)> = Vec::new();

    for line in opcode_src.lines() {
        let l = line.trim();
        if let Some(rest) = l.strip_prefix("FMT(") {
            let name = match take_until_paren_close(rest) {
                Some(v) => v,
                None => continue,
            };
            if !name.is_empty() {
                fmts.push(name.to_string());
            }
            continue;
        }

        let rest = match l.strip_prefix("DEF(") {
            Some(v) => v,
            None => continue,
        };
        let inner = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        if parts.len() != 5 {
            continue;
        }
        let code: u8 = parts[0].parse().expect("opcode byte");
        let mnemonic = parts[1].to_string();
        let kind = parts[2].to_string();
        let fmt = parts[3].to_string();
        let lanes: u8 = parts[4].parse().expect("opcode lanes");
        assert!(fmts.iter().any(|f| *f == fmt), "opcode {code} uses undeclared format {fmt}");
        ops.push((code, mnemonic, kind, fmt, lanes));
    }

    for (i, (code, ..)) in ops.iter().enumerate() {
        assert_eq!(i, *code as usize, "opcode table must be dense and ordered");
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let out_path = out_dir.join("script_opcodes.rs");

    let mut out = String::new();

    out.push_str("#[allow(non_camel_case_types)]\n");
    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq)]\n");
    out.push_str("pub enum OperandFmt {\n");
    for f in &fmts {
        out.push_str(&format!("    {},\n", f.to_ascii_uppercase()));
    }
    out.push_str("}\n\n");

    out.push_str("#[derive(Debug, Clone, Copy)]\n");
    out.push_str("pub struct OpInfo {\n");
    out.push_str("    pub mnemonic: &'static str,\n");
    out.push_str("    pub kind: super::OperationKind,\n");
    out.push_str("    pub fmt: OperandFmt,\n");
    out.push_str("    pub lanes: u8,\n");
    out.push_str("}\n\n");

    out.push_str("pub const OPCODE_INFO: &[OpInfo] = &[\n");
    for (_, mnemonic, kind, fmt, lanes) in &ops {
        out.push_str(&format!(
            "    OpInfo {{ mnemonic: \"{}\", kind: super::OperationKind::{}, fmt: OperandFmt::{}, lanes: {} }},\n",
            mnemonic,
            kind,
            fmt.to_ascii_uppercase(),
            lanes
        ));
    }
    out.push_str("];\n");

    fs::write(out_path, out).expect("write generated opcode table");
}
