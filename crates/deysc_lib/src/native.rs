use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::DeflateDecoder;
use serde::Deserialize;
use tracing::debug;

use crate::error::DeyscError;
use crate::types::Type;

/// Recovers the catalog hash of entry `index` in a unit's native table.
pub fn unmangle(raw: u64, code_length: u32, index: usize) -> u64 {
    let rotate = (code_length as u64 + index as u64) % 64;
    raw.rotate_left(rotate as u32)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeParam {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeSpec {
    pub name: String,
    pub jhash: Option<String>,
    pub params: Vec<NativeParam>,
    pub result: Type,
}

impl NativeSpec {
    /// Signature inferred from a call site for a native missing from the catalog.
    pub fn synthesize(name: String, in_slots: usize, out_slots: usize) -> Self {
        let params = (0..in_slots)
            .map(|i| NativeParam { name: format!("arg{i}"), ty: Type::unknown() })
            .collect();
        let result = match out_slots {
            0 => Type::Void,
            1 => Type::unknown(),
            n => Type::array(Type::unknown(), n),
        };
        Self { name, jhash: None, params, result }
    }

    pub fn in_slots(&self) -> usize {
        self.params.iter().map(|p| p.ty.stack_size()).sum()
    }

    pub fn out_slots(&self) -> usize {
        self.result.stack_size()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNative {
    pub spec: NativeSpec,
    /// True when the signature was made up from the call site. Such parameter
    /// names carry no information and never rename arguments.
    pub synthesized: bool,
}

#[derive(Deserialize)]
struct RawParam {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Deserialize)]
struct RawSpec {
    name: String,
    #[serde(default)]
    jhash: Option<String>,
    #[serde(default)]
    params: Vec<RawParam>,
    #[serde(default)]
    results: String,
}

fn parse_hash(s: &str) -> Result<u64, DeyscError> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|_| DeyscError::InvalidHash(s.to_string()))
}

/// Native signatures keyed by unmangled 64-bit hash.
#[derive(Debug, Clone, Default)]
pub struct NativeDb {
    table: HashMap<u64, NativeSpec>,
}

impl NativeDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog of the form `{ category: { "0x<hash>": spec } }`.
    pub fn from_json_str(json: &str) -> Result<Self, DeyscError> {
        let raw: BTreeMap<String, BTreeMap<String, RawSpec>> = serde_json::from_str(json)?;
        let mut db = Self::new();
        for (_category, entries) in raw {
            for (hash, entry) in entries {
                let spec = NativeSpec {
                    name: entry.name,
                    jhash: entry.jhash,
                    params: entry
                        .params
                        .into_iter()
                        .map(|p| NativeParam { ty: Type::parse(&p.ty), name: p.name })
                        .collect(),
                    result: Type::parse(&entry.results),
                };
                db.table.insert(parse_hash(&hash)?, spec);
            }
        }
        debug!(natives = db.table.len(), "loaded native catalog");
        Ok(db)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeyscError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Applies a deflate-compressed translation table from disk.
    pub fn load_translations(&mut self, path: impl AsRef<Path>) -> Result<usize, DeyscError> {
        let file = File::open(path)?;
        self.apply_translations(file)
    }

    /// Each line `first:second` (hex) copies the entry known under `second`
    /// to `first`. Returns how many entries were copied.
    pub fn apply_translations<R: Read>(&mut self, compressed: R) -> Result<usize, DeyscError> {
        let reader = BufReader::new(DeflateDecoder::new(compressed));
        let mut copied = 0;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (first, second) = line
                .split_once(':')
                .ok_or_else(|| DeyscError::InvalidTranslation(line.to_string()))?;
            let new_hash = parse_hash(first)?;
            let old_hash = parse_hash(second)?;
            match self.table.get(&old_hash).cloned() {
                Some(spec) => {
                    self.table.insert(new_hash, spec);
                    copied += 1;
                }
                None => debug!(from = %format!("{old_hash:x}"), to = %format!("{new_hash:x}"), "translation source missing"),
            }
        }
        debug!(copied, "applied native translations");
        Ok(copied)
    }

    pub fn insert(&mut self, hash: u64, spec: NativeSpec) {
        self.table.insert(hash, spec);
    }

    pub fn lookup(&self, hash: u64) -> Option<&NativeSpec> {
        self.table.get(&hash)
    }

    /// Catalog entry for `hash`, or a signature synthesized from the call site.
    pub fn resolve(&self, hash: u64, in_slots: usize, out_slots: usize) -> ResolvedNative {
        match self.lookup(hash) {
            Some(spec) => ResolvedNative { spec: spec.clone(), synthesized: false },
            None => ResolvedNative {
                spec: NativeSpec::synthesize(format!("unk_{hash:x}"), in_slots, out_slots),
                synthesized: true,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
