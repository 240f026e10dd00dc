//! The native call table of a script and the rotation which hides its hashes.
//!
//! A `NATIVE` instruction refers to a native by its index in the table. The table itself stores
//! each hash rotated right by `(index + code_length) & 0x3F`, so a table can only be read back
//! with the final code length of the script it came from.

use std::collections::HashMap;
use std::num::ParseIntError;

/// The index operand of `NATIVE` is 16 bits wide.
pub const MAX_NATIVES: usize = 0x1_0000;

fn rotation(index: usize, code_length: usize) -> u32 {
    (index.wrapping_add(code_length) & 0x3F) as u32
}

pub fn rotate(hash: u64, index: usize, code_length: usize) -> u64 {
    hash.rotate_right(rotation(index, code_length))
}

pub fn unrotate(stored: u64, index: usize, code_length: usize) -> u64 {
    stored.rotate_left(rotation(index, code_length))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TooManyNatives;

/// An ordered, duplicate-free list of plain (unrotated) native hashes.
#[derive(Debug, Default, Clone)]
pub struct NativeTable {
    hashes: Vec<u64>,
    index: HashMap<u64, u16>,
}

impl NativeTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds `hash` unless it is already present, and returns its index.
    pub fn add(&mut self, hash: u64) -> Result<u16, TooManyNatives> {
        if let Some(&i) = self.index.get(&hash) {
            return Ok(i);
        }
        if self.hashes.len() >= MAX_NATIVES {
            return Err(TooManyNatives);
        }

        let i = self.hashes.len() as u16;
        self.hashes.push(hash);
        self.index.insert(hash, i);
        Ok(i)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    /// The table as stored in a script whose code is `code_length` bytes long.
    pub fn rotated(&self, code_length: usize) -> Vec<u64> {
        self.hashes
            .iter()
            .enumerate()
            .map(|(i, &hash)| rotate(hash, i, code_length))
            .collect()
    }

    pub fn from_rotated(stored: &[u64], code_length: usize) -> Self {
        let mut table = NativeTable::new();
        for (i, &value) in stored.iter().enumerate() {
            let hash = unrotate(value, i, code_length);
            table.index.entry(hash).or_insert(i as u16);
            table.hashes.push(hash);
        }
        table
    }
}

/// Read-only knowledge about natives, supplied by the caller.
pub trait NativeDb {
    /// A readable name for the native with this (current) hash.
    fn name(&self, hash: u64) -> Option<&str>;

    /// Maps a hash from an older game build to the current one. `None` when the hash is unknown.
    fn translate(&self, hash: u64) -> Option<u64>;
}

/// A `NativeDb` read from a plain text listing. Each line reads
/// `<hash> <name> [<old hash>...]`, where the old hashes all translate to `<hash>`; blank lines
/// and lines starting with `#` are skipped.
#[derive(Debug, Default, Clone)]
pub struct NativeMap {
    names: HashMap<u64, String>,
    translations: HashMap<u64, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MissingName { line: usize },
    BadHash { line: usize, err: ParseIntError },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingName { line } => write!(f, "line {}: missing native name", line),
            ParseError::BadHash { line, err } => write!(f, "line {}: bad hash: {}", line, err),
        }
    }
}

impl std::error::Error for ParseError {}

fn parse_hash(s: &str) -> Result<u64, ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        u64::from_str_radix(s, 16)
    }
}

impl NativeMap {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, hash: u64, name: impl Into<String>) -> &mut Self {
        self.names.insert(hash, name.into());
        self.translations.insert(hash, hash);
        self
    }

    pub fn insert_translation(&mut self, old: u64, new: u64) -> &mut Self {
        self.translations.insert(old, new);
        self
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut map = NativeMap::new();
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut words = line.split_whitespace();
            let hash = words
                .next()
                .map(parse_hash)
                .transpose()
                .map_err(|err| ParseError::BadHash { line: line_no, err })?
                .ok_or(ParseError::MissingName { line: line_no })?;
            let name = words.next().ok_or(ParseError::MissingName { line: line_no })?;
            map.insert(hash, name);
            for old in words {
                let old = parse_hash(old).map_err(|err| ParseError::BadHash { line: line_no, err })?;
                map.insert_translation(old, hash);
            }
        }
        Ok(map)
    }
}

impl NativeDb for NativeMap {
    fn name(&self, hash: u64) -> Option<&str> {
        self.names.get(&hash).map(String::as_str)
    }

    fn translate(&self, hash: u64) -> Option<u64> {
        self.translations.get(&hash).copied()
    }
}
