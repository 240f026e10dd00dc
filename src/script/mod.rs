pub mod natives;
pub mod segment;

pub use natives::{NativeDb, NativeMap, NativeTable};
pub use segment::{Segment, SegmentBuilder, SegmentKind, PAGE_LENGTH};

use crate::common;

/// Global offsets carry their block id above this bit.
pub const GLOBAL_BLOCK_SHIFT: u32 = 18;

/// An assembled script, or the input of the disassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub name_hash: u32,
    /// Supplied by whoever packages the script; carried through untouched.
    pub hash: u32,
    pub globals_signature: u32,
    pub globals_block: u32,
    pub code: Segment,
    pub globals: Segment,
    /// The statics, immediately followed by the `args_count` argument slots.
    pub statics: Segment,
    pub args_count: usize,
    pub strings: Segment,
    /// Native hashes as stored, rotated for revisions that rotate them.
    pub natives: Segment,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            name: String::new(),
            name_hash: 0,
            hash: 0,
            globals_signature: 0,
            globals_block: 0,
            code: Segment::empty(SegmentKind::Code),
            globals: Segment::empty(SegmentKind::Global),
            statics: Segment::empty(SegmentKind::Static),
            args_count: 0,
            strings: Segment::empty(SegmentKind::String),
            natives: Segment::empty(SegmentKind::Include),
        }
    }
}

impl Script {
    /// A script with nothing but code, as read from a raw code dump.
    pub fn from_code(code: &[u8], paged: bool) -> Self {
        Script {
            code: Segment::from_bytes(SegmentKind::Code, code, paged),
            ..Default::default()
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.name_hash = common::lowercase_hash(&self.name);
    }

    pub fn code_length(&self) -> usize {
        self.code.byte_len()
    }

    pub fn strings_length(&self) -> usize {
        self.strings.byte_len()
    }

    pub fn globals_length(&self) -> usize {
        self.globals.len()
    }

    /// The number of statics, not counting the argument slots.
    pub fn statics_count(&self) -> usize {
        self.statics.len().saturating_sub(self.args_count)
    }

    pub fn natives_count(&self) -> usize {
        self.natives.len()
    }

    /// The plain native hashes. When `rotated`, undoes the rotation applied when the script was
    /// built.
    pub fn native_hashes(&self, rotated: bool) -> Vec<u64> {
        let stored = self.natives.values();
        if !rotated {
            return stored;
        }
        let code_length = self.code_length();
        stored
            .into_iter()
            .enumerate()
            .map(|(i, stored)| natives::unrotate(stored, i, code_length))
            .collect()
    }
}
