use super::decode::Instruction;
use super::labels::Names;
use crate::assembler::phases::tokenize;
use crate::isa::{Isa, OpcodeFlags};
use crate::script::{NativeDb, GLOBAL_BLOCK_SHIFT};
use std::collections::{BTreeMap, BTreeSet};

const SLUG_LENGTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRecord {
    pub offset: u32,
    pub text: Vec<u8>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSymbol {
    pub hash: u64,
    pub label: String,
}

fn slug(text: &[u8]) -> String {
    let body: String = text
        .iter()
        .filter_map(|&b| match b {
            b if b.is_ascii_alphanumeric() => Some(char::from(b.to_ascii_lowercase())),
            b' ' => Some('_'),
            _ => None,
        })
        .take(SLUG_LENGTH)
        .collect();

    if body.is_empty() {
        "str".to_owned()
    } else {
        format!("str_{}", body)
    }
}

/// The ids pushed right before a `STRING`, that is the string records the code refers to.
pub fn string_refs(isa: &dyn Isa, insts: &[Instruction]) -> BTreeSet<u32> {
    insts
        .windows(2)
        .filter(|pair| {
            isa.flags(pair[0].opcode).contains(OpcodeFlags::PUSH_CONST)
                && isa.flags(pair[1].opcode).contains(OpcodeFlags::STRING)
        })
        .filter_map(|pair| pair[0].int())
        .map(|id| id as u32)
        .collect()
}

/// Splits the string table into its NUL-terminated records. Empty records, which are mostly
/// page padding, only get a label when the code refers to them.
pub fn strings(bytes: &[u8], referenced: &BTreeSet<u32>, names: &mut Names) -> Vec<StringRecord> {
    let mut records = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let end = bytes[at..]
            .iter()
            .position(|&b| b == 0)
            .map_or(bytes.len(), |len| at + len);
        let text = bytes[at..end].to_vec();
        let offset = at as u32;
        let label = if !text.is_empty() || referenced.contains(&offset) {
            Some(names.claim(&slug(&text)))
        } else {
            None
        };

        records.push(StringRecord {
            offset,
            text,
            label,
        });
        at = end + 1;
    }
    records
}

/// Names every entry of the native table, from the database when it knows the hash.
pub fn natives(hashes: &[u64], db: Option<&dyn NativeDb>, names: &mut Names) -> Vec<NativeSymbol> {
    hashes
        .iter()
        .map(|&hash| {
            let known = db
                .and_then(|db| db.name(hash))
                .filter(|name| tokenize::is_identifier(name));
            let label = match known {
                Some(name) => names.claim(name),
                None => names.claim(&format!("_0x{:016X}", hash)),
            };
            NativeSymbol { hash, label }
        })
        .collect()
}

/// Labels for the statics and args used by `STATIC_*` instructions, keyed by their index in the
/// combined statics segment.
pub fn statics(
    isa: &dyn Isa,
    insts: &[Instruction],
    statics_count: usize,
    args_count: usize,
    names: &mut Names,
) -> BTreeMap<usize, String> {
    let used: BTreeSet<usize> = insts
        .iter()
        .filter(|inst| isa.flags(inst.opcode).contains(OpcodeFlags::STATIC))
        .filter_map(Instruction::int)
        .map(|index| index as usize)
        .filter(|&index| index < statics_count + args_count)
        .collect();

    used.into_iter()
        .map(|index| {
            let name = if index < statics_count {
                names.claim(&format!("static_{}", index))
            } else {
                names.claim(&format!("arg_{}", index - statics_count))
            };
            (index, name)
        })
        .collect()
}

/// Labels for the globals of this script's block used by `GLOBAL_*` instructions, keyed by
/// their offset in the globals segment.
pub fn globals(
    isa: &dyn Isa,
    insts: &[Instruction],
    globals_block: u32,
    globals_count: usize,
    names: &mut Names,
) -> BTreeMap<usize, String> {
    let mask = (1 << GLOBAL_BLOCK_SHIFT) - 1;
    let used: BTreeSet<usize> = insts
        .iter()
        .filter(|inst| isa.flags(inst.opcode).contains(OpcodeFlags::GLOBAL))
        .filter_map(Instruction::int)
        .filter(|&value| (value >> GLOBAL_BLOCK_SHIFT) as u32 == globals_block)
        .map(|value| (value & mask) as usize)
        .filter(|&offset| offset < globals_count)
        .collect();

    used.into_iter()
        .map(|offset| (offset, names.claim(&format!("global_{}", offset))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::NativeMap;

    #[test]
    fn slugs() {
        assert_eq!(slug(b"Hello World!"), "str_hello_world");
        assert_eq!(slug(b"!!!"), "str");
        assert_eq!(slug(&[b'a', 0xFF, b'b']), "str_ab");
        assert_eq!(
            slug(b"a very long string which keeps going"),
            "str_a_very_long_string_which"
        );
    }

    #[test]
    fn string_records() {
        let bytes = b"Hi\0\0Hi\0\0";
        let referenced = [3].iter().copied().collect();
        let records = strings(bytes, &referenced, &mut Names::default());
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.offset, r.text.as_slice(), r.label.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, &b"Hi"[..], Some("str_hi")),
                (3, &b""[..], Some("str")),
                (4, &b"Hi"[..], Some("str_hi_1")),
                (7, &b""[..], None),
            ]
        );
    }

    #[test]
    fn native_names() {
        let mut db = NativeMap::new();
        db.insert(0xAA, "WAIT").insert(0xBB, "not an identifier");
        let natives = natives(&[0xAA, 0xBB], Some(&db as &dyn NativeDb), &mut Names::default());
        assert_eq!(natives[0].label, "WAIT");
        assert_eq!(natives[1].label, "_0x00000000000000BB");
    }
}
