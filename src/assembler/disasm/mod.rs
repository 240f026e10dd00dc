//! Turns a `Script` back into source the assembler accepts.
//!
//! The code is decoded once into an indexed array of instructions. Every table the printer needs
//! (code labels, string and native symbols, static and global slots) is then derived from that
//! array and the other segments, and the dump is written from those tables alone.

pub mod decode;
pub mod labels;
mod print;
pub mod symbols;

pub use decode::Instruction;

use crate::isa::{Isa, IsaKind};
use crate::script::{NativeDb, Script};
use labels::{CodeLabel, Names};
use log::debug;
use std::collections::BTreeMap;
use std::fmt::Display;
use symbols::{NativeSymbol, StringRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnknownOpcode { offset: usize, opcode: u8 },
    Truncated { offset: usize, needed: usize, available: usize },
    MisalignedTarget { offset: usize, target: u32 },
    TargetOutOfRange { offset: usize, target: u32 },
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnknownOpcode { offset, opcode } => {
                write!(f, "Unknown opcode {:#04X} at {:#08X}", opcode, offset)
            }
            Error::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "Truncated instruction at {:#08X}: needs {} bytes, only {} remain",
                offset, needed, available
            ),
            Error::MisalignedTarget { offset, target } => write!(
                f,
                "Instruction at {:#08X} targets {:#08X}, which is inside another instruction",
                offset, target
            ),
            Error::TargetOutOfRange { offset, target } => write!(
                f,
                "Instruction at {:#08X} targets {:#08X}, past the end of the code",
                offset, target
            ),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Default)]
pub struct DisassemblerOptions<'a> {
    pub native_db: Option<&'a dyn NativeDb>,
    /// Append the address of every instruction as a comment.
    pub addresses: bool,
}

pub struct Disassembly<'a> {
    script: &'a Script,
    isa: &'static dyn Isa,
    addresses: bool,
    instructions: Vec<Instruction>,
    code_labels: BTreeMap<u32, CodeLabel>,
    call_indirect: bool,
    strings: Vec<StringRecord>,
    natives: Vec<NativeSymbol>,
    statics: BTreeMap<usize, String>,
    globals: BTreeMap<usize, String>,
}

impl<'a> Disassembly<'a> {
    pub fn new(script: &'a Script, isa: IsaKind, options: &DisassemblerOptions) -> Result<Self, Error> {
        let isa = isa.isa();
        let instructions = decode::decode(isa, &script.code.flatten())?;

        let mut names = Names::default();
        let hashes = script.native_hashes(isa.layout().rotated_natives);
        let natives = symbols::natives(&hashes, options.native_db, &mut names);
        let strings = symbols::strings(
            &script.strings.flatten(),
            &symbols::string_refs(isa, &instructions),
            &mut names,
        );
        let statics = symbols::statics(
            isa,
            &instructions,
            script.statics_count(),
            script.args_count,
            &mut names,
        );
        let globals = symbols::globals(
            isa,
            &instructions,
            script.globals_block,
            script.globals_length(),
            &mut names,
        );
        let code = labels::infer(isa, &instructions, &mut names);

        debug!(
            "disassembled {} instructions: {} functions, {} jump labels, {} strings, {} natives",
            instructions.len(),
            code.labels.values().filter(|label| label.function).count(),
            code.labels.values().filter(|label| !label.function).count(),
            strings.len(),
            natives.len()
        );

        Ok(Disassembly {
            script,
            isa,
            addresses: options.addresses,
            instructions,
            code_labels: code.labels,
            call_indirect: code.call_indirect,
            strings,
            natives,
            statics,
            globals,
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn label_at(&self, address: u32) -> Option<&str> {
        self.code_labels.get(&address).map(|label| label.name.as_str())
    }

    /// The closest code label at or before `address`.
    pub fn enclosing_label(&self, address: u32) -> Option<&str> {
        self.code_labels
            .range(..=address)
            .next_back()
            .map(|(_, label)| label.name.as_str())
    }

    pub fn functions(&self) -> impl Iterator<Item = (u32, &str)> {
        self.code_labels
            .iter()
            .filter(|(_, label)| label.function)
            .map(|(&address, label)| (address, label.name.as_str()))
    }

    fn string_label(&self, offset: i64) -> Option<&str> {
        let i = self
            .strings
            .binary_search_by_key(&offset, |record| i64::from(record.offset))
            .ok()?;
        self.strings[i].label.as_deref()
    }
}

pub fn disassemble(script: &Script, isa: IsaKind, options: &DisassemblerOptions) -> Result<String, Error> {
    Ok(Disassembly::new(script, isa, options)?.to_string())
}
