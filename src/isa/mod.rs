//! Opcode tables for the instruction-set revisions of the script VM.
//!
//! Every revision is described by an `OpcodeTable` (mnemonic, operand layout and flags per
//! opcode) plus a `ScriptLayout` saying which segments its scripts carry. The assembler and the
//! disassembler only ever talk to a revision through the `Isa` trait, so both directions share
//! one byte-size rule per opcode.

pub mod five;
pub mod ny;
pub mod operands;
pub mod payne;
pub mod rdr2;
pub mod table;

pub use operands::{DecodeError, Operand, Operands, SwitchForm};
pub use table::{OpcodeDef, OpcodeFlags, OpcodeTable};

use derive_more::Display;
use strum_macros::{EnumIter, EnumString};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString)]
pub enum IsaKind {
    #[display(fmt = "five")]
    #[strum(serialize = "five", serialize = "gta5")]
    Five,
    #[display(fmt = "ny")]
    #[strum(serialize = "ny", serialize = "gta4")]
    Ny,
    #[display(fmt = "rdr2")]
    #[strum(serialize = "rdr2")]
    Rdr2,
    #[display(fmt = "payne")]
    #[strum(serialize = "payne", serialize = "mp3")]
    Payne,
}

impl Default for IsaKind {
    fn default() -> Self {
        IsaKind::Five
    }
}

impl IsaKind {
    pub fn isa(self) -> &'static dyn Isa {
        match self {
            IsaKind::Five => five::Five::get(),
            IsaKind::Ny => ny::Ny::get(),
            IsaKind::Rdr2 => rdr2::Rdr2::get(),
            IsaKind::Payne => payne::Payne::get(),
        }
    }
}

/// Which segments a script of a given revision carries, and whether its code is paged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLayout {
    /// Code is split in pages and instructions never cross a page boundary.
    pub paged_code: bool,
    /// Strings live in their own paged segment and are pushed by id.
    pub string_table: bool,
    /// Native hashes live in their own table and are called by index.
    pub native_table: bool,
    /// The native table stores every hash rotated by its index and the code length.
    pub rotated_natives: bool,
}

pub trait Isa: Sync + Send {
    fn kind(&self) -> IsaKind;

    fn table(&self) -> &OpcodeTable;

    fn layout(&self) -> ScriptLayout;

    fn lookup(&self, mnemonic: &str) -> Option<u8> {
        self.table().lookup(mnemonic)
    }

    fn def(&self, opcode: u8) -> Option<&OpcodeDef> {
        self.table().get(opcode)
    }

    fn mnemonic(&self, opcode: u8) -> Option<&'static str> {
        self.def(opcode).map(|def| def.mnemonic)
    }

    fn flags(&self, opcode: u8) -> OpcodeFlags {
        self.def(opcode)
            .map(|def| def.flags)
            .unwrap_or_else(OpcodeFlags::empty)
    }

    /// The byte size of every instruction with this opcode, or `Some(0)` when the size depends
    /// on the operand bytes. `None` for opcodes the revision does not define.
    fn constant_byte_size(&self, opcode: u8) -> Option<usize> {
        self.def(opcode)
            .map(|def| def.operands.fixed_len().map_or(0, |len| len + 1))
    }

    /// The length of the instruction starting at `code[0]`. This is the single rule both the
    /// encoder and the decoder rely on.
    fn byte_size(&self, code: &[u8]) -> Result<usize, DecodeError> {
        let opcode = *code.first().ok_or(DecodeError::Truncated {
            needed: 1,
            available: 0,
        })?;
        let def = self.def(opcode).ok_or(DecodeError::UnknownOpcode(opcode))?;
        let len = def.operands.byte_len(&code[1..])? + 1;
        if len > code.len() {
            return Err(DecodeError::Truncated {
                needed: len,
                available: code.len(),
            });
        }
        Ok(len)
    }
}
