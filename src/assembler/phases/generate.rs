use super::parse::{Body, Operand, Statement};
use super::types::{Loc, Located};
use crate::common;
use crate::isa::{operands, Isa, IsaKind, OpcodeFlags, Operands, SwitchForm};
use crate::script::natives::{NativeDb, NativeTable, MAX_NATIVES};
use crate::script::segment::{self, SegmentBuilder, SegmentKind};
use crate::script::GLOBAL_BLOCK_SHIFT;
use derive_more::Display;
use enum_map::EnumMap;
use log::{debug, trace};
use std::collections::HashMap;

/// `.global_block` ids fit in the bits above the global offset.
pub const MAX_GLOBAL_BLOCK: i64 = 0x3F;
pub const MAX_SWITCH_CASES: usize = 0xFF;
/// The longest name embedded in an `ENTER`, not counting the NUL.
pub const MAX_ENTER_NAME: usize = 254;
/// The longest inline string, counting the NUL.
pub const MAX_INLINE_STRING: usize = 0xFF;
/// The longest inline string with a `u16` length escape, counting the NUL.
pub const MAX_LONG_INLINE_STRING: usize = 0xFFFF;

#[derive(Debug, Display, Clone, Copy, PartialEq)]
pub enum Constant {
    #[display(fmt = "{}", _0)]
    Int(i64),
    #[display(fmt = "{:?}", _0)]
    Float(f32),
}

/// The encoding of a value written into a segment.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    #[display(fmt = "u8")]
    U8,
    #[display(fmt = "u16")]
    U16,
    #[display(fmt = "s16")]
    S16,
    #[display(fmt = "u24")]
    U24,
    /// Accepts both signed and unsigned 32-bit values.
    #[display(fmt = "u32")]
    U32,
    #[display(fmt = "f32")]
    F32,
    #[display(fmt = "int64")]
    I64,
    /// The big-endian index operand of `NATIVE`.
    #[display(fmt = "native index")]
    NativeIndex,
    /// A 10-bit native index sharing its first byte with the given argument and return counts.
    #[display(fmt = "packed native index")]
    PackedNativeIndex(u8),
    /// A code address inside the given 64 KiB bank, as its low 16 bits.
    #[display(fmt = "call bank {}", _0)]
    CallBank(u8),
}

impl Field {
    pub fn width(self) -> usize {
        match self {
            Field::U8 => 1,
            Field::U16
            | Field::S16
            | Field::NativeIndex
            | Field::PackedNativeIndex(_)
            | Field::CallBank(_) => 2,
            Field::U24 => 3,
            Field::U32 | Field::F32 => 4,
            Field::I64 => 8,
        }
    }

    /// The bytes of `value`, or `None` when it does not fit.
    pub fn encode(self, value: Constant) -> Option<Vec<u8>> {
        let int = |lo: i64, hi: i64| match value {
            Constant::Int(v) if lo <= v && v <= hi => Some(v),
            _ => None,
        };

        Some(match self {
            Field::U8 => vec![int(0, 0xFF)? as u8],
            Field::U16 => (int(0, 0xFFFF)? as u16).to_le_bytes().to_vec(),
            Field::S16 => (int(i16::MIN.into(), i16::MAX.into())? as i16)
                .to_le_bytes()
                .to_vec(),
            Field::U24 => (int(0, 0xFF_FFFF)? as u32).to_le_bytes()[..3].to_vec(),
            Field::U32 => (int(i32::MIN.into(), u32::MAX.into())? as u32)
                .to_le_bytes()
                .to_vec(),
            Field::I64 => int(i64::MIN, i64::MAX)?.to_le_bytes().to_vec(),
            Field::F32 => match value {
                Constant::Float(f) => f,
                Constant::Int(v) => v as f32,
            }
            .to_le_bytes()
            .to_vec(),
            Field::NativeIndex => (int(0, 0xFFFF)? as u16).to_be_bytes().to_vec(),
            Field::PackedNativeIndex(counts) => {
                let index = int(0, operands::PACKED_NATIVE_MAX_INDEX.into())?;
                vec![((index >> 8) as u8) << 6 | counts, index as u8]
            }
            Field::CallBank(bank) => {
                let base = i64::from(bank) << 16;
                (int(base, base | 0xFFFF)? as u16).to_le_bytes().to_vec()
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// `target - (at + 2)` as an `s16`, `target` being a code label.
    RelativeInt16,
    /// The address of a code label, 24 bits wide.
    AbsoluteUInt24,
    /// The address of a code label, 32 bits wide.
    AbsoluteUInt32,
    /// The low 16 bits of a code label inside the given bank.
    BankedUInt16(u8),
    /// The value of a constant or of a label in any segment.
    Value(Field),
}

impl PatchKind {
    pub fn width(self) -> usize {
        match self {
            PatchKind::RelativeInt16 | PatchKind::BankedUInt16(_) => 2,
            PatchKind::AbsoluteUInt24 => 3,
            PatchKind::AbsoluteUInt32 => 4,
            PatchKind::Value(field) => field.width(),
        }
    }
}

/// A write into `segment` at byte offset `at`, deferred until every symbol is known.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub segment: SegmentKind,
    pub at: usize,
    pub kind: PatchKind,
    pub target: Located<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Symbol {
    /// `offset` is in addressing units of `segment`, or the table index for natives.
    Label { segment: SegmentKind, offset: usize },
    Constant(Constant),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: Option<String>,
    pub hash: Option<u32>,
    pub globals_block: Option<u32>,
    pub globals_signature: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    UnknownMnemonic(String),
    UnknownDirective(String),
    InstructionOutsideCode(String),
    DirectiveNotAllowed { directive: String, segment: SegmentKind },
    SegmentUnavailable { segment: SegmentKind, isa: IsaKind },
    DuplicateSymbol(String),
    DuplicateDirective(String),
    GlobalBlockNotSet,
    WrongOperandCount { expected: &'static str, found: usize },
    UnexpectedOperand(&'static str),
    UndefinedConstant(String),
    CodeLabelNotAllowed(String),
    OutOfRange { value: Constant, field: Field },
    TooManySwitchCases(usize),
    TooManyNatives,
    TooManyValues { count: usize, remaining: usize },
    StringTooLong { len: usize, max: usize },
    Segment(segment::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnknownMnemonic(name) => write!(f, "unknown mnemonic '{}'", name),
            Error::UnknownDirective(name) => write!(f, "unknown directive '.{}'", name),
            Error::InstructionOutsideCode(name) => {
                write!(f, "instruction '{}' outside of the code segment", name)
            }
            Error::DirectiveNotAllowed { directive, segment } => {
                write!(f, "'.{}' is not allowed in the {} segment", directive, segment)
            }
            Error::SegmentUnavailable { segment, isa } => {
                write!(f, "the {} isa has no {} segment", isa, segment)
            }
            Error::DuplicateSymbol(name) => write!(f, "duplicate definition of '{}'", name),
            Error::DuplicateDirective(name) => write!(f, "'.{}' can only be given once", name),
            Error::GlobalBlockNotSet => write!(f, "'.global' needs a prior '.global_block'"),
            Error::WrongOperandCount { expected, found } => {
                write!(f, "expected {} operands, found {}", expected, found)
            }
            Error::UnexpectedOperand(expected) => write!(f, "expected {}", expected),
            Error::UndefinedConstant(name) => write!(f, "undefined constant '{}'", name),
            Error::CodeLabelNotAllowed(name) => {
                write!(f, "code label '@{}' cannot be used here", name)
            }
            Error::OutOfRange { value, field } => {
                write!(f, "value {} is out of range for {}", value, field)
            }
            Error::TooManySwitchCases(count) => write!(
                f,
                "{} switch cases, at most {} are allowed",
                count, MAX_SWITCH_CASES
            ),
            Error::TooManyNatives => write!(f, "too many natives"),
            Error::TooManyValues { count, remaining } => write!(
                f,
                "'dup' expands to {} values, but the segment only has room for {}",
                count, remaining
            ),
            Error::StringTooLong { len, max } => {
                write!(f, "string of {} bytes is longer than {}", len, max)
            }
            Error::Segment(err) => write!(f, "{}", err),
        }
    }
}

impl From<segment::Error> for Error {
    fn from(err: segment::Error) -> Self {
        Error::Segment(err)
    }
}

/// Everything the resolver needs to finish a script.
pub struct Generated {
    pub isa: &'static dyn Isa,
    pub header: Header,
    pub segments: EnumMap<SegmentKind, SegmentBuilder>,
    pub natives: NativeTable,
    pub symbols: HashMap<String, Symbol>,
    pub patches: Vec<PatchRequest>,
    pub warnings: Vec<Located<String>>,
}

pub struct Options<'a> {
    pub isa: IsaKind,
    pub include_function_names: bool,
    pub native_db: Option<&'a dyn NativeDb>,
}

/// An encoded instruction or data value whose symbolic parts are still zero.
#[derive(Default)]
struct Encoding {
    bytes: Vec<u8>,
    /// Offsets are relative to the start of `bytes`.
    patches: Vec<(usize, PatchKind, Located<String>)>,
}

impl Encoding {
    fn put(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn defer(&mut self, kind: PatchKind, target: Located<String>) {
        self.patches.push((self.bytes.len(), kind, target));
        self.bytes.resize(self.bytes.len() + kind.width(), 0);
    }
}

struct Context<'a> {
    isa: &'static dyn Isa,
    options: &'a Options<'a>,
    segment: SegmentKind,
    segments: EnumMap<SegmentKind, SegmentBuilder>,
    natives: NativeTable,
    symbols: HashMap<String, Symbol>,
    /// Data labels waiting for the next value of the current segment.
    pending: Vec<Located<String>>,
    /// The closest code label at or before the current code offset.
    last_code_label: Option<String>,
    patches: Vec<PatchRequest>,
    header: Header,
    warnings: Vec<Located<String>>,
}

fn check_count(ops: &[Located<Operand>], expected: &'static str, ok: bool) -> Result<(), Error> {
    if ok {
        Ok(())
    } else {
        Err(Error::WrongOperandCount {
            expected,
            found: ops.len(),
        })
    }
}

impl<'a> Context<'a> {
    fn new(options: &'a Options<'a>) -> Self {
        let isa = options.isa.isa();
        let layout = isa.layout();
        let segments = EnumMap::from(|kind| {
            let paged = match kind {
                SegmentKind::Code => layout.paged_code,
                SegmentKind::Global | SegmentKind::String => true,
                SegmentKind::Static | SegmentKind::Arg | SegmentKind::Include => false,
            };
            SegmentBuilder::new(kind, paged)
        });

        Context {
            isa,
            options,
            segment: SegmentKind::Code,
            segments,
            natives: NativeTable::new(),
            symbols: HashMap::new(),
            pending: Vec::new(),
            last_code_label: None,
            patches: Vec::new(),
            header: Header::default(),
            warnings: Vec::new(),
        }
    }

    fn has_segment(&self, kind: SegmentKind) -> bool {
        let layout = self.isa.layout();
        match kind {
            SegmentKind::String => layout.string_table,
            SegmentKind::Include => layout.native_table,
            _ => true,
        }
    }

    /// The offset the next value of `kind` would get, ignoring padding.
    fn current_offset(&self, kind: SegmentKind) -> usize {
        match kind {
            SegmentKind::Include => self.natives.len(),
            _ => self.segments[kind].len(),
        }
    }

    fn is_defined(&self, name: &str) -> bool {
        self.symbols.contains_key(&symbol_key(name))
            || self.pending.iter().any(|p| common::eq_ignore_case(p.get(), name))
    }

    fn define(&mut self, name: &Located<String>, symbol: Symbol) -> Result<(), Located<Error>> {
        if self.is_defined(name.get()) {
            return Err(name.transfer(Error::DuplicateSymbol(name.get().clone())));
        }
        trace!("{} = {:?}", name.get(), symbol);
        self.symbols.insert(symbol_key(name.get()), symbol);
        Ok(())
    }

    fn bind_pending(&mut self, offset: usize) {
        let segment = self.segment;
        for name in std::mem::take(&mut self.pending) {
            trace!("{} = {} label at {}", name.get(), segment, offset);
            self.symbols
                .insert(symbol_key(name.get()), Symbol::Label { segment, offset });
        }
    }

    fn flush_pending(&mut self) {
        self.bind_pending(self.current_offset(self.segment));
    }

    fn label(&mut self, name: &Located<String>) -> Result<(), Located<Error>> {
        if self.segment == SegmentKind::Code {
            let offset = self.segments[SegmentKind::Code].byte_len();
            self.define(
                name,
                Symbol::Label {
                    segment: SegmentKind::Code,
                    offset,
                },
            )?;
            self.last_code_label = Some(name.get().clone());
            Ok(())
        } else {
            if self.is_defined(name.get()) {
                return Err(name.transfer(Error::DuplicateSymbol(name.get().clone())));
            }
            self.pending.push(name.clone());
            Ok(())
        }
    }

    fn constant(&self, name: &str) -> Option<Constant> {
        match self.symbols.get(&symbol_key(name)) {
            Some(Symbol::Constant(value)) => Some(*value),
            _ => None,
        }
    }

    /// A value which must be known right now, such as a `.const` value or a `dup` count.
    fn immediate(&self, op: &Located<Operand>) -> Result<Constant, Located<Error>> {
        match op.get() {
            Operand::Integer(v) => Ok(Constant::Int(*v)),
            Operand::Float(v) => Ok(Constant::Float(*v)),
            Operand::Identifier(name) => self
                .constant(name)
                .ok_or_else(|| op.transfer(Error::UndefinedConstant(name.clone()))),
            _ => Err(op.transfer(Error::UnexpectedOperand("a number or a constant"))),
        }
    }

    fn immediate_int(&self, op: &Located<Operand>, field: Field) -> Result<i64, Located<Error>> {
        match self.immediate(op)? {
            Constant::Int(v) if field.encode(Constant::Int(v)).is_some() => Ok(v),
            value => Err(op.transfer(Error::OutOfRange { value, field })),
        }
    }

    /// Writes an operand which may name a symbol defined later.
    fn field(
        &self,
        enc: &mut Encoding,
        op: &Located<Operand>,
        field: Field,
    ) -> Result<(), Located<Error>> {
        let value = match op.get() {
            Operand::Integer(v) => Constant::Int(*v),
            Operand::Float(v) => Constant::Float(*v),
            Operand::Identifier(name) => match self.constant(name) {
                Some(value) => value,
                None => {
                    enc.defer(PatchKind::Value(field), op.transfer(name.clone()));
                    return Ok(());
                }
            },
            Operand::LabelRef(name) => {
                let kind = match field {
                    Field::U24 => PatchKind::AbsoluteUInt24,
                    Field::U32 => PatchKind::AbsoluteUInt32,
                    Field::CallBank(bank) => PatchKind::BankedUInt16(bank),
                    _ => return Err(op.transfer(Error::CodeLabelNotAllowed(name.clone()))),
                };
                enc.defer(kind, op.transfer(name.clone()));
                return Ok(());
            }
            _ => return Err(op.transfer(Error::UnexpectedOperand("a number or a symbol"))),
        };

        let bytes = field
            .encode(value)
            .ok_or_else(|| op.transfer(Error::OutOfRange { value, field }))?;
        enc.put(&bytes);
        Ok(())
    }

    fn relative(&self, enc: &mut Encoding, op: &Located<Operand>) -> Result<(), Located<Error>> {
        match op.get() {
            Operand::LabelRef(name) => {
                enc.defer(PatchKind::RelativeInt16, op.transfer(name.clone()));
                Ok(())
            }
            _ => Err(op.transfer(Error::UnexpectedOperand("a code label"))),
        }
    }

    fn enter_name(&self, loc: Option<Loc>, ops: &[Located<Operand>]) -> Result<Option<Vec<u8>>, Located<Error>> {
        let name = match ops.get(2) {
            Some(op) => match op.get() {
                Operand::String(name) if name.is_empty() => None,
                Operand::String(name) => Some(name.clone()),
                _ => return Err(op.transfer(Error::UnexpectedOperand("a function name string"))),
            },
            None if self.options.include_function_names => {
                self.last_code_label.clone().map(String::into_bytes)
            }
            None => None,
        };

        Ok(name.map(|mut name| {
            if name.len() > MAX_ENTER_NAME {
                trace!(
                    "@{:?}: cutting function name '{}' to {} bytes",
                    loc,
                    common::escape(&name),
                    MAX_ENTER_NAME
                );
                name.truncate(MAX_ENTER_NAME);
            }
            name
        }))
    }

    fn encode(
        &self,
        loc: Option<Loc>,
        opcode: u8,
        layout: Operands,
        ops: &[Located<Operand>],
    ) -> Result<Encoding, Located<Error>> {
        let located = |err| Located::with_option_loc(loc, err);
        let count = |expected, ok| check_count(ops, expected, ok).map_err(located);

        let mut enc = Encoding::default();
        enc.put(&[opcode]);
        match layout {
            Operands::None => count("0", ops.is_empty())?,
            Operands::U8 | Operands::U16 | Operands::S16 | Operands::U24 | Operands::U32
            | Operands::F32 => {
                count("1", ops.len() == 1)?;
                let field = match layout {
                    Operands::U8 => Field::U8,
                    Operands::U16 => Field::U16,
                    Operands::S16 => Field::S16,
                    Operands::U24 => Field::U24,
                    Operands::U32 => Field::U32,
                    _ => Field::F32,
                };
                self.field(&mut enc, &ops[0], field)?;
            }
            Operands::U8x2 | Operands::U8x3 => {
                let n = if layout == Operands::U8x2 { 2 } else { 3 };
                count(if n == 2 { "2" } else { "3" }, ops.len() == n)?;
                for op in ops {
                    self.field(&mut enc, op, Field::U8)?;
                }
            }
            Operands::Rel16 => {
                count("1", ops.len() == 1)?;
                self.relative(&mut enc, &ops[0])?;
            }
            Operands::Abs24 => {
                count("1", ops.len() == 1)?;
                self.field(&mut enc, &ops[0], Field::U24)?;
            }
            Operands::Abs32 => {
                count("1", ops.len() == 1)?;
                self.field(&mut enc, &ops[0], Field::U32)?;
            }
            Operands::CallBank(bank) => {
                count("1", ops.len() == 1)?;
                self.field(&mut enc, &ops[0], Field::CallBank(bank))?;
            }
            Operands::Enter { named } => {
                if named {
                    count("2 or 3", ops.len() == 2 || ops.len() == 3)?;
                } else {
                    count("2", ops.len() == 2)?;
                }
                self.field(&mut enc, &ops[0], Field::U8)?;
                self.field(&mut enc, &ops[1], Field::U16)?;
                if named {
                    match self.enter_name(loc, ops)? {
                        Some(name) => {
                            enc.put(&[(name.len() + 1) as u8]);
                            enc.put(&name);
                            enc.put(&[0]);
                        }
                        None => enc.put(&[0]),
                    }
                }
            }
            Operands::Native | Operands::NativePacked | Operands::NativeHash => {
                count("3", ops.len() == 3)?;
                let argc = self.immediate_int(&ops[0], Field::U8)?;
                let retc = self.immediate_int(&ops[1], Field::U8)?;
                let (max_args, max_returns) = match layout {
                    Operands::Native => (operands::NATIVE_MAX_ARGS, operands::NATIVE_MAX_RETURNS),
                    Operands::NativePacked => (
                        operands::PACKED_NATIVE_MAX_ARGS,
                        operands::PACKED_NATIVE_MAX_RETURNS,
                    ),
                    _ => (u8::MAX, u8::MAX),
                };
                for (op, value, max) in [(&ops[0], argc, max_args), (&ops[1], retc, max_returns)] {
                    if value > i64::from(max) {
                        return Err(op.transfer(Error::OutOfRange {
                            value: Constant::Int(value),
                            field: Field::U8,
                        }));
                    }
                }

                if layout == Operands::Native {
                    enc.put(&[operands::native_byte(argc as u8, retc as u8)]);
                    self.field(&mut enc, &ops[2], Field::NativeIndex)?;
                } else if layout == Operands::NativePacked {
                    let counts = operands::packed_native_byte(argc as u8, retc as u8);
                    self.field(&mut enc, &ops[2], Field::PackedNativeIndex(counts))?;
                } else {
                    enc.put(&[argc as u8, retc as u8]);
                    match ops[2].get() {
                        Operand::Identifier(name) => {
                            enc.put(&common::lowercase_hash(name).to_le_bytes())
                        }
                        _ => self.field(&mut enc, &ops[2], Field::U32)?,
                    }
                }
            }
            Operands::Switch(form) => {
                if ops.len() > MAX_SWITCH_CASES {
                    return Err(located(Error::TooManySwitchCases(ops.len())));
                }
                enc.put(&[ops.len() as u8]);
                for op in ops {
                    match op.get() {
                        Operand::Case(value, target) => {
                            self.field(&mut enc, &op.transfer((**value).clone()), Field::U32)?;
                            let target = op.transfer(target.clone());
                            enc.defer(
                                match form {
                                    SwitchForm::Relative16 => PatchKind::RelativeInt16,
                                    SwitchForm::Absolute32 => PatchKind::AbsoluteUInt32,
                                },
                                target,
                            );
                        }
                        _ => return Err(op.transfer(Error::UnexpectedOperand("a 'value:@label' case"))),
                    }
                }
            }
            Operands::InlineString | Operands::InlineStringU32 | Operands::InlineStringVar => {
                count("1", ops.len() == 1)?;
                let s = match ops[0].get() {
                    Operand::String(s) => s,
                    _ => return Err(ops[0].transfer(Error::UnexpectedOperand("a string"))),
                };
                let len = s.len() + 1;
                let max = match layout {
                    Operands::InlineString => MAX_INLINE_STRING,
                    Operands::InlineStringVar => MAX_LONG_INLINE_STRING,
                    _ => u32::MAX as usize,
                };
                if len > max {
                    return Err(ops[0].transfer(Error::StringTooLong { len, max }));
                }
                match layout {
                    Operands::InlineStringU32 => enc.put(&(len as u32).to_le_bytes()),
                    Operands::InlineStringVar if len > MAX_INLINE_STRING => {
                        enc.put(&[0]);
                        enc.put(&(len as u16).to_le_bytes());
                    }
                    _ => enc.put(&[len as u8]),
                }
                enc.put(s);
                enc.put(&[0]);
            }
        }
        Ok(enc)
    }

    /// Pads to the next page when the instruction would not fit in the current one. Every
    /// instruction but control flow and `NOP` also needs a spare byte after it.
    fn page_break(&mut self, len: usize, flags: OpcodeFlags) {
        let code = &mut self.segments[SegmentKind::Code];
        if !code.is_paged() {
            return;
        }

        let spare = if flags.intersects(OpcodeFlags::CONTROL_FLOW | OpcodeFlags::NOP) {
            0
        } else {
            1
        };
        let remaining = code.page_remaining();
        if len + spare <= remaining {
            return;
        }

        trace!(
            "code: {} byte instruction at {} crosses a page, padding {} bytes",
            len,
            code.byte_len(),
            remaining
        );
        let at = code.byte_len();
        code.pad(remaining);
        if let Some(jump) = self.isa.lookup("J").filter(|_| remaining > 3) {
            let rel = ((remaining - 3) as i16).to_le_bytes();
            code.bytes_mut()[at..at + 3].copy_from_slice(&[jump, rel[0], rel[1]]);
        }
    }

    fn instruction(
        &mut self,
        loc: Option<Loc>,
        mnemonic: &str,
        ops: &[Located<Operand>],
    ) -> Result<(), Located<Error>> {
        let located = |err| Located::with_option_loc(loc, err);

        if self.segment != SegmentKind::Code {
            return Err(located(Error::InstructionOutsideCode(mnemonic.to_owned())));
        }
        let def = self
            .isa
            .lookup(mnemonic)
            .and_then(|opcode| self.isa.def(opcode))
            .ok_or_else(|| located(Error::UnknownMnemonic(mnemonic.to_owned())))?;

        let enc = self.encode(loc, def.opcode, def.operands, ops)?;
        self.page_break(enc.bytes.len(), def.flags);
        let at = self.segments[SegmentKind::Code]
            .append(&enc.bytes)
            .map_err(|err| located(err.into()))?;
        self.push_patches(SegmentKind::Code, at, enc);
        Ok(())
    }

    fn push_patches(&mut self, segment: SegmentKind, at: usize, enc: Encoding) {
        for (offset, kind, target) in enc.patches {
            self.patches.push(PatchRequest {
                segment,
                at: at + offset,
                kind,
                target,
            });
        }
    }

    /// The values the current segment can still take.
    fn remaining(&self) -> usize {
        match self.segment {
            SegmentKind::Include => MAX_NATIVES.saturating_sub(self.natives.len()),
            kind => self.segments[kind].remaining(),
        }
    }

    /// Expands `dup` groups into a flat list of values. A group is sized before it is expanded,
    /// and refused when the list would outgrow `limit`.
    fn flatten<'o>(
        &self,
        ops: &'o [Located<Operand>],
        out: &mut Vec<&'o Located<Operand>>,
        limit: usize,
    ) -> Result<(), Located<Error>> {
        for op in ops {
            match op.get() {
                Operand::Dup(count, values) => {
                    let count = self.immediate_int(&op.transfer((**count).clone()), Field::U32)?;
                    if count < 0 {
                        return Err(op.transfer(Error::OutOfRange {
                            value: Constant::Int(count),
                            field: Field::U32,
                        }));
                    }
                    let room = limit.saturating_sub(out.len());
                    let mut once = Vec::new();
                    self.flatten(values, &mut once, room)?;
                    let total = once.len().saturating_mul(count as usize);
                    if total > room {
                        return Err(op.transfer(Error::TooManyValues {
                            count: total,
                            remaining: room,
                        }));
                    }
                    for _ in 0..count {
                        out.extend_from_slice(&once);
                    }
                }
                _ => out.push(op),
            }
        }
        Ok(())
    }

    fn data(&mut self, directive: &str, field: Field, ops: &[Located<Operand>]) -> Result<(), Located<Error>> {
        let mut values = Vec::new();
        self.flatten(ops, &mut values, self.remaining())?;
        for op in values {
            let mut enc = Encoding::default();
            self.field(&mut enc, op, field)?;
            let kind = self.segment;
            let builder = &mut self.segments[kind];
            let at = builder.append(&enc.bytes).map_err(|err| op.transfer(err.into()))?;
            let byte_at = at * kind.unit();
            trace!(".{} in {} at {}", directive, kind, at);
            self.bind_pending(at);
            self.push_patches(kind, byte_at, enc);
        }
        Ok(())
    }

    fn strings(&mut self, ops: &[Located<Operand>]) -> Result<(), Located<Error>> {
        let mut values = Vec::new();
        self.flatten(ops, &mut values, self.remaining())?;
        for op in values {
            match op.get() {
                Operand::String(s) => {
                    let at = self.segments[SegmentKind::String]
                        .string(s)
                        .map_err(|err| op.transfer(err.into()))?;
                    self.bind_pending(at);
                }
                _ => return Err(op.transfer(Error::UnexpectedOperand("a string"))),
            }
        }
        Ok(())
    }

    fn natives(&mut self, ops: &[Located<Operand>]) -> Result<(), Located<Error>> {
        let mut values = Vec::new();
        self.flatten(ops, &mut values, self.remaining())?;
        for op in values {
            let hash = match self.immediate(op)? {
                Constant::Int(v) => v as u64,
                value => {
                    return Err(op.transfer(Error::OutOfRange {
                        value,
                        field: Field::I64,
                    }))
                }
            };
            let hash = match self.options.native_db {
                Some(db) => match db.translate(hash) {
                    Some(current) => current,
                    None => {
                        self.warnings
                            .push(op.transfer(format!("unknown native hash 0x{:016X}", hash)));
                        hash
                    }
                },
                None => hash,
            };
            let index = self
                .natives
                .add(hash)
                .map_err(|_| op.transfer(Error::TooManyNatives))?;
            self.bind_pending(usize::from(index));
        }
        Ok(())
    }

    fn one_shot<T>(
        slot: &mut Option<T>,
        loc: Option<Loc>,
        directive: &str,
        value: T,
    ) -> Result<(), Located<Error>> {
        if slot.is_some() {
            return Err(Located::with_option_loc(
                loc,
                Error::DuplicateDirective(directive.to_owned()),
            ));
        }
        *slot = Some(value);
        Ok(())
    }

    fn single<'o>(
        loc: Option<Loc>,
        ops: &'o [Located<Operand>],
    ) -> Result<&'o Located<Operand>, Located<Error>> {
        match ops {
            [op] => Ok(op),
            _ => Err(Located::with_option_loc(
                loc,
                Error::WrongOperandCount {
                    expected: "1",
                    found: ops.len(),
                },
            )),
        }
    }

    fn directive(
        &mut self,
        loc: Option<Loc>,
        name: &str,
        ops: &[Located<Operand>],
    ) -> Result<(), Located<Error>> {
        let located = |err| Located::with_option_loc(loc, err);
        let directive = name.to_lowercase();

        if let Some(kind) = SegmentKind::from_directive(&directive) {
            check_count(ops, "0", ops.is_empty()).map_err(located)?;
            if !self.has_segment(kind) {
                return Err(located(Error::SegmentUnavailable {
                    segment: kind,
                    isa: self.isa.kind(),
                }));
            }
            if kind == SegmentKind::Global && self.header.globals_block.is_none() {
                return Err(located(Error::GlobalBlockNotSet));
            }
            self.flush_pending();
            self.segment = kind;
            return Ok(());
        }

        let allowed = |segments: &[SegmentKind]| {
            if segments.contains(&self.segment) {
                Ok(())
            } else {
                Err(located(Error::DirectiveNotAllowed {
                    directive: directive.clone(),
                    segment: self.segment,
                }))
            }
        };
        const VALUES: &[SegmentKind] = &[SegmentKind::Global, SegmentKind::Static, SegmentKind::Arg];

        match directive.as_str() {
            "int" => {
                allowed(VALUES)?;
                self.data(&directive, Field::U32, ops)
            }
            "int64" => {
                allowed(VALUES)?;
                self.data(&directive, Field::I64, ops)
            }
            "float" => {
                allowed(VALUES)?;
                self.data(&directive, Field::F32, ops)
            }
            "str" => {
                allowed(&[SegmentKind::String])?;
                self.strings(ops)
            }
            "native" => {
                allowed(&[SegmentKind::Include])?;
                self.natives(ops)
            }
            "const" => {
                let (name, value) = match ops {
                    [name, value] => (name, value),
                    _ => {
                        return Err(located(Error::WrongOperandCount {
                            expected: "2",
                            found: ops.len(),
                        }))
                    }
                };
                let name = match name.get() {
                    Operand::Identifier(id) => name.transfer(id.clone()),
                    _ => return Err(name.transfer(Error::UnexpectedOperand("a constant name"))),
                };
                let value = self.immediate(value)?;
                self.define(&name, Symbol::Constant(value))
            }
            "script_name" => {
                let op = Self::single(loc, ops)?;
                let value = match op.get() {
                    Operand::Identifier(s) => s.clone(),
                    Operand::String(s) => String::from_utf8(s.clone())
                        .map_err(|_| op.transfer(Error::UnexpectedOperand("a UTF-8 script name")))?,
                    _ => return Err(op.transfer(Error::UnexpectedOperand("a script name"))),
                };
                Self::one_shot(&mut self.header.name, loc, &directive, value)
            }
            "script_hash" | "globals_signature" => {
                let op = Self::single(loc, ops)?;
                let value = self.immediate_int(op, Field::U32)? as u32;
                let slot = if directive == "script_hash" {
                    &mut self.header.hash
                } else {
                    &mut self.header.globals_signature
                };
                Self::one_shot(slot, loc, &directive, value)
            }
            "global_block" => {
                let op = Self::single(loc, ops)?;
                let value = self.immediate_int(op, Field::U8)?;
                if value > MAX_GLOBAL_BLOCK {
                    return Err(op.transfer(Error::OutOfRange {
                        value: Constant::Int(value),
                        field: Field::U8,
                    }));
                }
                Self::one_shot(&mut self.header.globals_block, loc, &directive, value as u32)
            }
            _ => Err(located(Error::UnknownDirective(name.to_owned()))),
        }
    }

    fn statement(&mut self, stmt: &Statement) -> Result<(), Located<Error>> {
        if let Some(label) = &stmt.label {
            self.label(label)?;
        }

        if let Some(body) = &stmt.body {
            match body.get() {
                Body::Directive(name, ops) => self.directive(body.loc(), name, ops)?,
                Body::Instruction(mnemonic, ops) => self.instruction(body.loc(), mnemonic, ops)?,
            }
        }
        Ok(())
    }
}

/// Symbols are looked up regardless of case.
pub fn symbol_key(name: &str) -> String {
    name.to_lowercase()
}

/// The value of a label as seen by code, once the final statics length is known.
pub fn label_value(segment: SegmentKind, offset: usize, globals_block: u32, statics_len: usize) -> i64 {
    let offset = offset as i64;
    match segment {
        SegmentKind::Global => offset | i64::from(globals_block) << GLOBAL_BLOCK_SHIFT,
        SegmentKind::Arg => offset + statics_len as i64,
        _ => offset,
    }
}

/// Emits every statement into its segment. Names are only recorded here; the values that
/// depend on them are written by `resolve`.
pub fn generate(stmts: &[Statement], options: &Options) -> Result<Generated, Located<Error>> {
    let mut ctx = Context::new(options);
    for stmt in stmts {
        ctx.statement(stmt)?;
    }
    ctx.flush_pending();

    debug!(
        "generated {} code bytes, {} symbols, {} patches, {} natives",
        ctx.segments[SegmentKind::Code].byte_len(),
        ctx.symbols.len(),
        ctx.patches.len(),
        ctx.natives.len()
    );

    Ok(Generated {
        isa: ctx.isa,
        header: ctx.header,
        segments: ctx.segments,
        natives: ctx.natives,
        symbols: ctx.symbols,
        patches: ctx.patches,
        warnings: ctx.warnings,
    })
}
