use super::generate::{
    label_value, symbol_key, Constant, Field, Generated, PatchKind, PatchRequest, Symbol,
};
use super::types::Located;
use crate::script::segment::{Segment, SegmentKind};
use crate::script::Script;
use log::debug;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    UndefinedSymbol(String),
    NotACodeLabel(String),
    LabelTooFar { label: String, distance: i64 },
    OutOfRange { label: String, value: Constant, field: Field },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UndefinedSymbol(name) => write!(f, "undefined symbol '{}'", name),
            Error::NotACodeLabel(name) => write!(f, "'{}' is not a code label", name),
            Error::LabelTooFar { label, distance } => write!(
                f,
                "label '{}' is {} bytes away, too far for a relative jump",
                label, distance
            ),
            Error::OutOfRange {
                label,
                value,
                field,
            } => write!(
                f,
                "value {} of '{}' is out of range for {}",
                value, label, field
            ),
        }
    }
}

struct Resolver<'a> {
    symbols: &'a HashMap<String, Symbol>,
    globals_block: u32,
    statics_len: usize,
}

impl<'a> Resolver<'a> {
    fn symbol(&self, name: &Located<String>) -> Result<Symbol, Located<Error>> {
        self.symbols
            .get(&symbol_key(name.get()))
            .copied()
            .ok_or_else(|| name.transfer(Error::UndefinedSymbol(name.get().clone())))
    }

    fn code_label(&self, name: &Located<String>) -> Result<i64, Located<Error>> {
        match self.symbol(name)? {
            Symbol::Label {
                segment: SegmentKind::Code,
                offset,
            } => Ok(offset as i64),
            _ => Err(name.transfer(Error::NotACodeLabel(name.get().clone()))),
        }
    }

    fn value(&self, name: &Located<String>) -> Result<Constant, Located<Error>> {
        Ok(match self.symbol(name)? {
            Symbol::Constant(value) => value,
            Symbol::Label { segment, offset } => Constant::Int(label_value(
                segment,
                offset,
                self.globals_block,
                self.statics_len,
            )),
        })
    }

    fn bytes(&self, patch: &PatchRequest) -> Result<Vec<u8>, Located<Error>> {
        let name = &patch.target;
        let out_of_range = |value, field| {
            name.transfer(Error::OutOfRange {
                label: name.get().clone(),
                value,
                field,
            })
        };

        match patch.kind {
            PatchKind::RelativeInt16 => {
                let distance = self.code_label(name)? - (patch.at as i64 + 2);
                if distance < i64::from(i16::MIN) || distance > i64::from(i16::MAX) {
                    return Err(name.transfer(Error::LabelTooFar {
                        label: name.get().clone(),
                        distance,
                    }));
                }
                Ok((distance as i16).to_le_bytes().to_vec())
            }
            PatchKind::AbsoluteUInt24 | PatchKind::AbsoluteUInt32 | PatchKind::BankedUInt16(_) => {
                let field = match patch.kind {
                    PatchKind::AbsoluteUInt24 => Field::U24,
                    PatchKind::BankedUInt16(bank) => Field::CallBank(bank),
                    _ => Field::U32,
                };
                let value = Constant::Int(self.code_label(name)?);
                field.encode(value).ok_or_else(|| out_of_range(value, field))
            }
            PatchKind::Value(field) => {
                let value = self.value(name)?;
                field.encode(value).ok_or_else(|| out_of_range(value, field))
            }
        }
    }
}

/// Applies every patch and lays the segments out into pages. Natives are rotated last, once the
/// final code length is known, for revisions that rotate them.
pub fn resolve(mut gen: Generated) -> Result<Script, Located<Error>> {
    let resolver = Resolver {
        symbols: &gen.symbols,
        globals_block: gen.header.globals_block.unwrap_or(0),
        statics_len: gen.segments[SegmentKind::Static].len(),
    };

    for patch in &gen.patches {
        let bytes = resolver.bytes(patch)?;
        let segment = gen.segments[patch.segment].bytes_mut();
        segment[patch.at..patch.at + bytes.len()].copy_from_slice(&bytes);
    }
    debug!("applied {} patches", gen.patches.len());

    let mut script = Script::default();
    if let Some(name) = gen.header.name.take() {
        script.set_name(name);
    }
    script.hash = gen.header.hash.unwrap_or(0);
    script.globals_signature = gen.header.globals_signature.unwrap_or(0);
    script.globals_block = resolver.globals_block;

    let layout = gen.isa.layout();
    let mut statics = gen.segments[SegmentKind::Static].bytes().to_vec();
    statics.extend_from_slice(gen.segments[SegmentKind::Arg].bytes());
    script.statics = Segment::from_bytes(SegmentKind::Static, &statics, false);
    script.args_count = gen.segments[SegmentKind::Arg].len();

    script.code = Segment::from_bytes(
        SegmentKind::Code,
        gen.segments[SegmentKind::Code].bytes(),
        layout.paged_code,
    );
    script.globals = Segment::from_bytes(
        SegmentKind::Global,
        gen.segments[SegmentKind::Global].bytes(),
        true,
    );
    script.strings = Segment::from_bytes(
        SegmentKind::String,
        gen.segments[SegmentKind::String].bytes(),
        true,
    );

    let code_length = script.code_length();
    let natives = if layout.rotated_natives {
        gen.natives.rotated(code_length)
    } else {
        gen.natives.hashes().to_vec()
    };
    script.natives = Segment::from_values(SegmentKind::Include, &natives, false);

    debug!(
        "script '{}': {} code bytes in {} pages, {} globals, {} statics, {} args, {} string bytes, {} natives",
        script.name,
        code_length,
        script.code.pages().len(),
        script.globals_length(),
        script.statics_count(),
        script.args_count,
        script.strings_length(),
        script.natives_count()
    );
    Ok(script)
}
