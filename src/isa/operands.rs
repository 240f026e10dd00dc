/// How the cases of a `SWITCH` name their targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchForm {
    /// `u32 value, s16 offset`, the offset counted from the end of the case.
    Relative16,
    /// `u32 value, u32 address`.
    Absolute32,
}

impl SwitchForm {
    pub fn case_len(self) -> usize {
        match self {
            SwitchForm::Relative16 => 6,
            SwitchForm::Absolute32 => 8,
        }
    }
}

/// The operand layout following an opcode byte. All multi-byte fields are little-endian, with
/// the exception of the native index of `Native`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    U8,
    U8x2,
    U8x3,
    U16,
    S16,
    U24,
    U32,
    F32,
    /// A signed 16-bit code offset, relative to the end of the field.
    Rel16,
    /// An absolute 24-bit code address.
    Abs24,
    /// An absolute 32-bit code address.
    Abs32,
    /// A `u16` code offset into the 64 KiB bank numbered by the opcode itself.
    CallBank(u8),
    /// `u8 params, u16 frame` and, when `named`, `u8 len` followed by `len` name bytes (the
    /// last being NUL).
    Enter { named: bool },
    /// `u8 (argc << 2 | retc)` and a big-endian `u16` native table index.
    Native,
    /// `u8 (index_hi << 6 | argc << 1 | retc)` and `u8 index_lo`, for a 10-bit native table
    /// index.
    NativePacked,
    /// `u8 argc, u8 retc, u32 hash`.
    NativeHash,
    /// `u8 count` followed by `count` cases.
    Switch(SwitchForm),
    /// `u8 len` followed by `len` bytes, the last being NUL.
    InlineString,
    /// Like `InlineString` with a `u32 len`.
    InlineStringU32,
    /// Like `InlineString`, except that a zero `u8 len` is followed by the real `u16 len`.
    InlineStringVar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOpcode(u8),
    Truncated { needed: usize, available: usize },
}

/// A decoded operand. Code targets are always absolute addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(i64),
    Float(f32),
    Target(u32),
    Native { argc: u8, retc: u8, index: u16 },
    NativeHash { argc: u8, retc: u8, hash: u32 },
    Enter { params: u8, frame: u16, name: Option<Vec<u8>> },
    Switch(Vec<(u32, u32)>),
    Str(Vec<u8>),
}

pub const NATIVE_MAX_ARGS: u8 = 0x3F;
pub const NATIVE_MAX_RETURNS: u8 = 0x03;

pub const PACKED_NATIVE_MAX_ARGS: u8 = 0x1F;
pub const PACKED_NATIVE_MAX_RETURNS: u8 = 0x01;
pub const PACKED_NATIVE_MAX_INDEX: u16 = 0x3FF;

pub fn native_byte(argc: u8, retc: u8) -> u8 {
    ((argc & NATIVE_MAX_ARGS) << 2) | (retc & NATIVE_MAX_RETURNS)
}

/// The first byte of a packed native, without the high index bits.
pub fn packed_native_byte(argc: u8, retc: u8) -> u8 {
    ((argc & PACKED_NATIVE_MAX_ARGS) << 1) | (retc & PACKED_NATIVE_MAX_RETURNS)
}

pub fn put_le(buf: &mut Vec<u8>, value: u32, width: usize) {
    buf.extend_from_slice(&value.to_le_bytes()[..width]);
}

pub fn read_le(bytes: &[u8], width: usize) -> u32 {
    bytes[..width]
        .iter()
        .rev()
        .fold(0, |acc, &b| (acc << 8) | u32::from(b))
}

fn need(rest: &[u8], len: usize) -> Result<(), DecodeError> {
    if rest.len() < len {
        Err(DecodeError::Truncated {
            // counted from the opcode byte
            needed: len + 1,
            available: rest.len() + 1,
        })
    } else {
        Ok(())
    }
}

/// Cuts a NUL-terminated field of `len` bytes down to its text.
fn text(field: &[u8]) -> Vec<u8> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    field[..end].to_vec()
}

impl Operands {
    pub fn fixed_len(self) -> Option<usize> {
        Some(match self {
            Operands::None => 0,
            Operands::U8 => 1,
            Operands::U8x2
            | Operands::U16
            | Operands::S16
            | Operands::Rel16
            | Operands::CallBank(_)
            | Operands::NativePacked => 2,
            Operands::U8x3 | Operands::U24 | Operands::Abs24 | Operands::Native => 3,
            Operands::U32 | Operands::F32 | Operands::Abs32 => 4,
            Operands::NativeHash => 6,
            Operands::Enter { named: false } => 3,
            Operands::Enter { named: true }
            | Operands::Switch(_)
            | Operands::InlineString
            | Operands::InlineStringU32
            | Operands::InlineStringVar => return None,
        })
    }

    /// The number of operand bytes, given the bytes following the opcode.
    pub fn byte_len(self, rest: &[u8]) -> Result<usize, DecodeError> {
        if let Some(len) = self.fixed_len() {
            return Ok(len);
        }

        match self {
            Operands::Enter { .. } => {
                need(rest, 4)?;
                Ok(4 + usize::from(rest[3]))
            }
            Operands::Switch(form) => {
                need(rest, 1)?;
                Ok(1 + usize::from(rest[0]) * form.case_len())
            }
            Operands::InlineString => {
                need(rest, 1)?;
                Ok(1 + usize::from(rest[0]))
            }
            Operands::InlineStringU32 => {
                need(rest, 4)?;
                Ok(4 + read_le(rest, 4) as usize)
            }
            Operands::InlineStringVar => {
                need(rest, 1)?;
                if rest[0] != 0 {
                    return Ok(1 + usize::from(rest[0]));
                }
                need(rest, 3)?;
                Ok(3 + read_le(&rest[1..], 2) as usize)
            }
            _ => unreachable!(),
        }
    }

    pub fn is_code_target(self) -> bool {
        matches!(
            self,
            Operands::Rel16 | Operands::Abs24 | Operands::Abs32 | Operands::CallBank(_)
        )
    }

    /// Decodes the operands of the instruction `inst`, which starts at code address `at` and
    /// must already be cut to its byte size.
    pub fn decode(self, at: u32, inst: &[u8]) -> Result<Vec<Operand>, DecodeError> {
        let rest = &inst[1..];
        need(rest, self.byte_len(rest)?)?;

        let int = |from: usize, width: usize| Operand::Int(i64::from(read_le(&rest[from..], width)));
        Ok(match self {
            Operands::None => vec![],
            Operands::U8 => vec![int(0, 1)],
            Operands::U8x2 => vec![int(0, 1), int(1, 1)],
            Operands::U8x3 => vec![int(0, 1), int(1, 1), int(2, 1)],
            Operands::U16 => vec![int(0, 2)],
            Operands::S16 => vec![Operand::Int(i64::from(read_le(rest, 2) as u16 as i16))],
            Operands::U24 => vec![int(0, 3)],
            Operands::U32 => vec![int(0, 4)],
            Operands::F32 => vec![Operand::Float(f32::from_bits(read_le(rest, 4)))],
            Operands::Rel16 => {
                let rel = read_le(rest, 2) as u16 as i16;
                let base = i64::from(at) + 3;
                vec![Operand::Target((base + i64::from(rel)) as u32)]
            }
            Operands::Abs24 => vec![Operand::Target(read_le(rest, 3))],
            Operands::Abs32 => vec![Operand::Target(read_le(rest, 4))],
            Operands::CallBank(bank) => {
                vec![Operand::Target(u32::from(bank) << 16 | read_le(rest, 2))]
            }
            Operands::Enter { named } => {
                let name = if named && rest[3] != 0 {
                    Some(text(&rest[4..4 + usize::from(rest[3])]))
                } else {
                    None
                };
                vec![Operand::Enter {
                    params: rest[0],
                    frame: read_le(&rest[1..], 2) as u16,
                    name,
                }]
            }
            Operands::Native => vec![Operand::Native {
                argc: rest[0] >> 2,
                retc: rest[0] & NATIVE_MAX_RETURNS,
                index: u16::from_be_bytes([rest[1], rest[2]]),
            }],
            Operands::NativePacked => vec![Operand::Native {
                argc: (rest[0] >> 1) & PACKED_NATIVE_MAX_ARGS,
                retc: rest[0] & PACKED_NATIVE_MAX_RETURNS,
                index: u16::from(rest[0] >> 6) << 8 | u16::from(rest[1]),
            }],
            Operands::NativeHash => vec![Operand::NativeHash {
                argc: rest[0],
                retc: rest[1],
                hash: read_le(&rest[2..], 4),
            }],
            Operands::Switch(form) => {
                let count = usize::from(rest[0]);
                let mut cases = Vec::with_capacity(count);
                for i in 0..count {
                    let case = 1 + i * form.case_len();
                    let value = read_le(&rest[case..], 4);
                    let target = match form {
                        SwitchForm::Relative16 => {
                            let rel = read_le(&rest[case + 4..], 2) as u16 as i16;
                            // `at + 1` is where `rest` starts.
                            let base = i64::from(at) + 1 + (case + 6) as i64;
                            (base + i64::from(rel)) as u32
                        }
                        SwitchForm::Absolute32 => read_le(&rest[case + 4..], 4),
                    };
                    cases.push((value, target));
                }
                vec![Operand::Switch(cases)]
            }
            Operands::InlineString => {
                let len = usize::from(rest[0]);
                vec![Operand::Str(text(&rest[1..1 + len]))]
            }
            Operands::InlineStringU32 => vec![Operand::Str(text(&rest[4..]))],
            Operands::InlineStringVar => {
                let start = if rest[0] == 0 { 3 } else { 1 };
                vec![Operand::Str(text(&rest[start..]))]
            }
        })
    }
}
