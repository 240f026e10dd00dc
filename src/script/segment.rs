use derive_more::Display;
use enum_map::Enum;
use log::trace;
use static_assertions::const_assert;
use strum_macros::EnumIter;

/// The number of addressing units in a full page.
pub const PAGE_LENGTH: usize = 0x4000;
const_assert!(PAGE_LENGTH & (PAGE_LENGTH - 1) == 0);
// offsets inside a page are 14 bits wide
const_assert!(PAGE_LENGTH == 1 << 14);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Enum, EnumIter)]
pub enum SegmentKind {
    #[display(fmt = "code")]
    Code,
    #[display(fmt = "global")]
    Global,
    #[display(fmt = "static")]
    Static,
    #[display(fmt = "arg")]
    Arg,
    #[display(fmt = "string")]
    String,
    #[display(fmt = "include")]
    Include,
}

impl SegmentKind {
    /// The size in bytes of one addressing unit.
    pub fn unit(self) -> usize {
        match self {
            SegmentKind::Code | SegmentKind::String => 1,
            SegmentKind::Global | SegmentKind::Static | SegmentKind::Arg | SegmentKind::Include => 8,
        }
    }

    /// The most addressing units the segment can hold: global offsets stop below the block id,
    /// everything else is reached through 24-bit operands.
    pub fn capacity(self) -> usize {
        match self {
            SegmentKind::Global => 1 << crate::script::GLOBAL_BLOCK_SHIFT,
            SegmentKind::Include => crate::script::natives::MAX_NATIVES,
            _ => 1 << 24,
        }
    }

    /// The directive switching to this segment, without the leading dot.
    pub fn from_directive(name: &str) -> Option<SegmentKind> {
        use strum::IntoEnumIterator;
        SegmentKind::iter().find(|kind| crate::common::eq_ignore_case(&kind.to_string(), name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ValueTooLarge { len: usize, capacity: usize },
    SegmentFull { kind: SegmentKind, capacity: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ValueTooLarge { len, capacity } => write!(
                f,
                "value of {} bytes does not fit in a page of {} bytes",
                len, capacity
            ),
            Error::SegmentFull { kind, capacity } => write!(
                f,
                "the {} segment is full, it holds at most {} units",
                kind, capacity
            ),
        }
    }
}

/// A finished region of a script, split into pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    kind: SegmentKind,
    pages: Vec<Vec<u8>>,
}

impl Segment {
    pub fn empty(kind: SegmentKind) -> Self {
        Segment {
            kind,
            pages: Vec::new(),
        }
    }

    /// Splits `bytes` in pages of `PAGE_LENGTH` units, or keeps them as a single page when
    /// `paged` is false.
    pub fn from_bytes(kind: SegmentKind, bytes: &[u8], paged: bool) -> Self {
        let pages = if bytes.is_empty() {
            Vec::new()
        } else if paged {
            bytes
                .chunks(PAGE_LENGTH * kind.unit())
                .map(<[u8]>::to_vec)
                .collect()
        } else {
            vec![bytes.to_vec()]
        };
        Segment { kind, pages }
    }

    pub fn from_values(kind: SegmentKind, values: &[u64], paged: bool) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect();
        Segment::from_bytes(kind, &bytes, paged)
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn unit(&self) -> usize {
        self.kind.unit()
    }

    pub fn pages(&self) -> &[Vec<u8>] {
        &self.pages
    }

    pub fn page(&self, i: usize) -> Option<&[u8]> {
        self.pages.get(i).map(Vec::as_slice)
    }

    /// The length in bytes.
    pub fn byte_len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// The length in addressing units.
    pub fn len(&self) -> usize {
        self.byte_len() / self.unit()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn flatten(&self) -> Vec<u8> {
        self.pages.concat()
    }

    /// The contents as little-endian 64-bit values; only meaningful for 8-byte units.
    pub fn values(&self) -> Vec<u64> {
        self.flatten()
            .chunks(8)
            .map(|chunk| {
                let mut value = [0u8; 8];
                value[..chunk.len()].copy_from_slice(chunk);
                u64::from_le_bytes(value)
            })
            .collect()
    }
}

/// An append-only buffer which keeps every value aligned to the addressing unit and, when paged,
/// never lets one straddle a page boundary.
#[derive(Debug)]
pub struct SegmentBuilder {
    kind: SegmentKind,
    paged: bool,
    buffer: Vec<u8>,
}

impl SegmentBuilder {
    pub fn new(kind: SegmentKind, paged: bool) -> Self {
        SegmentBuilder {
            kind,
            paged,
            buffer: Vec::new(),
        }
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn is_paged(&self) -> bool {
        self.paged
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// The current offset in addressing units.
    pub fn len(&self) -> usize {
        let unit = self.kind.unit();
        (self.buffer.len() + unit - 1) / unit
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn page_capacity(&self) -> usize {
        PAGE_LENGTH * self.kind.unit()
    }

    /// The bytes left in the current page.
    pub fn page_remaining(&self) -> usize {
        let capacity = self.page_capacity();
        capacity - self.buffer.len() % capacity
    }

    pub fn fits_current_page(&self, len: usize) -> bool {
        !self.paged || len <= self.page_remaining()
    }

    fn align(&mut self) {
        let unit = self.kind.unit();
        let padding = (unit - self.buffer.len() % unit) % unit;
        self.buffer.resize(self.buffer.len() + padding, 0);
    }

    /// The addressing units which can still be appended, ignoring page padding.
    pub fn remaining(&self) -> usize {
        self.kind.capacity().saturating_sub(self.len())
    }

    /// Writes `bytes` and returns the offset, in addressing units, where they start.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.align();
        let unit = self.kind.unit();
        if (bytes.len() + unit - 1) / unit > self.remaining() {
            return Err(Error::SegmentFull {
                kind: self.kind,
                capacity: self.kind.capacity(),
            });
        }
        if self.paged {
            let capacity = self.page_capacity();
            if bytes.len() > capacity {
                return Err(Error::ValueTooLarge {
                    len: bytes.len(),
                    capacity,
                });
            }
            if !self.fits_current_page(bytes.len()) {
                let skip = self.page_remaining();
                trace!("{} segment: skipping {} bytes to the next page", self.kind, skip);
                self.pad(skip);
            }
        }
        let offset = self.len();
        self.buffer.extend_from_slice(bytes);
        self.align();
        Ok(offset)
    }

    /// Writes `len` zero bytes with no paging checks.
    pub fn pad(&mut self, len: usize) {
        self.buffer.resize(self.buffer.len() + len, 0);
    }

    /// Writes `value` followed by a NUL terminator.
    pub fn string(&mut self, value: &[u8]) -> Result<usize, Error> {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value);
        bytes.push(0);
        self.append(&bytes)
    }
}
