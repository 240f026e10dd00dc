use super::Operands;
use crate::common;
use bitflags::bitflags;

bitflags! {
    pub struct OpcodeFlags: u16 {
        const JUMP = 1 << 0;
        /// Execution does not fall through to the next instruction in a straight line.
        const CONTROL_FLOW = 1 << 1;
        const CALL = 1 << 2;
        const LEAVE = 1 << 3;
        const ENTER = 1 << 4;
        const SWITCH = 1 << 5;
        /// Pops a string id and pushes the string.
        const STRING = 1 << 6;
        const CALL_INDIRECT = 1 << 7;
        const NOP = 1 << 8;
        /// The first operand is an offset into the statics segment.
        const STATIC = 1 << 9;
        /// The first operand is an offset into the globals segment.
        const GLOBAL = 1 << 10;
        /// Pushes its operand as a constant.
        const PUSH_CONST = 1 << 11;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeDef {
    pub opcode: u8,
    pub mnemonic: &'static str,
    pub operands: Operands,
    pub flags: OpcodeFlags,
}

#[derive(Debug)]
pub struct OpcodeTable {
    defs: Vec<Option<OpcodeDef>>,
    /// `(lowercase_hash(mnemonic), opcode)`, sorted by hash.
    index: Vec<(u32, u8)>,
}

impl OpcodeTable {
    pub fn get(&self, opcode: u8) -> Option<&OpcodeDef> {
        self.defs.get(usize::from(opcode)).and_then(Option::as_ref)
    }

    pub fn lookup(&self, mnemonic: &str) -> Option<u8> {
        let hash = common::lowercase_hash(mnemonic);
        let start = self.index.partition_point(|&(h, _)| h < hash);
        self.index[start..]
            .iter()
            .take_while(|&&(h, _)| h == hash)
            .map(|&(_, opcode)| opcode)
            .find(|&opcode| {
                self.get(opcode)
                    .map_or(false, |def| common::eq_ignore_case(def.mnemonic, mnemonic))
            })
    }

    pub fn defs(&self) -> impl Iterator<Item = &OpcodeDef> {
        self.defs.iter().filter_map(Option::as_ref)
    }
}

pub struct Builder {
    defs: Vec<Option<OpcodeDef>>,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            defs: vec![None; 0x100],
        }
    }

    pub fn register(
        &mut self,
        opcode: u8,
        mnemonic: &'static str,
        operands: Operands,
        flags: OpcodeFlags,
    ) -> &mut Self {
        let slot = &mut self.defs[usize::from(opcode)];
        assert!(slot.is_none(), "opcode 0x{:02X} registered twice", opcode);
        *slot = Some(OpcodeDef {
            opcode,
            mnemonic,
            operands,
            flags,
        });
        self
    }

    pub fn build(self) -> OpcodeTable {
        let mut index: Vec<(u32, u8)> = self
            .defs
            .iter()
            .filter_map(Option::as_ref)
            .map(|def| (common::lowercase_hash(def.mnemonic), def.opcode))
            .collect();
        index.sort_unstable();

        for pair in index.windows(2) {
            let (a, b) = (pair[0].1, pair[1].1);
            let (a, b) = (&self.defs[usize::from(a)], &self.defs[usize::from(b)]);
            if let (Some(a), Some(b)) = (a, b) {
                assert!(
                    !common::eq_ignore_case(a.mnemonic, b.mnemonic),
                    "mnemonic {} registered twice",
                    a.mnemonic
                );
            }
        }

        OpcodeTable {
            defs: self.defs,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut b = Builder::new();
        b.register(0x00, "NOP", Operands::None, OpcodeFlags::NOP)
            .register(0x01, "IADD", Operands::None, OpcodeFlags::empty());
        let table = b.build();

        assert_eq!(table.lookup("iadd"), Some(0x01));
        assert_eq!(table.lookup("Nop"), Some(0x00));
        assert_eq!(table.lookup("ISUB"), None);
        assert_eq!(table.get(0x01).map(|d| d.mnemonic), Some("IADD"));
        assert_eq!(table.get(0x02), None);
        assert_eq!(table.defs().count(), 2);
    }
}
