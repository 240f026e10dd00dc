use super::Error;
use crate::isa::{DecodeError, Isa, Operand};

/// One decoded instruction. The length is recomputed from the bytes, never stored in them.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: u32,
    pub opcode: u8,
    pub len: usize,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn end(&self) -> u32 {
        self.address + self.len as u32
    }

    /// The first operand, when it is a plain integer.
    pub fn int(&self) -> Option<i64> {
        match self.operands.first() {
            Some(Operand::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Every code address named by the operands.
    pub fn targets(&self) -> Vec<u32> {
        let mut targets = Vec::new();
        for op in &self.operands {
            match op {
                Operand::Target(target) => targets.push(*target),
                Operand::Switch(cases) => targets.extend(cases.iter().map(|&(_, target)| target)),
                _ => (),
            }
        }
        targets
    }
}

fn decode_error(offset: usize, err: DecodeError) -> Error {
    match err {
        DecodeError::UnknownOpcode(opcode) => Error::UnknownOpcode { offset, opcode },
        DecodeError::Truncated { needed, available } => Error::Truncated {
            offset,
            needed,
            available,
        },
    }
}

/// Splits `code` into instructions in one linear pass from address 0.
pub fn decode(isa: &dyn Isa, code: &[u8]) -> Result<Vec<Instruction>, Error> {
    let mut insts = Vec::new();
    let mut at = 0;
    while at < code.len() {
        let rest = &code[at..];
        let len = isa.byte_size(rest).map_err(|err| decode_error(at, err))?;
        let def = isa.def(rest[0]).ok_or(Error::UnknownOpcode {
            offset: at,
            opcode: rest[0],
        })?;
        let operands = def
            .operands
            .decode(at as u32, &rest[..len])
            .map_err(|err| decode_error(at, err))?;

        insts.push(Instruction {
            address: at as u32,
            opcode: def.opcode,
            len,
            operands,
        });
        at += len;
    }

    check_targets(&insts, code.len())?;
    Ok(insts)
}

/// The index of the instruction starting exactly at `address`.
pub fn index_of(insts: &[Instruction], address: u32) -> Option<usize> {
    insts.binary_search_by_key(&address, |inst| inst.address).ok()
}

/// Every target must be the start of an instruction, or the very end of the code.
fn check_targets(insts: &[Instruction], code_length: usize) -> Result<(), Error> {
    for inst in insts {
        for target in inst.targets() {
            let offset = inst.address as usize;
            if target as usize > code_length {
                return Err(Error::TargetOutOfRange { offset, target });
            }
            if target as usize != code_length && index_of(insts, target).is_none() {
                return Err(Error::MisalignedTarget { offset, target });
            }
        }
    }
    Ok(())
}
