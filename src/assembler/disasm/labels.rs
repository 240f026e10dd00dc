use super::decode::Instruction;
use crate::assembler::phases::generate::symbol_key;
use crate::assembler::phases::tokenize;
use crate::isa::{Isa, OpcodeFlags, Operand};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// The names handed out so far, shared by every kind of label in one dump. Two names differing
/// only in case clash, as they do for the assembler.
#[derive(Debug, Default)]
pub struct Names {
    used: HashSet<String>,
}

impl Names {
    pub fn is_free(&self, name: &str) -> bool {
        !self.used.contains(&symbol_key(name))
    }

    /// Takes `base`, or `base_N` for the first free `N` when it is taken.
    pub fn claim(&mut self, base: &str) -> String {
        if self.used.insert(symbol_key(base)) {
            return base.to_owned();
        }

        let mut n = 1;
        loop {
            let name = format!("{}_{}", base, n);
            if self.used.insert(symbol_key(&name)) {
                return name;
            }
            n += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLabel {
    pub name: String,
    /// The first address of a function, rather than a jump target.
    pub function: bool,
}

#[derive(Debug, Default)]
pub struct CodeLabels {
    pub labels: BTreeMap<u32, CodeLabel>,
    pub call_indirect: bool,
}

/// Finds every jump target and function start in one walk over the code.
///
/// A function starts right after the previous `LEAVE` rather than at its `ENTER` when the two
/// differ, since an encoder may pad a function onto the next page with filler before the
/// `ENTER`; calls then still target the address where the padding begins. Address 0 is always
/// the entry point.
pub fn infer(isa: &dyn Isa, insts: &[Instruction], names: &mut Names) -> CodeLabels {
    let mut jumps = BTreeSet::new();
    let mut functions: BTreeMap<u32, Option<Vec<u8>>> = BTreeMap::new();
    if !insts.is_empty() {
        functions.insert(0, None);
    }
    let mut after_leave = None;
    let mut call_indirect = false;

    for inst in insts {
        let flags = isa.flags(inst.opcode);
        if flags.contains(OpcodeFlags::CALL) {
            for target in inst.targets() {
                functions.entry(target).or_insert(None);
            }
        } else {
            jumps.extend(inst.targets());
        }

        if flags.contains(OpcodeFlags::ENTER) {
            let start = after_leave.take().unwrap_or(inst.address);
            let embedded = match inst.operands.first() {
                Some(Operand::Enter { name, .. }) => name.clone(),
                _ => None,
            };
            let slot = functions.entry(start).or_insert(None);
            if slot.is_none() {
                *slot = embedded;
            }
        }
        if flags.contains(OpcodeFlags::LEAVE) {
            after_leave = Some(inst.end());
        }
        call_indirect |= flags.contains(OpcodeFlags::CALL_INDIRECT);
    }

    let mut labels = BTreeMap::new();
    for (&address, embedded) in &functions {
        let usable = embedded
            .as_deref()
            .and_then(|name| std::str::from_utf8(name).ok())
            .filter(|name| tokenize::is_identifier(name) && names.is_free(name));
        let name = match usable {
            Some(name) => names.claim(name),
            None if address == 0 => names.claim("main"),
            None => names.claim(&format!("func_{:06}", address)),
        };
        labels.insert(
            address,
            CodeLabel {
                name,
                function: true,
            },
        );
    }
    for address in jumps {
        if !labels.contains_key(&address) {
            let name = names.claim(&format!("lbl_{:06}", address));
            labels.insert(
                address,
                CodeLabel {
                    name,
                    function: false,
                },
            );
        }
    }

    CodeLabels {
        labels,
        call_indirect,
    }
}
