use super::{Disassembly, Instruction};
use crate::assembler::phases::tokenize;
use crate::common;
use crate::isa::{OpcodeFlags, Operand, Operands};
use crate::script::GLOBAL_BLOCK_SHIFT;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

const INDENT: &str = "    ";

/// Finite values in their shortest exact decimal form, the rest as `0f` and their bits.
fn float(value: f32) -> String {
    if value.is_finite() {
        format!("{:?}", value)
    } else {
        format!("0f{:08X}", value.to_bits())
    }
}

fn write_run(f: &mut Formatter<'_>, value: u64, count: usize) -> fmt::Result {
    let (directive, text) = if value >> 32 == 0 {
        ("int", value.to_string())
    } else {
        ("int64", format!("0x{:016X}", value))
    };

    if count > 1 {
        writeln!(f, "{}.{} {} dup ({})", INDENT, directive, count, text)
    } else {
        writeln!(f, "{}.{} {}", INDENT, directive, text)
    }
}

/// Dumps `values` with runs of equal values folded into `dup`s. A run never spans a label.
fn write_values(
    f: &mut Formatter<'_>,
    values: &[u64],
    labels: &BTreeMap<usize, String>,
    base: usize,
) -> fmt::Result {
    let mut chunk = 0;
    let keyed = values.iter().enumerate().map(|(i, &value)| {
        if labels.contains_key(&(base + i)) {
            chunk += 1;
        }
        (i, chunk, value)
    });

    for ((_, value), run) in &keyed.group_by(|&(_, chunk, value)| (chunk, value)) {
        let run: Vec<_> = run.collect();
        if let Some(label) = labels.get(&(base + run[0].0)) {
            writeln!(f, "{}:", label)?;
        }
        write_run(f, value, run.len())?;
    }
    Ok(())
}

impl Disassembly<'_> {
    fn code_label(&self, address: u32) -> String {
        match self.code_labels.get(&address) {
            Some(label) => format!("@{}", label.name),
            None => address.to_string(),
        }
    }

    /// The text of an integer operand, using a symbol when the instruction and its successor
    /// show what the integer stands for.
    fn int(&self, i: usize, value: i64) -> String {
        let inst = &self.instructions[i];
        let flags = self.isa.flags(inst.opcode);
        let next = self
            .instructions
            .get(i + 1)
            .map_or_else(OpcodeFlags::empty, |next| self.isa.flags(next.opcode));

        if flags.contains(OpcodeFlags::PUSH_CONST) {
            if next.contains(OpcodeFlags::STRING) {
                if let Some(label) = self.string_label(value) {
                    return label.to_owned();
                }
            }

            let is_u24 = self.isa.def(inst.opcode).map(|def| def.operands) == Some(Operands::U24);
            if self.call_indirect && is_u24 && next.contains(OpcodeFlags::CALL_INDIRECT) {
                if let Some(label) = self.code_labels.get(&(value as u32)) {
                    return format!("@{}", label.name);
                }
            }
        }
        if flags.contains(OpcodeFlags::STATIC) {
            if let Some(label) = self.statics.get(&(value as usize)) {
                return label.clone();
            }
        }
        let block = value >> GLOBAL_BLOCK_SHIFT;
        if flags.contains(OpcodeFlags::GLOBAL) && block == i64::from(self.script.globals_block) {
            let offset = value & ((1 << GLOBAL_BLOCK_SHIFT) - 1);
            if let Some(label) = self.globals.get(&(offset as usize)) {
                return label.clone();
            }
        }
        value.to_string()
    }

    fn operands(&self, i: usize) -> Vec<String> {
        let inst = &self.instructions[i];
        let mut out = Vec::with_capacity(inst.operands.len());
        for (j, op) in inst.operands.iter().enumerate() {
            match op {
                Operand::Int(value) if j == 0 => out.push(self.int(i, *value)),
                Operand::Int(value) => out.push(value.to_string()),
                Operand::Float(value) => out.push(float(*value)),
                Operand::Target(target) => out.push(self.code_label(*target)),
                Operand::Native { argc, retc, index } => {
                    out.push(argc.to_string());
                    out.push(retc.to_string());
                    out.push(match self.natives.get(usize::from(*index)) {
                        Some(native) => native.label.clone(),
                        None => index.to_string(),
                    });
                }
                Operand::NativeHash { argc, retc, hash } => {
                    out.push(argc.to_string());
                    out.push(retc.to_string());
                    out.push(format!("0x{:08X}", hash));
                }
                Operand::Enter {
                    params,
                    frame,
                    name,
                } => {
                    out.push(params.to_string());
                    out.push(frame.to_string());
                    // The assembler embeds the closest code label at or before an ENTER, so
                    // only a name which differs from it has to be spelled out.
                    let named = self.isa.def(inst.opcode).map(|def| def.operands)
                        == Some(Operands::Enter { named: true });
                    let label = self.enclosing_label(inst.address).map(str::as_bytes);
                    if named && name.as_deref() != label {
                        out.push(format!(
                            "\"{}\"",
                            common::escape(name.as_deref().unwrap_or_default())
                        ));
                    }
                }
                Operand::Switch(cases) => out.extend(
                    cases
                        .iter()
                        .map(|&(value, target)| format!("{}:{}", value, self.code_label(target))),
                ),
                Operand::Str(s) => out.push(format!("\"{}\"", common::escape(s))),
            }
        }
        out
    }

    fn write_instruction(&self, f: &mut Formatter<'_>, i: usize, inst: &Instruction) -> fmt::Result {
        let mnemonic = self.isa.mnemonic(inst.opcode).unwrap_or("???");
        write!(f, "{}{}", INDENT, mnemonic)?;
        let operands = self.operands(i);
        if !operands.is_empty() {
            write!(f, " {}", operands.iter().join(", "))?;
        }
        if self.addresses {
            write!(f, " ; {:#08X}", inst.address)?;
        }
        writeln!(f)
    }

    fn write_code_label(&self, f: &mut Formatter<'_>, address: u32) -> fmt::Result {
        if let Some(label) = self.code_labels.get(&address) {
            if label.function && address != 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", label.name)?;
        }
        Ok(())
    }

    fn write_header(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let script = self.script;
        if !script.name.is_empty() {
            if tokenize::is_identifier(&script.name) {
                writeln!(f, ".script_name {}", script.name)?;
            } else {
                writeln!(f, ".script_name \"{}\"", common::escape(script.name.as_bytes()))?;
            }
        }
        if script.hash != 0 {
            writeln!(f, ".script_hash 0x{:08X}", script.hash)?;
        }
        if script.globals_signature != 0 {
            writeln!(f, ".globals_signature 0x{:08X}", script.globals_signature)?;
        }
        if script.globals_block != 0 || !script.globals.is_empty() {
            writeln!(f, ".global_block {}", script.globals_block)?;
        }
        Ok(())
    }

    fn write_data(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let script = self.script;
        if !script.globals.is_empty() {
            writeln!(f, "\n.global")?;
            write_values(f, &script.globals.values(), &self.globals, 0)?;
        }

        let statics = script.statics.values();
        let statics_count = script.statics_count().min(statics.len());
        if statics_count > 0 {
            writeln!(f, "\n.static")?;
            write_values(f, &statics[..statics_count], &self.statics, 0)?;
        }
        if statics.len() > statics_count {
            writeln!(f, "\n.arg")?;
            write_values(f, &statics[statics_count..], &self.statics, statics_count)?;
        }

        if !self.strings.is_empty() {
            writeln!(f, "\n.string")?;
            for record in &self.strings {
                if let Some(label) = &record.label {
                    writeln!(f, "{}:", label)?;
                }
                writeln!(f, "{}.str \"{}\"", INDENT, common::escape(&record.text))?;
            }
        }

        if !self.natives.is_empty() {
            writeln!(f, "\n.include")?;
            for native in &self.natives {
                writeln!(f, "{}:", native.label)?;
                writeln!(f, "{}.native 0x{:016X}", INDENT, native.hash)?;
            }
        }
        Ok(())
    }
}

impl Display for Disassembly<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.write_header(f)?;
        self.write_data(f)?;

        writeln!(f, "\n.code")?;
        for (i, inst) in self.instructions.iter().enumerate() {
            self.write_code_label(f, inst.address)?;
            self.write_instruction(f, i, inst)?;
        }
        self.write_code_label(f, self.script.code_length() as u32)
    }
}
