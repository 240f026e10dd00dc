#![allow(dead_code)]

use sctools::assembler::{self, AssemblerOptions, DisassemblerOptions};
use sctools::isa::IsaKind;
use sctools::script::Script;

pub fn assemble(isa: IsaKind, src: &str) -> Script {
    match assembler::assemble(src, &AssemblerOptions::with_isa(isa)) {
        Ok(assembly) => assembly.script,
        Err(err) => panic!("{}", err),
    }
}

pub fn code(isa: IsaKind, src: &str) -> Vec<u8> {
    assemble(isa, src).code.flatten()
}

pub fn disassemble(isa: IsaKind, script: &Script) -> String {
    match assembler::disassemble(script, isa, &DisassemblerOptions::default()) {
        Ok(text) => text,
        Err(err) => panic!("{}", err),
    }
}

/// Assembles `src`, then checks that its disassembly assembles to the very same script.
pub fn roundtrip(isa: IsaKind, src: &str) -> Script {
    let script = assemble(isa, src);
    let text = disassemble(isa, &script);
    let again = match assembler::assemble(&text, &AssemblerOptions::with_isa(isa)) {
        Ok(assembly) => assembly.script,
        Err(err) => panic!("{}\nin disassembly:\n{}", err, text),
    };
    assert_eq!(again, script, "disassembly:\n{}", text);
    script
}
