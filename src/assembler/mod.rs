pub mod disasm;
pub mod phases;

pub use disasm::{disassemble, Disassembly, DisassemblerOptions};
pub use phases::types::{Error, Loc, Located};

use crate::isa::IsaKind;
use crate::script::{NativeDb, Script};

pub struct AssemblerOptions<'a> {
    pub isa: IsaKind,
    /// Embed the label preceding each `ENTER` as the function name.
    pub include_function_names: bool,
    /// Symbols defined for the preprocessor before the first line.
    pub defines: Vec<String>,
    pub native_db: Option<&'a dyn NativeDb>,
}

impl Default for AssemblerOptions<'_> {
    fn default() -> Self {
        AssemblerOptions {
            isa: IsaKind::default(),
            include_function_names: true,
            defines: Vec::new(),
            native_db: None,
        }
    }
}

impl<'a> AssemblerOptions<'a> {
    pub fn with_isa(isa: IsaKind) -> Self {
        AssemblerOptions {
            isa,
            ..Default::default()
        }
    }
}

/// A successfully assembled script and the diagnostics which did not stop it.
#[derive(Debug)]
pub struct Assembly {
    pub script: Script,
    pub warnings: Vec<Located<String>>,
}

pub fn assemble(source: &str, options: &AssemblerOptions) -> Result<Assembly, Error> {
    let tokens = phases::tokenize(source)?;
    let tokens = phases::preprocess(tokens, &options.defines)?;
    let statements = phases::parse(tokens)?;
    let generated = phases::generate(
        &statements,
        &phases::generate::Options {
            isa: options.isa,
            include_function_names: options.include_function_names,
            native_db: options.native_db,
        },
    )?;
    let warnings = generated.warnings.clone();
    let script = phases::resolve(generated)?;
    Ok(Assembly { script, warnings })
}
