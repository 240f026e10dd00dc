use crate::assembler::{self, AssemblerOptions, DisassemblerOptions};
use crate::isa::IsaKind;
use crate::script::{NativeDb, NativeMap, Script};
use ansi_term::Colour::{Green, Red};
use anyhow::{bail, Context};
use log::{info, warn};
use std::path::{Path, PathBuf};
use structopt::StructOpt;

const DEFAULT_BINARY_EXT: &str = "bin";

#[cfg(windows)]
pub fn terminal_init() {
    ansi_term::enable_ansi_support().ok();
    logger_init();
}

#[cfg(not(windows))]
pub fn terminal_init() {
    logger_init();
}

fn logger_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
}

#[derive(StructOpt, Debug)]
#[structopt(name = "sctools")]
pub enum CommandRoot {
    Asm(SubcommandAsm),
    Dis(SubcommandDis),
    Roundtrip(SubcommandRoundtrip),
}

#[derive(StructOpt, Debug)]
struct IsaOpts {
    /// Instruction set: five, ny, rdr2 or payne.
    #[structopt(long, default_value = "five")]
    isa: IsaKind,

    /// Native listing, one `<hash> <name> [<old hash>...]` per line.
    #[structopt(long, parse(from_os_str))]
    natives: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
struct AsmOpts {
    /// Define a preprocessor symbol.
    #[structopt(short = "D", long = "define", number_of_values = 1)]
    defines: Vec<String>,

    /// Do not embed function names in ENTER instructions.
    #[structopt(long)]
    no_function_names: bool,
}

/// Assembles a source file and writes its code segment.
#[derive(StructOpt, Debug)]
#[structopt(name = "scasm")]
pub struct SubcommandAsm {
    #[structopt(name = "in.sca", parse(from_os_str))]
    in_src: PathBuf,

    #[structopt(name = "out.bin", parse(from_os_str))]
    out_bin: Option<PathBuf>,

    #[structopt(flatten)]
    isa_opts: IsaOpts,

    #[structopt(flatten)]
    asm_opts: AsmOpts,
}

/// Disassembles a raw code segment.
#[derive(StructOpt, Debug)]
#[structopt(name = "scdis")]
pub struct SubcommandDis {
    #[structopt(name = "code.bin", parse(from_os_str))]
    in_bin: PathBuf,

    #[structopt(name = "out.sca", parse(from_os_str))]
    out_src: Option<PathBuf>,

    #[structopt(flatten)]
    isa_opts: IsaOpts,

    /// Print the address of every instruction.
    #[structopt(short, long)]
    addresses: bool,
}

/// Assembles a source file, prints its disassembly and checks it reassembles to the same code.
#[derive(StructOpt, Debug)]
pub struct SubcommandRoundtrip {
    #[structopt(name = "in.sca", parse(from_os_str))]
    in_src: PathBuf,

    #[structopt(flatten)]
    isa_opts: IsaOpts,

    #[structopt(flatten)]
    asm_opts: AsmOpts,
}

fn load_natives(path: Option<&Path>) -> anyhow::Result<Option<NativeMap>> {
    path.map(|path| {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read '{}'", path.display()))?;
        NativeMap::parse(&text).with_context(|| format!("in native listing '{}'", path.display()))
    })
    .transpose()
}

fn assembler_options<'a>(
    isa: IsaKind,
    asm_opts: &AsmOpts,
    natives: Option<&'a dyn NativeDb>,
) -> AssemblerOptions<'a> {
    AssemblerOptions {
        isa,
        include_function_names: !asm_opts.no_function_names,
        defines: asm_opts.defines.clone(),
        native_db: natives,
    }
}

pub fn assemble_path(path: &Path, options: &AssemblerOptions) -> anyhow::Result<Script> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("could not read '{}'", path.display()))?;
    let assembly = assembler::assemble(&src, options)
        .with_context(|| format!("could not assemble '{}'", path.display()))?;

    for warning in &assembly.warnings {
        warn!("{}: {}", path.display(), warning);
    }
    Ok(assembly.script)
}

fn summary(script: &Script) -> String {
    format!(
        "'{}': {} code bytes in {} pages, {} globals, {} statics, {} args, {} string bytes, {} natives",
        script.name,
        script.code_length(),
        script.code.pages().len(),
        script.globals_length(),
        script.statics_count(),
        script.args_count,
        script.strings_length(),
        script.natives_count()
    )
}

fn report(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {:#}", Red.bold().paint("error:"), err);
            1
        }
    }
}

pub fn root(cmd: CommandRoot) -> ! {
    match cmd {
        CommandRoot::Asm(scmd) => asm(scmd),
        CommandRoot::Dis(scmd) => dis(scmd),
        CommandRoot::Roundtrip(scmd) => roundtrip(scmd),
    }
}

fn run_asm(cmd: SubcommandAsm) -> anyhow::Result<()> {
    let natives = load_natives(cmd.isa_opts.natives.as_deref())?;
    let options = assembler_options(
        cmd.isa_opts.isa,
        &cmd.asm_opts,
        natives.as_ref().map(|db| db as &dyn NativeDb),
    );
    let script = assemble_path(&cmd.in_src, &options)?;

    let out_name = match cmd.out_bin {
        Some(outfile) => outfile,
        None => cmd.in_src.with_extension(DEFAULT_BINARY_EXT),
    };
    std::fs::write(&out_name, script.code.flatten())
        .with_context(|| format!("could not write '{}'", out_name.display()))?;

    info!("wrote {}", out_name.display());
    println!("{} {}", Green.bold().paint("assembled"), summary(&script));
    Ok(())
}

pub fn asm(cmd: SubcommandAsm) -> ! {
    std::process::exit(report(run_asm(cmd)))
}

fn run_dis(cmd: SubcommandDis) -> anyhow::Result<()> {
    let natives = load_natives(cmd.isa_opts.natives.as_deref())?;
    let isa = cmd.isa_opts.isa;
    let code = std::fs::read(&cmd.in_bin)
        .with_context(|| format!("could not read '{}'", cmd.in_bin.display()))?;
    let script = Script::from_code(&code, isa.isa().layout().paged_code);

    let text = assembler::disassemble(
        &script,
        isa,
        &DisassemblerOptions {
            native_db: natives.as_ref().map(|db| db as &dyn NativeDb),
            addresses: cmd.addresses,
        },
    )
    .with_context(|| format!("could not disassemble '{}'", cmd.in_bin.display()))?;

    match cmd.out_src {
        Some(path) => std::fs::write(&path, text)
            .with_context(|| format!("could not write '{}'", path.display()))?,
        None => print!("{}", text),
    }
    Ok(())
}

pub fn dis(cmd: SubcommandDis) -> ! {
    std::process::exit(report(run_dis(cmd)))
}

fn run_roundtrip(cmd: SubcommandRoundtrip) -> anyhow::Result<()> {
    let natives = load_natives(cmd.isa_opts.natives.as_deref())?;
    let db = natives.as_ref().map(|db| db as &dyn NativeDb);
    let isa = cmd.isa_opts.isa;
    let options = assembler_options(isa, &cmd.asm_opts, db);

    let script = assemble_path(&cmd.in_src, &options)?;
    let text = assembler::disassemble(
        &script,
        isa,
        &DisassemblerOptions {
            native_db: db,
            addresses: false,
        },
    )?;
    print!("{}", text);

    let again = assembler::assemble(&text, &AssemblerOptions::with_isa(isa))
        .context("the disassembly does not assemble")?
        .script;
    if again.code != script.code || again.natives != script.natives {
        bail!("the disassembly assembles to different code");
    }
    eprintln!("{} {}", Green.bold().paint("round trip ok"), summary(&script));
    Ok(())
}

pub fn roundtrip(cmd: SubcommandRoundtrip) -> ! {
    std::process::exit(report(run_roundtrip(cmd)))
}
