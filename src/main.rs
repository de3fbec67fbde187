use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use zoe::bytecode::{MAGIC, Program};
use zoe::diagnostic::ansi::AnsiRenderer;
use zoe::diagnostic::{Diagnostic, json, registry};
use zoe::listing;
use zoe::vm::{Vm, VmConfig, VmError, disasm};

#[derive(Parser)]
#[command(name = "zoe", version, about = "Assemble, inspect and run ZB bytecode")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a listing into a ZB file
    Asm {
        listing: PathBuf,
        /// Output path (defaults to the listing path with a .zb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a ZB file or a listing and print what is left on the stack
    Run {
        file: PathBuf,
        /// Print each instruction and the operand stack to stderr
        #[arg(long)]
        trace: bool,
        /// Abort after this many instructions
        #[arg(long, value_name = "N")]
        max_steps: Option<u64>,
        /// Report errors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the instructions of a ZB file or listing
    Disasm {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Explain an error code, e.g. ZOE-R005
    Explain { code: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn read(path: &Path) -> Result<Vec<u8>, Diagnostic> {
    std::fs::read(path)
        .map_err(|e| Diagnostic::error(format!("cannot read {}: {e}", path.display())))
}

fn assemble_text(bytes: &[u8], path: &Path) -> Result<Program, Diagnostic> {
    let source = std::str::from_utf8(bytes).map_err(|_| {
        Diagnostic::error(format!("{} is neither a ZB file nor UTF-8 text", path.display()))
    })?;
    listing::assemble(source).map_err(|e| Diagnostic::from(&e).with_source(source))
}

/// ZB files are recognised by their magic; anything else is read as a listing.
fn load(path: &Path) -> Result<Program, Diagnostic> {
    let bytes = read(path)?;
    if bytes.starts_with(&MAGIC[..5]) {
        Program::from_bytes(&bytes).map_err(|e| Diagnostic::from(&e))
    } else {
        assemble_text(&bytes, path)
    }
}

fn asm(listing: &Path, output: Option<PathBuf>) -> Result<(), Diagnostic> {
    let bytes = read(listing)?;
    let program = assemble_text(&bytes, listing)?;
    let output = output.unwrap_or_else(|| listing.with_extension("zb"));
    std::fs::write(&output, program.to_bytes())
        .map_err(|e| Diagnostic::error(format!("cannot write {}: {e}", output.display())))?;
    tracing::info!(path = %output.display(), bytes = program.code.len(), "wrote program");
    Ok(())
}

fn run(file: &Path, config: VmConfig) -> Result<(), Diagnostic> {
    let program = load(file)?;
    let mut vm = Vm::with_program(config, program);
    match vm.run() {
        Ok(values) => {
            for value in values {
                println!("{value}");
            }
            Ok(())
        }
        Err(e) => Err(runtime_failure(&vm, &e)),
    }
}

fn runtime_failure(vm: &Vm, e: &VmError) -> Diagnostic {
    let mut d = Diagnostic::from(e);
    if let Some(instr) = e.offset().and_then(|offset| vm.program().decode(offset).ok()) {
        d = d.with_note(format!("at {}", disasm::format_instr(vm.program(), &instr)));
    }
    d
}

fn disassemble(file: &Path, as_json: bool) -> Result<(), Diagnostic> {
    let program = load(file)?;
    let lines = disasm::decode_all(&program).map_err(|e| Diagnostic::from(&VmError::from(e)))?;
    if as_json {
        let text = serde_json::to_string_pretty(&lines)
            .map_err(|e| Diagnostic::error(e.to_string()))?;
        println!("{text}");
    } else {
        for line in lines {
            println!("{}", line.text);
        }
    }
    Ok(())
}

fn explain(code: &str) -> Result<(), Diagnostic> {
    match registry::lookup(code) {
        Some(entry) => {
            print!("{}", entry.long);
            Ok(())
        }
        None => Err(Diagnostic::error(format!("unknown error code '{code}'"))),
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let (result, as_json) = match cli.command {
        Command::Asm { listing, output } => (asm(&listing, output), false),
        Command::Run { file, trace, max_steps, json } => {
            let config = VmConfig { trace, max_steps, ..VmConfig::default() };
            (run(&file, config), json)
        }
        Command::Disasm { file, json } => (disassemble(&file, json), json),
        Command::Explain { code } => (explain(&code), false),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(diagnostic) => {
            if as_json {
                eprintln!("{}", json::render(&diagnostic));
            } else {
                let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
                eprint!("{}", renderer.render(&diagnostic));
            }
            ExitCode::FAILURE
        }
    }
}
