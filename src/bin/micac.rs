use std::{
    error::Error,
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::{self, Command, Stdio},
};

use clap::Parser;
use mica::Target;

/// Compiler for the Mica language.
#[derive(Parser)]
#[command(name = "micac", version)]
struct Args {
    /// Source file to compile.
    input: PathBuf,

    /// Output path for the assembled object.
    #[arg(short, default_value = "a.out")]
    output: PathBuf,

    /// Print the generated assembly and skip the assembler.
    #[arg(long)]
    emit_asm: bool,

    /// Code generation target.
    #[arg(long, default_value = "x86_64-linux")]
    target: Target,
}

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            // Usage errors exit 1; --help and --version exit 0.
            let is_usage_error = error.use_stderr();
            let _ = error.print();
            process::exit(i32::from(is_usage_error));
        }
    };

    if let Err(error) = run(&args) {
        eprintln!("micac: {error}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let source = fs::read_to_string(&args.input)
        .map_err(|error| format!("cannot read {}: {error}", args.input.display()))?;

    let assembly = mica::compile(&source, args.target)?;

    // The generated text is always echoed for diagnostics.
    print!("{assembly}");

    if args.emit_asm {
        return Ok(());
    }
    assemble(&assembly, &args.output)
}

/// Pipes the assembly text into the system assembler.
fn assemble(assembly: &str, output: &Path) -> Result<(), Box<dyn Error>> {
    let mut child = Command::new("as")
        .arg("-o")
        .arg(output)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|error| format!("cannot run assembler: {error}"))?;

    child
        .stdin
        .as_mut()
        .expect("assembler stdin was piped")
        .write_all(assembly.as_bytes())?;

    let status = child.wait()?;
    if !status.success() {
        return Err(format!("assembler exited with {status}").into());
    }
    Ok(())
}
