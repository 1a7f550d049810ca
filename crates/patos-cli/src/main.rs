use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use log::{error, info};
use patos::{directory_exists, instantiate_kernel, make_directories, run_transformation, Arguments};

/// The Patos source-to-source compiler: lowers templated kernel C++ to
/// flat OpenCL C.
#[derive(Debug, Parser)]
#[command(name = "patos", disable_version_flag = true)]
struct Cli {
    /// set input directory
    #[arg(short = 'i', long = "input-dir")]
    input_dir: PathBuf,

    /// set output directory
    #[arg(short = 'o', long = "output-dir")]
    output_dir: PathBuf,

    /// set directory to dump the ASTs to
    #[arg(short = 'd', long = "astdump-dir")]
    astdump_dir: Option<PathBuf>,

    /// add path to list of include paths
    #[arg(short = 'I', long = "include-path")]
    include_path: Vec<PathBuf>,

    /// ask for explicit instantiation of kernel function
    #[arg(short = 'e', long = "explicit-instantiation")]
    explicit_instantiation: bool,

    /// re-parse the transformed output as OpenCL C and report files that no
    /// longer parse
    #[arg(long = "sanitize")]
    sanitize: bool,
}

fn main() -> ExitCode {
    env_logger::init();

    println!("---------------------------------");
    println!(" Patos source-to-source compiler ");
    println!("---------------------------------");
    println!();

    let cli = Cli::parse();

    if !directory_exists(&cli.input_dir) {
        error!("input directory does not exist: {}", cli.input_dir.display());
        return ExitCode::FAILURE;
    }
    if !directory_exists(&cli.output_dir) {
        info!("Creating directory for output files: {}", cli.output_dir.display());
        if let Err(err) = make_directories(&cli.output_dir) {
            error!("unable to create directories in path '{}': {err}", cli.output_dir.display());
            return ExitCode::FAILURE;
        }
    }
    if let Some(astdump_dir) = &cli.astdump_dir {
        if !directory_exists(astdump_dir) {
            info!("Creating directory for AST dumps: {}", astdump_dir.display());
            if let Err(err) = make_directories(astdump_dir) {
                error!("unable to create directories in path '{}': {err}", astdump_dir.display());
                return ExitCode::FAILURE;
            }
        }
    }

    info!("Using input directory {}", cli.input_dir.display());
    info!("Using output directory {}", cli.output_dir.display());
    if let Some(astdump_dir) = &cli.astdump_dir {
        info!("Dump ASTs to {}", astdump_dir.display());
    }
    if cli.include_path.is_empty() {
        info!("No include paths provided");
    } else {
        info!("List of include paths:");
        for path in &cli.include_path {
            info!("   {}", path.display());
        }
    }

    let arguments = Arguments {
        input_directory: cli.input_dir,
        output_directory: cli.output_dir,
        ast_dump_directory: cli.astdump_dir,
        system_include_paths: cli.include_path,
        explicit_instantiation: cli.explicit_instantiation,
        sanitize: cli.sanitize,
    };

    let result = if arguments.explicit_instantiation {
        run_explicit_instantiation(&arguments)
    } else {
        run_transformation(&arguments).map_err(|e| e.to_string())
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run_explicit_instantiation(arguments: &Arguments) -> Result<(), String> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    let kernel_file = prompt(&mut lines, "name of file containing kernel definition: ")?;
    let kernel_name = prompt(&mut lines, "name of kernel to instantiate: ")?;

    let template_argument_count = prompt_count(&mut lines, "number of template arguments: ")
        .ok_or_else(|| "invalid number of template arguments".to_owned())?;
    let mut template_arguments = Vec::with_capacity(template_argument_count);
    for index in 0..template_argument_count {
        template_arguments.push(prompt(&mut lines, &format!("template argument {}: ", index + 1))?);
    }

    let argument_count = prompt_count(&mut lines, "number of argument types: ")
        .ok_or_else(|| "invalid number of arguments".to_owned())?;
    let mut argument_types = Vec::with_capacity(argument_count);
    for index in 0..argument_count {
        argument_types.push(prompt(&mut lines, &format!("argument type {}: ", index + 1))?);
    }

    let mangled = instantiate_kernel(arguments, &kernel_file, &kernel_name, &template_arguments, &argument_types)
        .map_err(|e| e.to_string())?;
    println!("instantiated kernel: {mangled}");
    Ok(())
}

fn prompt(lines: &mut impl Iterator<Item = io::Result<String>>, message: &str) -> Result<String, String> {
    print!("{message}");
    let _ = io::stdout().flush();
    match lines.next() {
        Some(Ok(line)) => Ok(line.trim().to_owned()),
        _ => Err("unable to read from stdin".to_owned()),
    }
}

/// Counts are read as signed integers and rejected when negative, before
/// any conversion to an unsigned width.
fn prompt_count(lines: &mut impl Iterator<Item = io::Result<String>>, message: &str) -> Option<usize> {
    let input = prompt(lines, message).ok()?;
    let count: i64 = input.parse().ok()?;
    if count < 0 {
        return None;
    }
    usize::try_from(count).ok()
}
