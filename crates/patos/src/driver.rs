//! Orchestration of a whole run: copy the input tree, transform every `.m`
//! file, strip deferred template files, and (in explicit-instantiation
//! mode) splice the instantiation directive in and out of the kernel file.

use std::{fs, path::{Path, PathBuf}};

use indexmap::IndexSet;
use log::{debug, warn};

use crate::{
    error::{DriverError, Error},
    files, mangle,
    parse::{self, IncludePath, ParseOptions, ParsedUnit},
    sema,
    source::Characteristic,
    strip::StripPass,
    transform::TransformationPass,
};

/// Configuration of one run, as gathered from the command line.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    pub input_directory: PathBuf,
    pub output_directory: PathBuf,
    pub ast_dump_directory: Option<PathBuf>,
    pub system_include_paths: Vec<PathBuf>,
    pub explicit_instantiation: bool,
    /// Re-parse every transformed file as OpenCL C afterwards and report
    /// files that no longer parse. Debugging aid, off by default.
    pub sanitize: bool,
}

fn create_include_paths(arguments: &Arguments) -> Vec<IncludePath> {
    arguments
        .system_include_paths
        .iter()
        .map(|dir| IncludePath {
            dir: dir.clone(),
            kind: Characteristic::System,
        })
        .collect()
}

fn copy_input_to_output(arguments: &Arguments) -> Result<(), Error> {
    // work only on copies; the input tree is never touched
    files::copy_directory(&arguments.input_directory, &arguments.output_directory).map_err(|error| match error {
        DriverError::Io { source, .. } => DriverError::CopyFailed { source },
        other => other,
    })?;
    Ok(())
}

fn pass_transformation(
    arguments: &Arguments,
    file_name: &Path,
    include_paths: &[IncludePath],
    template_files: &mut IndexSet<PathBuf>,
) -> Result<(), Error> {
    let absolute = arguments.output_directory.join(file_name);
    let mut unit = parse::parse_file(&absolute, include_paths, &ParseOptions::default())?;
    sema::analyze(&mut unit.tu)?;
    dump_ast(arguments, "transformation", file_name, &unit);

    let mut pass = TransformationPass::new(&unit.source, template_files);
    pass.run(&unit.tu)
}

fn pass_remove_templates(arguments: &Arguments, file_name: &Path, include_paths: &[IncludePath]) -> Result<(), Error> {
    // template files are recorded as absolute paths
    let unit = parse::parse_file(file_name, include_paths, &ParseOptions::default())?;
    dump_ast(arguments, "remove_templates", file_name, &unit);

    let mut pass = StripPass::new(&unit.source);
    pass.run(&unit.tu)
}

fn sanitize_output(arguments: &Arguments, file_names: &[PathBuf], include_paths: &[IncludePath]) {
    let options = ParseOptions {
        cplusplus: false,
        opencl: true,
    };
    for file_name in file_names {
        let absolute = arguments.output_directory.join(file_name);
        if let Err(error) = parse::parse_file(&absolute, include_paths, &options) {
            warn!("sanitize: {error}");
        }
    }
}

fn dump_ast(arguments: &Arguments, pass: &str, file_name: &Path, unit: &ParsedUnit) {
    let Some(dump_directory) = &arguments.ast_dump_directory else {
        return;
    };
    let mut path = dump_directory.join(pass).join(file_name.file_name().unwrap_or_default());
    path.set_extension("dump");
    if let Some(parent) = path.parent() {
        if files::make_directories(parent).is_err() {
            warn!("unable to create directories for AST dump");
            return;
        }
    }
    debug!("dumping AST to {}", path.display());
    if let Err(error) = fs::write(&path, format!("{:#?}\n", unit.tu)) {
        warn!("unable to dump AST to {}: {error}", path.display());
    }
}

/// Transforms every `.m` file under the input directory into its de-classed
/// form in the output directory.
pub fn run_transformation(arguments: &Arguments) -> Result<(), Error> {
    let include_paths = create_include_paths(arguments);

    copy_input_to_output(arguments)?;
    let file_names = files::find_files_recursively(&arguments.output_directory, "m")?;

    // files (other than main files) still carrying template declarations;
    // they are revisited once all transformations are done
    let mut template_files: IndexSet<PathBuf> = IndexSet::new();

    for file_name in &file_names {
        pass_transformation(arguments, file_name, &include_paths, &mut template_files)?;
    }

    for template_file in &template_files {
        pass_remove_templates(arguments, template_file, &include_paths)?;
    }

    if arguments.sanitize {
        sanitize_output(arguments, &file_names, &include_paths);
    }
    Ok(())
}

/// Runs the transformation with an explicit instantiation of `kernel_name`
/// spliced into `kernel_file`; returns the instantiation's mangled name.
pub fn instantiate_kernel(
    arguments: &Arguments,
    kernel_file: &str,
    kernel_name: &str,
    template_arguments: &[String],
    argument_types: &[String],
) -> Result<String, Error> {
    let include_paths = create_include_paths(arguments);

    copy_input_to_output(arguments)?;

    let kernel_file_absolute = arguments.output_directory.join(kernel_file);
    if !kernel_file_absolute.is_file() {
        return Err(DriverError::MissingKernelFile {
            path: kernel_file_absolute,
        }
        .into());
    }

    let directive =
        append_explicit_instantiation(&kernel_file_absolute, kernel_name, template_arguments, argument_types)?;

    let file_names = files::find_files_recursively(&arguments.output_directory, "m")?;
    let mut template_files: IndexSet<PathBuf> = IndexSet::new();
    for file_name in &file_names {
        pass_transformation(arguments, file_name, &include_paths, &mut template_files)?;
    }
    for template_file in &template_files {
        pass_remove_templates(arguments, template_file, &include_paths)?;
    }

    remove_explicit_instantiation(&kernel_file_absolute, &directive)?;

    if arguments.sanitize {
        sanitize_output(arguments, &file_names, &include_paths);
    }

    Ok(mangle::mangled_name_for_kernel(kernel_name, template_arguments))
}

/// Appends `template __kernel void name<A,B >(T1,T2);` to the kernel file.
/// The space before `>` keeps nested closers apart.
fn append_explicit_instantiation(
    kernel_file: &Path,
    kernel_name: &str,
    template_arguments: &[String],
    argument_types: &[String],
) -> Result<String, Error> {
    let directive = format!(
        "template __kernel void {kernel_name}<{} >({});",
        template_arguments.join(","),
        argument_types.join(",")
    );
    debug!("explicit instantiation: {directive}");

    let mut contents = fs::read_to_string(kernel_file).map_err(|source| DriverError::Io {
        path: kernel_file.to_path_buf(),
        source,
    })?;
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&directive);
    contents.push('\n');
    fs::write(kernel_file, contents).map_err(|source| DriverError::Io {
        path: kernel_file.to_path_buf(),
        source,
    })?;
    Ok(directive)
}

/// Filters the instantiation directive back out of the (now transformed)
/// kernel file.
fn remove_explicit_instantiation(kernel_file: &Path, directive: &str) -> Result<(), Error> {
    let contents = fs::read_to_string(kernel_file).map_err(|source| DriverError::Io {
        path: kernel_file.to_path_buf(),
        source,
    })?;
    let kept: Vec<&str> = contents.lines().filter(|line| !line.contains(directive)).collect();
    fs::write(kernel_file, kept.join("\n")).map_err(|source| DriverError::Io {
        path: kernel_file.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Parses and analyzes one file the way the transformation pass sees it.
/// Exposed for tests and diagnostics.
pub fn load_unit(path: &Path, include_paths: &[IncludePath]) -> Result<ParsedUnit, Error> {
    let mut unit = parse::parse_file(path, include_paths, &ParseOptions::default())?;
    sema::analyze(&mut unit.tu)?;
    Ok(unit)
}
