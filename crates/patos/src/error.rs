use std::{fmt, io, path::PathBuf};

/// Error type for a whole Patos run, separating failures by pipeline stage.
///
/// Keeping parse/transform/driver failures distinct lets the binary report
/// them accurately without string matching.
#[derive(Debug)]
pub enum Error {
    /// The front end could not parse an input file.
    Parse(ParseError),
    /// A pass hit an input construct (or internal inconsistency) it cannot rewrite.
    Transform(TransformError),
    /// Orchestration failed outside of any single file: copying, discovery, IO.
    Driver(DriverError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(error) => write!(f, "parse error: {error}"),
            Self::Transform(error) => write!(f, "{error}"),
            Self::Driver(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<TransformError> for Error {
    fn from(error: TransformError) -> Self {
        Self::Transform(error)
    }
}

impl From<DriverError> for Error {
    fn from(error: DriverError) -> Self {
        Self::Driver(error)
    }
}

/// A front-end failure, with the file and byte offset it was detected at.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub path: PathBuf,
    pub offset: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, path: impl Into<PathBuf>, offset: u32) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
            offset,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Fatal conditions during transformation or stripping.
///
/// None of these are recoverable: the run aborts and already-flushed files in
/// the output directory may be left modified (the input is never touched).
#[derive(Debug)]
pub enum TransformError {
    /// The input declared a destructor; only implicit destructors are supported.
    ExplicitDestructor { record: String },
    /// A constructor body was not a compound statement.
    ConstructorBodyNotCompound { constructor: String },
    /// A variable uses call-initialization but its initializer is not a
    /// construct expression.
    VarInitNotConstruct { variable: String },
    /// A temporary object expression has no resolved type.
    TemporaryObjectType,
    /// The type of a temporary object is not a record type.
    TemporaryObjectNotRecord,
    /// No constructor call was found for a temporary object.
    TemporaryObjectNoConstructor,
    /// A temporary object expression was reached that was not identified
    /// while scanning its enclosing statement (internal consistency failure).
    TemporaryObjectNotSeen,
    /// A specialization of a member function template is not a method.
    MethodSpecializationNotMethod { template: String },
    /// A forward declaration is not terminated the way the rewriter expects.
    InvalidForwardDeclaration { function: String },
    /// No insertion point could be determined after a declaration.
    MissingInsertLocation { declaration: String },
    /// An overloaded-operator enumerator index outside the known table.
    UnknownOperator { index: u32 },
    /// The rewriter could not write its output back to disk.
    UnsavedOutput { path: PathBuf, source: io::Error },
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitDestructor { record } => {
                write!(f, "explicit destructors not supported by patos (record '{record}')")
            }
            Self::ConstructorBodyNotCompound { constructor } => {
                write!(f, "body of constructor '{constructor}' is not a compound statement")
            }
            Self::VarInitNotConstruct { variable } => {
                write!(f, "unknown initialization of variable '{variable}'")
            }
            Self::TemporaryObjectType => {
                write!(f, "temporary expression does not have a known type")
            }
            Self::TemporaryObjectNotRecord => {
                write!(f, "type of temporary object is not a record type")
            }
            Self::TemporaryObjectNoConstructor => {
                write!(f, "did not find a call to a constructor for temporary object")
            }
            Self::TemporaryObjectNotSeen => {
                write!(f, "did not find temporary object earlier (internal error)")
            }
            Self::MethodSpecializationNotMethod { template } => {
                write!(f, "specialization of template method '{template}' is not a method")
            }
            Self::InvalidForwardDeclaration { function } => {
                write!(f, "invalid forward declaration of function '{function}'")
            }
            Self::MissingInsertLocation { declaration } => {
                write!(f, "no insertion point after declaration '{declaration}'")
            }
            Self::UnknownOperator { index } => {
                write!(f, "unknown overloaded operator kind: {index}")
            }
            Self::UnsavedOutput { path, source } => {
                write!(f, "unable to write changes to disk for '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnsavedOutput { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failures of the driver pipeline outside of any single parse or rewrite.
#[derive(Debug)]
pub enum DriverError {
    /// A directory named on the command line does not exist.
    MissingDirectory { path: PathBuf },
    /// The kernel file named for explicit instantiation does not exist.
    MissingKernelFile { path: PathBuf },
    /// Copying the input tree to the output directory failed.
    CopyFailed { source: io::Error },
    /// Plain IO failure with the path it happened on.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDirectory { path } => {
                write!(f, "directory '{}' does not exist", path.display())
            }
            Self::MissingKernelFile { path } => {
                write!(f, "kernel file does not exist: {}", path.display())
            }
            Self::CopyFailed { source } => {
                write!(f, "unable to copy content of input directory to output directory: {source}")
            }
            Self::Io { path, source } => {
                write!(f, "{}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MissingDirectory { .. } | Self::MissingKernelFile { .. } => None,
            Self::CopyFailed { source } | Self::Io { source, .. } => Some(source),
        }
    }
}
