//! Patos lowers a templated, class-based kernel dialect of C++ to flat
//! OpenCL C: every used template specialization becomes a plain
//! `typedef struct`, every method a name-mangled free function taking an
//! explicit `struct T *thisRef`, and every call site is rewritten to match.
//!
//! The crate is organized around two source-to-source passes driven by a
//! shared rewriting engine:
//!
//! * [`transform::TransformationPass`] monomorphizes and de-classes one
//!   translation unit, deferring template declarations it finds in included
//!   files;
//! * [`strip::StripPass`] revisits those files and removes the leftover
//!   template machinery;
//! * [`driver`] wires the two together over a copied directory tree.

mod ast;
mod error;
mod files;
mod lex;
mod mangle;
mod parse;
mod rewrite;
mod sema;
mod source;
mod strip;
mod transform;
mod walk;

pub mod driver;

pub use crate::{
    ast::{DeclId, NodeId, TranslationUnit, TypeLocId},
    driver::{instantiate_kernel, run_transformation, Arguments},
    error::{DriverError, Error, ParseError, TransformError},
    files::{copy_directory, directory_exists, find_files_recursively, make_directories},
    lex::{Token, TokenKind},
    mangle::{
        mangled_name_for_function, mangled_name_for_kernel, mangled_name_for_record, OperatorKind, KERNEL_ANNOTATION,
    },
    parse::{parse_file, IncludePath, ParseOptions, ParsedUnit},
    rewrite::Rewriter,
    sema::analyze,
    source::{Characteristic, FileId, SourceLocation, SourceManager, SourceRange},
    strip::StripPass,
    transform::TransformationPass,
    walk::{is_in_system_file, AstVisitor},
};
