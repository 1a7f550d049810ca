//! The template-stripping pass.
//!
//! Included files cannot be edited while some other translation unit may
//! still need their templates, so the transformation pass only records
//! them. Once every file has been transformed, each recorded file is
//! re-parsed and the leftover template machinery removed: class and
//! function templates, whole records that still contain methods, and stray
//! method definitions.

use log::debug;

use crate::{
    ast::{DeclId, NodeId, TranslationUnit},
    error::Error,
    lex::TokenKind,
    rewrite::Rewriter,
    source::{SourceLocation, SourceManager},
    walk::{self, AstVisitor, WalkResult},
};

pub struct StripPass<'a> {
    sm: &'a SourceManager,
    rewriter: Rewriter<'a>,
}

impl<'a> StripPass<'a> {
    pub fn new(sm: &'a SourceManager) -> Self {
        Self {
            sm,
            rewriter: Rewriter::new(sm),
        }
    }

    /// Strips the translation unit and writes changed files to disk.
    pub fn run(&mut self, tu: &TranslationUnit) -> Result<(), Error> {
        self.apply(tu)?;
        self.rewriter.flush_changed_files()?;
        Ok(())
    }

    pub fn apply(&mut self, tu: &TranslationUnit) -> Result<(), Error> {
        debug!(
            "Consume [REMOVE TEMPLATES]: {}",
            self.sm.file(self.sm.main_file()).path.display()
        );
        self.traverse_translation_unit(tu)
    }

    pub fn rewriter(&self) -> &Rewriter<'a> {
        &self.rewriter
    }

    /// End-of-token of the declaration's end, extended one past a directly
    /// following `;`.
    fn real_end_offset(&self, tu: &TranslationUnit, decl: DeclId) -> u32 {
        let range = tu.decl(decl).range;
        match self.sm.location_after_token(range.end, TokenKind::Semi) {
            Some(after_semi) => after_semi.offset,
            None => self.sm.end_of_token(range.end).offset,
        }
    }

    fn remove_declaration(&mut self, tu: &TranslationUnit, decl: DeclId) {
        let begin: SourceLocation = tu.decl(decl).range.begin;
        let end = self.real_end_offset(tu, decl);
        self.rewriter.replace_chars(begin, end, String::new());
    }
}

impl AstVisitor for StripPass<'_> {
    fn traverse_decl(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if walk::is_in_system_file(self.sm, tu, decl) {
            return Ok(());
        }
        walk::walk_decl(self, tu, decl)
    }

    fn traverse_class_template(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        debug!("remove class template declaration: {:?}", tu.decl_name(decl));
        self.remove_declaration(tu, decl);
        // children vanish with the declaration; no recursion
        Ok(())
    }

    fn traverse_function_template(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        debug!("remove function template declaration: {:?}", tu.decl_name(decl));
        self.remove_declaration(tu, decl);
        Ok(())
    }

    fn traverse_cxx_record(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if tu.record_contains_methods(decl) {
            debug!("remove record declaration containing methods: {:?}", tu.decl_name(decl));
            self.remove_declaration(tu, decl);
            return Ok(());
        }
        walk::walk_cxx_record(self, tu, decl)
    }

    fn traverse_cxx_method(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        // after the transformation no method declarations are needed
        debug!("remove method declaration: {:?}", tu.decl_name(decl));
        self.remove_declaration(tu, decl);
        Ok(())
    }

    fn traverse_stmt(&mut self, _tu: &TranslationUnit, _node: NodeId) -> WalkResult {
        Ok(())
    }
}
