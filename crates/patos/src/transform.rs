//! The transformation pass: monomorphization + de-classing of one
//! translation unit.
//!
//! Every used class-template specialization is emitted as a flat
//! `typedef struct` next to the original template, each of its methods as a
//! name-mangled free function taking `struct T *thisRef` (forward
//! declaration next to the record, definition at the end of the main file).
//! Call sites, type references, `this` expressions, constructor calls and
//! temporaries are rewritten in place.
//!
//! Rewrites of a nested construct that an enclosing construct re-emits are
//! composed under a fresh overlay pushed onto the rewriter stack; the outer
//! edit is the only one placed on the enclosing rewriter. Template
//! declarations found in included files are deferred to the stripping pass
//! via the shared template-files set.

use std::path::PathBuf;

use ahash::AHashMap;
use indexmap::IndexSet;
use log::debug;

use crate::{
    ast::{DeclId, DeclKind, FunctionKind, InitStyle, NodeId, NodeKind, TemplatedKind, TranslationUnit, TypeLocId},
    error::{Error, TransformError},
    lex::TokenKind,
    mangle,
    rewrite::Rewriter,
    source::{SourceLocation, SourceManager, SourceRange},
    walk::{self, AstVisitor, WalkResult},
};

pub struct TransformationPass<'a> {
    sm: &'a SourceManager,
    template_files: &'a mut IndexSet<PathBuf>,
    main: Rewriter<'a>,
    overlays: Vec<Rewriter<'a>>,
    temporary_names: AHashMap<NodeId, String>,
    temporary_counter: u32,
}

impl<'a> TransformationPass<'a> {
    pub fn new(sm: &'a SourceManager, template_files: &'a mut IndexSet<PathBuf>) -> Self {
        Self {
            sm,
            template_files,
            main: Rewriter::new(sm),
            overlays: Vec::new(),
            temporary_names: AHashMap::new(),
            temporary_counter: 0,
        }
    }

    /// Transforms the translation unit and writes changed files to disk.
    pub fn run(&mut self, tu: &TranslationUnit) -> Result<(), Error> {
        self.apply(tu)?;
        self.main.flush_changed_files()?;
        Ok(())
    }

    /// Transforms the translation unit without flushing; the result can be
    /// inspected through [`Self::rewriter`].
    pub fn apply(&mut self, tu: &TranslationUnit) -> Result<(), Error> {
        debug!(
            "Consume [TRANSFORMATION]: {}",
            self.sm.file(self.sm.main_file()).path.display()
        );
        self.traverse_translation_unit(tu)
    }

    pub fn rewriter(&self) -> &Rewriter<'a> {
        &self.main
    }

    pub fn is_changed(&self) -> bool {
        self.main.is_changed()
    }

    // ----- rewriter stack -----

    fn cur(&mut self) -> &mut Rewriter<'a> {
        self.overlays.last_mut().unwrap_or(&mut self.main)
    }

    fn cur_ref(&self) -> &Rewriter<'a> {
        self.overlays.last().unwrap_or(&self.main)
    }

    fn push_overlay(&mut self) {
        self.overlays.push(Rewriter::new(self.sm));
    }

    fn pop_overlay(&mut self) {
        self.overlays.pop().expect("overlay stack underflow");
    }

    /// The current rewritten spelling of an expression, falling back to the
    /// original source text.
    fn expression_to_string(&self, tu: &TranslationUnit, node: NodeId) -> String {
        let range = tu.node(node).range;
        let text = self.cur_ref().rewritten_text_of(range);
        if text.is_empty() {
            self.sm.text_of(range).to_owned()
        } else {
            text
        }
    }

    // ----- shared pieces -----

    fn is_system(&self, tu: &TranslationUnit, decl: DeclId) -> bool {
        walk::is_in_system_file(self.sm, tu, decl)
    }

    /// `[return-type begin, just past ')']`; constructors start at their
    /// name since they have no written return type.
    fn signature_range(&self, tu: &TranslationUnit, function: DeclId) -> Result<SourceRange, Error> {
        let decl = tu.function(function);
        let begin = if decl.kind == FunctionKind::Constructor {
            decl.name_range.begin
        } else {
            let return_type = decl
                .return_type
                .ok_or_else(|| TransformError::MissingInsertLocation {
                    declaration: decl.name.clone(),
                })?;
            tu.type_loc(return_type).range.begin
        };
        let end = if let Some(&last) = decl.params.last() {
            self.sm.end_of_token(tu.decl(last).range.end)
        } else {
            self.sm
                .location_after_token(decl.name_range.end, TokenKind::LParen)
                .ok_or_else(|| TransformError::MissingInsertLocation {
                    declaration: decl.name.clone(),
                })?
        };
        Ok(SourceRange::new(begin, end))
    }

    /// Past the end of a function declaration: past `}` for definitions,
    /// past the `;` for forward declarations.
    fn real_end_location(&self, tu: &TranslationUnit, function: DeclId) -> Result<SourceLocation, Error> {
        let decl = tu.function(function);
        let range = tu.decl(function).range;
        if decl.is_definition {
            Ok(self.sm.end_of_token(range.end))
        } else {
            self.sm
                .location_after_token(range.end, TokenKind::Semi)
                .ok_or_else(|| {
                    TransformError::InvalidForwardDeclaration {
                        function: decl.name.clone(),
                    }
                    .into()
                })
        }
    }

    /// Emits the transformed function: forward declaration at
    /// `insert_location`, full definition at the end of the main file.
    fn transform_function(
        &mut self,
        tu: &TranslationUnit,
        function: DeclId,
        insert_location: SourceLocation,
        add_definition: bool,
    ) -> WalkResult {
        if tu.function(function).is_method() {
            self.traverse_cxx_method(tu, function)?;
        } else {
            self.traverse_function(tu, function)?;
        }

        let decl = tu.function(function);
        let mut text = String::from("\n");
        if decl.is_kernel() {
            text.push_str("__kernel ");
        }
        if decl.kind == FunctionKind::Constructor {
            let parent = decl.parent.ok_or(TransformError::MissingInsertLocation {
                declaration: decl.name.clone(),
            })?;
            text.push_str(&format!("struct {} ", mangle::record_name(tu, parent)));
        }
        let signature = self.signature_range(tu, function)?;
        text.push_str(&self.cur_ref().rewritten_text_of(signature));

        self.main.insert_after(insert_location, format!("{text};\n"));

        if add_definition {
            if let Some(body) = decl.body {
                let body_text = self.cur_ref().rewritten_text_of(tu.node(body).range);
                let module_end = self.sm.end_of_file(self.sm.main_file());
                self.main.insert_after(module_end, format!("{text}\n{body_text}\n"));
            }
        }
        Ok(())
    }

    /// The flattened `typedef struct` text for a record: fields only, each
    /// composed under a throwaway overlay so type substitutions apply.
    fn create_flat_version(&mut self, tu: &TranslationUnit, record: DeclId) -> Result<String, Error> {
        self.push_overlay();
        let result = self.flat_version_inner(tu, record);
        self.pop_overlay();
        result
    }

    fn flat_version_inner(&mut self, tu: &TranslationUnit, record: DeclId) -> Result<String, Error> {
        let name = mangle::record_name(tu, record);
        let mut text = format!("\ntypedef struct {name}\n{{\n");
        for &child in &tu.record(record).children {
            if matches!(tu.decl(child).kind, DeclKind::Field(_)) {
                self.traverse_field(tu, child)?;
                let field_text = self.cur_ref().rewritten_text_of(tu.decl(child).range);
                text.push_str(&format!("\t{field_text};\n"));
            }
        }
        text.push_str(&format!("}} {name};\n"));
        debug!("created flattened version for {name}");
        Ok(text)
    }

    fn temporary_name(&mut self, node: NodeId) -> String {
        if let Some(name) = self.temporary_names.get(&node) {
            return name.clone();
        }
        let name = format!("__patos_temporary_{}", self.temporary_counter);
        self.temporary_counter += 1;
        self.temporary_names.insert(node, name.clone());
        name
    }

    fn remove_declaration_or_defer(&mut self, tu: &TranslationUnit, decl: DeclId) {
        let range = tu.decl(decl).range;
        if self.sm.is_in_main_file(range.begin) {
            self.main.remove_range(range);
        } else {
            let path = self.sm.filename(range.begin).to_path_buf();
            debug!("found template declaration in included file:\n   {}", path.display());
            self.template_files.insert(path);
        }
    }
}

impl AstVisitor for TransformationPass<'_> {
    fn traverse_decl(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        walk::walk_decl(self, tu, decl)
    }

    fn traverse_class_template(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        let DeclKind::ClassTemplate(template) = &tu.decl(decl).kind else {
            return Ok(());
        };
        debug!("found class template declaration: {}", template.name);

        for &specialization in &template.specializations {
            let mangled = mangle::mangled_name_for_record(tu, specialization);
            if tu.has_top_level_name(&mangled) {
                // an earlier run already emitted this specialization
                continue;
            }
            self.push_overlay();
            let result = self.traverse_cxx_record(tu, specialization);
            self.pop_overlay();
            result?;
        }

        self.remove_declaration_or_defer(tu, decl);
        Ok(())
    }

    fn traverse_cxx_record(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        let record = tu.record(decl);
        let record_range = tu.decl(decl).range;
        let is_specialization = record.is_specialization();

        if !(is_specialization || tu.record_contains_methods(decl)) {
            // a plain data record only needs a typedef
            if !tu.has_typedef(&record.name) {
                if let Some(loc) = self.sm.location_after_token(record_range.end, TokenKind::Semi) {
                    let name = &record.name;
                    self.cur().insert_after(loc, format!("\ntypedef struct {name} {name};\n"));
                }
            }
            return Ok(());
        }

        let insert_location = self
            .sm
            .location_after_token(record_range.end, TokenKind::Semi)
            .ok_or_else(|| TransformError::MissingInsertLocation {
                declaration: record.name.clone(),
            })?;

        let flat = self.create_flat_version(tu, decl)?;
        self.main.insert_after(insert_location, flat);

        for &child in &record.children {
            let DeclKind::Function(function) = &tu.decl(child).kind else {
                continue;
            };
            if !function.is_definition {
                continue;
            }
            if function.kind == FunctionKind::Destructor {
                return Err(TransformError::ExplicitDestructor {
                    record: record.name.clone(),
                }
                .into());
            }
            self.transform_function(tu, child, insert_location, true)?;
        }

        for &child in &record.children {
            let DeclKind::FunctionTemplate(template) = &tu.decl(child).kind else {
                continue;
            };
            for &specialization in &template.specializations {
                if !tu.function(specialization).is_method() {
                    return Err(TransformError::MethodSpecializationNotMethod {
                        template: template.name.clone(),
                    }
                    .into());
                }
                let add_definition = tu.function(specialization).is_definition;
                self.push_overlay();
                let result = self.transform_function(tu, specialization, insert_location, add_definition);
                self.pop_overlay();
                result?;
            }
        }

        if !is_specialization {
            // non-template records may be transformed only once, so the
            // original is removed even when it lives in an included file
            self.main.remove_range(record_range);
        }
        Ok(())
    }

    fn traverse_function_template(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        let DeclKind::FunctionTemplate(template) = &tu.decl(decl).kind else {
            return Ok(());
        };
        if template.parent.is_some() {
            // member templates are handled with their record
            return Ok(());
        }

        for &specialization in &template.specializations {
            let mangled = mangle::mangled_name_for_function(tu, specialization);
            if tu.has_top_level_name(&mangled) {
                continue;
            }
            self.push_overlay();
            let result = self
                .real_end_location(tu, specialization)
                .and_then(|loc| self.transform_function(tu, specialization, loc, template.is_definition));
            self.pop_overlay();
            result?;
        }

        self.remove_declaration_or_defer(tu, decl);
        Ok(())
    }

    fn traverse_cxx_method(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        // the pattern methods of a class template are never rewritten; only
        // their per-specialization clones are
        if let Some(parent) = tu.function(decl).parent {
            let parent_record = tu.record(parent);
            if !parent_record.is_specialization() && parent_record.described_template.is_some() {
                return Ok(());
            }
        }
        walk::walk_function(self, tu, decl)
    }

    fn traverse_function(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        walk::walk_function(self, tu, decl)
    }

    fn visit_function_decl(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        let function = tu.function(decl);
        let is_specialization = matches!(function.templated, TemplatedKind::FunctionTemplateSpecialization { .. });
        if !is_specialization && !function.is_method() {
            return Ok(());
        }
        debug!("mangling declarator of '{}'", function.name);

        let mangled = mangle::mangled_name_for_function(tu, decl);
        let declarator = if function.is_method() && !function.lexical_parent_is_record {
            // out-of-line definition: the replacement swallows `Rec<..>::`
            match function.return_type {
                Some(return_type) => {
                    let after_return = self.sm.end_of_token(tu.type_loc(return_type).range.end);
                    SourceRange::new(after_return.with_offset(1), function.name_range.end)
                }
                None => function.name_range,
            }
        } else {
            function.name_range
        };
        self.cur().replace_range(declarator, mangled);
        Ok(())
    }

    fn visit_cxx_method(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        if self.is_system(tu, decl) {
            return Ok(());
        }
        let function = tu.function(decl);
        let Some(parent) = function.parent else {
            return Ok(());
        };
        let parent_name = mangle::record_name(tu, parent);

        if function.kind != FunctionKind::Constructor {
            let after_lparen = self
                .sm
                .location_after_token(function.name_range.end, TokenKind::LParen)
                .ok_or_else(|| TransformError::MissingInsertLocation {
                    declaration: function.name.clone(),
                })?;
            let additional = format!("struct {parent_name} *thisRef");
            if function.params.is_empty() {
                self.cur().insert_after(after_lparen, additional);
            } else {
                // replace the '(' itself: the first parameter's type may be
                // under rewrite, and edits must not collide at its offset
                let paren = after_lparen.with_offset(-1);
                self.cur().replace_range(SourceRange::at(paren), format!("({additional},  "));
            }
            return Ok(());
        }

        // constructor: declare the constructed value, alias thisRef to it,
        // and return it at the end
        if let Some(body) = function.body {
            let NodeKind::Compound { lbrace, rbrace, .. } = tu.node(body).kind else {
                return Err(TransformError::ConstructorBodyNotCompound {
                    constructor: function.name.clone(),
                }
                .into());
            };
            let prologue = format!(
                "\n\tstruct {parent_name} __patos_constructed;\n\tstruct {parent_name} *thisRef = &(__patos_constructed);\n"
            );
            let epilogue = "\n\treturn __patos_constructed;\n";
            self.cur().insert_after(lbrace.with_offset(1), prologue);
            self.cur().insert_before(rbrace, epilogue);
        }
        Ok(())
    }

    fn traverse_type_loc(&mut self, tu: &TranslationUnit, ty: TypeLocId) -> WalkResult {
        let type_loc = tu.type_loc(ty);
        if !type_loc.pointer {
            if let Some(record) = type_loc.ty.record {
                if tu.record(record).is_specialization() {
                    let mangled = mangle::mangled_name_for_record(tu, record);
                    self.cur().replace_range(type_loc.range, mangled);
                    // the whole spelling was replaced; do not recurse
                    return Ok(());
                }
            }
        }
        if let Some(substitution) = &type_loc.substituted {
            self.cur().replace_range(type_loc.range, substitution.clone());
        }
        walk::walk_type_loc(self, tu, ty)
    }

    fn traverse_compound(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let NodeKind::Compound { stmts, .. } = &tu.node(node).kind else {
            return Ok(());
        };
        for &stmt in stmts {
            if matches!(tu.node(stmt).kind, NodeKind::Compound { .. }) {
                self.traverse_stmt(tu, stmt)?;
                continue;
            }

            let temporaries = find_temporary_objects(tu, stmt);
            if temporaries.is_empty() {
                self.traverse_stmt(tu, stmt)?;
                continue;
            }

            // one helper variable per temporary, declared before the
            // statement that uses them
            let mut prologue = String::from("/* BEGIN USAGE OF TEMPORARY OBJECT */\n\t");
            for &temporary in &temporaries {
                let (ty, construct) = match &tu.node(temporary).kind {
                    NodeKind::FunctionalCast { ty, sub } => {
                        let construct = matches!(tu.node(*sub).kind, NodeKind::Construct(_)).then_some(*sub);
                        (ty.clone(), construct)
                    }
                    NodeKind::TemporaryObject(data) => (data.ty.clone(), Some(temporary)),
                    _ => continue,
                };
                if ty.text.is_empty() {
                    return Err(TransformError::TemporaryObjectType.into());
                }
                let record = ty.record.ok_or(TransformError::TemporaryObjectNotRecord)?;
                let type_name = mangle::record_name(tu, record);
                let helper = self.temporary_name(temporary);
                prologue.push_str(&format!("struct {type_name} {helper}"));

                let construct = construct.ok_or(TransformError::TemporaryObjectNoConstructor)?;
                let (ctor, paren_range) = match &tu.node(construct).kind {
                    NodeKind::Construct(data) | NodeKind::TemporaryObject(data) => (data.ctor, data.paren_range),
                    _ => (None, None),
                };
                if ctor.is_some() {
                    // compose the constructor call under a scratch overlay so
                    // the edits do not leak into the statement's rewrite
                    self.push_overlay();
                    let composed = self.traverse_construct(tu, construct).map(|()| {
                        paren_range.map(|range| self.cur_ref().rewritten_text_of(range))
                    });
                    self.pop_overlay();
                    if let Some(call_text) = composed? {
                        prologue.push_str(&format!(" = {call_text}"));
                    }
                }
                prologue.push_str(";\n\t");
            }

            let stmt_range = tu.node(stmt).range;
            let end_location = self
                .sm
                .location_after_token(stmt_range.end, TokenKind::Semi)
                .unwrap_or_else(|| self.sm.end_of_token(stmt_range.end));

            self.traverse_stmt(tu, stmt)?;
            self.cur().insert_before(stmt_range.begin, prologue);
            self.cur()
                .insert_after(end_location, "\n\t/* END USAGE OF TEMPORARY OBJECT */\n");
        }
        Ok(())
    }

    fn traverse_call(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let NodeKind::Call(call) = &tu.node(node).kind else {
            return Ok(());
        };
        if call.callee_decl.is_none() {
            // nothing known about the callee; traverse everything
            return walk::walk_call(self, tu, node);
        }
        for &arg in &call.args {
            self.traverse_stmt(tu, arg)?;
        }
        self.visit_call(tu, node)
    }

    fn visit_call(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let NodeKind::Call(call) = &tu.node(node).kind else {
            return Ok(());
        };
        let Some(callee_decl) = call.callee_decl else {
            return Ok(());
        };
        let DeclKind::Function(function) = &tu.decl(callee_decl).kind else {
            return Ok(());
        };
        if !matches!(function.templated, TemplatedKind::FunctionTemplateSpecialization { .. }) {
            return Ok(());
        }

        // the written callee includes explicit template arguments and the
        // opening parenthesis (plus any whitespace before argument 0)
        let mangled = mangle::mangled_name_for_function(tu, callee_decl);
        let callee_begin = tu.node(call.callee).range.begin;
        let end_offset = match call.args.first() {
            Some(&first) => tu.node(first).range.begin.offset,
            None => call.rparen.offset,
        };
        self.cur().replace_chars(callee_begin, end_offset, format!("{mangled}("));
        Ok(())
    }

    fn traverse_member_call(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let NodeKind::MemberCall(call) = tu.node(node).kind.clone() else {
            return Ok(());
        };
        let NodeKind::Member(member) = tu.node(call.callee).kind.clone() else {
            return walk::walk_member_call(self, tu, node);
        };
        let Some(method) = member.member else {
            return walk::walk_member_call(self, tu, node);
        };

        debug!("member call expression -> {}", tu.function(method).name);

        // 1) receiver becomes the leading argument
        let receiver = if matches!(tu.node(member.base).kind, NodeKind::This { .. }) {
            "thisRef".to_owned()
        } else {
            let base = self.expression_to_string(tu, member.base);
            if member.is_arrow { base } else { format!("&{base}") }
        };
        match call.args.first() {
            Some(&first) => {
                let loc = tu.node(first).range.begin;
                self.cur().insert_before(loc, format!("{receiver}, "));
            }
            None => self.cur().insert_before(call.rparen, receiver),
        }

        // 2) the callee is replaced by the mangled free function
        let mangled = mangle::mangled_name_for_function(tu, method);
        self.cur().replace_range(tu.node(call.callee).range, mangled);

        // the callee is fully rewritten; only arguments still need a walk
        for &arg in &call.args {
            self.traverse_stmt(tu, arg)?;
        }
        Ok(())
    }

    fn traverse_operator_call(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let NodeKind::OperatorCall(call) = &tu.node(node).kind else {
            return Ok(());
        };
        let Some(method) = call.callee_decl else {
            return walk::walk_operator_call(self, tu, node);
        };
        let args = call.args.clone();

        // rewrite the arguments under a scratch overlay, read their spelling
        // back, and replace the whole expression in one edit
        self.push_overlay();
        let mut walked = Ok(());
        for &arg in &args {
            walked = self.traverse_stmt(tu, arg);
            if walked.is_err() {
                break;
            }
        }
        let mut arg_strings = Vec::with_capacity(args.len());
        if walked.is_ok() {
            for (index, &arg) in args.iter().enumerate() {
                let text = self.expression_to_string(tu, arg);
                if index == 0 {
                    arg_strings.push(format!("&({text})"));
                } else {
                    arg_strings.push(text);
                }
            }
        }
        self.pop_overlay();
        walked?;

        let mangled = mangle::mangled_name_for_function(tu, method);
        let replacement = format!("{mangled}({})", arg_strings.join(", "));
        self.cur().replace_range(tu.node(node).range, replacement);
        Ok(())
    }

    fn traverse_construct(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let NodeKind::Construct(construct) = tu.node(node).kind.clone() else {
            return Ok(());
        };
        let Some(ctor) = construct.ctor else {
            // implicit constructor: nothing to emit, arguments stay in place
            for &arg in &construct.args {
                self.traverse_stmt(tu, arg)?;
            }
            return Ok(());
        };

        self.push_overlay();
        let mut walked = Ok(());
        for &arg in &construct.args {
            walked = self.traverse_stmt(tu, arg);
            if walked.is_err() {
                break;
            }
        }
        let mut arg_strings = Vec::with_capacity(construct.args.len());
        if walked.is_ok() {
            for &arg in &construct.args {
                arg_strings.push(self.expression_to_string(tu, arg));
            }
        }
        self.pop_overlay();
        walked?;

        let mangled = mangle::mangled_name_for_function(tu, ctor);
        let call_text = format!("{mangled}({})", arg_strings.join(", "));
        match construct.paren_range {
            Some(paren_range) => self.cur().replace_range(paren_range, call_text),
            None => {
                let loc = self.sm.end_of_token(tu.node(node).range.end);
                self.cur().insert_after(loc, call_text);
            }
        }
        Ok(())
    }

    fn traverse_var(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk::walk_var(self, tu, decl)?;

        let DeclKind::Var(var) = &tu.decl(decl).kind else {
            return Ok(());
        };
        if var.init_style != InitStyle::Call {
            return Ok(());
        }
        let Some(init) = var.init else {
            return Err(TransformError::VarInitNotConstruct {
                variable: var.name.clone(),
            }
            .into());
        };
        let NodeKind::Construct(construct) = &tu.node(init).kind else {
            return Err(TransformError::VarInitNotConstruct {
                variable: var.name.clone(),
            }
            .into());
        };
        if construct.ctor.is_some() {
            // `T v(a)` becomes `T v = T_constructor(a)` once the construct
            // expression itself is replaced
            let loc = match construct.paren_range {
                Some(paren_range) => paren_range.begin,
                None => self.sm.end_of_token(tu.node(init).range.end),
            };
            self.cur().insert_before(loc, " = ");
        }
        Ok(())
    }

    fn visit_cxx_this(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let NodeKind::This { implicit } = tu.node(node).kind else {
            return Ok(());
        };
        let range = tu.node(node).range;
        if implicit {
            self.cur().insert_before(range.begin, "thisRef->");
        } else {
            self.cur().replace_range(range, "thisRef");
        }
        Ok(())
    }

    fn traverse_functional_cast(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let helper = self
            .temporary_names
            .get(&node)
            .ok_or(TransformError::TemporaryObjectNotSeen)?
            .clone();
        // the spelling is replaced wholesale; no recursion
        self.cur().replace_range(tu.node(node).range, helper);
        Ok(())
    }

    fn traverse_temporary_object(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        let helper = self
            .temporary_names
            .get(&node)
            .ok_or(TransformError::TemporaryObjectNotSeen)?
            .clone();
        self.cur().replace_range(tu.node(node).range, helper);
        Ok(())
    }
}

/// Collects the temporary-object expressions used by one statement without
/// descending into nested compound statements.
fn find_temporary_objects(tu: &TranslationUnit, stmt: NodeId) -> Vec<NodeId> {
    struct Finder {
        found: Vec<NodeId>,
    }

    impl AstVisitor for Finder {
        fn traverse_compound(&mut self, _tu: &TranslationUnit, _node: NodeId) -> WalkResult {
            Ok(())
        }

        fn traverse_functional_cast(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
            self.found.push(node);
            walk::walk_functional_cast(self, tu, node)
        }

        fn traverse_temporary_object(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
            self.found.push(node);
            walk::walk_temporary_object(self, tu, node)
        }
    }

    let mut finder = Finder { found: Vec::new() };
    // the walk cannot fail: the finder never returns an error
    let _ = finder.traverse_stmt(tu, stmt);
    finder.found
}
