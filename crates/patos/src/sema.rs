//! Specialization enumeration and name resolution.
//!
//! Runs between parsing and the transformation pass. Three jobs:
//!
//! 1. enumerate every used class-template specialization (type references,
//!    temporaries, construct expressions) and function-template
//!    specialization (explicit template arguments, deduction from argument
//!    types, explicit-instantiation requests), cascading until a fixpoint;
//! 2. instantiate by cloning the pattern under a substitution map; clones
//!    keep the pattern's source ranges, and type references that named a
//!    template parameter are marked substituted with their replacement
//!    spelling, which is what drives the type rewriting later;
//! 3. resolve declaration references, member accesses, member calls and
//!    operator applications inside every reachable body, converting plain
//!    binary/call nodes into operator-call nodes where a record overload
//!    applies, and bare field/method references into implicit-`this` forms.

use std::collections::VecDeque;

use ahash::AHashMap;
use log::debug;

use crate::{
    ast::{
        ConstructData, Decl, DeclId, DeclKind, FunctionDecl, FunctionKind, MemberCallData, MemberData, Node, NodeId,
        NodeKind, OperatorCallData, ParamDecl, RecordDecl, SpecializationInfo, TemplateArg, TemplateArgs,
        TemplatedKind, TranslationUnit, TypeLoc, TypeLocId, TypeRef, VarDecl,
    },
    error::Error,
    mangle::OperatorKind,
    source::SourceRange,
};

/// Resolves and instantiates everything reachable in `tu`.
pub fn analyze(tu: &mut TranslationUnit) -> Result<(), Error> {
    let mut sema = Sema {
        tu,
        pending: VecDeque::new(),
    };
    sema.seed()?;
    sema.process_requests()?;
    sema.drain()?;
    Ok(())
}

/// The (approximate) static type of an expression.
#[derive(Debug, Clone, Default)]
struct ExprType {
    record: Option<DeclId>,
    pointers: u8,
    text: String,
}

impl ExprType {
    fn unknown() -> Self {
        Self::default()
    }

    fn named(text: impl Into<String>) -> Self {
        Self {
            record: None,
            pointers: 0,
            text: text.into(),
        }
    }
}

struct Sema<'t> {
    tu: &'t mut TranslationUnit,
    /// Function declarations whose bodies still need resolution.
    pending: VecDeque<DeclId>,
}

impl Sema<'_> {
    // ----- entry points -----

    fn seed(&mut self) -> Result<(), Error> {
        let top_level = self.tu.top_level.clone();
        for decl in top_level {
            match &self.tu.decl(decl).kind {
                DeclKind::Record(record) if record.described_template.is_none() => {
                    let children = record.children.clone();
                    for child in children {
                        match &self.tu.decl(child).kind {
                            DeclKind::Field(field) => {
                                let ty = field.ty;
                                self.resolve_type_loc(ty)?;
                            }
                            DeclKind::Function(function) if function.body.is_some() => {
                                self.pending.push_back(child);
                            }
                            _ => {}
                        }
                    }
                }
                DeclKind::Function(_) => {
                    self.resolve_qualifier(decl)?;
                    if self.tu.function(decl).body.is_some() {
                        self.pending.push_back(decl);
                    } else {
                        self.resolve_signature(decl)?;
                    }
                }
                DeclKind::Var(var) => {
                    let (ty, init) = (var.ty, var.init);
                    self.resolve_type_loc(ty)?;
                    if let Some(init) = init {
                        let mut scopes = Scopes::new(None);
                        self.sync_var_init(ty, init)?;
                        self.resolve_expr(&mut scopes, init)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn process_requests(&mut self) -> Result<(), Error> {
        let requests = self.tu.instantiation_requests.clone();
        for request in requests {
            let Some(&template) = self.tu.globals.get(&request.name) else {
                debug!("explicit instantiation names unknown template: {}", request.name);
                continue;
            };
            if !matches!(self.tu.decl(template).kind, DeclKind::FunctionTemplate(_)) {
                continue;
            }
            let args: TemplateArgs = request
                .template_args
                .iter()
                .map(|text| self.type_from_text(text))
                .collect::<Result<_, _>>()?;
            self.ensure_function_specialization(template, args)?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), Error> {
        let mut done = ahash::AHashSet::new();
        while let Some(function) = self.pending.pop_front() {
            if !done.insert(function) {
                continue;
            }
            self.resolve_function(function)?;
        }
        Ok(())
    }

    // ----- type references -----

    /// Resolves a written type reference, instantiating the class template
    /// it names when its arguments are concrete.
    fn resolve_type_loc(&mut self, ty: TypeLocId) -> Result<(), Error> {
        for child in self.tu.type_loc(ty).children.clone() {
            self.resolve_type_loc(child)?;
        }
        let type_loc = self.tu.type_loc(ty);
        if type_loc.pointer || type_loc.ty.record.is_some() {
            return Ok(());
        }
        let base = type_loc.ty.base.clone();
        let Some(&template) = self.tu.globals.get(&base) else {
            return Ok(());
        };
        if !matches!(self.tu.decl(template).kind, DeclKind::ClassTemplate(_)) {
            return Ok(());
        }
        let args: TemplateArgs = self
            .tu
            .type_loc(ty)
            .children
            .clone()
            .into_iter()
            .map(|child| {
                let child = self.tu.type_loc(child);
                TemplateArg {
                    text: child.ty.text.clone(),
                    record: child.ty.record,
                }
            })
            .collect();
        if args.is_empty() {
            return Ok(());
        }
        let specialization = self.ensure_class_specialization(template, args)?;
        self.tu.type_loc_mut(ty).ty.record = Some(specialization);
        Ok(())
    }

    fn resolve_signature(&mut self, function: DeclId) -> Result<(), Error> {
        let decl = self.tu.function(function);
        let (return_type, params) = (decl.return_type, decl.params.clone());
        if let Some(return_type) = return_type {
            self.resolve_type_loc(return_type)?;
        }
        for param in params {
            if let DeclKind::Param(ParamDecl { ty, .. }) = &self.tu.decl(param).kind {
                let ty = *ty;
                self.resolve_type_loc(ty)?;
            }
        }
        Ok(())
    }

    /// Binds an out-of-line definition (`T Rec::m`, `T Rec<int>::m`) to its
    /// record, instantiating the specialization if needed.
    fn resolve_qualifier(&mut self, function: DeclId) -> Result<(), Error> {
        let Some((name, targs)) = self.tu.function(function).qualifier.clone() else {
            return Ok(());
        };
        let Some(&qualifier_decl) = self.tu.globals.get(&name) else {
            return Ok(());
        };
        let parent = match &self.tu.decl(qualifier_decl).kind {
            DeclKind::Record(_) => Some(qualifier_decl),
            DeclKind::ClassTemplate(_) => {
                let args: TemplateArgs = targs
                    .iter()
                    .map(|text| self.type_from_text(text))
                    .collect::<Result<_, _>>()?;
                Some(self.ensure_class_specialization(qualifier_decl, args)?)
            }
            _ => None,
        };
        if let DeclKind::Function(decl) = &mut self.tu.decl_mut(function).kind {
            decl.parent = parent;
        }
        Ok(())
    }

    // ----- textual types -----

    /// Parses a type spelling (`int`, `Vec<int>`, `Pair<Vec<int>, float>`)
    /// into a template argument, instantiating records it names.
    fn type_from_text(&mut self, text: &str) -> Result<TemplateArg, Error> {
        let record = self.record_from_text(text)?;
        Ok(TemplateArg {
            text: text.trim().to_owned(),
            record,
        })
    }

    fn record_from_text(&mut self, text: &str) -> Result<Option<DeclId>, Error> {
        let trimmed = text.trim();
        if trimmed.ends_with('*') || trimmed.ends_with('&') {
            return Ok(None);
        }
        if let Some(open) = trimmed.find('<') {
            let base = trimmed[..open].trim();
            let Some(close) = trimmed.rfind('>') else {
                return Ok(None);
            };
            let inner = &trimmed[open + 1..close];
            let Some(&template) = self.tu.globals.get(base) else {
                return Ok(None);
            };
            if !matches!(self.tu.decl(template).kind, DeclKind::ClassTemplate(_)) {
                return Ok(None);
            }
            let mut args = TemplateArgs::new();
            for part in split_type_list(inner) {
                args.push(self.type_from_text(&part)?);
            }
            return Ok(Some(self.ensure_class_specialization(template, args)?));
        }
        match self.tu.globals.get(trimmed) {
            Some(&decl) if matches!(self.tu.decl(decl).kind, DeclKind::Record(_)) => Ok(Some(decl)),
            _ => Ok(None),
        }
    }

    // ----- instantiation -----

    fn ensure_class_specialization(&mut self, template: DeclId, args: TemplateArgs) -> Result<DeclId, Error> {
        let DeclKind::ClassTemplate(decl) = &self.tu.decl(template).kind else {
            panic!("not a class template");
        };
        let (params, pattern, existing) = (decl.params.clone(), decl.pattern, decl.specializations.clone());
        for candidate in existing {
            if let DeclKind::Record(record) = &self.tu.decl(candidate).kind {
                if let Some(info) = &record.specialization {
                    if args_match(&info.args, &args) {
                        return Ok(candidate);
                    }
                }
            }
        }

        debug!(
            "instantiating {}<{}>",
            self.tu.record(pattern).name,
            args.iter().map(|a| a.text.as_str()).collect::<Vec<_>>().join(", ")
        );

        // register the shell first so self-references resolve to it
        let pattern_decl = self.tu.decl(pattern).clone();
        let name = self.tu.record(pattern).name.clone();
        let has_user_constructor = self.tu.record(pattern).has_user_constructor;
        let specialization = self.tu.add_decl(Decl {
            kind: DeclKind::Record(RecordDecl {
                name,
                children: Vec::new(),
                specialization: Some(SpecializationInfo {
                    template,
                    args: args.clone(),
                }),
                described_template: None,
                has_user_constructor,
            }),
            range: pattern_decl.range,
        });
        if let DeclKind::ClassTemplate(decl) = &mut self.tu.decl_mut(template).kind {
            decl.specializations.push(specialization);
        }

        let subst: Vec<(String, TemplateArg)> = params.into_iter().zip(args.iter().cloned()).collect();
        let pattern_children = self.tu.record(pattern).children.clone();
        let mut cloner = Cloner {
            subst,
            decl_map: AHashMap::new(),
        };
        let mut children = Vec::new();
        for child in pattern_children {
            let cloned = self.clone_member(&mut cloner, child, specialization)?;
            if matches!(&self.tu.decl(cloned).kind, DeclKind::Function(f) if f.body.is_some()) {
                self.pending.push_back(cloned);
            }
            children.push(cloned);
        }
        if let DeclKind::Record(record) = &mut self.tu.decl_mut(specialization).kind {
            record.children = children;
        }
        Ok(specialization)
    }

    fn ensure_function_specialization(&mut self, template: DeclId, args: TemplateArgs) -> Result<DeclId, Error> {
        let DeclKind::FunctionTemplate(decl) = &self.tu.decl(template).kind else {
            panic!("not a function template");
        };
        let (params, pattern, base_subst, existing) = (
            decl.params.clone(),
            decl.pattern,
            decl.base_subst.clone(),
            decl.specializations.clone(),
        );
        for candidate in existing {
            if let DeclKind::Function(function) = &self.tu.decl(candidate).kind {
                if let TemplatedKind::FunctionTemplateSpecialization { args: existing_args, .. } = &function.templated
                {
                    if args_match(existing_args, &args) {
                        return Ok(candidate);
                    }
                }
            }
        }

        debug!(
            "instantiating function template {}<{}>",
            self.tu.function(pattern).name,
            args.iter().map(|a| a.text.as_str()).collect::<Vec<_>>().join(", ")
        );

        let mut subst = base_subst;
        subst.extend(params.into_iter().zip(args.iter().cloned()));
        let mut cloner = Cloner {
            subst,
            decl_map: AHashMap::new(),
        };
        let parent = self.tu.function(pattern).parent;
        let specialization = self.clone_function(&mut cloner, pattern, parent)?;
        if let DeclKind::Function(function) = &mut self.tu.decl_mut(specialization).kind {
            function.templated = TemplatedKind::FunctionTemplateSpecialization { template, args };
        }
        if let DeclKind::FunctionTemplate(decl) = &mut self.tu.decl_mut(template).kind {
            decl.specializations.push(specialization);
        }
        self.pending.push_back(specialization);
        Ok(specialization)
    }

    fn clone_member(&mut self, cloner: &mut Cloner, member: DeclId, parent: DeclId) -> Result<DeclId, Error> {
        let decl = self.tu.decl(member).clone();
        match decl.kind {
            DeclKind::Field(field) => {
                let ty = self.clone_type_loc(cloner, field.ty)?;
                Ok(self.tu.add_decl(Decl {
                    kind: DeclKind::Field(crate::ast::FieldDecl { name: field.name, ty }),
                    range: decl.range,
                }))
            }
            DeclKind::Function(_) => self.clone_function(cloner, member, Some(parent)),
            DeclKind::FunctionTemplate(template) => {
                // member templates keep the enclosing bindings; their own
                // parameters are bound per call site later
                let pattern = self.clone_function(cloner, template.pattern, Some(parent))?;
                let cloned = self.tu.add_decl(Decl {
                    kind: DeclKind::FunctionTemplate(crate::ast::FunctionTemplateDecl {
                        name: template.name,
                        params: template.params,
                        pattern,
                        specializations: Vec::new(),
                        parent: Some(parent),
                        is_definition: template.is_definition,
                        base_subst: cloner.subst.clone(),
                    }),
                    range: decl.range,
                });
                Ok(cloned)
            }
            _ => Ok(member),
        }
    }

    fn clone_function(&mut self, cloner: &mut Cloner, function: DeclId, parent: Option<DeclId>) -> Result<DeclId, Error> {
        let decl = self.tu.decl(function).clone();
        let DeclKind::Function(f) = decl.kind else {
            panic!("not a function");
        };
        let mut params = Vec::new();
        for param in &f.params {
            let param_decl = self.tu.decl(*param).clone();
            let DeclKind::Param(p) = param_decl.kind else {
                continue;
            };
            let ty = self.clone_type_loc(cloner, p.ty)?;
            let cloned = self.tu.add_decl(Decl {
                kind: DeclKind::Param(ParamDecl { name: p.name, ty }),
                range: param_decl.range,
            });
            cloner.decl_map.insert(*param, cloned);
            params.push(cloned);
        }
        let return_type = match f.return_type {
            Some(ty) => Some(self.clone_type_loc(cloner, ty)?),
            None => None,
        };
        let body = match f.body {
            Some(body) => Some(self.clone_node(cloner, body)?),
            None => None,
        };
        let cloned = self.tu.add_decl(Decl {
            kind: DeclKind::Function(FunctionDecl {
                name: f.name,
                kind: f.kind,
                operator: f.operator,
                parent,
                lexical_parent_is_record: f.lexical_parent_is_record,
                qualifier: None,
                templated: TemplatedKind::None,
                params,
                return_type,
                name_range: f.name_range,
                body,
                is_definition: f.is_definition,
                attrs: f.attrs,
            }),
            range: decl.range,
        });
        cloner.decl_map.insert(function, cloned);
        Ok(cloned)
    }

    fn clone_type_loc(&mut self, cloner: &mut Cloner, ty: TypeLocId) -> Result<TypeLocId, Error> {
        let type_loc = self.tu.type_loc(ty).clone();

        if type_loc.pointer {
            let inner = self.clone_type_loc(cloner, type_loc.children[0])?;
            let inner_ref = self.tu.type_loc(inner).ty.clone();
            return Ok(self.tu.add_type_loc(TypeLoc {
                range: type_loc.range,
                ty: TypeRef {
                    text: format!("{} *", inner_ref.text),
                    base: inner_ref.base,
                    record: None,
                },
                substituted: None,
                pointer: true,
                children: vec![inner],
            }));
        }

        if let Some(arg) = cloner.lookup(&type_loc.ty.base) {
            let arg = arg.clone();
            return Ok(self.tu.add_type_loc(TypeLoc {
                range: type_loc.range,
                ty: TypeRef {
                    text: arg.text.clone(),
                    base: base_of(&arg.text).to_owned(),
                    record: arg.record,
                },
                substituted: Some(arg.text),
                pointer: false,
                children: Vec::new(),
            }));
        }

        let mut children = Vec::new();
        for child in &type_loc.children {
            children.push(self.clone_type_loc(cloner, *child)?);
        }

        let text = substitute_type_text(&type_loc.ty.text, &cloner.subst);
        let cloned = self.tu.add_type_loc(TypeLoc {
            range: type_loc.range,
            ty: TypeRef {
                text: text.clone(),
                base: type_loc.ty.base.clone(),
                record: type_loc.ty.record,
            },
            substituted: None,
            pointer: false,
            children,
        });
        self.resolve_type_loc(cloned)?;
        Ok(cloned)
    }

    fn clone_node(&mut self, cloner: &mut Cloner, node: NodeId) -> Result<NodeId, Error> {
        let Node { kind, range } = self.tu.node(node).clone();
        let kind = match kind {
            NodeKind::Compound { stmts, lbrace, rbrace } => {
                let mut cloned = Vec::new();
                for stmt in stmts {
                    cloned.push(self.clone_node(cloner, stmt)?);
                }
                NodeKind::Compound {
                    stmts: cloned,
                    lbrace,
                    rbrace,
                }
            }
            NodeKind::Return { value } => NodeKind::Return {
                value: self.clone_opt_node(cloner, value)?,
            },
            NodeKind::DeclStmt { decl } => {
                let var = self.tu.decl(decl).clone();
                let DeclKind::Var(v) = var.kind else {
                    return Ok(self.tu.add_node(Node {
                        kind: NodeKind::DeclStmt { decl },
                        range,
                    }));
                };
                let ty = self.clone_type_loc(cloner, v.ty)?;
                let init = self.clone_opt_node(cloner, v.init)?;
                let cloned_var = self.tu.add_decl(Decl {
                    kind: DeclKind::Var(VarDecl {
                        name: v.name,
                        ty,
                        init,
                        init_style: v.init_style,
                    }),
                    range: var.range,
                });
                cloner.decl_map.insert(decl, cloned_var);
                NodeKind::DeclStmt { decl: cloned_var }
            }
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => NodeKind::If {
                cond: self.clone_node(cloner, cond)?,
                then_branch: self.clone_node(cloner, then_branch)?,
                else_branch: self.clone_opt_node(cloner, else_branch)?,
            },
            NodeKind::While { cond, body } => NodeKind::While {
                cond: self.clone_node(cloner, cond)?,
                body: self.clone_node(cloner, body)?,
            },
            NodeKind::For { init, cond, step, body } => NodeKind::For {
                init: self.clone_opt_node(cloner, init)?,
                cond: self.clone_opt_node(cloner, cond)?,
                step: self.clone_opt_node(cloner, step)?,
                body: self.clone_node(cloner, body)?,
            },
            NodeKind::DeclRef { decl, name } => NodeKind::DeclRef {
                decl: decl.map(|d| cloner.decl_map.get(&d).copied().unwrap_or(d)),
                name,
            },
            NodeKind::This { implicit } => NodeKind::This { implicit },
            NodeKind::Member(member) => NodeKind::Member(MemberData {
                base: self.clone_node(cloner, member.base)?,
                member: None,
                name: member.name,
                is_arrow: member.is_arrow,
            }),
            NodeKind::Call(call) => NodeKind::Call(crate::ast::CallData {
                callee: self.clone_node(cloner, call.callee)?,
                callee_decl: None,
                explicit_targs: call
                    .explicit_targs
                    .map(|targs| targs.iter().map(|t| substitute_type_text(t, &cloner.subst)).collect()),
                args: self.clone_nodes(cloner, &call.args)?,
                rparen: call.rparen,
            }),
            NodeKind::MemberCall(call) => NodeKind::MemberCall(MemberCallData {
                callee: self.clone_node(cloner, call.callee)?,
                explicit_targs: call
                    .explicit_targs
                    .map(|targs| targs.iter().map(|t| substitute_type_text(t, &cloner.subst)).collect()),
                args: self.clone_nodes(cloner, &call.args)?,
                rparen: call.rparen,
            }),
            NodeKind::OperatorCall(call) => NodeKind::OperatorCall(OperatorCallData {
                op: call.op,
                callee_decl: None,
                args: self.clone_nodes(cloner, &call.args)?,
            }),
            NodeKind::Construct(construct) => NodeKind::Construct(self.clone_construct(cloner, construct)?),
            NodeKind::FunctionalCast { ty, sub } => NodeKind::FunctionalCast {
                ty: self.substituted_type_ref(cloner, ty)?,
                sub: self.clone_node(cloner, sub)?,
            },
            NodeKind::TemporaryObject(construct) => {
                NodeKind::TemporaryObject(self.clone_construct(cloner, construct)?)
            }
            NodeKind::Unary { op, operand, prefix } => NodeKind::Unary {
                op,
                operand: self.clone_node(cloner, operand)?,
                prefix,
            },
            NodeKind::Binary { op, lhs, rhs } => NodeKind::Binary {
                op,
                lhs: self.clone_node(cloner, lhs)?,
                rhs: self.clone_node(cloner, rhs)?,
            },
            NodeKind::Assign { op, lhs, rhs } => NodeKind::Assign {
                op,
                lhs: self.clone_node(cloner, lhs)?,
                rhs: self.clone_node(cloner, rhs)?,
            },
            NodeKind::Subscript { base, index } => NodeKind::Subscript {
                base: self.clone_node(cloner, base)?,
                index: self.clone_node(cloner, index)?,
            },
            NodeKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => NodeKind::Conditional {
                cond: self.clone_node(cloner, cond)?,
                then_expr: self.clone_node(cloner, then_expr)?,
                else_expr: self.clone_node(cloner, else_expr)?,
            },
            NodeKind::Paren { sub } => NodeKind::Paren {
                sub: self.clone_node(cloner, sub)?,
            },
            NodeKind::Literal { ty } => NodeKind::Literal { ty },
        };
        Ok(self.tu.add_node(Node { kind, range }))
    }

    fn clone_nodes(&mut self, cloner: &mut Cloner, nodes: &[NodeId]) -> Result<Vec<NodeId>, Error> {
        let mut cloned = Vec::with_capacity(nodes.len());
        for &node in nodes {
            cloned.push(self.clone_node(cloner, node)?);
        }
        Ok(cloned)
    }

    fn clone_opt_node(&mut self, cloner: &mut Cloner, node: Option<NodeId>) -> Result<Option<NodeId>, Error> {
        Ok(match node {
            Some(node) => Some(self.clone_node(cloner, node)?),
            None => None,
        })
    }

    fn clone_construct(&mut self, cloner: &mut Cloner, construct: ConstructData) -> Result<ConstructData, Error> {
        Ok(ConstructData {
            ctor: None,
            ty: self.substituted_type_ref(cloner, construct.ty)?,
            args: self.clone_nodes(cloner, &construct.args)?,
            paren_range: construct.paren_range,
        })
    }

    fn substituted_type_ref(&mut self, cloner: &mut Cloner, ty: TypeRef) -> Result<TypeRef, Error> {
        if let Some(arg) = cloner.lookup(&ty.base) {
            let arg = arg.clone();
            return Ok(TypeRef {
                base: base_of(&arg.text).to_owned(),
                record: arg.record,
                text: arg.text,
            });
        }
        let text = substitute_type_text(&ty.text, &cloner.subst);
        let record = match ty.record {
            Some(record) => Some(record),
            None => self.record_from_text(&text)?,
        };
        Ok(TypeRef {
            base: base_of(&text).to_owned(),
            text,
            record,
        })
    }

    // ----- body resolution -----

    fn resolve_function(&mut self, function: DeclId) -> Result<(), Error> {
        self.resolve_qualifier(function)?;
        self.resolve_signature(function)?;
        let decl = self.tu.function(function);
        let (parent, params, body) = (decl.parent, decl.params.clone(), decl.body);
        let mut scopes = Scopes::new(parent);
        for param in params {
            if let DeclKind::Param(p) = &self.tu.decl(param).kind {
                scopes.insert(p.name.clone(), param);
            }
        }
        if let Some(body) = body {
            self.resolve_stmt(&mut scopes, body)?;
        }
        Ok(())
    }

    fn resolve_stmt(&mut self, scopes: &mut Scopes, node: NodeId) -> Result<(), Error> {
        match self.tu.node(node).kind.clone() {
            NodeKind::Compound { stmts, .. } => {
                scopes.push();
                for stmt in stmts {
                    self.resolve_stmt(scopes, stmt)?;
                }
                scopes.pop();
                Ok(())
            }
            NodeKind::Return { value } => {
                if let Some(value) = value {
                    self.resolve_expr(scopes, value)?;
                }
                Ok(())
            }
            NodeKind::DeclStmt { decl } => self.resolve_local_var(scopes, decl),
            NodeKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(scopes, cond)?;
                self.resolve_stmt(scopes, then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(scopes, else_branch)?;
                }
                Ok(())
            }
            NodeKind::While { cond, body } => {
                self.resolve_expr(scopes, cond)?;
                self.resolve_stmt(scopes, body)
            }
            NodeKind::For { init, cond, step, body } => {
                scopes.push();
                if let Some(init) = init {
                    self.resolve_stmt(scopes, init)?;
                }
                if let Some(cond) = cond {
                    self.resolve_expr(scopes, cond)?;
                }
                if let Some(step) = step {
                    self.resolve_expr(scopes, step)?;
                }
                self.resolve_stmt(scopes, body)?;
                scopes.pop();
                Ok(())
            }
            _ => {
                self.resolve_expr(scopes, node)?;
                Ok(())
            }
        }
    }

    fn resolve_local_var(&mut self, scopes: &mut Scopes, decl: DeclId) -> Result<(), Error> {
        let DeclKind::Var(var) = self.tu.decl(decl).kind.clone() else {
            return Ok(());
        };
        self.resolve_type_loc(var.ty)?;
        scopes.insert(var.name.clone(), decl);
        if let Some(init) = var.init {
            self.sync_var_init(var.ty, init)?;
            self.resolve_expr(scopes, init)?;
        }
        Ok(())
    }

    /// Propagates the resolved variable type into a call-style initializer's
    /// construct expression (it was built before the type was resolved).
    fn sync_var_init(&mut self, ty: TypeLocId, init: NodeId) -> Result<(), Error> {
        let resolved = self.tu.type_loc(ty).ty.clone();
        if let NodeKind::Construct(construct) = &mut self.tu.node_mut(init).kind {
            construct.ty = resolved;
        }
        Ok(())
    }

    fn resolve_expr(&mut self, scopes: &mut Scopes, node: NodeId) -> Result<ExprType, Error> {
        match self.tu.node(node).kind.clone() {
            NodeKind::Literal { ty } => Ok(ExprType::named(ty)),
            NodeKind::Paren { sub } => self.resolve_expr(scopes, sub),
            NodeKind::This { .. } => Ok(ExprType {
                record: scopes.enclosing_record,
                pointers: 1,
                text: String::new(),
            }),
            NodeKind::DeclRef { name, .. } => self.resolve_decl_ref(scopes, node, &name),
            NodeKind::Member(member) => {
                let base_type = self.resolve_expr(scopes, member.base)?;
                let Some(record) = base_type.record else {
                    return Ok(ExprType::unknown());
                };
                let Some(found) = self.find_member(record, &member.name) else {
                    return Ok(ExprType::unknown());
                };
                if let NodeKind::Member(m) = &mut self.tu.node_mut(node).kind {
                    m.member = Some(found);
                }
                match &self.tu.decl(found).kind {
                    DeclKind::Field(field) => Ok(self.type_of_type_loc(field.ty)),
                    _ => Ok(ExprType::unknown()),
                }
            }
            NodeKind::MemberCall(call) => self.resolve_member_call(scopes, node, call),
            NodeKind::Call(call) => self.resolve_call(scopes, node, call),
            NodeKind::OperatorCall(call) => {
                for arg in call.args {
                    self.resolve_expr(scopes, arg)?;
                }
                Ok(ExprType::unknown())
            }
            NodeKind::Binary { op, lhs, rhs } | NodeKind::Assign { op, lhs, rhs } => {
                let lhs_type = self.resolve_expr(scopes, lhs)?;
                let rhs_type = self.resolve_expr(scopes, rhs)?;
                if lhs_type.pointers == 0 {
                    if let Some(record) = lhs_type.record {
                        if let Some(method) = self.find_operator(record, op) {
                            let return_type = self.return_type_of(method);
                            self.tu.node_mut(node).kind = NodeKind::OperatorCall(OperatorCallData {
                                op,
                                callee_decl: Some(method),
                                args: vec![lhs, rhs],
                            });
                            return Ok(return_type);
                        }
                    }
                }
                if lhs_type.text.is_empty() { Ok(rhs_type) } else { Ok(lhs_type) }
            }
            NodeKind::Unary { op, operand, .. } => {
                let mut operand_type = self.resolve_expr(scopes, operand)?;
                match op {
                    "&" => operand_type.pointers = operand_type.pointers.saturating_add(1),
                    "*" => operand_type.pointers = operand_type.pointers.saturating_sub(1),
                    _ => {}
                }
                Ok(operand_type)
            }
            NodeKind::Subscript { base, index } => {
                let base_type = self.resolve_expr(scopes, base)?;
                self.resolve_expr(scopes, index)?;
                if base_type.pointers == 0 {
                    if let Some(record) = base_type.record {
                        if let Some(method) = self.find_operator(record, OperatorKind::Subscript) {
                            let return_type = self.return_type_of(method);
                            self.tu.node_mut(node).kind = NodeKind::OperatorCall(OperatorCallData {
                                op: OperatorKind::Subscript,
                                callee_decl: Some(method),
                                args: vec![base, index],
                            });
                            return Ok(return_type);
                        }
                    }
                }
                let mut element = base_type;
                element.pointers = element.pointers.saturating_sub(1);
                Ok(element)
            }
            NodeKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                self.resolve_expr(scopes, cond)?;
                let then_type = self.resolve_expr(scopes, then_expr)?;
                self.resolve_expr(scopes, else_expr)?;
                Ok(then_type)
            }
            NodeKind::Construct(construct) => self.resolve_construct(scopes, node, construct),
            NodeKind::FunctionalCast { ty, sub } => {
                let resolved = self.resolve_type_ref(ty)?;
                if let NodeKind::FunctionalCast { ty, .. } = &mut self.tu.node_mut(node).kind {
                    *ty = resolved.clone();
                }
                if let NodeKind::Construct(construct) = &mut self.tu.node_mut(sub).kind {
                    construct.ty = resolved.clone();
                }
                if let NodeKind::Construct(construct) = self.tu.node(sub).kind.clone() {
                    self.resolve_construct(scopes, sub, construct)?;
                }
                Ok(ExprType {
                    record: resolved.record,
                    pointers: 0,
                    text: resolved.text,
                })
            }
            NodeKind::TemporaryObject(construct) => {
                let resolved = self.resolve_type_ref(construct.ty.clone())?;
                if let NodeKind::TemporaryObject(c) = &mut self.tu.node_mut(node).kind {
                    c.ty = resolved.clone();
                }
                let construct = ConstructData {
                    ty: resolved.clone(),
                    ..construct
                };
                self.resolve_construct_parts(scopes, node, &construct, true)?;
                Ok(ExprType {
                    record: resolved.record,
                    pointers: 0,
                    text: resolved.text,
                })
            }
            _ => Ok(ExprType::unknown()),
        }
    }

    fn resolve_type_ref(&mut self, ty: TypeRef) -> Result<TypeRef, Error> {
        let record = match ty.record {
            Some(record) => Some(record),
            None => self.record_from_text(&ty.text)?,
        };
        Ok(TypeRef { record, ..ty })
    }

    fn resolve_construct(&mut self, scopes: &mut Scopes, node: NodeId, construct: ConstructData) -> Result<ExprType, Error> {
        let resolved = self.resolve_type_ref(construct.ty.clone())?;
        if let NodeKind::Construct(c) = &mut self.tu.node_mut(node).kind {
            c.ty = resolved.clone();
        }
        let construct = ConstructData {
            ty: resolved.clone(),
            ..construct
        };
        self.resolve_construct_parts(scopes, node, &construct, false)?;
        Ok(ExprType {
            record: resolved.record,
            pointers: 0,
            text: resolved.text,
        })
    }

    fn resolve_construct_parts(
        &mut self,
        scopes: &mut Scopes,
        node: NodeId,
        construct: &ConstructData,
        temporary: bool,
    ) -> Result<(), Error> {
        let ctor = construct.ty.record.and_then(|record| self.find_constructor(record));
        match (&mut self.tu.node_mut(node).kind, temporary) {
            (NodeKind::Construct(c), false) => c.ctor = ctor,
            (NodeKind::TemporaryObject(c), true) => c.ctor = ctor,
            _ => {}
        }
        for &arg in &construct.args {
            self.resolve_expr(scopes, arg)?;
        }
        Ok(())
    }

    fn resolve_decl_ref(&mut self, scopes: &mut Scopes, node: NodeId, name: &str) -> Result<ExprType, Error> {
        if let Some(local) = scopes.lookup(name) {
            if let NodeKind::DeclRef { decl, .. } = &mut self.tu.node_mut(node).kind {
                *decl = Some(local);
            }
            return Ok(self.type_of_decl(local));
        }

        // a bare field reference inside a method body is an implicit-`this`
        // member access
        if let Some(record) = scopes.enclosing_record {
            if let Some(member) = self.find_member(record, name) {
                if matches!(self.tu.decl(member).kind, DeclKind::Field(_)) {
                    let range = self.tu.node(node).range;
                    let this = self.tu.add_node(Node {
                        kind: NodeKind::This { implicit: true },
                        range: SourceRange::at(range.begin),
                    });
                    let field_type = match &self.tu.decl(member).kind {
                        DeclKind::Field(field) => self.type_of_type_loc(field.ty),
                        _ => ExprType::unknown(),
                    };
                    self.tu.node_mut(node).kind = NodeKind::Member(MemberData {
                        base: this,
                        member: Some(member),
                        name: name.to_owned(),
                        is_arrow: true,
                    });
                    return Ok(field_type);
                }
            }
        }

        if let Some(&global) = self.tu.globals.get(name) {
            if matches!(self.tu.decl(global).kind, DeclKind::Var(_)) {
                if let NodeKind::DeclRef { decl, .. } = &mut self.tu.node_mut(node).kind {
                    *decl = Some(global);
                }
                return Ok(self.type_of_decl(global));
            }
        }
        Ok(ExprType::unknown())
    }

    fn resolve_member_call(
        &mut self,
        scopes: &mut Scopes,
        node: NodeId,
        call: MemberCallData,
    ) -> Result<ExprType, Error> {
        let NodeKind::Member(member) = self.tu.node(call.callee).kind.clone() else {
            // callee is always a member expression by construction
            for arg in call.args {
                self.resolve_expr(scopes, arg)?;
            }
            return Ok(ExprType::unknown());
        };

        let base_type = self.resolve_expr(scopes, member.base)?;
        let mut arg_types = Vec::new();
        for &arg in &call.args {
            arg_types.push(self.resolve_expr(scopes, arg)?);
        }

        let Some(record) = base_type.record else {
            return Ok(ExprType::unknown());
        };

        let method = if let Some(method) = self.find_method(record, &member.name) {
            Some(method)
        } else if let Some(template) = self.find_member_template(record, &member.name) {
            let explicit = call.explicit_targs.clone().unwrap_or_default();
            self.deduce_and_instantiate(template, &explicit, &arg_types)?
        } else {
            None
        };

        let Some(method) = method else {
            return Ok(ExprType::unknown());
        };
        if let NodeKind::Member(m) = &mut self.tu.node_mut(call.callee).kind {
            m.member = Some(method);
        }
        Ok(self.return_type_of(method))
    }

    fn resolve_call(&mut self, scopes: &mut Scopes, node: NodeId, call: crate::ast::CallData) -> Result<ExprType, Error> {
        let mut arg_types = Vec::new();
        for &arg in &call.args {
            arg_types.push(self.resolve_expr(scopes, arg)?);
        }

        let callee_kind = self.tu.node(call.callee).kind.clone();
        if let NodeKind::DeclRef { name, .. } = &callee_kind {
            // a bare method call inside a method body targets `this`
            if scopes.lookup(name).is_none() {
                if let Some(record) = scopes.enclosing_record {
                    if let Some(method) = self.find_method(record, name) {
                        return self.convert_call_to_implicit_member_call(node, &call, name, method);
                    }
                }
            }

            // calls through record-typed variables target operator()
            if let Some(var) = scopes.lookup(name) {
                let var_type = self.type_of_decl(var);
                if var_type.pointers == 0 {
                    if let Some(record) = var_type.record {
                        if let Some(method) = self.find_operator(record, OperatorKind::Call) {
                            let mut args = vec![call.callee];
                            args.extend(call.args.iter().copied());
                            let return_type = self.return_type_of(method);
                            if let NodeKind::DeclRef { decl, .. } = &mut self.tu.node_mut(call.callee).kind {
                                *decl = Some(var);
                            }
                            self.tu.node_mut(node).kind = NodeKind::OperatorCall(OperatorCallData {
                                op: OperatorKind::Call,
                                callee_decl: Some(method),
                                args,
                            });
                            return Ok(return_type);
                        }
                    }
                }
                return Ok(ExprType::unknown());
            }

            if let Some(&global) = self.tu.globals.get(name.as_str()) {
                match &self.tu.decl(global).kind {
                    DeclKind::Function(_) => {
                        if let NodeKind::Call(c) = &mut self.tu.node_mut(node).kind {
                            c.callee_decl = Some(global);
                        }
                        return Ok(self.return_type_of(global));
                    }
                    DeclKind::FunctionTemplate(_) => {
                        let explicit = call.explicit_targs.clone().unwrap_or_default();
                        let specialization = self.deduce_and_instantiate(global, &explicit, &arg_types)?;
                        if let Some(specialization) = specialization {
                            if let NodeKind::Call(c) = &mut self.tu.node_mut(node).kind {
                                c.callee_decl = Some(specialization);
                            }
                            return Ok(self.return_type_of(specialization));
                        }
                        return Ok(ExprType::unknown());
                    }
                    _ => return Ok(ExprType::unknown()),
                }
            }
            return Ok(ExprType::unknown());
        }

        // non-name callee: a record-typed expression invokes operator()
        let callee_type = self.resolve_expr(scopes, call.callee)?;
        if callee_type.pointers == 0 {
            if let Some(record) = callee_type.record {
                if let Some(method) = self.find_operator(record, OperatorKind::Call) {
                    let mut args = vec![call.callee];
                    args.extend(call.args.iter().copied());
                    let return_type = self.return_type_of(method);
                    self.tu.node_mut(node).kind = NodeKind::OperatorCall(OperatorCallData {
                        op: OperatorKind::Call,
                        callee_decl: Some(method),
                        args,
                    });
                    return Ok(return_type);
                }
            }
        }
        Ok(ExprType::unknown())
    }

    fn convert_call_to_implicit_member_call(
        &mut self,
        node: NodeId,
        call: &crate::ast::CallData,
        name: &str,
        method: DeclId,
    ) -> Result<ExprType, Error> {
        let callee_range = self.tu.node(call.callee).range;
        let this = self.tu.add_node(Node {
            kind: NodeKind::This { implicit: true },
            range: SourceRange::at(callee_range.begin),
        });
        let member = self.tu.add_node(Node {
            kind: NodeKind::Member(MemberData {
                base: this,
                member: Some(method),
                name: name.to_owned(),
                is_arrow: true,
            }),
            range: callee_range,
        });
        self.tu.node_mut(node).kind = NodeKind::MemberCall(MemberCallData {
            callee: member,
            explicit_targs: call.explicit_targs.clone(),
            args: call.args.clone(),
            rparen: call.rparen,
        });
        Ok(self.return_type_of(method))
    }

    // ----- lookup helpers -----

    fn find_member(&self, record: DeclId, name: &str) -> Option<DeclId> {
        self.tu.record(record).children.iter().copied().find(|&child| {
            match &self.tu.decl(child).kind {
                DeclKind::Field(f) => f.name == name,
                DeclKind::Function(f) => f.name == name,
                _ => false,
            }
        })
    }

    fn find_method(&self, record: DeclId, name: &str) -> Option<DeclId> {
        self.tu.record(record).children.iter().copied().find(|&child| {
            matches!(&self.tu.decl(child).kind, DeclKind::Function(f) if f.name == name && f.kind == FunctionKind::Method)
        })
    }

    fn find_member_template(&self, record: DeclId, name: &str) -> Option<DeclId> {
        self.tu.record(record).children.iter().copied().find(|&child| {
            matches!(&self.tu.decl(child).kind, DeclKind::FunctionTemplate(t) if t.name == name)
        })
    }

    fn find_operator(&self, record: DeclId, op: OperatorKind) -> Option<DeclId> {
        self.tu.record(record).children.iter().copied().find(|&child| {
            matches!(&self.tu.decl(child).kind, DeclKind::Function(f) if f.operator == Some(op))
        })
    }

    fn find_constructor(&self, record: DeclId) -> Option<DeclId> {
        self.tu.record(record).children.iter().copied().find(|&child| {
            matches!(&self.tu.decl(child).kind, DeclKind::Function(f) if f.kind == FunctionKind::Constructor)
        })
    }

    fn type_of_decl(&self, decl: DeclId) -> ExprType {
        match &self.tu.decl(decl).kind {
            DeclKind::Var(v) => self.type_of_type_loc(v.ty),
            DeclKind::Param(p) => self.type_of_type_loc(p.ty),
            DeclKind::Field(f) => self.type_of_type_loc(f.ty),
            _ => ExprType::unknown(),
        }
    }

    fn type_of_type_loc(&self, ty: TypeLocId) -> ExprType {
        let mut pointers = 0u8;
        let mut current = ty;
        let text = self.tu.type_loc(ty).ty.text.clone();
        while self.tu.type_loc(current).pointer {
            pointers += 1;
            current = self.tu.type_loc(current).children[0];
        }
        ExprType {
            record: self.tu.type_loc(current).ty.record,
            pointers,
            text,
        }
    }

    fn return_type_of(&self, function: DeclId) -> ExprType {
        match self.tu.function(function).return_type {
            Some(ty) => self.type_of_type_loc(ty),
            None => {
                // constructors yield their record
                let decl = self.tu.function(function);
                ExprType {
                    record: decl.parent,
                    pointers: 0,
                    text: String::new(),
                }
            }
        }
    }

    // ----- deduction -----

    /// Combines explicitly written template arguments with structural
    /// deduction from argument types; returns the instantiated
    /// specialization, or `None` when the parameters cannot all be bound.
    fn deduce_and_instantiate(
        &mut self,
        template: DeclId,
        explicit: &[String],
        arg_types: &[ExprType],
    ) -> Result<Option<DeclId>, Error> {
        let DeclKind::FunctionTemplate(decl) = &self.tu.decl(template).kind else {
            return Ok(None);
        };
        let (params, pattern) = (decl.params.clone(), decl.pattern);

        let mut bindings: AHashMap<String, TemplateArg> = AHashMap::new();
        for (param, text) in params.iter().zip(explicit) {
            let arg = self.type_from_text(text)?;
            bindings.insert(param.clone(), arg);
        }

        let pattern_params = self.tu.function(pattern).params.clone();
        for (&param_decl, arg_type) in pattern_params.iter().zip(arg_types) {
            let DeclKind::Param(p) = &self.tu.decl(param_decl).kind else {
                continue;
            };
            let ty = p.ty;
            self.unify(ty, arg_type, &params, &mut bindings)?;
        }

        let mut args = TemplateArgs::new();
        for param in &params {
            match bindings.get(param) {
                Some(arg) => args.push(arg.clone()),
                None => return Ok(None),
            }
        }
        Ok(Some(self.ensure_function_specialization(template, args)?))
    }

    fn unify(
        &mut self,
        pattern: TypeLocId,
        arg: &ExprType,
        params: &[String],
        bindings: &mut AHashMap<String, TemplateArg>,
    ) -> Result<(), Error> {
        let mut pattern = pattern;
        let mut arg_pointers = arg.pointers;
        let mut arg_text = arg.text.clone();
        while self.tu.type_loc(pattern).pointer && arg_pointers > 0 {
            pattern = self.tu.type_loc(pattern).children[0];
            arg_pointers -= 1;
            if let Some(stripped) = arg_text.strip_suffix('*') {
                arg_text = stripped.trim_end().to_owned();
            }
        }

        let type_loc = self.tu.type_loc(pattern).clone();
        let base = type_loc.ty.base.clone();
        if params.contains(&base) {
            if !bindings.contains_key(&base) && !arg_text.is_empty() {
                let record = if arg_pointers == 0 { arg.record } else { None };
                bindings.insert(
                    base,
                    TemplateArg {
                        text: arg_text,
                        record,
                    },
                );
            }
            return Ok(());
        }

        // Tmpl<T> against Tmpl<int>: unify the written children with the
        // specialization's arguments
        if !type_loc.children.is_empty() && arg_pointers == 0 {
            if let Some(record) = arg.record {
                let record_decl = self.tu.record(record).clone();
                if let Some(info) = &record_decl.specialization {
                    let spec_args: Vec<TemplateArg> = info.args.to_vec();
                    for (&child, spec_arg) in type_loc.children.iter().zip(spec_args.iter()) {
                        let child_type = ExprType {
                            record: spec_arg.record,
                            pointers: 0,
                            text: spec_arg.text.clone(),
                        };
                        self.unify(child, &child_type, params, bindings)?;
                    }
                }
            }
        }
        Ok(())
    }
}

struct Cloner {
    subst: Vec<(String, TemplateArg)>,
    decl_map: AHashMap<DeclId, DeclId>,
}

impl Cloner {
    fn lookup(&self, name: &str) -> Option<&TemplateArg> {
        self.subst.iter().rev().find(|(param, _)| param == name).map(|(_, arg)| arg)
    }
}

struct Scopes {
    enclosing_record: Option<DeclId>,
    frames: Vec<AHashMap<String, DeclId>>,
}

impl Scopes {
    fn new(enclosing_record: Option<DeclId>) -> Self {
        Self {
            enclosing_record,
            frames: vec![AHashMap::new()],
        }
    }

    fn push(&mut self) {
        self.frames.push(AHashMap::new());
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn insert(&mut self, name: String, decl: DeclId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name, decl);
        }
    }

    fn lookup(&self, name: &str) -> Option<DeclId> {
        self.frames.iter().rev().find_map(|frame| frame.get(name).copied())
    }
}

fn args_match(a: &TemplateArgs, b: &TemplateArgs) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.text == y.text)
}

fn base_of(text: &str) -> &str {
    let end = text.find(['<', ' ', '*', '&']).unwrap_or(text.len());
    &text[..end]
}

/// Token-wise replacement of template parameter names inside a type
/// spelling (`Pair<T, U>` with `T -> int` becomes `Pair<int, U>`).
fn substitute_type_text(text: &str, subst: &[(String, TemplateArg)]) -> String {
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &text[start..i];
            match subst.iter().rev().find(|(param, _)| param == word) {
                Some((_, arg)) => result.push_str(&arg.text),
                None => result.push_str(word),
            }
        } else {
            result.push(b as char);
            i += 1;
        }
    }
    result
}

/// Splits `int, Pair<float, int>` at top-level commas.
fn split_type_list(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_owned());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_owned());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_nested_type_lists() {
        assert_eq!(split_type_list("int"), vec!["int"]);
        assert_eq!(
            split_type_list("int, Pair<float, int>, T"),
            vec!["int", "Pair<float, int>", "T"]
        );
    }

    #[test]
    fn substitutes_parameters_token_wise() {
        let subst = vec![
            ("T".to_owned(), TemplateArg::plain("int")),
            ("COMP".to_owned(), TemplateArg::plain("Comparator<int>")),
        ];
        assert_eq!(substitute_type_text("Vec<T>", &subst), "Vec<int>");
        assert_eq!(substitute_type_text("COMP", &subst), "Comparator<int>");
        // TT is a different identifier and stays untouched
        assert_eq!(substitute_type_text("TT *", &subst), "TT *");
    }

    #[test]
    fn base_of_strips_arguments_and_pointers() {
        assert_eq!(base_of("Vec<int>"), "Vec");
        assert_eq!(base_of("unsigned int"), "unsigned");
        assert_eq!(base_of("float*"), "float");
    }
}
