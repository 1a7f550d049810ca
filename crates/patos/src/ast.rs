//! Arena representation of one parsed translation unit.
//!
//! Declarations, statements/expressions and written type references live in
//! three flat arenas addressed by `DeclId` / `NodeId` / `TypeLocId`. The
//! arena index doubles as the stable expression identity the temporaries
//! table keys on. Cloned template specializations keep the *pattern's*
//! source ranges: the rewriting engine reads and edits the template's
//! original text once per specialization, each under its own overlay.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    mangle::OperatorKind,
    source::{SourceLocation, SourceRange},
};

/// Index into [`TranslationUnit::decls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclId(u32);

/// Index into [`TranslationUnit::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Index into [`TranslationUnit::types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeLocId(u32);

/// One template argument, kept as its written spelling plus the record
/// declaration it denotes when it names a (possibly specialized) record type.
#[derive(Debug, Clone)]
pub struct TemplateArg {
    pub text: String,
    pub record: Option<DeclId>,
}

impl TemplateArg {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            record: None,
        }
    }
}

pub type TemplateArgs = SmallVec<[TemplateArg; 2]>;

/// A named annotation attached to a declaration. The front end synthesizes
/// one per OpenCL keyword; `__patos__kernel` marks kernel entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub annotation: String,
}

/// A type as referenced from source: its spelling, the base name the
/// spelling starts from, and the record declaration it resolves to (if any).
#[derive(Debug, Clone)]
pub struct TypeRef {
    pub text: String,
    pub base: String,
    pub record: Option<DeclId>,
}

/// A type reference *in source*, carrying the range its spelling occupies.
///
/// `substituted` is set on clones inside template specializations whose base
/// named a template parameter; the transformation rewrites such ranges to
/// the substitution's spelling.
#[derive(Debug, Clone)]
pub struct TypeLoc {
    pub range: SourceRange,
    pub ty: TypeRef,
    pub substituted: Option<String>,
    /// `true` for a pointer layer wrapping its pointee (the only child).
    pub pointer: bool,
    pub children: Vec<TypeLocId>,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub kind: DeclKind,
    pub range: SourceRange,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    ClassTemplate(ClassTemplateDecl),
    Record(RecordDecl),
    FunctionTemplate(FunctionTemplateDecl),
    Function(FunctionDecl),
    Field(FieldDecl),
    Var(VarDecl),
    Typedef(TypedefDecl),
    Param(ParamDecl),
}

#[derive(Debug, Clone)]
pub struct ClassTemplateDecl {
    pub name: String,
    pub params: Vec<String>,
    pub pattern: DeclId,
    pub specializations: Vec<DeclId>,
}

#[derive(Debug, Clone)]
pub struct FunctionTemplateDecl {
    pub name: String,
    pub params: Vec<String>,
    pub pattern: DeclId,
    pub specializations: Vec<DeclId>,
    /// Record this template is a member of, for member function templates.
    pub parent: Option<DeclId>,
    pub is_definition: bool,
    /// Substitution already applied to this clone (member templates inside a
    /// class template specialization carry the enclosing record's bindings).
    pub base_subst: Vec<(String, TemplateArg)>,
}

#[derive(Debug, Clone)]
pub struct SpecializationInfo {
    pub template: DeclId,
    pub args: TemplateArgs,
}

#[derive(Debug, Clone)]
pub struct RecordDecl {
    pub name: String,
    /// Fields, methods and member templates in source order.
    pub children: Vec<DeclId>,
    /// `Some` iff this record is a class template specialization.
    pub specialization: Option<SpecializationInfo>,
    /// `Some` iff this record is the pattern of a class template.
    pub described_template: Option<DeclId>,
    pub has_user_constructor: bool,
}

impl RecordDecl {
    pub fn is_specialization(&self) -> bool {
        self.specialization.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Free,
    Method,
    Constructor,
    Destructor,
}

#[derive(Debug, Clone)]
pub enum TemplatedKind {
    None,
    FunctionTemplateSpecialization { template: DeclId, args: TemplateArgs },
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub kind: FunctionKind,
    pub operator: Option<OperatorKind>,
    /// Enclosing record for methods.
    pub parent: Option<DeclId>,
    /// `false` for out-of-line member definitions (`void Foo::bar()`), whose
    /// declarator replacement must also swallow the qualifier.
    pub lexical_parent_is_record: bool,
    /// Written qualifier of an out-of-line definition (`Foo` / `Vec<int>`),
    /// resolved to `parent` by the semantic layer.
    pub qualifier: Option<(String, Vec<String>)>,
    pub templated: TemplatedKind,
    pub params: Vec<DeclId>,
    pub return_type: Option<TypeLocId>,
    /// Range of the declarator name (for operators: `operator` through the
    /// operator token; the parameter list is *not* included).
    pub name_range: SourceRange,
    pub body: Option<NodeId>,
    pub is_definition: bool,
    pub attrs: Vec<Attribute>,
}

impl FunctionDecl {
    pub fn is_method(&self) -> bool {
        matches!(
            self.kind,
            FunctionKind::Method | FunctionKind::Constructor | FunctionKind::Destructor
        )
    }

    pub fn is_kernel(&self) -> bool {
        self.attrs
            .iter()
            .any(|a| a.annotation == crate::mangle::KERNEL_ANNOTATION)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeLocId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStyle {
    None,
    /// `T v = init;`
    Copy,
    /// `T v(args);`
    Call,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeLocId,
    pub init: Option<NodeId>,
    pub init_style: InitStyle,
}

#[derive(Debug, Clone)]
pub struct TypedefDecl {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeLocId,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub range: SourceRange,
}

#[derive(Debug, Clone)]
pub struct MemberData {
    pub base: NodeId,
    /// Resolved field or method declaration; filled in by the semantic layer.
    pub member: Option<DeclId>,
    pub name: String,
    pub is_arrow: bool,
}

#[derive(Debug, Clone)]
pub struct CallData {
    pub callee: NodeId,
    pub callee_decl: Option<DeclId>,
    /// Explicitly written template arguments (`foo<int>(..)`), as spellings.
    pub explicit_targs: Option<Vec<String>>,
    pub args: Vec<NodeId>,
    pub rparen: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct MemberCallData {
    /// The `Member` expression being called.
    pub callee: NodeId,
    pub explicit_targs: Option<Vec<String>>,
    pub args: Vec<NodeId>,
    pub rparen: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct OperatorCallData {
    pub op: OperatorKind,
    /// The overloaded-operator method being invoked.
    pub callee_decl: Option<DeclId>,
    /// The receiver is argument 0, like clang's `CXXOperatorCallExpr`.
    pub args: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ConstructData {
    /// `None` means the implicit constructor.
    pub ctor: Option<DeclId>,
    pub ty: TypeRef,
    pub args: Vec<NodeId>,
    pub paren_range: Option<SourceRange>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    // statements
    Compound {
        stmts: Vec<NodeId>,
        lbrace: SourceLocation,
        rbrace: SourceLocation,
    },
    Return {
        value: Option<NodeId>,
    },
    DeclStmt {
        decl: DeclId,
    },
    If {
        cond: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    For {
        init: Option<NodeId>,
        cond: Option<NodeId>,
        step: Option<NodeId>,
        body: NodeId,
    },
    // expressions
    DeclRef {
        decl: Option<DeclId>,
        name: String,
    },
    This {
        implicit: bool,
    },
    Member(MemberData),
    Call(CallData),
    MemberCall(MemberCallData),
    OperatorCall(OperatorCallData),
    Construct(ConstructData),
    FunctionalCast {
        ty: TypeRef,
        sub: NodeId,
    },
    TemporaryObject(ConstructData),
    Unary {
        op: &'static str,
        operand: NodeId,
        prefix: bool,
    },
    Binary {
        op: OperatorKind,
        lhs: NodeId,
        rhs: NodeId,
    },
    Assign {
        op: OperatorKind,
        lhs: NodeId,
        rhs: NodeId,
    },
    Subscript {
        base: NodeId,
        index: NodeId,
    },
    Conditional {
        cond: NodeId,
        then_expr: NodeId,
        else_expr: NodeId,
    },
    Paren {
        sub: NodeId,
    },
    Literal {
        ty: &'static str,
    },
}

/// Requested explicit instantiation of a function template, gathered from
/// `template __kernel void f<A>(T);` directives. These are consumed by the
/// semantic layer rather than materialized as walkable declarations, so the
/// driver's textual removal of the directive line stays exact.
#[derive(Debug, Clone)]
pub struct InstantiationRequest {
    pub name: String,
    pub template_args: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TranslationUnit {
    pub decls: Vec<Decl>,
    pub nodes: Vec<Node>,
    pub types: Vec<TypeLoc>,
    /// Top-level declarations in source order (system files included).
    pub top_level: Vec<DeclId>,
    /// Global name table: records, templates, functions, typedefs, variables.
    pub globals: AHashMap<String, DeclId>,
    pub instantiation_requests: Vec<InstantiationRequest>,
}

impl TranslationUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.0 as usize]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn type_loc(&self, id: TypeLocId) -> &TypeLoc {
        &self.types[id.0 as usize]
    }

    pub fn type_loc_mut(&mut self, id: TypeLocId) -> &mut TypeLoc {
        &mut self.types[id.0 as usize]
    }

    pub fn add_decl(&mut self, decl: Decl) -> DeclId {
        self.decls.push(decl);
        DeclId(self.decls.len() as u32 - 1)
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() as u32 - 1)
    }

    pub fn add_type_loc(&mut self, ty: TypeLoc) -> TypeLocId {
        self.types.push(ty);
        TypeLocId(self.types.len() as u32 - 1)
    }

    pub fn record(&self, id: DeclId) -> &RecordDecl {
        match &self.decl(id).kind {
            DeclKind::Record(record) => record,
            other => panic!("declaration is not a record: {other:?}"),
        }
    }

    pub fn function(&self, id: DeclId) -> &FunctionDecl {
        match &self.decl(id).kind {
            DeclKind::Function(function) => function,
            other => panic!("declaration is not a function: {other:?}"),
        }
    }

    pub fn decl_name(&self, id: DeclId) -> Option<&str> {
        match &self.decl(id).kind {
            DeclKind::ClassTemplate(d) => Some(&d.name),
            DeclKind::Record(d) => Some(&d.name),
            DeclKind::FunctionTemplate(d) => Some(&d.name),
            DeclKind::Function(d) => Some(&d.name),
            DeclKind::Field(d) => Some(&d.name),
            DeclKind::Var(d) => Some(&d.name),
            DeclKind::Typedef(d) => Some(&d.name),
            DeclKind::Param(d) => Some(&d.name),
        }
    }

    /// Whether any top-level declaration carries `name`; guards duplicate
    /// emission of specializations across repeated runs.
    pub fn has_top_level_name(&self, name: &str) -> bool {
        self.top_level
            .iter()
            .any(|&id| self.decl_name(id) == Some(name))
    }

    /// Whether a top-level `typedef` with `name` exists.
    pub fn has_typedef(&self, name: &str) -> bool {
        self.top_level.iter().any(|&id| {
            matches!(&self.decl(id).kind, DeclKind::Typedef(t) if t.name == name)
        })
    }

    /// The "contains methods" predicate: a record counts as method-bearing if
    /// any direct child is a method, constructor, destructor or member
    /// function template. (Implicit constructors are never materialized as
    /// declarations, so every function child here is user-declared.)
    pub fn record_contains_methods(&self, id: DeclId) -> bool {
        self.record(id).children.iter().any(|&child| {
            matches!(
                &self.decl(child).kind,
                DeclKind::Function(_) | DeclKind::FunctionTemplate(_)
            )
        })
    }
}
