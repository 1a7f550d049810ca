//! Pre-order traversal with per-node-kind hooks.
//!
//! For every declaration and statement variant there is an overridable
//! `traverse_*` hook whose default delegates to the matching `walk_*` free
//! function; returning without recursing prunes the subtree. `visit_*`
//! hooks fire during default traversal and do not control children. The
//! two passes override different subsets.

use crate::{
    ast::{DeclId, DeclKind, FunctionKind, NodeId, NodeKind, TranslationUnit, TypeLocId},
    error::Error,
    source::{Characteristic, SourceManager},
};

pub type WalkResult = Result<(), Error>;

/// Whether a declaration starts inside a system include. Every top-level
/// hook of a pass checks this first; system files are never rewritten.
pub fn is_in_system_file(sm: &SourceManager, tu: &TranslationUnit, decl: DeclId) -> bool {
    sm.characteristic(tu.decl(decl).range.begin) == Characteristic::System
}

pub trait AstVisitor {
    fn traverse_translation_unit(&mut self, tu: &TranslationUnit) -> WalkResult {
        walk_translation_unit(self, tu)
    }

    fn traverse_decl(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_decl(self, tu, decl)
    }

    fn traverse_class_template(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_class_template(self, tu, decl)
    }

    fn traverse_cxx_record(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_cxx_record(self, tu, decl)
    }

    fn traverse_function_template(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_function_template(self, tu, decl)
    }

    fn traverse_function(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_function(self, tu, decl)
    }

    fn traverse_cxx_method(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_function(self, tu, decl)
    }

    fn traverse_field(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_field(self, tu, decl)
    }

    fn traverse_var(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_var(self, tu, decl)
    }

    fn traverse_typedef(&mut self, _tu: &TranslationUnit, _decl: DeclId) -> WalkResult {
        Ok(())
    }

    fn traverse_param(&mut self, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
        walk_param(self, tu, decl)
    }

    fn traverse_type_loc(&mut self, tu: &TranslationUnit, ty: TypeLocId) -> WalkResult {
        walk_type_loc(self, tu, ty)
    }

    fn traverse_stmt(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_stmt(self, tu, node)
    }

    fn traverse_compound(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_compound(self, tu, node)
    }

    fn traverse_call(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_call(self, tu, node)
    }

    fn traverse_member_call(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_member_call(self, tu, node)
    }

    fn traverse_operator_call(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_operator_call(self, tu, node)
    }

    fn traverse_construct(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_construct(self, tu, node)
    }

    fn traverse_functional_cast(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_functional_cast(self, tu, node)
    }

    fn traverse_temporary_object(&mut self, tu: &TranslationUnit, node: NodeId) -> WalkResult {
        walk_temporary_object(self, tu, node)
    }

    fn visit_function_decl(&mut self, _tu: &TranslationUnit, _decl: DeclId) -> WalkResult {
        Ok(())
    }

    fn visit_cxx_method(&mut self, _tu: &TranslationUnit, _decl: DeclId) -> WalkResult {
        Ok(())
    }

    fn visit_call(&mut self, _tu: &TranslationUnit, _node: NodeId) -> WalkResult {
        Ok(())
    }

    fn visit_cxx_this(&mut self, _tu: &TranslationUnit, _node: NodeId) -> WalkResult {
        Ok(())
    }
}

pub fn walk_translation_unit<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit) -> WalkResult {
    for &decl in &tu.top_level {
        v.traverse_decl(tu, decl)?;
    }
    Ok(())
}

pub fn walk_decl<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    match &tu.decl(decl).kind {
        DeclKind::ClassTemplate(_) => v.traverse_class_template(tu, decl),
        DeclKind::Record(_) => v.traverse_cxx_record(tu, decl),
        DeclKind::FunctionTemplate(_) => v.traverse_function_template(tu, decl),
        DeclKind::Function(f) => {
            if f.kind == FunctionKind::Free {
                v.traverse_function(tu, decl)
            } else {
                v.traverse_cxx_method(tu, decl)
            }
        }
        DeclKind::Field(_) => v.traverse_field(tu, decl),
        DeclKind::Var(_) => v.traverse_var(tu, decl),
        DeclKind::Typedef(_) => v.traverse_typedef(tu, decl),
        DeclKind::Param(_) => v.traverse_param(tu, decl),
    }
}

pub fn walk_class_template<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    let DeclKind::ClassTemplate(template) = &tu.decl(decl).kind else {
        return Ok(());
    };
    v.traverse_cxx_record(tu, template.pattern)
}

pub fn walk_cxx_record<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    for &child in &tu.record(decl).children {
        v.traverse_decl(tu, child)?;
    }
    Ok(())
}

pub fn walk_function_template<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    let DeclKind::FunctionTemplate(template) = &tu.decl(decl).kind else {
        return Ok(());
    };
    v.traverse_decl(tu, template.pattern)
}

pub fn walk_function<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    v.visit_function_decl(tu, decl)?;
    let function = tu.function(decl);
    if function.is_method() {
        v.visit_cxx_method(tu, decl)?;
    }
    if let Some(return_type) = function.return_type {
        v.traverse_type_loc(tu, return_type)?;
    }
    for &param in &function.params {
        v.traverse_decl(tu, param)?;
    }
    if let Some(body) = function.body {
        v.traverse_stmt(tu, body)?;
    }
    Ok(())
}

pub fn walk_field<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    let DeclKind::Field(field) = &tu.decl(decl).kind else {
        return Ok(());
    };
    v.traverse_type_loc(tu, field.ty)
}

pub fn walk_var<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    let DeclKind::Var(var) = &tu.decl(decl).kind else {
        return Ok(());
    };
    v.traverse_type_loc(tu, var.ty)?;
    if let Some(init) = var.init {
        v.traverse_stmt(tu, init)?;
    }
    Ok(())
}

pub fn walk_param<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, decl: DeclId) -> WalkResult {
    let DeclKind::Param(param) = &tu.decl(decl).kind else {
        return Ok(());
    };
    v.traverse_type_loc(tu, param.ty)
}

pub fn walk_type_loc<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, ty: TypeLocId) -> WalkResult {
    for &child in &tu.type_loc(ty).children {
        v.traverse_type_loc(tu, child)?;
    }
    Ok(())
}

pub fn walk_stmt<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    match &tu.node(node).kind {
        NodeKind::Compound { .. } => v.traverse_compound(tu, node),
        NodeKind::Return { value } => {
            if let Some(value) = *value {
                v.traverse_stmt(tu, value)?;
            }
            Ok(())
        }
        NodeKind::DeclStmt { decl } => v.traverse_decl(tu, *decl),
        NodeKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let (cond, then_branch, else_branch) = (*cond, *then_branch, *else_branch);
            v.traverse_stmt(tu, cond)?;
            v.traverse_stmt(tu, then_branch)?;
            if let Some(else_branch) = else_branch {
                v.traverse_stmt(tu, else_branch)?;
            }
            Ok(())
        }
        NodeKind::While { cond, body } => {
            let (cond, body) = (*cond, *body);
            v.traverse_stmt(tu, cond)?;
            v.traverse_stmt(tu, body)
        }
        NodeKind::For { init, cond, step, body } => {
            let (init, cond, step, body) = (*init, *cond, *step, *body);
            for part in [init, cond, step].into_iter().flatten() {
                v.traverse_stmt(tu, part)?;
            }
            v.traverse_stmt(tu, body)
        }
        NodeKind::DeclRef { .. } | NodeKind::Literal { .. } => Ok(()),
        NodeKind::This { .. } => v.visit_cxx_this(tu, node),
        NodeKind::Member(member) => v.traverse_stmt(tu, member.base),
        NodeKind::Call(_) => v.traverse_call(tu, node),
        NodeKind::MemberCall(_) => v.traverse_member_call(tu, node),
        NodeKind::OperatorCall(_) => v.traverse_operator_call(tu, node),
        NodeKind::Construct(_) => v.traverse_construct(tu, node),
        NodeKind::FunctionalCast { .. } => v.traverse_functional_cast(tu, node),
        NodeKind::TemporaryObject(_) => v.traverse_temporary_object(tu, node),
        NodeKind::Unary { operand, .. } => v.traverse_stmt(tu, *operand),
        NodeKind::Binary { lhs, rhs, .. } | NodeKind::Assign { lhs, rhs, .. } => {
            let (lhs, rhs) = (*lhs, *rhs);
            v.traverse_stmt(tu, lhs)?;
            v.traverse_stmt(tu, rhs)
        }
        NodeKind::Subscript { base, index } => {
            let (base, index) = (*base, *index);
            v.traverse_stmt(tu, base)?;
            v.traverse_stmt(tu, index)
        }
        NodeKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            let (cond, then_expr, else_expr) = (*cond, *then_expr, *else_expr);
            v.traverse_stmt(tu, cond)?;
            v.traverse_stmt(tu, then_expr)?;
            v.traverse_stmt(tu, else_expr)
        }
        NodeKind::Paren { sub } => v.traverse_stmt(tu, *sub),
    }
}

pub fn walk_compound<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    let NodeKind::Compound { stmts, .. } = &tu.node(node).kind else {
        return Ok(());
    };
    for &stmt in stmts {
        v.traverse_stmt(tu, stmt)?;
    }
    Ok(())
}

pub fn walk_call<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    v.visit_call(tu, node)?;
    let NodeKind::Call(call) = &tu.node(node).kind else {
        return Ok(());
    };
    v.traverse_stmt(tu, call.callee)?;
    for &arg in &call.args {
        v.traverse_stmt(tu, arg)?;
    }
    Ok(())
}

pub fn walk_member_call<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    let NodeKind::MemberCall(call) = &tu.node(node).kind else {
        return Ok(());
    };
    v.traverse_stmt(tu, call.callee)?;
    for &arg in &call.args {
        v.traverse_stmt(tu, arg)?;
    }
    Ok(())
}

pub fn walk_operator_call<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    let NodeKind::OperatorCall(call) = &tu.node(node).kind else {
        return Ok(());
    };
    for &arg in &call.args {
        v.traverse_stmt(tu, arg)?;
    }
    Ok(())
}

pub fn walk_construct<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    let NodeKind::Construct(construct) = &tu.node(node).kind else {
        return Ok(());
    };
    for &arg in &construct.args {
        v.traverse_stmt(tu, arg)?;
    }
    Ok(())
}

pub fn walk_functional_cast<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    let NodeKind::FunctionalCast { sub, .. } = &tu.node(node).kind else {
        return Ok(());
    };
    v.traverse_stmt(tu, *sub)
}

pub fn walk_temporary_object<V: AstVisitor + ?Sized>(v: &mut V, tu: &TranslationUnit, node: NodeId) -> WalkResult {
    let NodeKind::TemporaryObject(construct) = &tu.node(node).kind else {
        return Ok(());
    };
    for &arg in &construct.args {
        v.traverse_stmt(tu, arg)?;
    }
    Ok(())
}
