//! The abstract syntax tree and its two passes: type checking and
//! three-address-code generation.
//!
//! The tree is a tagged sum over node kinds. The parser (a collaborator of
//! this crate) produces `AstNode` values against a `SymbolTables` it
//! populates while parsing; the constructors here are its building blocks.
//! Code generation walks the tree postfix: each node appends instructions
//! and returns an optional result address.

use crate::ir::{Opcode, Scope, TacBuilder, TacInst};
use crate::result::{CodegenError, CodegenResult};
use crate::symtab::{SymbolKind, SymbolTables, Type};
use smallvec::SmallVec;

/// Binary operators of the source language.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    /// The three-address opcode this operator lowers to.
    pub fn opcode(self) -> Opcode {
        match self {
            BinaryOp::Assign => Opcode::Assign,
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mult,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Eq => Opcode::Equals,
            BinaryOp::Ne => Opcode::NotEquals,
            BinaryOp::Lt => Opcode::LessThan,
            BinaryOp::Gt => Opcode::GreaterThan,
            BinaryOp::Le => Opcode::LeThan,
            BinaryOp::Ge => Opcode::GeThan,
        }
    }
}

/// One node of the abstract syntax tree.
#[derive(Clone, Debug)]
pub struct AstNode {
    /// The scope the node belongs to.
    pub scope: Scope,
    /// What the node is.
    pub kind: AstKind,
}

/// The node kinds.
#[derive(Clone, Debug)]
pub enum AstKind {
    /// Statements executed in order.
    Sequence(Vec<AstNode>),
    /// A numeric literal; the name is its spelling.
    Number(String),
    /// A use of a variable.
    Variable(String),
    /// A variable declaration.
    Declare(String),
    /// A binary expression or an assignment.
    Binary {
        op: BinaryOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },
    /// Arithmetic negation of the operand, in place.
    Negate(Box<AstNode>),
    /// Indexing of `array` by an integer expression.
    ArrayIndex { array: String, index: Box<AstNode> },
    /// A call to a procedure, with value arguments.
    Call { callee: String, args: Vec<AstNode> },
    /// Conditional execution of `body`.
    If {
        condition: Box<AstNode>,
        body: Box<AstNode>,
    },
    /// Loop while `condition` holds.
    While {
        condition: Box<AstNode>,
        body: Box<AstNode>,
    },
    /// Read a value into the named variable.
    Read(String),
    /// Write the value of the operand.
    Write(Box<AstNode>),
    /// A procedure definition.
    Procedure { name: String, body: Box<AstNode> },
}

impl AstNode {
    pub fn sequence(scope: Scope, nodes: Vec<AstNode>) -> Self {
        Self {
            scope,
            kind: AstKind::Sequence(nodes),
        }
    }

    pub fn number(scope: Scope, value: i64) -> Self {
        Self {
            scope,
            kind: AstKind::Number(value.to_string()),
        }
    }

    pub fn variable(scope: Scope, name: &str) -> Self {
        Self {
            scope,
            kind: AstKind::Variable(name.to_string()),
        }
    }

    pub fn declare(scope: Scope, name: &str) -> Self {
        Self {
            scope,
            kind: AstKind::Declare(name.to_string()),
        }
    }

    pub fn binary(scope: Scope, op: BinaryOp, lhs: AstNode, rhs: AstNode) -> Self {
        Self {
            scope,
            kind: AstKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    pub fn assign(scope: Scope, lhs: AstNode, rhs: AstNode) -> Self {
        Self::binary(scope, BinaryOp::Assign, lhs, rhs)
    }

    pub fn array_index(scope: Scope, array: &str, index: AstNode) -> Self {
        Self {
            scope,
            kind: AstKind::ArrayIndex {
                array: array.to_string(),
                index: Box::new(index),
            },
        }
    }

    pub fn call(scope: Scope, callee: &str, args: Vec<AstNode>) -> Self {
        Self {
            scope,
            kind: AstKind::Call {
                callee: callee.to_string(),
                args,
            },
        }
    }

    pub fn if_stmt(scope: Scope, condition: AstNode, body: AstNode) -> Self {
        Self {
            scope,
            kind: AstKind::If {
                condition: Box::new(condition),
                body: Box::new(body),
            },
        }
    }

    pub fn while_loop(scope: Scope, condition: AstNode, body: AstNode) -> Self {
        Self {
            scope,
            kind: AstKind::While {
                condition: Box::new(condition),
                body: Box::new(body),
            },
        }
    }

    pub fn read(scope: Scope, name: &str) -> Self {
        Self {
            scope,
            kind: AstKind::Read(name.to_string()),
        }
    }

    pub fn write(scope: Scope, value: AstNode) -> Self {
        Self {
            scope,
            kind: AstKind::Write(Box::new(value)),
        }
    }

    pub fn procedure(scope: Scope, name: &str, body: AstNode) -> Self {
        Self {
            scope,
            kind: AstKind::Procedure {
                name: name.to_string(),
                body: Box::new(body),
            },
        }
    }

    /// The children of this node, in traversal order.
    pub fn children(&self) -> SmallVec<[&AstNode; 4]> {
        match &self.kind {
            AstKind::Sequence(nodes) => nodes.iter().collect(),
            AstKind::Number(_)
            | AstKind::Variable(_)
            | AstKind::Declare(_)
            | AstKind::Read(_) => SmallVec::new(),
            AstKind::Binary { lhs, rhs, .. } => [lhs.as_ref(), rhs.as_ref()].into_iter().collect(),
            AstKind::Negate(operand) => [operand.as_ref()].into_iter().collect(),
            AstKind::ArrayIndex { index, .. } => [index.as_ref()].into_iter().collect(),
            AstKind::Call { args, .. } => args.iter().collect(),
            AstKind::If { condition, body } | AstKind::While { condition, body } => {
                [condition.as_ref(), body.as_ref()].into_iter().collect()
            }
            AstKind::Write(value) => [value.as_ref()].into_iter().collect(),
            AstKind::Procedure { body, .. } => [body.as_ref()].into_iter().collect(),
        }
    }
}

/// A whole compilation unit: the entry-point statements plus every procedure.
pub struct Program {
    /// All scopes and bindings of the program.
    pub tables: SymbolTables,
    /// The entry-point statements.
    pub main: AstNode,
    /// Procedure definitions.
    pub procedures: Vec<AstNode>,
}

impl Program {
    /// Wrap a finished parse into a program.
    pub fn new(tables: SymbolTables, main: AstNode) -> Self {
        Self {
            tables,
            main,
            procedures: Vec::new(),
        }
    }

    /// Type-check the whole program.
    pub fn type_check(&mut self) -> CodegenResult<()> {
        for proc in &self.procedures {
            type_check(proc, &mut self.tables)?;
        }
        type_check(&self.main, &mut self.tables)?;
        Ok(())
    }

    /// Generate the flat three-address-code stream for the program.
    ///
    /// Entry-point code is generated first and procedure bodies last, so the
    /// basic-block order derived from this stream places procedures after
    /// the entry code.
    pub fn generate(&mut self, builder: &mut TacBuilder) -> CodegenResult<Vec<TacInst>> {
        let mut code = Vec::new();
        generate(&self.main, builder, &mut self.tables, &mut code)?;
        for proc in &self.procedures {
            generate(proc, builder, &mut self.tables, &mut code)?;
        }
        Ok(code)
    }
}

/// Type-check one node and everything below it, returning the node's type.
///
/// Assignments resolve the left-hand variable's type when it is still
/// unknown; semantic violations are fatal.
pub fn type_check(node: &AstNode, tables: &mut SymbolTables) -> CodegenResult<Type> {
    match &node.kind {
        AstKind::Sequence(nodes) => {
            for n in nodes {
                type_check(n, tables)?;
            }
            Ok(Type::NoType)
        }
        AstKind::Number(_) => Ok(Type::Int),
        AstKind::Variable(name) => match tables.lookup(node.scope, name) {
            Some((SymbolKind::Variable { ty, .. }, _)) => Ok(*ty),
            Some((SymbolKind::Literal { ty, .. }, _)) => Ok(*ty),
            _ => Err(CodegenError::UndefinedVariable(name.clone())),
        },
        AstKind::Declare(_) => Ok(Type::NoType),
        AstKind::Binary { op, lhs, rhs } => {
            let lhs_ty = type_check(lhs, tables)?;
            let rhs_ty = type_check(rhs, tables)?;
            if *op == BinaryOp::Assign {
                if rhs_ty == Type::Void || rhs_ty == Type::NoType {
                    return Err(CodegenError::AssignmentToVoid(lhs_ty));
                }
                // An assignment to a not-yet-typed variable resolves its
                // type.
                if lhs_ty == Type::Unknown {
                    if let AstKind::Variable(name) = &lhs.kind {
                        if let Some(SymbolKind::Variable {
                            ty, is_assigned, ..
                        }) = tables.lookup_mut(node.scope, name)
                        {
                            *ty = rhs_ty;
                            *is_assigned = true;
                        }
                    }
                    return Ok(rhs_ty);
                }
            }
            if lhs_ty != rhs_ty && lhs_ty != Type::Unknown && rhs_ty != Type::Unknown {
                return Err(CodegenError::TypeMismatch(lhs_ty, rhs_ty));
            }
            Ok(lhs_ty)
        }
        AstKind::Negate(operand) => type_check(operand, tables),
        AstKind::ArrayIndex { array, index } => {
            type_check(index, tables)?;
            match tables.lookup(node.scope, array) {
                Some((SymbolKind::Variable { ty, .. }, _)) => Ok(*ty),
                _ => Err(CodegenError::UndefinedVariable(array.clone())),
            }
        }
        AstKind::Call { callee, args } => {
            for arg in args {
                type_check(arg, tables)?;
            }
            match tables.lookup(node.scope, callee) {
                Some((SymbolKind::Procedure { return_type, .. }, _)) => Ok(*return_type),
                _ => Err(CodegenError::UnknownProcedure(callee.clone())),
            }
        }
        AstKind::If { condition, body } | AstKind::While { condition, body } => {
            type_check(condition, tables)?;
            type_check(body, tables)?;
            Ok(Type::NoType)
        }
        AstKind::Read(name) => {
            match tables.lookup_mut(node.scope, name) {
                Some(SymbolKind::Variable {
                    ty, is_assigned, ..
                }) => {
                    if *ty == Type::Unknown {
                        *ty = Type::Int;
                    }
                    *is_assigned = true;
                }
                _ => return Err(CodegenError::UndefinedVariable(name.clone())),
            }
            Ok(Type::NoType)
        }
        AstKind::Write(value) => {
            type_check(value, tables)?;
            Ok(Type::NoType)
        }
        AstKind::Procedure { body, .. } => {
            type_check(body, tables)?;
            Ok(Type::NoType)
        }
    }
}

/// Generate code for one node, appending instructions to `code` and returning
/// the address holding the node's value, if it has one.
pub fn generate(
    node: &AstNode,
    builder: &mut TacBuilder,
    tables: &mut SymbolTables,
    code: &mut Vec<TacInst>,
) -> CodegenResult<Option<String>> {
    let scope = node.scope;
    match &node.kind {
        AstKind::Sequence(nodes) => {
            for n in nodes {
                generate(n, builder, tables, code)?;
            }
            Ok(None)
        }
        AstKind::Number(name) => {
            if tables.lookup(scope, name).is_none() {
                let value = name
                    .parse::<i64>()
                    .map_err(|_| CodegenError::Internal(format!("bad literal `{name}`")))?;
                tables.lookup_or_insert_int_constant(value);
            }
            Ok(Some(name.clone()))
        }
        AstKind::Variable(name) => Ok(Some(name.clone())),
        AstKind::Declare(name) => {
            code.push(builder.make_quad(scope, Opcode::Assign, name, ""));
            Ok(None)
        }
        AstKind::Binary {
            op: BinaryOp::Assign,
            lhs,
            rhs,
        } => {
            let value = expect_value(generate(rhs, builder, tables, code)?)?;
            match &lhs.kind {
                AstKind::Variable(name) => {
                    code.push(builder.make_quad(scope, Opcode::Assign, name, &value));
                    Ok(Some(name.clone()))
                }
                AstKind::ArrayIndex { array, index } => {
                    let idx = expect_value(generate(index, builder, tables, code)?)?;
                    let addr = builder.make_quad(scope, Opcode::ArrayIndex, array, &idx);
                    let slot = addr.result.clone();
                    code.push(addr);
                    code.push(builder.make_quad(scope, Opcode::Assign, &slot, &value));
                    Ok(None)
                }
                _ => Err(CodegenError::Internal(
                    "assignment to a non-assignable expression".to_string(),
                )),
            }
        }
        AstKind::Binary { op, lhs, rhs } => {
            let l = expect_value(generate(lhs, builder, tables, code)?)?;
            let r = expect_value(generate(rhs, builder, tables, code)?)?;
            let inst = builder.make_quad(scope, op.opcode(), &l, &r);
            let result = inst.result.clone();
            code.push(inst);
            Ok(Some(result))
        }
        AstKind::Negate(operand) => {
            let a = expect_value(generate(operand, builder, tables, code)?)?;
            code.push(builder.make_quad(scope, Opcode::Negate, &a, ""));
            Ok(Some(a))
        }
        AstKind::ArrayIndex { array, index } => {
            let idx = expect_value(generate(index, builder, tables, code)?)?;
            let inst = builder.make_quad(scope, Opcode::ArrayIndex, array, &idx);
            let result = inst.result.clone();
            code.push(inst);
            Ok(Some(result))
        }
        AstKind::Call { callee, args } => {
            let (params, return_name) = match tables.lookup(scope, callee) {
                Some((
                    SymbolKind::Procedure {
                        params,
                        return_name,
                        ..
                    },
                    _,
                )) => (params.clone(), return_name.clone()),
                _ => return Err(CodegenError::UnknownProcedure(callee.clone())),
            };
            for ((param, _), arg) in params.iter().zip(args) {
                let a = expect_value(generate(arg, builder, tables, code)?)?;
                code.push(builder.make_quad(scope, Opcode::Assign, param, &a));
            }
            code.push(builder.make_quad(scope, Opcode::Call, callee, ""));
            Ok(return_name)
        }
        AstKind::If { condition, body } => {
            generate(condition, builder, tables, code)?;
            let exit = builder.new_label();
            code.push(builder.make_quad(scope, Opcode::JmpZero, &exit, ""));
            generate(body, builder, tables, code)?;
            code.push(builder.make_quad(scope, Opcode::Label, &exit, ""));
            Ok(None)
        }
        AstKind::While { condition, body } => {
            let header = builder.new_label();
            code.push(builder.make_quad(scope, Opcode::Label, &header, ""));
            generate(condition, builder, tables, code)?;
            let exit = builder.new_label();
            code.push(builder.make_quad(scope, Opcode::JmpZero, &exit, ""));
            generate(body, builder, tables, code)?;
            code.push(builder.make_quad(scope, Opcode::UncondJmp, &header, ""));
            code.push(builder.make_quad(scope, Opcode::Label, &exit, ""));
            Ok(None)
        }
        AstKind::Read(name) => {
            code.push(builder.make_quad(scope, Opcode::Read, name, ""));
            Ok(None)
        }
        AstKind::Write(value) => {
            let a = expect_value(generate(value, builder, tables, code)?)?;
            code.push(builder.make_quad(scope, Opcode::Write, &a, ""));
            Ok(None)
        }
        AstKind::Procedure { name, body } => {
            let entry = builder.custom_label(name);
            code.push(builder.make_quad(scope, Opcode::Label, &entry, ""));
            code.push(builder.make_quad(scope, Opcode::EnterProc, name, ""));
            let (params, return_name) = match tables.lookup(scope, name) {
                Some((
                    SymbolKind::Procedure {
                        params,
                        return_name,
                        ..
                    },
                    _,
                )) => (params.clone(), return_name.clone()),
                _ => return Err(CodegenError::UnknownProcedure(name.clone())),
            };
            for (param, _) in &params {
                code.push(builder.make_quad(scope, Opcode::ProcParam, param, ""));
            }
            if let Some(ret) = &return_name {
                code.push(builder.make_quad(scope, Opcode::Retval, ret, ""));
            }
            generate(body, builder, tables, code)?;
            code.push(builder.make_quad(scope, Opcode::ExitProc, name, ""));
            Ok(None)
        }
    }
}

fn expect_value(addr: Option<String>) -> CodegenResult<String> {
    addr.ok_or_else(|| CodegenError::Internal("expression produced no value".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::SymbolKind;

    fn program_with_x() -> (SymbolTables, Scope) {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        tables.insert(root, "x", SymbolKind::scalar());
        (tables, root)
    }

    #[test]
    fn assignment_resolves_unknown_types() {
        let (mut tables, root) = program_with_x();
        let node = AstNode::assign(
            root,
            AstNode::variable(root, "x"),
            AstNode::number(root, 7),
        );
        assert_eq!(type_check(&node, &mut tables), Ok(Type::Int));
        match tables.lookup(root, "x") {
            Some((SymbolKind::Variable { ty, is_assigned, .. }, _)) => {
                assert_eq!(*ty, Type::Int);
                assert!(*is_assigned);
            }
            _ => panic!("missing entry"),
        }
    }

    #[test]
    fn undefined_variable_is_fatal() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        let node = AstNode::variable(root, "nope");
        assert_eq!(
            type_check(&node, &mut tables),
            Err(CodegenError::UndefinedVariable("nope".to_string()))
        );
    }

    #[test]
    fn unknown_procedure_is_fatal() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        let node = AstNode::call(root, "p", vec![]);
        assert_eq!(
            type_check(&node, &mut tables),
            Err(CodegenError::UnknownProcedure("p".to_string()))
        );
    }

    #[test]
    fn increment_generates_temp_then_copy() {
        let (mut tables, root) = program_with_x();
        let node = AstNode::assign(
            root,
            AstNode::variable(root, "x"),
            AstNode::binary(
                root,
                BinaryOp::Add,
                AstNode::variable(root, "x"),
                AstNode::number(root, 1),
            ),
        );
        let mut builder = TacBuilder::new();
        let mut code = Vec::new();
        generate(&node, &mut builder, &mut tables, &mut code).unwrap();

        assert_eq!(code.len(), 2);
        assert_eq!(code[0].op, Opcode::Add);
        assert_eq!(code[0].arg1, "x");
        assert_eq!(code[0].arg2, "1");
        assert_eq!(code[0].result, "$t0");
        assert_eq!(code[1].op, Opcode::Assign);
        assert_eq!(code[1].result, "x");
        assert_eq!(code[1].arg1, "$t0");
    }

    #[test]
    fn while_emits_header_test_body_backedge() {
        let (mut tables, root) = program_with_x();
        let node = AstNode::while_loop(
            root,
            AstNode::binary(
                root,
                BinaryOp::Lt,
                AstNode::variable(root, "x"),
                AstNode::number(root, 10),
            ),
            AstNode::assign(
                root,
                AstNode::variable(root, "x"),
                AstNode::binary(
                    root,
                    BinaryOp::Add,
                    AstNode::variable(root, "x"),
                    AstNode::number(root, 1),
                ),
            ),
        );
        let mut builder = TacBuilder::new();
        let mut code = Vec::new();
        generate(&node, &mut builder, &mut tables, &mut code).unwrap();

        let ops: Vec<Opcode> = code.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::Label,
                Opcode::LessThan,
                Opcode::JmpZero,
                Opcode::Add,
                Opcode::Assign,
                Opcode::UncondJmp,
                Opcode::Label,
            ]
        );
        // The back edge targets the header label and the exit jump targets
        // the label after the body.
        assert_eq!(code[0].arg1, "$LNO0");
        assert_eq!(code[5].arg1, "$LNO0");
        assert_eq!(code[2].arg1, "$LNO1");
        assert_eq!(code[6].arg1, "$LNO1");
    }

    #[test]
    fn array_store_goes_through_an_address_temp() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        tables.insert(root, "a", SymbolKind::array(16));
        tables.insert(root, "i", SymbolKind::scalar());

        let node = AstNode::assign(
            root,
            AstNode::array_index(root, "a", AstNode::variable(root, "i")),
            AstNode::number(root, 1),
        );
        let mut builder = TacBuilder::new();
        let mut code = Vec::new();
        generate(&node, &mut builder, &mut tables, &mut code).unwrap();

        assert_eq!(code.len(), 2);
        assert_eq!(code[0].op, Opcode::ArrayIndex);
        assert_eq!(code[0].arg1, "a");
        assert_eq!(code[0].arg2, "i");
        assert_eq!(code[1].op, Opcode::Assign);
        assert_eq!(code[1].result, code[0].result);
        assert_eq!(code[1].arg1, "1");
    }

    #[test]
    fn procedure_wraps_body_in_markers() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        tables.insert(root, "x", SymbolKind::scalar());
        tables.insert(
            root,
            "p",
            SymbolKind::Procedure {
                params: vec![],
                return_name: None,
                return_type: Type::Void,
            },
        );
        let inner = tables.push_scope(root);
        let body = AstNode::assign(
            inner,
            AstNode::variable(inner, "x"),
            AstNode::number(inner, 1),
        );
        let node = AstNode::procedure(root, "p", body);

        let mut builder = TacBuilder::new();
        let mut code = Vec::new();
        generate(&node, &mut builder, &mut tables, &mut code).unwrap();

        assert_eq!(code[0].op, Opcode::Label);
        assert_eq!(code[0].arg1, "$Lp");
        assert_eq!(code[1].op, Opcode::EnterProc);
        assert_eq!(code[1].arg1, "p");
        assert_eq!(code.last().unwrap().op, Opcode::ExitProc);
    }

    #[test]
    fn children_follow_the_tree_shape() {
        let (_, root) = program_with_x();
        let node = AstNode::assign(
            root,
            AstNode::variable(root, "x"),
            AstNode::number(root, 7),
        );
        assert_eq!(node.children().len(), 2);
        assert!(AstNode::variable(root, "x").children().is_empty());
    }
}
