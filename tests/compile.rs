//! End-to-end compilation scenarios: each test drives the whole pipeline
//! from an abstract syntax tree to finished assembly text and checks the
//! emitted shape.

use plx_codegen::ast::{AstNode, BinaryOp, Program};
use plx_codegen::ir::Scope;
use plx_codegen::settings;
use plx_codegen::symtab::{SymbolKind, SymbolTables, Type};
use plx_codegen::Context;

fn compile(program: &mut Program) -> String {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::new().compile(program).expect("compilation succeeds")
}

fn compile_vectorized(program: &mut Program) -> String {
    let _ = env_logger::builder().is_test(true).try_init();
    let flags = settings::Flags::new(settings::builder().enable_vectorizer(true));
    Context::with_flags(flags)
        .compile(program)
        .expect("compilation succeeds")
}

fn pos(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}` not found in:\n{haystack}"))
}

/// `i := 0; while i < bound do begin <body(scope)>; i := i + 1 end`
fn counting_loop(scope: Scope, bound: i64, body: Vec<AstNode>) -> AstNode {
    let mut stmts = body;
    stmts.push(AstNode::assign(
        scope,
        AstNode::variable(scope, "i"),
        AstNode::binary(
            scope,
            BinaryOp::Add,
            AstNode::variable(scope, "i"),
            AstNode::number(scope, 1),
        ),
    ));
    AstNode::sequence(
        scope,
        vec![
            AstNode::assign(scope, AstNode::variable(scope, "i"), AstNode::number(scope, 0)),
            AstNode::while_loop(
                scope,
                AstNode::binary(
                    scope,
                    BinaryOp::Lt,
                    AstNode::variable(scope, "i"),
                    AstNode::number(scope, bound),
                ),
                AstNode::sequence(scope, stmts),
            ),
        ],
    )
}

#[test]
fn empty_program() {
    let tables = SymbolTables::new();
    let root = tables.root();
    let mut program = Program::new(tables, AstNode::sequence(root, vec![]));
    let asm = compile(&mut program);

    assert_eq!(
        asm,
        ".data\n.text\n.global _start\n_start:\n\tmovq $60, %rax\n\tmovq $0, %rbx\n\tsyscall\n"
    );
}

#[test]
fn global_assignment() {
    let mut tables = SymbolTables::new();
    let root = tables.root();
    tables.insert(root, "x", SymbolKind::scalar());
    let main = AstNode::sequence(
        root,
        vec![
            AstNode::declare(root, "x"),
            AstNode::assign(root, AstNode::variable(root, "x"), AstNode::number(root, 7)),
        ],
    );
    let mut program = Program::new(tables, main);
    let asm = compile(&mut program);

    assert!(asm.contains(".align 8\nx:\n.quad 0\n"));
    let store = pos(&asm, "\tmovq $7, x(%rip)");
    assert!(pos(&asm, "_start:") < store);
    assert!(store < pos(&asm, "\tsyscall"));
}

#[test]
fn arithmetic_into_temporary_is_peepholed() {
    // x := x + 1 must compile to a single load-add-store sequence: one GPR
    // acquired, one add, one store-back.
    let mut tables = SymbolTables::new();
    let root = tables.root();
    tables.insert(root, "x", SymbolKind::scalar());
    let main = AstNode::sequence(
        root,
        vec![
            AstNode::declare(root, "x"),
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
        ],
    );
    let mut program = Program::new(tables, main);
    let asm = compile(&mut program);

    let lines: Vec<&str> = asm
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect();
    let load = lines
        .iter()
        .position(|l| l.starts_with("\tmovq x(%rip), %"))
        .expect("one load");
    let add = lines
        .iter()
        .position(|l| l.starts_with("\taddq $1, %"))
        .expect("one add");
    let store = lines
        .iter()
        .position(|l| l.starts_with("\tmovq %") && l.ends_with(", x(%rip)"))
        .expect("one store-back");
    assert!(load < add && add < store);
    assert_eq!(asm.matches("addq").count(), 1);
}

#[test]
fn while_loop_without_vectorization() {
    let mut tables = SymbolTables::new();
    let root = tables.root();
    tables.insert(root, "i", SymbolKind::scalar());
    let main = AstNode::sequence(
        root,
        vec![
            AstNode::declare(root, "i"),
            counting_loop(root, 10, vec![]),
        ],
    );
    let mut program = Program::new(tables, main);
    let asm = compile(&mut program);

    let header = pos(&asm, "NO0:");
    let cmp = pos(&asm, "\tcmpq $10, %");
    let exit_jump = pos(&asm, "\tjge NO1");
    let back_jump = pos(&asm, "\tjmp NO0");
    let exit_label = pos(&asm, "NO1:");
    assert!(header < cmp);
    assert!(cmp < exit_jump);
    assert!(exit_jump < back_jump);
    assert!(back_jump < exit_label);
}

fn array_fill_program() -> Program {
    let mut tables = SymbolTables::new();
    let root = tables.root();
    tables.insert(root, "i", SymbolKind::scalar());
    tables.insert(root, "a", SymbolKind::array(16));
    let body = vec![AstNode::assign(
        root,
        AstNode::array_index(root, "a", AstNode::variable(root, "i")),
        AstNode::number(root, 1),
    )];
    let main = AstNode::sequence(
        root,
        vec![
            AstNode::declare(root, "i"),
            AstNode::declare(root, "a"),
            counting_loop(root, 16, body),
        ],
    );
    Program::new(tables, main)
}

#[test]
fn vectorizable_array_loop_with_flag() {
    let asm = compile_vectorized(&mut array_fill_program());

    // The primary loop stores a broadcast 1 through a ymm register and
    // steps the iterator by four.
    assert!(asm.contains("\tvpbroadcastq %xmm"));
    assert!(asm.contains("\tvmovdqu %ymm"));
    assert!(asm.contains("\taddq $4, %"));

    // The scalar tail loop is still present: a second comparison against
    // the bound and a scalar element store.
    assert_eq!(asm.matches("\tcmpq $16, %").count(), 2);
    assert!(asm.contains("\tmovq $1, (%"));
    assert!(asm.contains("\taddq $1, %"));
}

#[test]
fn array_loop_without_flag_stays_scalar() {
    let asm = compile(&mut array_fill_program());

    assert!(!asm.contains("ymm"));
    assert!(!asm.contains("vmovdqu"));
    assert_eq!(asm.matches("\tcmpq $16, %").count(), 1);
    assert!(asm.contains("\tmovq $1, (%"));
}

#[test]
fn procedure_call() {
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
        AstNode::binary(
            inner,
            BinaryOp::Add,
            AstNode::variable(inner, "x"),
            AstNode::number(inner, 1),
        ),
    );
    let main = AstNode::sequence(
        root,
        vec![AstNode::declare(root, "x"), AstNode::call(root, "p", vec![])],
    );
    let mut program = Program::new(tables, main);
    program.procedures.push(AstNode::procedure(root, "p", body));
    let asm = compile(&mut program);

    // The entry's _start section calls the procedure; the procedure body,
    // with its own prologue and epilogue, follows the exit epilogue.
    let call = pos(&asm, "\tcall p");
    let syscall = pos(&asm, "\tsyscall");
    let label = pos(&asm, "p:\n");
    let prologue = pos(&asm, "\tpushq %rbp\n\tmovq %rsp, %rbp\n\tsubq $");
    let epilogue = pos(&asm, "\tmovq %rbp, %rsp\n\tpopq %rbp\n\tret");
    assert!(call < syscall);
    assert!(syscall < label);
    assert!(label < prologue);
    assert!(prologue < epilogue);
}

#[test]
fn semantic_errors_are_fatal() {
    let tables = SymbolTables::new();
    let root = tables.root();
    let main = AstNode::sequence(
        root,
        vec![AstNode::assign(
            root,
            AstNode::variable(root, "nope"),
            AstNode::number(root, 1),
        )],
    );
    let mut program = Program::new(tables, main);
    let err = Context::new().compile(&mut program).unwrap_err();
    assert_eq!(
        err,
        plx_codegen::CodegenError::UndefinedVariable("nope".to_string())
    );
}

#[test]
fn read_and_write_use_the_runtime_helpers() {
    let mut tables = SymbolTables::new();
    let root = tables.root();
    tables.insert(root, "x", SymbolKind::scalar());
    let main = AstNode::sequence(
        root,
        vec![
            AstNode::declare(root, "x"),
            AstNode::read(root, "x"),
            AstNode::write(root, AstNode::variable(root, "x")),
        ],
    );
    let mut program = Program::new(tables, main);
    let asm = compile(&mut program);

    let read = pos(&asm, "\tcall read_pl_0");
    let store = pos(&asm, "\tmovq %rax, x(%rip)");
    let write_arg = pos(&asm, ", %rdi");
    let write = pos(&asm, "\tcall write_pl_0");
    assert!(read < store);
    assert!(store < write_arg);
    assert!(write_arg < write);
}
