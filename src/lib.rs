//! An optimizing code generator library for the PLX teaching language.
//!
//! The crate consumes a type-checked abstract syntax tree (produced by the
//! lexer and parser collaborators) and turns it into x86-64 assembly text,
//! with an explicit machine-independent optimization layer in between:
//!
//! - three-address-code generation by syntax-directed translation;
//! - a peephole preprocessing pass over the flat instruction list;
//! - basic-block formation and per-procedure control-flow graphs;
//! - dominator and reaching-definition analyses;
//! - natural-loop recognition with induction-variable classification;
//! - strip-mining loop vectorization onto the AVX registers;
//! - context-sensitive code generation with local liveness, on-demand
//!   register allocation with spill, and stack-frame layout.
//!
//! The main entry point is [`Context::compile`].

#![warn(unused_extern_crates)]

pub mod ast;
pub mod blocks;
pub mod context;
pub mod dominator_tree;
pub mod flowgraph;
mod fx;
pub mod ir;
pub mod isa;
pub mod liveness;
pub mod loop_analysis;
pub mod preopt;
pub mod reach;
pub mod result;
pub mod settings;
pub mod symtab;
pub mod vectorizer;

pub use crate::context::Context;
pub use crate::result::{CodegenError, CodegenResult};
