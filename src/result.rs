//! Result and error types representing the outcome of compiling a program.

use crate::symtab::Type;
use thiserror::Error;

/// A compilation error.
///
/// Semantic errors and internal invariant violations are fatal: every stage
/// either completes or the pipeline stops with one of these. Optimization
/// failures are deliberately *not* errors; a loop that cannot be vectorized
/// is reported through the log and compiled in its original form.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// Use of a variable that is not declared in any enclosing scope.
    #[error("use of undefined variable `{0}`")]
    UndefinedVariable(String),

    /// Call to a name that is not bound to a procedure.
    #[error("attempted to call undeclared procedure `{0}`")]
    UnknownProcedure(String),

    /// The two sides of a binary expression have incompatible types.
    #[error("type mismatch: {0} and {1}")]
    TypeMismatch(Type, Type),

    /// Assignment of a value-less expression, such as a call to a procedure
    /// without a return slot.
    #[error("attempted an assignment of {0} to void")]
    AssignmentToVoid(Type),

    /// An internal invariant was violated. This indicates a bug in the
    /// compiler rather than in the program being compiled.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error
/// type.
pub type CodegenResult<T> = Result<T, CodegenError>;
