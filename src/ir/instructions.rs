//! Three-address-code instructions.
//!
//! Every operation is represented by a quadruple: an opcode, up to two source
//! operands, and a result, plus the scope the instruction was generated in.
//! Operands are string-typed names drawn from three disjoint subspaces:
//! user-defined variables and literals, compiler temporaries (`$t<n>`), and
//! labels (`$L...`). An empty string means "no operand in this slot".

use crate::ir::entities::{InstId, Scope};
use core::fmt;

/// Prefix shared by every label name.
pub const LABEL_PREFIX: &str = "$L";

/// Prefix shared by every compiler temporary.
pub const TEMP_PREFIX: &str = "$t";

/// Is `name` a label?
pub fn is_label_name(name: &str) -> bool {
    name.starts_with(LABEL_PREFIX)
}

/// Is `name` a compiler temporary?
pub fn is_temporary(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Is `name` a user-defined variable (or literal), as opposed to a compiler
/// temporary?
pub fn is_user_defined_var(name: &str) -> bool {
    !is_temporary(name)
}

/// Strip the label prefix off `name`.
///
/// Panics if `name` is not a label; callers are expected to check with
/// [`is_label_name`] first.
pub fn extract_label(name: &str) -> &str {
    debug_assert!(is_label_name(name), "not a label: {name}");
    &name[LABEL_PREFIX.len()..]
}

/// The operations a three-address code may represent.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    /// No operation.
    Nop,
    /// Procedure prologue marker; `arg1` names the procedure.
    EnterProc,
    /// Procedure epilogue marker; `arg1` names the procedure.
    ExitProc,
    /// In-place arithmetic negation; `result == arg1`.
    Negate,
    /// Unconditional jump to the label in `arg1`.
    UncondJmp,
    /// Read a machine word from input into `arg1`.
    Read,
    /// Write `arg1` to output.
    Write,
    /// Label definition; the label name is in `arg1`.
    Label,
    /// Call the procedure whose entry label is in `arg1`.
    Call,
    /// Conditional jumps to the label in `arg1`.
    JmpE,
    JmpL,
    JmpG,
    JmpLe,
    JmpGe,
    JmpNe,
    /// Jump if the most recent comparison produced zero.
    JmpZero,
    /// Return the value named by `arg1`.
    Retval,
    /// Declare a procedure parameter named by `arg1`.
    ProcParam,
    /// Two-address assignment `result := arg1`, or a declaration when only
    /// `result` is set.
    Assign,
    Add,
    Sub,
    Mult,
    Div,
    LessThan,
    GreaterThan,
    GeThan,
    LeThan,
    Equals,
    NotEquals,
    /// `result := &arg1[arg2]`; the result temporary carries the element
    /// address.
    ArrayIndex,
    /// Vector lane-wise addition `result := arg1 + arg2`.
    Vadd,
    /// Vector lane-wise subtraction `result := arg1 - arg2`.
    Vsub,
    /// Broadcast the scalar `arg1` into the vector `result`.
    Vassign,
    /// Vector load `result := arg1[arg2 ..]`.
    Vload,
    /// Vector store `result[arg2 ..] := arg1`.
    Vstore,
}

impl Opcode {
    /// Does this operation transfer control? Calls count as a jump.
    pub fn transfers_control(self) -> bool {
        match self {
            Self::UncondJmp
            | Self::JmpE
            | Self::JmpL
            | Self::JmpG
            | Self::JmpLe
            | Self::JmpGe
            | Self::JmpNe
            | Self::JmpZero
            | Self::Call => true,
            _ => false,
        }
    }

    /// Is this operation a conditional jump?
    pub fn is_conditional_jump(self) -> bool {
        match self {
            Self::JmpE
            | Self::JmpL
            | Self::JmpG
            | Self::JmpLe
            | Self::JmpGe
            | Self::JmpNe
            | Self::JmpZero => true,
            _ => false,
        }
    }

    /// Is this operation a comparison?
    pub fn is_comparison(self) -> bool {
        match self {
            Self::LessThan
            | Self::GreaterThan
            | Self::GeThan
            | Self::LeThan
            | Self::Equals
            | Self::NotEquals => true,
            _ => false,
        }
    }

    /// Is this one of the procedure frame markers?
    pub fn is_frame_marker(self) -> bool {
        match self {
            Self::EnterProc | Self::ExitProc | Self::ProcParam | Self::Retval => true,
            _ => false,
        }
    }

    /// Is this operation a vector operation?
    pub fn is_vector(self) -> bool {
        match self {
            Self::Vadd | Self::Vsub | Self::Vassign | Self::Vload | Self::Vstore => true,
            _ => false,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Self::Nop => "nop",
            Self::EnterProc => "enter_proc",
            Self::ExitProc => "exit_proc",
            Self::Negate => "negate",
            Self::UncondJmp => "jmp",
            Self::Read => "read",
            Self::Write => "write",
            Self::Label => "label",
            Self::Call => "call",
            Self::JmpE => "jmp_e",
            Self::JmpL => "jmp_l",
            Self::JmpG => "jmp_g",
            Self::JmpLe => "jmp_le",
            Self::JmpGe => "jmp_ge",
            Self::JmpNe => "jmp_ne",
            Self::JmpZero => "jmp_zero",
            Self::Retval => "retval",
            Self::ProcParam => "proc_param",
            Self::Assign => "assign",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mult => "mult",
            Self::Div => "div",
            Self::LessThan => "less_than",
            Self::GreaterThan => "greater_than",
            Self::GeThan => "ge_than",
            Self::LeThan => "le_than",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::ArrayIndex => "array_index",
            Self::Vadd => "vadd",
            Self::Vsub => "vsub",
            Self::Vassign => "vassign",
            Self::Vload => "vload",
            Self::Vstore => "vstore",
        };
        f.write_str(name)
    }
}

/// A single three-address-code instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TacInst {
    /// Globally unique instruction id.
    pub id: InstId,
    /// The operation performed.
    pub op: Opcode,
    /// First source operand, or empty.
    pub arg1: String,
    /// Second source operand, or empty.
    pub arg2: String,
    /// Result operand, or empty.
    pub result: String,
    /// The scope active where the instruction was generated.
    pub scope: Scope,
}

impl TacInst {
    /// Does the instruction produce a result?
    pub fn has_result(&self) -> bool {
        !self.result.is_empty()
    }

    /// Is the instruction a binary operation that stores a result?
    ///
    /// Comparisons whose result slot has been cleared by the preprocessor are
    /// no longer considered binary.
    pub fn is_binary_operation(&self) -> bool {
        if self.result.is_empty() {
            return false;
        }
        match self.op {
            Opcode::Assign
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mult
            | Opcode::Div
            | Opcode::LessThan
            | Opcode::GreaterThan
            | Opcode::GeThan
            | Opcode::LeThan
            | Opcode::Equals
            | Opcode::NotEquals
            | Opcode::ArrayIndex => true,
            _ => false,
        }
    }

    /// Is the instruction eligible for liveness bookkeeping?
    ///
    /// Simple instructions have at least one non-empty operand and are
    /// neither labels, control transfers, nor procedure frame markers.
    pub fn is_simple(&self) -> bool {
        if self.result.is_empty() && self.arg1.is_empty() && self.arg2.is_empty() {
            return false;
        }
        match self.op {
            Opcode::Nop | Opcode::Label => false,
            op if op.transfers_control() => false,
            op if op.is_frame_marker() => false,
            _ => true,
        }
    }

    /// The variable this instruction defines, if any.
    ///
    /// `read` defines its operand even though the name sits in the `arg1`
    /// slot.
    pub fn def(&self) -> Option<&str> {
        match self.op {
            Opcode::Read if !self.arg1.is_empty() => Some(&self.arg1),
            _ if self.has_result() && !self.op.is_frame_marker() && self.op != Opcode::Label => {
                Some(&self.result)
            }
            _ => None,
        }
    }

    /// The variable names this instruction reads.
    ///
    /// Label and jump targets are not uses, and neither are the names carried
    /// by frame markers or the variable a `read` defines.
    pub fn uses(&self) -> smallvec::SmallVec<[&str; 2]> {
        let mut out = smallvec::SmallVec::new();
        match self.op {
            Opcode::Nop | Opcode::Label | Opcode::Read => {}
            op if op.transfers_control() => {}
            op if op.is_frame_marker() => {}
            _ => {
                if !self.arg1.is_empty() {
                    out.push(self.arg1.as_str());
                }
                if !self.arg2.is_empty() {
                    out.push(self.arg2.as_str());
                }
            }
        }
        out
    }

    /// Is this a declaration: an `assign` with only the result slot set?
    pub fn is_declaration(&self) -> bool {
        self.op == Opcode::Assign
            && self.has_result()
            && self.arg1.is_empty()
            && self.arg2.is_empty()
    }
}

impl fmt::Display for TacInst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.id.as_u32(), self.op)?;
        if !self.result.is_empty() {
            write!(f, " {}", self.result)?;
        }
        if !self.arg1.is_empty() {
            write!(f, " {}", self.arg1)?;
        }
        if !self.arg2.is_empty() {
            write!(f, " {}", self.arg2)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn inst(op: Opcode, arg1: &str, arg2: &str, result: &str) -> TacInst {
        TacInst {
            id: InstId::new(0),
            op,
            arg1: arg1.to_string(),
            arg2: arg2.to_string(),
            result: result.to_string(),
            scope: Scope::new(0),
        }
    }

    #[test]
    fn name_subspaces() {
        assert!(is_label_name("$LNO0"));
        assert!(is_label_name("$Lfib"));
        assert!(!is_label_name("$t3"));
        assert!(is_temporary("$t3"));
        assert!(!is_temporary("x"));
        assert!(is_user_defined_var("x"));
        assert!(!is_user_defined_var("$t12"));
        assert_eq!(extract_label("$LNO4"), "NO4");
        assert_eq!(extract_label("$Lfib"), "fib");
    }

    #[test]
    fn control_transfer_predicates() {
        assert!(Opcode::Call.transfers_control());
        assert!(Opcode::JmpZero.transfers_control());
        assert!(!Opcode::Call.is_conditional_jump());
        assert!(Opcode::JmpGe.is_conditional_jump());
        assert!(!Opcode::Assign.transfers_control());
        assert!(Opcode::Equals.is_comparison());
        assert!(!Opcode::Assign.is_comparison());
        assert!(Opcode::Vadd.is_vector());
        assert!(!Opcode::Add.is_vector());
        assert!(Opcode::ProcParam.is_frame_marker());
    }

    #[test]
    fn simple_instructions() {
        assert!(inst(Opcode::Add, "x", "1", "$t0").is_simple());
        assert!(inst(Opcode::Write, "x", "", "").is_simple());
        assert!(!inst(Opcode::Label, "$LNO0", "", "").is_simple());
        assert!(!inst(Opcode::UncondJmp, "$LNO0", "", "").is_simple());
        assert!(!inst(Opcode::EnterProc, "p", "", "").is_simple());
        assert!(!inst(Opcode::Nop, "", "", "").is_simple());
    }

    #[test]
    fn defs() {
        assert_eq!(inst(Opcode::Add, "x", "1", "$t0").def(), Some("$t0"));
        assert_eq!(inst(Opcode::Read, "x", "", "").def(), Some("x"));
        assert_eq!(inst(Opcode::Write, "x", "", "").def(), None);
        assert_eq!(inst(Opcode::Assign, "", "", "x").def(), Some("x"));
    }

    #[test]
    fn declarations() {
        assert!(inst(Opcode::Assign, "", "", "x").is_declaration());
        assert!(!inst(Opcode::Assign, "$t0", "", "x").is_declaration());
    }

    #[test]
    fn display() {
        let i = inst(Opcode::Add, "x", "1", "$t0");
        assert_eq!(i.to_string(), "0: add $t0 x 1");
        let j = inst(Opcode::UncondJmp, "$LNO0", "", "");
        assert_eq!(j.to_string(), "0: jmp $LNO0");
    }
}
