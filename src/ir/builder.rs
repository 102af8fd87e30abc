//! Construction of three-address code.
//!
//! The builder owns the counters behind instruction ids, temporaries, and
//! generated labels. Constructing a fresh builder (normally through a fresh
//! `Context`) resets all of them, so independent compilations never share
//! state.

use crate::ir::entities::{InstId, Scope};
use crate::ir::instructions::{Opcode, TacInst, LABEL_PREFIX, TEMP_PREFIX};

/// Allocates instruction ids, temporaries, and labels, and builds quadruples
/// according to each opcode's shape.
pub struct TacBuilder {
    next_id: u32,
    temp_counter: u32,
    label_counter: u32,
}

impl TacBuilder {
    /// Create a builder with all counters at zero.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            temp_counter: 0,
            label_counter: 0,
        }
    }

    /// Allocate a fresh instruction id.
    pub fn new_id(&mut self) -> InstId {
        let id = InstId::from_u32(self.next_id);
        self.next_id += 1;
        id
    }

    /// Give `inst` a fresh id. Used when an instruction is duplicated but the
    /// copy must remain distinct from the original.
    pub fn renumber(&mut self, inst: &mut TacInst) {
        inst.id = self.new_id();
    }

    /// Allocate a fresh temporary name.
    pub fn new_temp(&mut self) -> String {
        let t = format!("{TEMP_PREFIX}{}", self.temp_counter);
        self.temp_counter += 1;
        t
    }

    /// Allocate a fresh generated label, `$LNO<n>`.
    pub fn new_label(&mut self) -> String {
        let l = format!("{LABEL_PREFIX}NO{}", self.label_counter);
        self.label_counter += 1;
        l
    }

    /// Format a custom name as a label, `$L<name>`. Procedure entry labels
    /// are built this way.
    pub fn custom_label(&self, name: &str) -> String {
        format!("{LABEL_PREFIX}{name}")
    }

    /// Construct a quadruple for `op` with up to two operands, within the
    /// scope `scope`.
    ///
    /// The operands land in the slots the opcode's shape dictates: labelled
    /// instructions put their target in `arg1`, `assign` is stored
    /// two-address (`result := arg1`), and the remaining binary operations
    /// bind `result` to a fresh temporary. `call` rewrites the callee name
    /// into its entry label.
    ///
    /// Vector opcodes are never produced by syntax-directed translation, only
    /// by the vectorizer, and are rejected here.
    pub fn make_quad(&mut self, scope: Scope, op: Opcode, a: &str, b: &str) -> TacInst {
        let mut inst = TacInst {
            id: self.new_id(),
            op,
            arg1: String::new(),
            arg2: String::new(),
            result: String::new(),
            scope,
        };

        match op {
            Opcode::Nop => {}
            // Frame markers carry the relevant name in arg1.
            Opcode::EnterProc | Opcode::ExitProc | Opcode::Retval | Opcode::ProcParam => {
                inst.arg1 = a.to_string();
            }
            // In-place negation.
            Opcode::Negate => {
                inst.arg1 = a.to_string();
                inst.result = a.to_string();
            }
            Opcode::Read | Opcode::Write => {
                inst.arg1 = a.to_string();
            }
            // Generate a label when none is provided.
            Opcode::Label => {
                inst.arg1 = if a.is_empty() {
                    self.new_label()
                } else {
                    a.to_string()
                };
            }
            // All procedures are entered through their entry label, so the
            // call site needs the same rewrite.
            Opcode::Call => {
                inst.arg1 = self.custom_label(a);
            }
            Opcode::UncondJmp
            | Opcode::JmpE
            | Opcode::JmpL
            | Opcode::JmpG
            | Opcode::JmpLe
            | Opcode::JmpGe
            | Opcode::JmpNe
            | Opcode::JmpZero => {
                inst.arg1 = a.to_string();
            }
            Opcode::Assign => {
                // a := b
                inst.result = a.to_string();
                inst.arg1 = b.to_string();
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mult
            | Opcode::Div
            | Opcode::LessThan
            | Opcode::GreaterThan
            | Opcode::GeThan
            | Opcode::LeThan
            | Opcode::Equals
            | Opcode::NotEquals
            | Opcode::ArrayIndex => {
                // tn := a op b
                inst.arg1 = a.to_string();
                inst.arg2 = b.to_string();
                inst.result = self.new_temp();
            }
            Opcode::Vadd | Opcode::Vsub | Opcode::Vassign | Opcode::Vload | Opcode::Vstore => {
                panic!("tried to generate a vector operation {op} outside the vectorizer");
            }
        }

        inst
    }
}

impl Default for TacBuilder {
    fn default() -> Self {
        Self::new()
    }
}
