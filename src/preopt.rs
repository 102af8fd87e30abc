//! A pre-optimization rewrite pass over the flat three-address-code list.
//!
//! Syntax-directed translation generates redundant expressions; this pass
//! removes the simple redundancies with two-instruction rewrite rules before
//! the code is blocked, in the manner of a machine-independent peephole.

use crate::ir::{is_temporary, Opcode, TacInst};

/// Rewrite `insts` in place.
pub fn preprocess(insts: &mut Vec<TacInst>) {
    apply_redundant_rewrite_rule(insts);
    compact_loop_operations(insts);
}

/// Collapse the pair
///
/// ```text
/// $t := x op y
/// x  := $t
/// ```
///
/// into `x := x op y` (and symmetrically when `x` is the second operand).
/// The rewrite only fires when the intermediate is a compiler temporary and
/// is the source of the following assignment.
fn apply_redundant_rewrite_rule(insts: &mut Vec<TacInst>) {
    let mut i = 1;
    while i < insts.len() {
        let (first, second) = insts.split_at_mut(i);
        let i1 = first.last_mut().unwrap();
        let i2 = &second[0];

        if i1.is_binary_operation()
            && i2.op == Opcode::Assign
            && i2.arg1 == i1.result
            && is_temporary(&i1.result)
            && (i1.arg1 == i2.result || i1.arg2 == i2.result)
        {
            i1.result = i2.result.clone();
            insts.remove(i);
            // Re-examine the new pair at this position.
            continue;
        }
        i += 1;
    }
}

/// The comparator that jumps when the original comparison is *false*.
fn negated_jump(cmp: Opcode) -> Opcode {
    match cmp {
        Opcode::Equals => Opcode::JmpNe,
        Opcode::NotEquals => Opcode::JmpE,
        Opcode::LessThan => Opcode::JmpGe,
        Opcode::GreaterThan => Opcode::JmpLe,
        Opcode::LeThan => Opcode::JmpG,
        Opcode::GeThan => Opcode::JmpL,
        _ => unreachable!("not a comparison: {cmp}"),
    }
}

/// Fold the loop-header pair
///
/// ```text
/// $t := op1 <cmp> op2
/// jmp_zero $t
/// ```
///
/// into a bare comparison followed by a jump on the negated comparator,
/// matching the "jump if false" convention of the syntax-directed emitter.
fn compact_loop_operations(insts: &mut [TacInst]) {
    let mut i = 1;
    while i < insts.len() {
        let fires = {
            let i1 = &insts[i - 1];
            let i2 = &insts[i];
            i1.op.is_comparison()
                && i1.has_result()
                && is_temporary(&i1.result)
                && i2.op == Opcode::JmpZero
        };
        if fires {
            let cmp = insts[i - 1].op;
            insts[i - 1].result.clear();
            insts[i].op = negated_jump(cmp);
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Scope, TacBuilder};
    use cranelift_entity::EntityRef;

    fn scope() -> Scope {
        Scope::new(0)
    }

    #[test]
    fn collapses_temp_then_copy() {
        let mut b = TacBuilder::new();
        let mut insts = vec![
            b.make_quad(scope(), Opcode::Add, "x", "1"),
            b.make_quad(scope(), Opcode::Assign, "x", "$t0"),
        ];
        preprocess(&mut insts);

        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].op, Opcode::Add);
        assert_eq!(insts[0].result, "x");
        assert_eq!(insts[0].arg1, "x");
        assert_eq!(insts[0].arg2, "1");
    }

    #[test]
    fn collapses_when_target_is_second_operand() {
        let mut b = TacBuilder::new();
        let mut insts = vec![
            b.make_quad(scope(), Opcode::Add, "1", "x"),
            b.make_quad(scope(), Opcode::Assign, "x", "$t0"),
        ];
        preprocess(&mut insts);

        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].result, "x");
        assert_eq!(insts[0].arg2, "x");
    }

    #[test]
    fn leaves_unrelated_assignments_alone() {
        let mut b = TacBuilder::new();
        let mut insts = vec![
            b.make_quad(scope(), Opcode::Add, "x", "1"),
            b.make_quad(scope(), Opcode::Assign, "y", "z"),
        ];
        preprocess(&mut insts);
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].result, "$t0");
    }

    #[test]
    fn does_not_collapse_user_defined_intermediates() {
        let mut b = TacBuilder::new();
        let mut add = b.make_quad(scope(), Opcode::Add, "x", "1");
        add.result = "w".to_string();
        let mut insts = vec![add, b.make_quad(scope(), Opcode::Assign, "x", "w")];
        preprocess(&mut insts);
        assert_eq!(insts.len(), 2);
    }

    #[test]
    fn compacts_comparison_and_jump_if_zero() {
        let mut b = TacBuilder::new();
        let mut insts = vec![
            b.make_quad(scope(), Opcode::LessThan, "i", "10"),
            b.make_quad(scope(), Opcode::JmpZero, "$LNO1", ""),
        ];
        preprocess(&mut insts);

        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].op, Opcode::LessThan);
        assert!(insts[0].result.is_empty());
        assert_eq!(insts[1].op, Opcode::JmpGe);
        assert_eq!(insts[1].arg1, "$LNO1");
    }

    #[test]
    fn negation_table_matches_jump_if_false() {
        assert_eq!(negated_jump(Opcode::Equals), Opcode::JmpNe);
        assert_eq!(negated_jump(Opcode::NotEquals), Opcode::JmpE);
        assert_eq!(negated_jump(Opcode::LessThan), Opcode::JmpGe);
        assert_eq!(negated_jump(Opcode::GreaterThan), Opcode::JmpLe);
        assert_eq!(negated_jump(Opcode::LeThan), Opcode::JmpG);
        assert_eq!(negated_jump(Opcode::GeThan), Opcode::JmpL);
    }

    #[test]
    fn whole_loop_header_shape() {
        // label; $t0 := i < 10; jmp_zero exit  ==>  label; i < 10; jmp_ge exit
        let mut b = TacBuilder::new();
        let mut insts = vec![
            b.make_quad(scope(), Opcode::Label, "$LNO0", ""),
            b.make_quad(scope(), Opcode::LessThan, "i", "10"),
            b.make_quad(scope(), Opcode::JmpZero, "$LNO1", ""),
            b.make_quad(scope(), Opcode::UncondJmp, "$LNO0", ""),
        ];
        preprocess(&mut insts);
        let ops: Vec<Opcode> = insts.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::Label,
                Opcode::LessThan,
                Opcode::JmpGe,
                Opcode::UncondJmp
            ]
        );
    }
}
