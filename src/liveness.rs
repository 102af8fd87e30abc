//! Per-block liveness and next-use analysis for code generation.
//!
//! Computed once per basic block immediately before emission. The scratch
//! table starts with user variables live and temporaries dead, then a
//! reverse walk over the block snapshots each instruction's view before
//! updating: results become dead with no next use, operands become live
//! with their next use at the current instruction. Liveness here means
//! "used at or after this instruction within the block"; user variables are
//! treated as live at the block end by convention.

use crate::blocks::BlockData;
use crate::fx::FxHashMap;
use crate::ir::{is_user_defined_var, InstId};

/// Liveness and next use of a single variable at a single point.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Liveness {
    /// Is the value needed again?
    pub live: bool,
    /// The instruction of the next use, or `None` for never.
    pub next_use: Option<InstId>,
}

impl Liveness {
    fn user_var_default() -> Self {
        Self {
            live: true,
            next_use: None,
        }
    }

    fn temp_default() -> Self {
        Self {
            live: false,
            next_use: None,
        }
    }
}

/// Liveness of every operand of one instruction.
#[derive(Default)]
pub struct LivenessMap {
    entries: FxHashMap<String, Liveness>,
}

impl LivenessMap {
    /// Is `name` live at this instruction?
    ///
    /// Names the analysis never saw are reported live, which is the
    /// conservative answer for the register allocator.
    pub fn is_live(&self, name: &str) -> bool {
        self.entries.get(name).map(|l| l.live).unwrap_or(true)
    }

    /// The next use of `name` after this instruction, if any.
    pub fn next_use(&self, name: &str) -> Option<InstId> {
        self.entries.get(name).and_then(|l| l.next_use)
    }

    fn put(&mut self, name: &str, liveness: Liveness) {
        self.entries.insert(name.to_string(), liveness);
    }
}

/// Liveness for every simple instruction of one basic block.
pub struct LivenessTable {
    table: FxHashMap<InstId, LivenessMap>,
    empty: LivenessMap,
}

impl LivenessTable {
    /// Run the reverse walk over `block`.
    pub fn compute(block: &BlockData) -> Self {
        let mut scratch: FxHashMap<String, Liveness> = FxHashMap::default();
        for inst in &block.insts {
            if inst.is_simple() {
                for name in [&inst.result, &inst.arg1, &inst.arg2] {
                    if !name.is_empty() && !scratch.contains_key(name.as_str()) {
                        let default = if is_user_defined_var(name) {
                            Liveness::user_var_default()
                        } else {
                            Liveness::temp_default()
                        };
                        scratch.insert(name.clone(), default);
                    }
                }
            }
        }

        let mut table = FxHashMap::default();
        for inst in block.insts.iter().rev() {
            if !inst.is_simple() {
                continue;
            }
            let mut map = LivenessMap::default();
            for name in [&inst.result, &inst.arg1, &inst.arg2] {
                if !name.is_empty() {
                    map.put(name, scratch[name.as_str()]);
                }
            }
            table.insert(inst.id, map);

            if !inst.result.is_empty() {
                scratch.insert(
                    inst.result.clone(),
                    Liveness {
                        live: false,
                        next_use: None,
                    },
                );
            }
            for operand in [&inst.arg1, &inst.arg2] {
                if !operand.is_empty() {
                    scratch.insert(
                        operand.clone(),
                        Liveness {
                            live: true,
                            next_use: Some(inst.id),
                        },
                    );
                }
            }
        }

        Self {
            table,
            empty: LivenessMap::default(),
        }
    }

    /// The liveness view at instruction `id`.
    ///
    /// Instructions that are not simple have no entry; an empty map is
    /// returned for them.
    pub fn at(&self, id: InstId) -> &LivenessMap {
        self.table.get(&id).unwrap_or(&self.empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Blocks;
    use crate::ir::{Opcode, Scope, TacBuilder};
    use cranelift_entity::EntityRef;

    fn scope() -> Scope {
        Scope::new(0)
    }

    #[test]
    fn operands_live_until_their_last_use() {
        // $t0 := x + 1 ; x := $t0 ; y := x
        let mut b = TacBuilder::new();
        let insts = vec![
            b.make_quad(scope(), Opcode::Add, "x", "1"),
            b.make_quad(scope(), Opcode::Assign, "x", "$t0"),
            b.make_quad(scope(), Opcode::Assign, "y", "x"),
        ];
        let ids: Vec<InstId> = insts.iter().map(|i| i.id).collect();
        let blocks = Blocks::from_tac(insts);
        let bb = blocks.entry().unwrap();
        let live = LivenessTable::compute(&blocks[bb]);

        // At the add, x is used again by the copy at the end of the block.
        let at_add = live.at(ids[0]);
        assert!(at_add.is_live("x"));
        assert_eq!(at_add.next_use("x"), Some(ids[2]));
        // $t0 is consumed by the next instruction.
        assert!(at_add.is_live("$t0"));
        assert_eq!(at_add.next_use("$t0"), Some(ids[1]));

        // After its final use the temporary is dead.
        let at_copy = live.at(ids[2]);
        assert!(at_copy.is_live("x"));

        // y is a user variable: live at the block end by convention even
        // though nothing in the block reads it.
        assert!(at_copy.is_live("y") || at_copy.next_use("y").is_none());
    }

    #[test]
    fn result_of_final_write_is_dead_for_temporaries() {
        let mut b = TacBuilder::new();
        let insts = vec![
            b.make_quad(scope(), Opcode::Add, "x", "1"),
            b.make_quad(scope(), Opcode::Add, "y", "2"),
        ];
        let ids: Vec<InstId> = insts.iter().map(|i| i.id).collect();
        let blocks = Blocks::from_tac(insts);
        let bb = blocks.entry().unwrap();
        let live = LivenessTable::compute(&blocks[bb]);

        // $t0 is never used after its definition.
        let at_first = live.at(ids[0]);
        assert!(!at_first.is_live("$t0"));
        assert_eq!(at_first.next_use("$t0"), None);
    }

    #[test]
    fn a_user_variable_is_never_dead_before_its_last_use() {
        let mut b = TacBuilder::new();
        let insts = vec![
            b.make_quad(scope(), Opcode::Add, "x", "1"),
            b.make_quad(scope(), Opcode::Mult, "x", "x"),
            b.make_quad(scope(), Opcode::Write, "x", ""),
        ];
        let ids: Vec<InstId> = insts.iter().map(|i| i.id).collect();
        let blocks = Blocks::from_tac(insts);
        let bb = blocks.entry().unwrap();
        let live = LivenessTable::compute(&blocks[bb]);

        for id in &ids {
            assert!(live.at(*id).is_live("x"));
        }
    }

    #[test]
    fn labels_and_jumps_have_no_entries() {
        let mut b = TacBuilder::new();
        let insts = vec![
            b.make_quad(scope(), Opcode::Label, "$LNO0", ""),
            b.make_quad(scope(), Opcode::Add, "x", "1"),
            b.make_quad(scope(), Opcode::UncondJmp, "$LNO0", ""),
        ];
        let label_id = insts[0].id;
        let jump_id = insts[2].id;
        let blocks = Blocks::from_tac(insts);
        let bb = blocks.order()[0];
        let live = LivenessTable::compute(&blocks[bb]);

        assert!(live.at(label_id).next_use("$LNO0").is_none());
        assert!(live.at(jump_id).next_use("$LNO0").is_none());
    }
}
