//! Reaching-definition analysis.
//!
//! An iterative worklist over one control-flow graph. A block's `gen` set is
//! its defining instructions; its `kill` set is every other definition of the
//! same variables anywhere in the program. At the fixed point, `out[b]` holds
//! the definitions whose values reach past `b`'s exit.

use crate::blocks::Blocks;
use crate::flowgraph::Cfg;
use crate::fx::FxHashSet;
use crate::ir::{Block, InstId};
use cranelift_entity::SecondaryMap;

/// Results of the reaching-definition analysis on one graph.
pub struct ReachingDefs {
    ins: SecondaryMap<Block, FxHashSet<InstId>>,
    outs: SecondaryMap<Block, FxHashSet<InstId>>,
    valid: bool,
}

impl ReachingDefs {
    /// Allocate a blank result. Use `compute` to fill it in.
    pub fn new() -> Self {
        Self {
            ins: SecondaryMap::new(),
            outs: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and run the analysis for `cfg`.
    pub fn with_cfg(cfg: &Cfg, blocks: &Blocks) -> Self {
        let mut reach = Self::new();
        reach.compute(cfg, blocks);
        reach
    }

    /// Run the worklist to a fixed point.
    pub fn compute(&mut self, cfg: &Cfg, blocks: &Blocks) {
        self.clear();

        let mut changed: Vec<Block> = cfg.postorder().to_vec();
        let mut on_list: FxHashSet<Block> = changed.iter().copied().collect();

        while let Some(n) = changed.pop() {
            on_list.remove(&n);

            let mut input = FxHashSet::default();
            for &p in &blocks[n].preds {
                if cfg.contains(p) {
                    input.extend(self.outs[p].iter().copied());
                }
            }

            let kill = blocks.kill_set(n);
            let mut new_out: FxHashSet<InstId> =
                input.difference(&kill).copied().collect();
            new_out.extend(blocks.gen_set(n));

            self.ins[n] = input;
            if new_out != self.outs[n] {
                self.outs[n] = new_out;
                for &s in &blocks[n].succs {
                    if cfg.contains(s) && on_list.insert(s) {
                        changed.push(s);
                    }
                }
            }
        }

        self.valid = true;
    }

    /// Clear the results, leaving `is_valid()` false.
    pub fn clear(&mut self) {
        self.ins.clear();
        self.outs.clear();
        self.valid = false;
    }

    /// Has `compute()` been called since the last `clear()`?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The definitions flowing into `b`.
    pub fn defs_into(&self, b: Block) -> &FxHashSet<InstId> {
        debug_assert!(self.valid);
        &self.ins[b]
    }

    /// The definitions flowing out of `b`.
    pub fn defs_out_of(&self, b: Block) -> &FxHashSet<InstId> {
        debug_assert!(self.valid);
        &self.outs[b]
    }

    /// The variable names whose definitions flow into `b`.
    pub fn vars_into<'a>(&self, b: Block, blocks: &'a Blocks) -> FxHashSet<&'a str> {
        self.defs_into(b)
            .iter()
            .filter_map(|&id| blocks.def_name(id))
            .collect()
    }
}

impl Default for ReachingDefs {
    fn default() -> Self {
        Self::new()
    }
}
