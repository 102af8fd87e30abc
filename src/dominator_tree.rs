//! A dominator tree represented as mappings of blocks to their immediate
//! dominator, computed with Keith D. Cooper's "Simple, Fast Dominator
//! Algorithm" over the post order of one control-flow graph.

use crate::blocks::Blocks;
use crate::flowgraph::Cfg;
use crate::ir::Block;
use core::cmp::Ordering;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;

/// Dominator tree node. We keep one of these per block.
#[derive(Clone, Default)]
struct DomNode {
    /// Number of this node in a reverse post-order traversal of the CFG,
    /// starting from 2. Blocks outside the graph keep number 0; 1 marks a
    /// member block not yet numbered during the first pass.
    rpo_number: u32,

    /// The immediate dominator of this block.
    ///
    /// This is `None` for the entry block of the graph and for blocks that
    /// are not members of it.
    idom: PackedOption<Block>,
}

/// The dominator tree for a single control-flow graph.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,
    /// The graph's post order, as used for the computation.
    postorder: Vec<Block>,
    valid: bool,
}

impl DominatorTree {
    /// Allocate a blank tree. Use `compute` to fill it in.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a dominator tree for `cfg`.
    pub fn with_cfg(cfg: &Cfg, blocks: &Blocks) -> Self {
        let mut domtree = Self::new();
        domtree.compute(cfg, blocks);
        domtree
    }

    /// Reset and compute the tree for `cfg`.
    pub fn compute(&mut self, cfg: &Cfg, blocks: &Blocks) {
        self.clear();
        self.postorder.extend_from_slice(cfg.postorder());
        for &b in &self.postorder {
            self.nodes[b] = DomNode {
                rpo_number: 1,
                idom: None.into(),
            };
        }
        self.compute_domtree(cfg, blocks);
        self.valid = true;
    }

    /// Clear the tree, leaving `is_valid()` false.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        self.valid = false;
    }

    /// Has `compute()` been called since the last `clear()`?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The immediate dominator of `block`, or `None` for the graph entry.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    /// Compare two blocks relative to the reverse post order.
    pub fn rpo_cmp(&self, a: Block, b: Block) -> Ordering {
        self.nodes[a].rpo_number.cmp(&self.nodes[b].rpo_number)
    }

    /// Returns `true` if `a` dominates `b`: every path from the graph entry
    /// to `b` passes through `a`. A block dominates itself.
    pub fn dominates(&self, a: Block, mut b: Block) -> bool {
        debug_assert!(self.is_valid());
        let rpo_a = self.nodes[a].rpo_number;

        // Run a finger up the dominator tree from b until we see a.
        while rpo_a < self.nodes[b].rpo_number {
            match self.idom(b) {
                Some(idom) => b = idom,
                None => return false,
            }
        }
        a == b
    }

    /// Like `dominates`, but excluding equality.
    pub fn properly_dominates(&self, a: Block, b: Block) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Build the tree from the graph's post order.
    fn compute_domtree(&mut self, cfg: &Cfg, blocks: &Blocks) {
        // We iterate over a reverse post order of the graph, skipping the
        // entry block.
        let (entry, postorder) = match self.postorder.split_last() {
            Some((&entry, rest)) => (entry, rest),
            None => return,
        };
        debug_assert_eq!(entry, cfg.entry);

        // First pass: assign RPO numbers and initial idom estimates. Every
        // node visited has at least one predecessor already numbered.
        self.nodes[entry].rpo_number = 2;
        for (rpo_idx, &block) in postorder.iter().rev().enumerate() {
            self.nodes[block] = DomNode {
                idom: self.compute_idom(block, blocks).into(),
                rpo_number: rpo_idx as u32 + 3,
            };
        }

        // Iterate until convergence. With reducible control flow this exits
        // after one extra pass.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().rev() {
                let idom = self.compute_idom(block, blocks).into();
                if self.nodes[block].idom != idom {
                    self.nodes[block].idom = idom;
                    changed = true;
                }
            }
        }
    }

    /// The immediate dominator of `block` from the current estimates,
    /// considering only predecessors that already have an RPO number.
    fn compute_idom(&self, block: Block, blocks: &Blocks) -> Block {
        let mut numbered_preds = blocks[block]
            .preds
            .iter()
            .copied()
            .filter(|&p| self.nodes[p].rpo_number > 1);

        let mut idom = numbered_preds
            .next()
            .expect("block must have one numbered predecessor");

        for pred in numbered_preds {
            idom = self.common_dominator(idom, pred);
        }

        idom
    }

    /// Compute the common dominator of two blocks, walking the two fingers
    /// toward each other in post-order index until they coincide.
    fn common_dominator(&self, mut a: Block, mut b: Block) -> Block {
        loop {
            match self.rpo_cmp(a, b) {
                Ordering::Less => {
                    // `a` comes before `b` in the RPO. Move `b` up.
                    b = self.nodes[b].idom.expect("unreachable basic block?");
                }
                Ordering::Greater => {
                    a = self.nodes[a].idom.expect("unreachable basic block?");
                }
                Ordering::Equal => break,
            }
        }
        a
    }
}

impl Default for DominatorTree {
    fn default() -> Self {
        Self::new()
    }
}
