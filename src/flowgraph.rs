//! Per-procedure control-flow graphs.
//!
//! One graph is built for the program entry and one for each procedure. A
//! graph is the set of blocks reachable from its entry block; the blocker
//! never links entry code and procedure bodies, so the sets are disjoint.

use crate::blocks::Blocks;
use crate::fx::FxHashSet;
use crate::ir::Block;
use core::fmt::Write;

/// The control-flow graph of one procedure (or of the entry code).
pub struct Cfg {
    /// A name identifying the graph when printing.
    pub name: String,
    /// The entry block.
    pub entry: Block,
    members: FxHashSet<Block>,
    postorder: Vec<Block>,
}

impl Cfg {
    /// Compute the graph reachable from `entry`.
    pub fn compute(name: &str, entry: Block, blocks: &Blocks) -> Self {
        let mut cfg = Self {
            name: name.to_string(),
            entry,
            members: FxHashSet::default(),
            postorder: Vec::new(),
        };
        let mut visited = FxHashSet::default();
        cfg.postorder_visit(entry, blocks, &mut visited);
        cfg.members = visited;
        cfg
    }

    fn postorder_visit(&mut self, b: Block, blocks: &Blocks, visited: &mut FxHashSet<Block>) {
        if !visited.insert(b) {
            return;
        }
        let succs: Vec<Block> = blocks[b].succs.to_vec();
        for s in succs {
            self.postorder_visit(s, blocks, visited);
        }
        self.postorder.push(b);
    }

    /// The blocks of this graph in post order; the entry block is last.
    pub fn postorder(&self) -> &[Block] {
        &self.postorder
    }

    /// Does this graph contain `b`?
    pub fn contains(&self, b: Block) -> bool {
        self.members.contains(&b)
    }

    /// Number of blocks in the graph.
    pub fn num_blocks(&self) -> usize {
        self.postorder.len()
    }

    /// Render the graph in Graphviz dot format.
    pub fn to_graphviz(&self, blocks: &Blocks) -> String {
        let mut out = String::new();
        writeln!(out, "digraph \"{}\" {{", self.name).unwrap();
        for &b in self.postorder.iter().rev() {
            let data = &blocks[b];
            for &s in &data.succs {
                writeln!(
                    out,
                    "    \"{}.{}\" -> \"{}.{}\"",
                    data.major, data.minor, blocks[s].major, blocks[s].minor
                )
                .unwrap();
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Build the entry graph and one graph per procedure.
pub fn build_cfgs(blocks: &Blocks) -> Vec<Cfg> {
    let mut cfgs = Vec::new();
    let Some(entry) = blocks.entry() else {
        return cfgs;
    };
    cfgs.push(Cfg::compute("entry", entry, blocks));
    for &b in blocks.order().iter().skip(1) {
        if blocks[b].has_enter_procedure() {
            let name = blocks[b]
                .insts
                .iter()
                .find(|i| i.op == crate::ir::Opcode::EnterProc)
                .map(|i| i.arg1.clone())
                .unwrap();
            cfgs.push(Cfg::compute(&name, b, blocks));
        }
    }
    cfgs
}
