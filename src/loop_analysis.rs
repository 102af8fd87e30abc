//! Natural-loop recognition and classification.
//!
//! A natural loop is derived from a back edge: a CFG edge whose target
//! dominates its source. The target is the loop header, the source the loop
//! footer, and the body is the smallest block set containing both and closed
//! under "reach the footer without passing through the header". On top of
//! the bare loops this module classifies loop-invariant names, induction
//! variables, and the loop iterator, which the vectorizer consumes.

use crate::blocks::Blocks;
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::Cfg;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Opcode};
use crate::reach::ReachingDefs;
use crate::symtab::SymbolTables;
use log::debug;

/// An induction variable.
///
/// Simple induction variables have the form `X := X + C` with `C` a
/// compile-time constant; the rest are linear in a simple one (`W := A * X`
/// or `W := X + B`) and link back to it through `previous`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InductionVar {
    /// Is this the `X := X + C` form?
    pub is_simple: bool,
    /// The variable being stepped.
    pub var: String,
    /// The constant name: the step of a simple variable, the coefficient or
    /// offset of a compound one.
    pub constant: String,
    /// For compound variables, the simple induction variable they are linear
    /// in.
    pub previous: Option<String>,
}

/// One natural loop plus its derived classifications.
pub struct NaturalLoop {
    /// The back edge's target; dominates every block of the loop.
    pub header: Block,
    /// The back edge's source.
    pub footer: Block,
    /// All blocks of the loop, header and footer included.
    pub body: Vec<Block>,
    /// Names whose value cannot change during an iteration.
    pub invariants: FxHashSet<String>,
    /// The `X := X + C` induction variables, keyed by name.
    pub simple_induction_vars: FxHashMap<String, InductionVar>,
    /// Every induction variable, simple and compound, keyed by name.
    pub induction_vars: FxHashMap<String, InductionVar>,
}

impl NaturalLoop {
    fn from_back_edge(header: Block, footer: Block, blocks: &Blocks) -> Self {
        let mut body_set = FxHashSet::default();
        body_set.insert(header);
        body_set.insert(footer);
        let mut stack = vec![footer];
        while let Some(b) = stack.pop() {
            if b == header {
                continue;
            }
            for &p in &blocks[b].preds {
                if body_set.insert(p) {
                    stack.push(p);
                }
            }
        }
        let mut body: Vec<Block> = body_set.into_iter().collect();
        body.sort_by_key(|&b| (blocks[b].major, blocks[b].minor));

        Self {
            header,
            footer,
            body,
            invariants: FxHashSet::default(),
            simple_induction_vars: FxHashMap::default(),
            induction_vars: FxHashMap::default(),
        }
    }

    /// Is `b` part of this loop?
    pub fn contains(&self, b: Block) -> bool {
        self.body.contains(&b)
    }

    /// Is `var` defined by some instruction inside the loop?
    pub fn is_defined_in_loop(&self, blocks: &Blocks, var: &str) -> bool {
        blocks
            .defs_of(var)
            .iter()
            .any(|&id| matches!(blocks.inst_block(id), Some(b) if self.contains(b)))
    }

    /// Is `name` invariant across an iteration? Compile-time constants
    /// always are.
    pub fn is_invariant(&self, name: &str, scope: crate::ir::Scope, tables: &SymbolTables) -> bool {
        tables.is_constant(scope, name) || self.invariants.contains(name)
    }

    /// Is `name` a known induction variable of this loop?
    pub fn is_induction_variable(&self, name: &str) -> bool {
        self.induction_vars.contains_key(name)
    }

    /// Is `name` a simple induction variable of this loop?
    pub fn is_simple_induction_variable(&self, name: &str) -> bool {
        self.simple_induction_vars.contains_key(name)
    }

    /// A loop is simple when header and footer are mutual predecessor and
    /// successor, or, for an outer loop of a nest, when the header's
    /// successor is an inner loop's header. Simple loops have no
    /// intervening conditionals or calls.
    pub fn is_simple(&self, blocks: &Blocks, inner_headers: &FxHashSet<Block>) -> bool {
        let footer = &blocks[self.footer];
        if footer.succs.contains(&self.header) && footer.preds.contains(&self.header) {
            return true;
        }
        blocks[self.header]
            .succs
            .iter()
            .any(|s| inner_headers.contains(s))
    }

    /// The block the loop exits to: the header's successor outside the body.
    pub fn exit(&self, blocks: &Blocks) -> Option<Block> {
        blocks[self.header]
            .succs
            .iter()
            .copied()
            .find(|&s| !self.contains(s))
    }

    /// The loop iterator: the unique simple induction variable stepped by
    /// the literal `1` and used in the header's conditional. Returns `None`
    /// when there is no candidate or more than one.
    pub fn identify_iterator(&self, blocks: &Blocks) -> Option<&InductionVar> {
        let cmp = blocks[self.header].comparison()?;
        let mut found: Option<&InductionVar> = None;
        for iv in self.simple_induction_vars.values() {
            if iv.constant == "1" && (cmp.arg1 == iv.var || cmp.arg2 == iv.var) {
                if found.is_some() {
                    debug!("loop {} has more than one iterator candidate", self);
                    return None;
                }
                found = Some(iv);
            }
        }
        if found.is_none() {
            debug!("no iterator found for loop {}", self);
        }
        found
    }

    /// Classify the loop-invariant names.
    ///
    /// A definition is invariant when each of its operands is a constant,
    /// defined outside the loop, or defined by an already-known invariant
    /// inside it. Runs to a fixed point.
    pub fn find_invariants(
        &mut self,
        blocks: &Blocks,
        reach: &ReachingDefs,
        tables: &SymbolTables,
    ) {
        let into_header: FxHashSet<String> = reach
            .vars_into(self.header, blocks)
            .into_iter()
            .map(str::to_string)
            .collect();

        // Names used in the loop but defined only outside it are invariant
        // by rule; the fixed point below grows the set with loop-local
        // definitions built from invariant operands.
        let mut invariants = FxHashSet::default();
        for &b in &self.body {
            for inst in &blocks[b].insts {
                for u in inst.uses() {
                    if !self.is_defined_in_loop(blocks, u) && into_header.contains(u) {
                        invariants.insert(u.to_string());
                    }
                }
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &self.body {
                for inst in &blocks[b].insts {
                    let Some(def) = inst.def() else { continue };
                    if invariants.contains(def) {
                        continue;
                    }
                    let all_invariant = inst.uses().iter().all(|&u| {
                        tables.is_constant(inst.scope, u) || invariants.contains(u)
                    });
                    if all_invariant {
                        invariants.insert(def.to_string());
                        changed = true;
                    }
                }
            }
        }
        self.invariants = invariants;
    }

    /// Classify induction variables: first the simple `X := X ± C` forms,
    /// then the variables defined once as a linear function of one.
    pub fn find_induction_variables(&mut self, blocks: &Blocks, tables: &SymbolTables) {
        self.simple_induction_vars.clear();
        self.induction_vars.clear();

        for &b in &self.body {
            for inst in &blocks[b].insts {
                if (inst.op == Opcode::Add || inst.op == Opcode::Sub)
                    && !inst.result.is_empty()
                    && inst.result == inst.arg1
                    && tables.is_constant(inst.scope, &inst.arg2)
                {
                    let iv = InductionVar {
                        is_simple: true,
                        var: inst.result.clone(),
                        constant: inst.arg2.clone(),
                        previous: None,
                    };
                    self.simple_induction_vars.insert(iv.var.clone(), iv.clone());
                    self.induction_vars.insert(iv.var.clone(), iv);
                }
            }
        }

        for &b in &self.body {
            for inst in &blocks[b].insts {
                if !(inst.op == Opcode::Add || inst.op == Opcode::Mult) {
                    continue;
                }
                let Some(def) = inst.def() else { continue };
                if self.induction_vars.contains_key(def) {
                    continue;
                }
                // Compound variables must be defined exactly once in the
                // loop.
                let defs_in_loop = blocks
                    .defs_of(def)
                    .iter()
                    .filter(|&&id| {
                        matches!(blocks.inst_block(id), Some(bb) if self.contains(bb))
                    })
                    .count();
                if defs_in_loop != 1 {
                    continue;
                }
                let linear = |x: &str, c: &str| {
                    self.simple_induction_vars.contains_key(x)
                        && (tables.is_constant(inst.scope, c) || self.invariants.contains(c))
                };
                let (x, c) = if linear(&inst.arg1, &inst.arg2) {
                    (&inst.arg1, &inst.arg2)
                } else if linear(&inst.arg2, &inst.arg1) {
                    (&inst.arg2, &inst.arg1)
                } else {
                    continue;
                };
                self.induction_vars.insert(
                    def.to_string(),
                    InductionVar {
                        is_simple: false,
                        var: def.to_string(),
                        constant: c.clone(),
                        previous: Some(x.clone()),
                    },
                );
            }
        }
    }
}

impl core::fmt::Display for NaturalLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "({}, {})", self.header.as_u32(), self.footer.as_u32())
    }
}

/// A group of loops sharing one outermost loop.
pub struct LoopNest {
    /// Indices into [`LoopAnalysis::loops`], outermost first.
    pub loops: Vec<usize>,
}

/// All natural loops of one control-flow graph.
pub struct LoopAnalysis {
    /// The discovered loops, classified.
    pub loops: Vec<NaturalLoop>,
    valid: bool,
}

impl LoopAnalysis {
    /// Allocate a blank analysis. Use `compute` to fill it in.
    pub fn new() -> Self {
        Self {
            loops: Vec::new(),
            valid: false,
        }
    }

    /// Find and classify every natural loop of `cfg`.
    pub fn compute(
        &mut self,
        cfg: &Cfg,
        blocks: &Blocks,
        domtree: &DominatorTree,
        reach: &ReachingDefs,
        tables: &SymbolTables,
    ) {
        self.loops.clear();

        for &b in cfg.postorder() {
            for &s in blocks[b].succs.iter() {
                if cfg.contains(s) && domtree.dominates(s, b) {
                    let mut natural = NaturalLoop::from_back_edge(s, b, blocks);
                    natural.find_invariants(blocks, reach, tables);
                    natural.find_induction_variables(blocks, tables);
                    debug!(
                        "natural loop {} with {} invariants, {} induction variables",
                        natural,
                        natural.invariants.len(),
                        natural.induction_vars.len()
                    );
                    self.loops.push(natural);
                }
            }
        }

        self.valid = true;
    }

    /// Has `compute()` been called since the last `clear()`?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Clear the analysis, leaving `is_valid()` false.
    pub fn clear(&mut self) {
        self.loops.clear();
        self.valid = false;
    }

    /// The headers of loops properly contained in `outer`.
    pub fn inner_headers(&self, outer: usize) -> FxHashSet<Block> {
        let outer_loop = &self.loops[outer];
        self.loops
            .iter()
            .enumerate()
            .filter(|&(i, l)| {
                i != outer
                    && l.body.len() < outer_loop.body.len()
                    && l.body.iter().all(|b| outer_loop.contains(*b))
            })
            .map(|(_, l)| l.header)
            .collect()
    }

    /// Group the loops into nests, one per outermost loop.
    pub fn nests(&self) -> Vec<LoopNest> {
        let contained_in = |inner: &NaturalLoop, outer: &NaturalLoop| {
            inner.body.len() < outer.body.len() && inner.body.iter().all(|b| outer.contains(*b))
        };
        let mut nests = Vec::new();
        for (i, candidate) in self.loops.iter().enumerate() {
            let is_outermost = !self
                .loops
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && contained_in(candidate, other));
            if is_outermost {
                let mut members = vec![i];
                for (j, other) in self.loops.iter().enumerate() {
                    if j != i && contained_in(other, candidate) {
                        members.push(j);
                    }
                }
                nests.push(LoopNest { loops: members });
            }
        }
        nests
    }

    /// A nest is vectorizable only when every loop in it is simple.
    pub fn can_vectorize(&self, nest: &LoopNest, blocks: &Blocks) -> bool {
        nest.loops.iter().all(|&i| {
            let inner = self.inner_headers(i);
            self.loops[i].is_simple(blocks, &inner)
        })
    }
}

impl Default for LoopAnalysis {
    fn default() -> Self {
        Self::new()
    }
}
