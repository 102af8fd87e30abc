//! Basic-block formation.
//!
//! The flat three-address-code stream is partitioned into basic blocks by the
//! standard leader rules, and the blocks are linked with predecessor and
//! successor edges. Blocks live in an arena indexed by [`Block`]; edges are
//! lists of block ids, so the cyclic graph has no owning cycles and dropping
//! the arena drops everything.
//!
//! Each block carries a `(major, minor)` id pair. Majors follow the textual
//! order of formation; minors are zero except on blocks cloned during loop
//! duplication, where they slot the clone into the total order between its
//! source loop and the loop exit. Emission walks blocks in `(major, minor)`
//! order.

use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, InstId, Opcode, TacInst};
use core::ops::{Index, IndexMut};
use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

/// How control leaves a basic block. Computed from the block's contents;
/// no other block state exists.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SuccessorKind {
    /// Falls through to the next block.
    Straight,
    /// Ends in an unconditional jump; one outgoing edge to the target.
    JumpOnly,
    /// Ends in a conditional jump; edges to the target and the next block.
    Branch,
    /// Opens a procedure; never linked to the preceding block.
    ProcEnter,
    /// Closes a procedure; never linked to the following block.
    ProcExit,
}

/// A unit of code executed without interruption.
pub struct BlockData {
    /// Textual-order id.
    pub major: u32,
    /// Clone disambiguator; zero for blocks formed from the TAC stream.
    pub minor: u32,
    /// The instructions of the block, in program order.
    pub insts: Vec<TacInst>,
    /// Blocks that can transfer control here.
    pub preds: SmallVec<[Block; 2]>,
    /// Blocks control can leave to.
    pub succs: SmallVec<[Block; 2]>,
}

impl BlockData {
    fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            insts: Vec::new(),
            preds: SmallVec::new(),
            succs: SmallVec::new(),
        }
    }

    /// Does the block contain a procedure call or return?
    pub fn has_procedure_call(&self) -> bool {
        self.insts
            .iter()
            .any(|i| i.op == Opcode::Call || i.op == Opcode::Retval)
    }

    /// Does the block open a procedure?
    pub fn has_enter_procedure(&self) -> bool {
        self.insts.iter().any(|i| i.op == Opcode::EnterProc)
    }

    /// Does the block close a procedure?
    pub fn has_exit_procedure(&self) -> bool {
        self.insts.iter().any(|i| i.op == Opcode::ExitProc)
    }

    /// Does the block end in an unconditional jump?
    pub fn ends_with_unconditional_jump(&self) -> bool {
        matches!(self.insts.last(), Some(i) if i.op == Opcode::UncondJmp)
    }

    /// Does control change at the last instruction?
    pub fn changes_control_at_end(&self) -> bool {
        matches!(self.insts.last(), Some(i) if i.op.transfers_control())
    }

    /// The label this block starts with, if any.
    pub fn first_label(&self) -> Option<&str> {
        match self.insts.first() {
            Some(i) if i.op == Opcode::Label => Some(&i.arg1),
            _ => None,
        }
    }

    /// Classify how control leaves this block.
    pub fn successor_kind(&self) -> SuccessorKind {
        if self.has_enter_procedure() {
            SuccessorKind::ProcEnter
        } else if self.has_exit_procedure() {
            SuccessorKind::ProcExit
        } else if self.ends_with_unconditional_jump() {
            SuccessorKind::JumpOnly
        } else if matches!(self.insts.last(), Some(i) if i.op.is_conditional_jump()) {
            SuccessorKind::Branch
        } else {
            SuccessorKind::Straight
        }
    }

    /// The comparison instruction of the block, if it has one.
    pub fn comparison(&self) -> Option<&TacInst> {
        self.insts.iter().find(|i| i.op.is_comparison())
    }

    /// Is `variable` never defined in this block?
    pub fn is_never_defined(&self, variable: &str) -> bool {
        !self.insts.iter().any(|i| i.def() == Some(variable))
    }
}

/// The block arena for one compilation, with its total order and the
/// program-wide definition index used by reaching analysis.
pub struct Blocks {
    blocks: PrimaryMap<Block, BlockData>,
    /// All blocks sorted by `(major, minor)`.
    order: Vec<Block>,
    /// Label name to the block containing its definition.
    label_map: FxHashMap<String, Block>,
    /// Every instruction across the program that defines each variable.
    defs: FxHashMap<String, Vec<InstId>>,
    /// Inverse of `defs`: the variable each defining instruction defines.
    def_names: FxHashMap<InstId, String>,
    /// The block owning each instruction.
    inst_block: FxHashMap<InstId, Block>,
    next_major: u32,
    next_minor: u32,
}

impl Blocks {
    /// Partition `insts` into basic blocks and link their edges.
    ///
    /// Leaders are the first instruction, every label (targets of control
    /// transfers are labels), every procedure boundary marker, and every
    /// instruction immediately after a control transfer or `exit_proc`.
    pub fn from_tac(insts: Vec<TacInst>) -> Self {
        let mut this = Self {
            blocks: PrimaryMap::new(),
            order: Vec::new(),
            label_map: FxHashMap::default(),
            defs: FxHashMap::default(),
            def_names: FxHashMap::default(),
            inst_block: FxHashMap::default(),
            next_major: 0,
            next_minor: 1,
        };

        if !insts.is_empty() {
            let mut current = BlockData::new(this.next_major, 0);
            this.next_major += 1;
            let mut follows_jump = false;
            for inst in insts {
                let is_leader = follows_jump
                    || inst.op == Opcode::Label
                    || inst.op == Opcode::EnterProc
                    || inst.op == Opcode::ExitProc;
                if is_leader && !current.insts.is_empty() {
                    let b = this.blocks.push(current);
                    this.order.push(b);
                    current = BlockData::new(this.next_major, 0);
                    this.next_major += 1;
                }
                follows_jump = inst.op.transfers_control() || inst.op == Opcode::ExitProc;
                current.insts.push(inst);
            }
            let b = this.blocks.push(current);
            this.order.push(b);
        }

        this.recompute_edges();
        this.recompute_defs();
        this
    }

    /// All blocks in `(major, minor)` order.
    pub fn order(&self) -> &[Block] {
        &self.order
    }

    /// The entry block, when the program is not empty.
    pub fn entry(&self) -> Option<Block> {
        self.order.first().copied()
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Is the block set empty?
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The block defining `label`.
    pub fn label_block(&self, label: &str) -> Option<Block> {
        self.label_map.get(label).copied()
    }

    /// The block owning the instruction `id`.
    pub fn inst_block(&self, id: InstId) -> Option<Block> {
        self.inst_block.get(&id).copied()
    }

    /// Allocate an empty block for a loop clone.
    ///
    /// The clone takes the major id of the block it textually follows and a
    /// fresh minor id, which places it after that block and before the next
    /// major in the total order.
    pub fn new_clone_block(&mut self, major: u32) -> Block {
        let minor = self.next_minor;
        self.next_minor += 1;
        let b = self.blocks.push(BlockData::new(major, minor));
        self.order.push(b);
        b
    }

    /// Restore the `(major, minor)` sort after blocks were added.
    pub fn resort_order(&mut self) {
        let blocks = &self.blocks;
        self.order
            .sort_by_key(|&b| (blocks[b].major, blocks[b].minor));
    }

    /// Recompute every predecessor/successor edge and the label map from the
    /// current block contents.
    ///
    /// Fall-through edges link consecutive blocks unless the earlier block
    /// ends in an unconditional jump, or the boundary enters or leaves a
    /// procedure; entering a procedure saves the previous-block context and
    /// leaving restores it, so entry code and procedure bodies stay in
    /// disjoint graphs. Every control transfer except `call` contributes an
    /// edge to its target's block.
    pub fn recompute_edges(&mut self) {
        self.resort_order();

        for (_, data) in self.blocks.iter_mut() {
            data.preds.clear();
            data.succs.clear();
        }

        self.label_map.clear();
        for &b in &self.order {
            for inst in &self.blocks[b].insts {
                if inst.op == Opcode::Label {
                    self.label_map.insert(inst.arg1.clone(), b);
                }
            }
        }

        let order = self.order.clone();
        let mut saved_prev: Option<Block> = None;
        let mut prev: Option<Block> = order.first().copied();
        for &cur in order.iter().skip(1) {
            match self.blocks[cur].successor_kind() {
                SuccessorKind::ProcEnter => {
                    saved_prev = prev;
                    prev = Some(cur);
                }
                SuccessorKind::ProcExit => {
                    if let Some(p) = prev {
                        if self.blocks[p].successor_kind() != SuccessorKind::JumpOnly {
                            self.link(p, cur);
                        }
                    }
                    prev = saved_prev.take();
                }
                SuccessorKind::Straight | SuccessorKind::Branch | SuccessorKind::JumpOnly => {
                    if let Some(p) = prev {
                        if self.blocks[p].successor_kind() != SuccessorKind::JumpOnly {
                            self.link(p, cur);
                        }
                    }
                    prev = Some(cur);
                }
            }
        }

        for &cur in &order {
            let targets: Vec<Block> = self.blocks[cur]
                .insts
                .iter()
                .filter(|i| i.op.transfers_control() && i.op != Opcode::Call)
                .map(|i| {
                    *self
                        .label_map
                        .get(&i.arg1)
                        .unwrap_or_else(|| panic!("jump to unknown label {}", i.arg1))
                })
                .collect();
            for target in targets {
                self.link(cur, target);
            }
        }
    }

    fn link(&mut self, from: Block, to: Block) {
        if !self.blocks[from].succs.contains(&to) {
            self.blocks[from].succs.push(to);
        }
        if !self.blocks[to].preds.contains(&from) {
            self.blocks[to].preds.push(from);
        }
    }

    /// Rebuild the program-wide definition index.
    pub fn recompute_defs(&mut self) {
        self.defs.clear();
        self.def_names.clear();
        self.inst_block.clear();
        for &b in &self.order {
            for inst in &self.blocks[b].insts {
                self.inst_block.insert(inst.id, b);
                if let Some(var) = inst.def() {
                    self.defs.entry(var.to_string()).or_default().push(inst.id);
                    self.def_names.insert(inst.id, var.to_string());
                }
            }
        }
    }

    /// Every instruction in the program that defines `var`.
    pub fn defs_of(&self, var: &str) -> &[InstId] {
        self.defs.get(var).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The variable defined by the instruction `id`, if it defines one.
    pub fn def_name(&self, id: InstId) -> Option<&str> {
        self.def_names.get(&id).map(|s| s.as_str())
    }

    /// The `gen` set of `b`: its instructions that define a variable.
    pub fn gen_set(&self, b: Block) -> FxHashSet<InstId> {
        self.blocks[b]
            .insts
            .iter()
            .filter(|i| i.def().is_some())
            .map(|i| i.id)
            .collect()
    }

    /// The `kill` set of `b`: every instruction elsewhere in the program
    /// that defines a variable also defined in `b`.
    pub fn kill_set(&self, b: Block) -> FxHashSet<InstId> {
        let own: FxHashSet<InstId> = self.gen_set(b);
        let mut kill = FxHashSet::default();
        for inst in &self.blocks[b].insts {
            if let Some(var) = inst.def() {
                for &id in self.defs_of(var) {
                    if !own.contains(&id) {
                        kill.insert(id);
                    }
                }
            }
        }
        kill
    }

    /// Definitions inside `b`, grouped by variable in program order.
    pub fn def_chain(&self, b: Block) -> FxHashMap<&str, Vec<&TacInst>> {
        let mut chain: FxHashMap<&str, Vec<&TacInst>> = FxHashMap::default();
        for inst in &self.blocks[b].insts {
            if let Some(var) = inst.def() {
                chain.entry(var).or_default().push(inst);
            }
        }
        chain
    }

    /// Uses inside `b`, grouped by variable in program order.
    pub fn use_chain(&self, b: Block) -> FxHashMap<&str, Vec<&TacInst>> {
        let mut chain: FxHashMap<&str, Vec<&TacInst>> = FxHashMap::default();
        for inst in &self.blocks[b].insts {
            for var in inst.uses() {
                chain.entry(var).or_default().push(inst);
            }
        }
        chain
    }
}

impl Index<Block> for Blocks {
    type Output = BlockData;

    fn index(&self, b: Block) -> &BlockData {
        &self.blocks[b]
    }
}

impl IndexMut<Block> for Blocks {
    fn index_mut(&mut self, b: Block) -> &mut BlockData {
        &mut self.blocks[b]
    }
}
