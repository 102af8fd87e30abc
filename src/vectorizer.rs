//! Loop vectorization by strip mining.
//!
//! A qualifying loop is duplicated: the original copy is rewritten to step
//! the iterator by the unroll factor and operate on vector registers, and
//! the clone, placed between the loop and its exit, runs the remaining
//! iterations one at a time. A loop qualifies when it is simple, its
//! iterator steps by one, and every array reference touches the current
//! iteration only; a loop is worth transforming when it writes at least one
//! array value that depends on the iterator.
//!
//! Failures here are never fatal: the loop is left alone and compilation
//! continues with the scalar form.

use crate::blocks::Blocks;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Block, Opcode, TacBuilder, TacInst};
use crate::loop_analysis::{InductionVar, NaturalLoop};
use crate::symtab::SymbolTables;
use log::{debug, warn};

/// Direction-vector component: the reference touches an earlier iteration.
pub const DISTANCE_LESS: i32 = -1;
/// Direction-vector component: the reference touches the same iteration.
pub const DISTANCE_EQUAL: i32 = 0;
/// Direction-vector component: the reference touches a later iteration.
pub const DISTANCE_MORE: i32 = 1;

/// Try to vectorize `lp`. On success the block set has been rewritten and
/// the label of the scalar tail loop's header is returned so the driver can
/// exclude the tail from further vectorization attempts.
pub fn vectorize_loop(
    lp: &NaturalLoop,
    inner_headers: &FxHashSet<Block>,
    blocks: &mut Blocks,
    builder: &mut TacBuilder,
    tables: &mut SymbolTables,
    unroll: u32,
) -> Option<String> {
    let Some(iterator) = check_can_vectorize(lp, inner_headers, blocks, tables) else {
        warn!("cannot vectorize loop {lp}");
        return None;
    };

    if !should_vectorize(lp, blocks, &iterator) {
        warn!("declined to vectorize loop {lp}: no array write depends on the iterator");
        return None;
    }

    debug!("vectorizing loop {lp} with unroll factor {unroll}");

    // The clone handles the tail when the trip count is not a multiple of
    // the unroll factor; the original copy becomes the vector loop.
    let tail_header = duplicate_loop_after(lp, blocks, builder);
    strip_mine(lp, &iterator, blocks, builder, tables, unroll);

    blocks.recompute_edges();
    blocks.recompute_defs();
    Some(tail_header)
}

/// The vectorization gate. Returns the loop iterator when every check
/// passes.
fn check_can_vectorize(
    lp: &NaturalLoop,
    inner_headers: &FxHashSet<Block>,
    blocks: &Blocks,
    tables: &SymbolTables,
) -> Option<InductionVar> {
    if !lp.is_simple(blocks, inner_headers) || lp.header == lp.footer {
        warn!("loop {lp} is not a simple two-block loop");
        return None;
    }

    let Some(iterator) = lp.identify_iterator(blocks).cloned() else {
        warn!("failed to determine the iterator of loop {lp}");
        return None;
    };

    // Strip mining relies on a unit step.
    if iterator.constant != "1" {
        warn!("loop {lp} iterator does not step by 1");
        return None;
    }

    let Some(directions) = direction_vectors(lp, blocks, tables, &iterator) else {
        warn!("failed to determine direction vectors of loop {lp}");
        return None;
    };
    if directions.iter().any(|&d| d != DISTANCE_EQUAL) {
        warn!("loop {lp} carries a data dependence between iterations");
        return None;
    }

    Some(iterator)
}

/// Does `variable` depend on the loop iterator, directly or through a chain
/// of definitions inside the loop?
pub fn is_variable_dependent_on_index(
    lp: &NaturalLoop,
    blocks: &Blocks,
    variable: &str,
    index: &InductionVar,
) -> bool {
    fn walk(
        lp: &NaturalLoop,
        blocks: &Blocks,
        variable: &str,
        index: &InductionVar,
        visited: &mut FxHashSet<String>,
    ) -> bool {
        if variable.is_empty() {
            return false;
        }
        if variable == index.var {
            return true;
        }
        if !visited.insert(variable.to_string()) {
            return false;
        }
        for &b in &lp.body {
            if let Some(defs) = blocks.def_chain(b).get(variable) {
                for inst in defs {
                    if inst.result == index.var {
                        return true;
                    }
                    if walk(lp, blocks, &inst.arg1, index, visited)
                        || walk(lp, blocks, &inst.arg2, index, visited)
                    {
                        return true;
                    }
                }
            }
        }
        false
    }
    let mut visited = FxHashSet::default();
    walk(lp, blocks, variable, index, &mut visited)
}

/// Does either operand of `inst` depend on the loop iterator?
pub fn is_instruction_dependent_on_index(
    lp: &NaturalLoop,
    blocks: &Blocks,
    inst: &TacInst,
    index: &InductionVar,
) -> bool {
    is_variable_dependent_on_index(lp, blocks, &inst.arg1, index)
        || is_variable_dependent_on_index(lp, blocks, &inst.arg2, index)
}

/// Compute one direction-vector component per iterator-dependent array
/// reference in the loop body. `None` when any reference fails to reduce.
fn direction_vectors(
    lp: &NaturalLoop,
    blocks: &Blocks,
    tables: &SymbolTables,
    index: &InductionVar,
) -> Option<Vec<i32>> {
    let mut out = Vec::new();
    for inst in &blocks[lp.footer].insts {
        if inst.op == Opcode::ArrayIndex {
            let (contained_iterator, distance) =
                distance_from_variable(&inst.arg2, lp, blocks, tables, index, 0)?;
            if contained_iterator {
                out.push(distance.signum() as i32);
            }
        }
    }
    Some(out)
}

/// Reduce an index expression to `iterator + constant`, following the
/// definition chain inside the loop body. Returns whether the iterator
/// appeared and the accumulated constant. `None` when the expression
/// depends on something with an unknown value.
fn distance_from_variable(
    variable: &str,
    lp: &NaturalLoop,
    blocks: &Blocks,
    tables: &SymbolTables,
    index: &InductionVar,
    depth: u32,
) -> Option<(bool, i64)> {
    if depth > 16 {
        return None;
    }
    if variable == index.var {
        return Some((true, 0));
    }

    let scope = blocks[lp.footer].insts.first()?.scope;
    if let Some(value) = tables.int_value(scope, variable) {
        return Some((false, value));
    }

    // A single in-loop definition of a supported shape can be followed.
    let chain = blocks.def_chain(lp.footer);
    let defs = chain.get(variable)?;
    if defs.len() != 1 {
        return None;
    }
    let def = defs[0];
    match def.op {
        Opcode::Add | Opcode::Sub => {
            let (c1, d1) = distance_from_variable(&def.arg1, lp, blocks, tables, index, depth + 1)?;
            let (c2, d2) = distance_from_variable(&def.arg2, lp, blocks, tables, index, depth + 1)?;
            let distance = if def.op == Opcode::Add { d1 + d2 } else { d1 - d2 };
            Some((c1 || c2, distance))
        }
        _ => None,
    }
}

/// Is there an array write whose address depends on the iterator?
fn should_vectorize(lp: &NaturalLoop, blocks: &Blocks, index: &InductionVar) -> bool {
    let mut array_writes = 0;
    let mut address_temps = FxHashSet::default();
    for &b in &lp.body {
        for inst in &blocks[b].insts {
            if inst.op == Opcode::ArrayIndex
                && is_instruction_dependent_on_index(lp, blocks, inst, index)
            {
                address_temps.insert(inst.result.clone());
            } else if address_temps.contains(&inst.result) {
                array_writes += 1;
            }
        }
    }
    array_writes > 0
}

/// Clone the loop body immediately after the loop.
///
/// The clones take the footer's major id and fresh minor ids, which places
/// them between the loop and its original exit in the emission order. The
/// clone's labels are fresh, its internal jumps are retargeted onto them,
/// and the original header's exit jump is redirected into the clone, making
/// the clone the loop's new fall-through successor; the clone keeps jumping
/// to the original exit.
fn duplicate_loop_after(lp: &NaturalLoop, blocks: &mut Blocks, builder: &mut TacBuilder) -> String {
    let footer_major = blocks[lp.footer].major;

    let mut label_map: FxHashMap<String, String> = FxHashMap::default();
    for &b in &lp.body {
        for inst in &blocks[b].insts {
            if inst.op == Opcode::Label {
                label_map.insert(inst.arg1.clone(), builder.new_label());
            }
        }
    }

    for &b in &lp.body {
        let mut cloned = blocks[b].insts.clone();
        for inst in &mut cloned {
            builder.renumber(inst);
            if inst.op == Opcode::Label || inst.op.transfers_control() {
                if let Some(fresh) = label_map.get(&inst.arg1) {
                    inst.arg1 = fresh.clone();
                }
            }
        }
        let nb = blocks.new_clone_block(footer_major);
        blocks[nb].insts = cloned;
    }

    let header_label = blocks[lp.header]
        .first_label()
        .expect("loop header starts with its label")
        .to_string();
    let tail_header = label_map
        .remove(&header_label)
        .expect("header label was cloned");

    for inst in &mut blocks[lp.header].insts {
        if inst.op.is_conditional_jump() {
            inst.arg1 = tail_header.clone();
        }
    }

    tail_header
}

/// What the strip miner decided to do with one iteration instruction.
enum Rewrite {
    /// The iterator increment: emitted once, stepping by the unroll factor.
    Increment,
    /// An address computation for an array that is written; folded into the
    /// eventual `vstore`.
    StoreAddress,
    /// An array read becoming a `vload`.
    Load,
    /// A store through a recorded address temp becoming a `vstore`.
    Store,
    /// A scalar operation on iterator-dependent values becoming its vector
    /// counterpart.
    Vector(Opcode),
    /// Anything else: unrolled `factor` times.
    Unroll,
}

/// Rewrite the vector copy of the loop in place.
fn strip_mine(
    lp: &NaturalLoop,
    iterator: &InductionVar,
    blocks: &mut Blocks,
    builder: &mut TacBuilder,
    tables: &mut SymbolTables,
    factor: u32,
) {
    // Classify against the untouched footer. The instructions of one
    // iteration are the footer's minus the trailing back-branch; the loop
    // control stays in the header and is not unrolled.
    let mut plan: Vec<Rewrite> = Vec::new();
    let mut store_temps: FxHashSet<String> = FxHashSet::default();
    {
        let insts = &blocks[lp.footer].insts;
        for (idx, inst) in insts.iter().enumerate() {
            let rewrite = if inst.op == Opcode::Add
                && inst.result == iterator.var
                && inst.arg1 == iterator.var
                && inst.arg2 == iterator.constant
            {
                Rewrite::Increment
            } else if inst.op == Opcode::ArrayIndex
                && is_instruction_dependent_on_index(lp, blocks, inst, iterator)
            {
                let written = insts[idx + 1..]
                    .iter()
                    .any(|later| later.op == Opcode::Assign && later.result == inst.result);
                if written {
                    store_temps.insert(inst.result.clone());
                    Rewrite::StoreAddress
                } else {
                    Rewrite::Load
                }
            } else if inst.op == Opcode::Assign && store_temps.contains(&inst.result) {
                Rewrite::Store
            } else if matches!(inst.op, Opcode::Add | Opcode::Sub | Opcode::Assign)
                && is_instruction_dependent_on_index(lp, blocks, inst, iterator)
            {
                Rewrite::Vector(match inst.op {
                    Opcode::Add => Opcode::Vadd,
                    Opcode::Sub => Opcode::Vsub,
                    _ => Opcode::Vassign,
                })
            } else {
                Rewrite::Unroll
            };
            plan.push(rewrite);
        }
    }

    let step = tables.lookup_or_insert_int_constant(factor as i64);
    let old = core::mem::take(&mut blocks[lp.footer].insts);
    let mut out: Vec<TacInst> = Vec::with_capacity(old.len());
    let mut increment: Option<TacInst> = None;
    let mut trailing: Option<TacInst> = None;
    // Address temp -> (array base, index expression).
    let mut addresses: FxHashMap<String, (String, String)> = FxHashMap::default();
    // Names that now hold vector values.
    let mut vector_names: FxHashSet<String> = FxHashSet::default();

    for (inst, rewrite) in old.into_iter().zip(plan) {
        if inst.op.transfers_control() {
            trailing = Some(inst);
            continue;
        }
        match rewrite {
            Rewrite::Increment => {
                let mut step_inst = inst;
                step_inst.arg2 = step.clone();
                increment = Some(step_inst);
            }
            Rewrite::StoreAddress => {
                addresses.insert(inst.result.clone(), (inst.arg1, inst.arg2));
            }
            Rewrite::Load => {
                let mut load = inst;
                load.op = Opcode::Vload;
                vector_names.insert(load.result.clone());
                out.push(load);
            }
            Rewrite::Store => {
                let (base, index) = addresses
                    .get(&inst.result)
                    .expect("store address was recorded")
                    .clone();
                let value = if vector_names.contains(&inst.arg1) {
                    inst.arg1.clone()
                } else {
                    // Broadcast the scalar into a fresh vector temporary.
                    let vtmp = builder.new_temp();
                    out.push(TacInst {
                        id: builder.new_id(),
                        op: Opcode::Vassign,
                        arg1: inst.arg1.clone(),
                        arg2: String::new(),
                        result: vtmp.clone(),
                        scope: inst.scope,
                    });
                    vtmp
                };
                out.push(TacInst {
                    id: inst.id,
                    op: Opcode::Vstore,
                    arg1: value,
                    arg2: index,
                    result: base,
                    scope: inst.scope,
                });
            }
            Rewrite::Vector(op) => {
                let mut vinst = inst;
                vinst.op = op;
                vector_names.insert(vinst.result.clone());
                out.push(vinst);
            }
            Rewrite::Unroll => {
                for rep in 0..factor {
                    let mut copy = inst.clone();
                    if rep > 0 {
                        builder.renumber(&mut copy);
                    }
                    out.push(copy);
                }
            }
        }
    }

    if let Some(step_inst) = increment {
        out.push(step_inst);
    }
    if let Some(jump) = trailing {
        out.push(jump);
    }
    blocks[lp.footer].insts = out;
}
