//! IR entity references.
//!
//! Basic blocks, scopes, and instructions need to reference each other. The
//! references are not Rust references but structs wrapping a `u32` index into
//! an arena owned by the relevant container. There is a separate index type
//! per entity so we don't lose type safety, and dropping the arena drops the
//! whole graph at once, cycles included.

use cranelift_entity::entity_impl;

/// An opaque reference to a basic block in the block arena.
///
/// The reference itself is stable identity; the *textual* position of a block
/// is given by its `(major, minor)` id pair, not by this index.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to a lexical scope in the symbol-table arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope(u32);
entity_impl!(Scope, "scope");

/// A globally unique, monotonically increasing three-address-code
/// instruction id.
///
/// Instruction ids survive block formation and optimization unchanged; a
/// duplicated instruction must be renumbered through
/// [`TacBuilder::renumber`](crate::ir::builder::TacBuilder::renumber) so the
/// id sets of any two blocks stay disjoint.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);
entity_impl!(InstId, "tac");
