//! Value locations, the simulated stack, and the global-data table.
//!
//! The address table records the most up-to-date location of every known
//! name: an immediate, global memory, a stack slot, or a register (possibly
//! holding an *address*, for array element pointers). The stack table
//! simulates the x86-64 call stack so declarations and spills can hand out
//! frame slots; the global table records what lives in the `.data` section.

use crate::fx::FxHashMap;
use crate::ir::Scope;
use crate::isa::x64::regs::Reg;
use crate::symtab::{SymbolTables, VARIABLE_SIZE_BYTES};

/// Where a value currently lives.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Location {
    /// In a register. `is_address` marks registers holding an element
    /// address rather than a value.
    Register { reg: Reg, is_address: bool },
    /// In the `.data` section under its own name.
    Global(String),
    /// In the current stack frame at a fixed `%rbp`-relative offset.
    Stack(i32),
    /// A compile-time immediate.
    Immediate(String),
}

impl Location {
    /// Is the value in memory (global or stack)?
    pub fn in_memory(&self) -> bool {
        matches!(self, Location::Global(_) | Location::Stack(_))
    }

    /// Is the value in a register?
    pub fn in_register(&self) -> bool {
        matches!(self, Location::Register { .. })
    }

    /// Is the value an immediate?
    pub fn is_immediate(&self) -> bool {
        matches!(self, Location::Immediate(_))
    }

    /// Does the location hold an address rather than a value?
    pub fn is_reg_address(&self) -> bool {
        matches!(
            self,
            Location::Register {
                is_address: true,
                ..
            }
        )
    }

    /// The AT&T operand text for this location. Address-holding registers
    /// render as indirect operands.
    pub fn address(&self) -> String {
        match self {
            Location::Register { reg, is_address } => {
                if *is_address {
                    reg.as_memory()
                } else {
                    reg.operand()
                }
            }
            Location::Global(name) => format!("{name}(%rip)"),
            Location::Stack(offset) => format!("{offset}(%rbp)"),
            Location::Immediate(value) => format!("${value}"),
        }
    }

    /// The operand text with register locations forced to their indirect
    /// form. Used when reading the value an address register points at.
    pub fn address_deref(&self) -> String {
        match self {
            Location::Register { reg, .. } => reg.as_memory(),
            _ => self.address(),
        }
    }
}

/// The most up-to-date location of every known name.
pub struct AddressTable {
    table: FxHashMap<String, Location>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }

    /// The recorded location of `variable`.
    pub fn get(&self, variable: &str) -> Option<&Location> {
        self.table.get(variable)
    }

    /// Does `variable` have a recorded location?
    pub fn contains(&self, variable: &str) -> bool {
        self.table.contains_key(variable)
    }

    /// Record `location` for `variable`.
    pub fn insert(&mut self, variable: &str, location: Location) {
        self.table.insert(variable.to_string(), location);
    }

    /// Drop the record for `variable`.
    pub fn remove(&mut self, variable: &str) {
        self.table.remove(variable);
    }

    /// Is `variable` currently in a register?
    pub fn is_in_register(&self, variable: &str) -> bool {
        matches!(self.table.get(variable), Some(l) if l.in_register())
    }

    /// The register holding `variable`, when it is in one.
    pub fn register_of(&self, variable: &str) -> Option<Reg> {
        match self.table.get(variable) {
            Some(Location::Register { reg, .. }) => Some(*reg),
            _ => None,
        }
    }

    /// Record an immediate location when `variable` names a compile-time
    /// constant in `scope`.
    pub fn insert_if_literal(&mut self, variable: &str, scope: Scope, tables: &SymbolTables) {
        if variable.is_empty() || self.table.contains_key(variable) {
            return;
        }
        if let Some(value) = tables.int_value(scope, variable) {
            self.insert(variable, Location::Immediate(value.to_string()));
        }
    }

    /// Every name currently recorded in a register.
    pub fn register_entries(&self) -> Vec<(String, Reg, bool)> {
        let mut entries: Vec<(String, Reg, bool)> = self
            .table
            .iter()
            .filter_map(|(name, loc)| match loc {
                Location::Register { reg, is_address } => {
                    Some((name.clone(), *reg, *is_address))
                }
                _ => None,
            })
            .collect();
        entries.sort();
        entries
    }

    /// Forget every register location.
    pub fn clear_registers(&mut self) {
        self.table.retain(|_, loc| !loc.in_register());
    }
}

impl Default for AddressTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulates the call stack. Slot positions are tracked as absolute byte
/// offsets from the bottom of the simulated stack; the rendered
/// `%rbp`-relative operand for the current frame is produced by
/// [`StackTable::rendered_offset`].
pub struct StackTable {
    base_address: u32,
    stack_size: u32,
    prev_base_addresses: Vec<u32>,
    vars_in_stack: FxHashMap<String, (u32, u32)>,
}

impl StackTable {
    pub fn new() -> Self {
        Self {
            base_address: 0,
            stack_size: 0,
            prev_base_addresses: Vec::new(),
            vars_in_stack: FxHashMap::default(),
        }
    }

    /// Reserve `size` bytes for `variable` and return its offset within the
    /// current frame.
    pub fn allocate(&mut self, variable: &str, size: u32) -> u32 {
        let absolute = self.stack_size;
        self.vars_in_stack
            .insert(variable.to_string(), (absolute, size));
        self.stack_size += size;
        absolute - self.base_address
    }

    /// Start a procedure frame.
    pub fn new_base_address(&mut self) {
        self.prev_base_addresses.push(self.base_address);
        self.base_address = self.stack_size;
    }

    /// Leave a procedure frame, dropping its slots.
    pub fn reset_to_previous_base_address(&mut self) {
        let prev = self
            .prev_base_addresses
            .pop()
            .expect("unbalanced procedure frames");
        self.stack_size = self.base_address;
        self.base_address = prev;
        let limit = self.stack_size;
        self.vars_in_stack
            .retain(|_, &mut (absolute, _)| absolute < limit);
    }

    /// Are we outside every procedure frame?
    ///
    /// The frame-depth check keeps this correct even when the first
    /// procedure frame starts while the stack is still empty.
    pub fn in_global_scope(&self) -> bool {
        self.prev_base_addresses.is_empty()
    }

    /// Does `variable` have a slot?
    pub fn in_stack(&self, variable: &str) -> bool {
        self.vars_in_stack.contains_key(variable)
    }

    /// The offset of `variable`'s slot within the current frame.
    pub fn offset_of(&self, variable: &str) -> Option<u32> {
        self.vars_in_stack
            .get(variable)
            .map(|&(absolute, _)| absolute - self.base_address)
    }

    /// The `%rbp`-relative displacement of `variable`'s slot: slots grow
    /// downward, and an array's base points at its lowest element.
    pub fn rendered_offset(&self, variable: &str) -> Option<i32> {
        self.vars_in_stack
            .get(variable)
            .map(|&(absolute, size)| -((absolute - self.base_address + size) as i32))
    }
}

impl Default for StackTable {
    fn default() -> Self {
        Self::new()
    }
}

/// What has been placed in the `.data` section.
pub struct GlobalTable {
    table: FxHashMap<String, u32>,
}

impl GlobalTable {
    pub fn new() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }

    /// Record a global scalar of `size` bytes.
    pub fn insert_global_variable(&mut self, name: &str, size: u32) {
        self.table.insert(name.to_string(), size);
    }

    /// Record a global array of `size` bytes.
    pub fn insert_global_array(&mut self, name: &str, size: u32) {
        self.table.insert(name.to_string(), size);
    }

    /// Is `name` in the `.data` section?
    pub fn is_global(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// The recorded size of `name` in bytes.
    pub fn size_of(&self, name: &str) -> Option<u32> {
        self.table.get(name).copied()
    }
}

impl Default for GlobalTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The rendered slot width of one scalar.
pub const SCALAR_SLOT: u32 = VARIABLE_SIZE_BYTES;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::regs::{regs_in, RegClass};

    #[test]
    fn location_operands() {
        let reg = regs_in(RegClass::Gpr).next().unwrap();
        assert_eq!(
            Location::Register {
                reg,
                is_address: false
            }
            .address(),
            "%r15"
        );
        assert_eq!(
            Location::Register {
                reg,
                is_address: true
            }
            .address(),
            "(%r15)"
        );
        assert_eq!(
            Location::Register {
                reg,
                is_address: false
            }
            .address_deref(),
            "(%r15)"
        );
        assert_eq!(Location::Global("x".to_string()).address(), "x(%rip)");
        assert_eq!(Location::Stack(-8).address(), "-8(%rbp)");
        assert_eq!(Location::Immediate("7".to_string()).address(), "$7");
    }

    #[test]
    fn stack_frames_nest_and_reset() {
        let mut stack = StackTable::new();
        assert!(stack.in_global_scope());

        stack.new_base_address();
        assert!(!stack.in_global_scope());
        let a = stack.allocate("a", 8);
        let b = stack.allocate("b", 8);
        assert_eq!(a, 0);
        assert_eq!(b, 8);
        assert_eq!(stack.rendered_offset("a"), Some(-8));
        assert_eq!(stack.rendered_offset("b"), Some(-16));

        stack.reset_to_previous_base_address();
        assert!(stack.in_global_scope());
        assert!(!stack.in_stack("a"));
        assert!(!stack.in_stack("b"));
    }

    #[test]
    fn array_base_points_at_its_lowest_element() {
        let mut stack = StackTable::new();
        stack.new_base_address();
        stack.allocate("arr", 32);
        let c = stack.allocate("c", 8);
        // The array band is [-32, -8]; the scalar after it sits below.
        assert_eq!(stack.rendered_offset("arr"), Some(-32));
        assert_eq!(c, 32);
        assert_eq!(stack.rendered_offset("c"), Some(-40));
    }

    #[test]
    fn address_table_register_bookkeeping() {
        let mut addrs = AddressTable::new();
        let reg = regs_in(RegClass::Gpr).next().unwrap();
        addrs.insert("x", Location::Global("x".to_string()));
        addrs.insert(
            "t",
            Location::Register {
                reg,
                is_address: true,
            },
        );

        assert!(addrs.is_in_register("t"));
        assert!(!addrs.is_in_register("x"));
        assert_eq!(addrs.register_of("t"), Some(reg));
        assert_eq!(addrs.register_entries().len(), 1);

        addrs.clear_registers();
        assert!(!addrs.contains("t"));
        assert!(addrs.contains("x"));
    }

    #[test]
    fn literal_operands_become_immediates() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        tables.lookup_or_insert_int_constant(7);

        let mut addrs = AddressTable::new();
        addrs.insert_if_literal("7", root, &tables);
        addrs.insert_if_literal("x", root, &tables);

        assert_eq!(
            addrs.get("7"),
            Some(&Location::Immediate("7".to_string()))
        );
        assert!(!addrs.contains("x"));
    }
}
