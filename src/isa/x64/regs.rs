//! x86-64 register definitions and the register allocation table.
//!
//! Registers are immutable values compared by identity. Two classes exist:
//! the general-purpose registers and the AVX `ymm` registers used by the
//! vector instructions. Within a class, allocation preference follows the
//! order of the name tables below.

use crate::fx::FxHashMap;

/// The class a register belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum RegClass {
    /// General-purpose 64-bit registers.
    Gpr,
    /// AVX 256-bit vector registers.
    Avx,
}

/// Allocatable general-purpose registers, in preference order. `rsp` and
/// `rbp` are reserved for the stack frame.
const GPR_NAMES: [&str; 13] = [
    "r15", "r14", "r13", "r12", "r11", "r10", "r9", "r8", "rdi", "rsi", "rdx", "rcx", "rax",
];

/// Low byte aliases of the general-purpose registers, for `set*`.
const GPR_LOW8_NAMES: [&str; 13] = [
    "r15b", "r14b", "r13b", "r12b", "r11b", "r10b", "r9b", "r8b", "dil", "sil", "dl", "cl", "al",
];

/// AVX registers, in preference order.
const AVX_NAMES: [&str; 16] = [
    "ymm15", "ymm14", "ymm13", "ymm12", "ymm11", "ymm10", "ymm9", "ymm8", "ymm7", "ymm6", "ymm5",
    "ymm4", "ymm3", "ymm2", "ymm1", "ymm0",
];

/// 128-bit aliases of the AVX registers, for scalar-to-vector moves.
const XMM_NAMES: [&str; 16] = [
    "xmm15", "xmm14", "xmm13", "xmm12", "xmm11", "xmm10", "xmm9", "xmm8", "xmm7", "xmm6", "xmm5",
    "xmm4", "xmm3", "xmm2", "xmm1", "xmm0",
];

/// One machine register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Reg {
    class: RegClass,
    index: u8,
}

impl Reg {
    /// The register's class.
    pub fn class(self) -> RegClass {
        self.class
    }

    /// The bare register name, without the `%` sigil.
    pub fn name(self) -> &'static str {
        match self.class {
            RegClass::Gpr => GPR_NAMES[self.index as usize],
            RegClass::Avx => AVX_NAMES[self.index as usize],
        }
    }

    /// The register as an AT&T operand, `%name`.
    pub fn operand(self) -> String {
        format!("%{}", self.name())
    }

    /// The register as an indirect memory operand, `(%name)`.
    pub fn as_memory(self) -> String {
        format!("(%{})", self.name())
    }

    /// The low-byte alias operand of a general-purpose register.
    pub fn low8_operand(self) -> String {
        debug_assert_eq!(self.class, RegClass::Gpr);
        format!("%{}", GPR_LOW8_NAMES[self.index as usize])
    }

    /// The `xmm` alias operand of an AVX register.
    pub fn xmm_operand(self) -> String {
        debug_assert_eq!(self.class, RegClass::Avx);
        format!("%{}", XMM_NAMES[self.index as usize])
    }
}

/// All registers of `class`, in allocation preference order.
pub fn regs_in(class: RegClass) -> impl Iterator<Item = Reg> {
    let count = match class {
        RegClass::Gpr => GPR_NAMES.len(),
        RegClass::Avx => AVX_NAMES.len(),
    };
    (0..count as u8).map(move |index| Reg { class, index })
}

/// Tracks which variable currently resides in which register.
pub struct RegisterAllocationTable {
    in_use: FxHashMap<Reg, String>,
}

impl RegisterAllocationTable {
    /// All registers start free.
    pub fn new() -> Self {
        Self {
            in_use: FxHashMap::default(),
        }
    }

    /// Record that `reg` now holds `value`.
    pub fn set_register_value(&mut self, reg: Reg, value: &str) {
        self.in_use.insert(reg, value.to_string());
    }

    /// Is any register of `class` free?
    pub fn at_least_one_register_unused(&self, class: RegClass) -> bool {
        regs_in(class).any(|r| !self.in_use.contains_key(&r))
    }

    /// The first free register of `class`.
    pub fn unused_register(&self, class: RegClass) -> Option<Reg> {
        regs_in(class).find(|r| !self.in_use.contains_key(r))
    }

    /// Any in-use register of `class`, for spilling.
    pub fn register_in_use(&self, class: RegClass) -> Option<Reg> {
        regs_in(class).find(|r| self.in_use.contains_key(r))
    }

    /// The variable currently in `reg`, if any.
    pub fn variable_in_register(&self, reg: Reg) -> Option<&str> {
        self.in_use.get(&reg).map(|s| s.as_str())
    }

    /// Release `reg`.
    pub fn free_register(&mut self, reg: Reg) {
        self.in_use.remove(&reg);
    }

    /// Release everything.
    pub fn clear(&mut self) {
        self.in_use.clear();
    }

    /// Every in-use register, in a stable order.
    pub fn registers_in_use(&self) -> Vec<Reg> {
        let mut regs: Vec<Reg> = self.in_use.keys().copied().collect();
        regs.sort();
        regs
    }
}

impl Default for RegisterAllocationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_order() {
        let first = regs_in(RegClass::Gpr).next().unwrap();
        assert_eq!(first.name(), "r15");
        assert_eq!(first.operand(), "%r15");
        assert_eq!(first.as_memory(), "(%r15)");
        assert_eq!(first.low8_operand(), "%r15b");

        let avx = regs_in(RegClass::Avx).next().unwrap();
        assert_eq!(avx.operand(), "%ymm15");
        assert_eq!(avx.xmm_operand(), "%xmm15");
    }

    #[test]
    fn allocation_table_tracks_usage() {
        let mut table = RegisterAllocationTable::new();
        assert!(table.at_least_one_register_unused(RegClass::Gpr));

        let r = table.unused_register(RegClass::Gpr).unwrap();
        table.set_register_value(r, "x");
        assert_eq!(table.variable_in_register(r), Some("x"));
        assert_ne!(table.unused_register(RegClass::Gpr), Some(r));

        table.free_register(r);
        assert_eq!(table.variable_in_register(r), None);
        assert_eq!(table.unused_register(RegClass::Gpr), Some(r));
    }

    #[test]
    fn classes_are_tracked_independently() {
        let mut table = RegisterAllocationTable::new();
        for r in regs_in(RegClass::Gpr) {
            table.set_register_value(r, "v");
        }
        assert!(!table.at_least_one_register_unused(RegClass::Gpr));
        assert!(table.at_least_one_register_unused(RegClass::Avx));
        assert!(table.register_in_use(RegClass::Gpr).is_some());
        assert!(table.register_in_use(RegClass::Avx).is_none());
    }
}
