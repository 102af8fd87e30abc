//! Lexically nested symbol tables.
//!
//! Scopes form a tree held in one arena; a [`Scope`] entity names a node.
//! Lookup walks outward through enclosing scopes. Entries are a sum type:
//! variables, literals, and procedures. Code-generation scratch state
//! (liveness, next use) is deliberately *not* a symbol-table entry here; it
//! lives in the code generator's own per-block tables.

use crate::fx::FxHashMap;
use crate::ir::Scope;
use core::fmt;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::PrimaryMap;

/// Size of every scalar value, in bytes.
pub const VARIABLE_SIZE_BYTES: u32 = 8;

/// The data types of variables and literals in the language.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Type {
    Unknown,
    Int,
    Float,
    Void,
    NoType,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Type::Unknown => "UNKNOWN",
            Type::Int => "INT",
            Type::Float => "FLOAT",
            Type::Void => "VOID",
            Type::NoType => "NO_TYPE",
        };
        f.write_str(name)
    }
}

/// A symbol bound in some scope.
#[derive(Clone, PartialEq, Debug)]
pub enum SymbolKind {
    /// A declared variable or named constant.
    Variable {
        is_constant: bool,
        is_assigned: bool,
        is_array: bool,
        array_size: u64,
        ty: Type,
        /// Literal default value for constants.
        value: i64,
    },
    /// A literal appearing in the source text; its name is its spelling.
    Literal { ty: Type, value: i64 },
    /// A procedure with value parameters and an optional return slot.
    Procedure {
        params: Vec<(String, Type)>,
        return_name: Option<String>,
        return_type: Type,
    },
}

impl SymbolKind {
    /// Shorthand for a scalar integer variable entry.
    pub fn scalar() -> Self {
        SymbolKind::Variable {
            is_constant: false,
            is_assigned: false,
            is_array: false,
            array_size: 0,
            ty: Type::Unknown,
            value: 0,
        }
    }

    /// Shorthand for an integer array entry of `len` elements.
    pub fn array(len: u64) -> Self {
        SymbolKind::Variable {
            is_constant: false,
            is_assigned: false,
            is_array: true,
            array_size: len,
            ty: Type::Int,
            value: 0,
        }
    }

    /// Shorthand for a named integer constant.
    pub fn constant(value: i64) -> Self {
        SymbolKind::Variable {
            is_constant: true,
            is_assigned: true,
            is_array: false,
            array_size: 0,
            ty: Type::Int,
            value,
        }
    }

    /// Shorthand for an integer literal entry.
    pub fn int_literal(value: i64) -> Self {
        SymbolKind::Literal {
            ty: Type::Int,
            value,
        }
    }
}

struct ScopeData {
    parent: PackedOption<Scope>,
    level: u32,
    symbols: FxHashMap<String, SymbolKind>,
}

/// The scope arena plus the bindings of every scope.
pub struct SymbolTables {
    scopes: PrimaryMap<Scope, ScopeData>,
    root: Scope,
}

impl SymbolTables {
    /// Create the arena with a single global scope.
    pub fn new() -> Self {
        let mut scopes = PrimaryMap::new();
        let root = scopes.push(ScopeData {
            parent: None.into(),
            level: 0,
            symbols: FxHashMap::default(),
        });
        Self { scopes, root }
    }

    /// The global scope.
    pub fn root(&self) -> Scope {
        self.root
    }

    /// Create a scope one level deeper than `parent`.
    pub fn push_scope(&mut self, parent: Scope) -> Scope {
        let level = self.scopes[parent].level + 1;
        self.scopes.push(ScopeData {
            parent: parent.into(),
            level,
            symbols: FxHashMap::default(),
        })
    }

    /// The nesting depth of `scope`; zero is global.
    pub fn level(&self, scope: Scope) -> u32 {
        self.scopes[scope].level
    }

    /// Is `scope` the global scope?
    pub fn is_global_scope(&self, scope: Scope) -> bool {
        self.scopes[scope].level == 0
    }

    /// Bind `name` to `kind` in `scope`.
    pub fn insert(&mut self, scope: Scope, name: &str, kind: SymbolKind) {
        self.scopes[scope].symbols.insert(name.to_string(), kind);
    }

    /// Find `name`, walking outward from `scope`. Returns the entry and the
    /// level it was found at.
    pub fn lookup(&self, scope: Scope, name: &str) -> Option<(&SymbolKind, u32)> {
        let mut cursor = Some(scope);
        while let Some(s) = cursor {
            let data = &self.scopes[s];
            if let Some(entry) = data.symbols.get(name) {
                return Some((entry, data.level));
            }
            cursor = data.parent.expand();
        }
        None
    }

    /// Mutable lookup of `name` from `scope`.
    pub fn lookup_mut(&mut self, scope: Scope, name: &str) -> Option<&mut SymbolKind> {
        let mut cursor = Some(scope);
        while let Some(s) = cursor {
            if self.scopes[s].symbols.contains_key(name) {
                return self.scopes[s].symbols.get_mut(name);
            }
            cursor = self.scopes[s].parent.expand();
        }
        None
    }

    /// Look up an integer literal by value, interning it in the global scope
    /// when absent. Returns the literal's name.
    pub fn lookup_or_insert_int_constant(&mut self, value: i64) -> String {
        let name = value.to_string();
        if self.lookup(self.root, &name).is_none() {
            self.insert(self.root, &name, SymbolKind::int_literal(value));
        }
        name
    }

    /// Is `name` a compile-time constant in `scope` (a literal or a named
    /// constant)?
    pub fn is_constant(&self, scope: Scope, name: &str) -> bool {
        match self.lookup(scope, name) {
            Some((SymbolKind::Literal { .. }, _)) => true,
            Some((SymbolKind::Variable { is_constant, .. }, _)) => *is_constant,
            _ => false,
        }
    }

    /// The compile-time integer value of `name` in `scope`, if it has one.
    pub fn int_value(&self, scope: Scope, name: &str) -> Option<i64> {
        match self.lookup(scope, name)? {
            (SymbolKind::Literal { value, .. }, _) => Some(*value),
            (
                SymbolKind::Variable {
                    is_constant: true,
                    value,
                    ..
                },
                _,
            ) => Some(*value),
            _ => None,
        }
    }

    /// The size in bytes of the storage behind `name` in `scope`.
    pub fn size_bytes(&self, scope: Scope, name: &str) -> u32 {
        match self.lookup(scope, name) {
            Some((
                SymbolKind::Variable {
                    is_array: true,
                    array_size,
                    ..
                },
                _,
            )) => *array_size as u32 * VARIABLE_SIZE_BYTES,
            _ => VARIABLE_SIZE_BYTES,
        }
    }
}

impl Default for SymbolTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_outward() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        let inner = tables.push_scope(root);
        tables.insert(root, "x", SymbolKind::scalar());
        tables.insert(inner, "y", SymbolKind::scalar());

        assert_eq!(tables.lookup(inner, "x").map(|(_, l)| l), Some(0));
        assert_eq!(tables.lookup(inner, "y").map(|(_, l)| l), Some(1));
        assert!(tables.lookup(root, "y").is_none());
        assert!(tables.lookup(inner, "z").is_none());
    }

    #[test]
    fn scope_levels() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        assert!(tables.is_global_scope(root));
        let inner = tables.push_scope(root);
        assert!(!tables.is_global_scope(inner));
        assert_eq!(tables.level(inner), 1);
    }

    #[test]
    fn int_constant_interning() {
        let mut tables = SymbolTables::new();
        let name = tables.lookup_or_insert_int_constant(4);
        assert_eq!(name, "4");
        assert!(tables.is_constant(tables.root(), "4"));
        assert_eq!(tables.int_value(tables.root(), "4"), Some(4));
        // Interning the same value twice does not create a second entry.
        assert_eq!(tables.lookup_or_insert_int_constant(4), "4");
    }

    #[test]
    fn constants_and_sizes() {
        let mut tables = SymbolTables::new();
        let root = tables.root();
        tables.insert(root, "n", SymbolKind::constant(10));
        tables.insert(root, "a", SymbolKind::array(16));
        tables.insert(root, "x", SymbolKind::scalar());

        assert!(tables.is_constant(root, "n"));
        assert_eq!(tables.int_value(root, "n"), Some(10));
        assert!(!tables.is_constant(root, "x"));
        assert_eq!(tables.size_bytes(root, "a"), 128);
        assert_eq!(tables.size_bytes(root, "x"), 8);
    }
}
