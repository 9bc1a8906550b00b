use hashbrown::HashMap;
use lasso::{Rodeo, Spur};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::BuildHasherDefault;

/// Hash map keyed with the Fx hasher, used for every symbol-keyed table.
pub type FxMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher>>;
/// Hash set keyed with the Fx hasher.
pub type FxSet<K> = hashbrown::HashSet<K, BuildHasherDefault<FxHasher>>;

/// Handle to an interned symbol. Stable for the lifetime of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// The value behind a [`SymbolId`].
///
/// Floats are stored by bit pattern so that symbols stay hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A working-memory identifier such as `S1`.
    Identifier { letter: char, number: u64 },
    /// A rule variable such as `<x>`; the name is stored without brackets.
    Variable(Spur),
    Str(Spur),
    Int(i64),
    Float(u64),
}

/// Coarse classification of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolType {
    Identifier,
    Variable,
    StrConstant,
    IntConstant,
    FloatConstant,
}

#[derive(Debug, Clone)]
struct Entry {
    symbol: Symbol,
    refs: u32,
}

/// Hash-consed symbol table with explicit reference counts.
///
/// Guarantees:
/// - Equal constants and equal variable names always produce the same SymbolId
/// - Every call to [`SymbolTable::new_identifier`] produces a fresh identifier
/// - Reference counts never affect identity; a symbol whose count drops to zero
///   keeps its slot
pub struct SymbolTable {
    names: Rodeo,
    entries: Vec<Entry>,
    index: FxMap<Symbol, SymbolId>,
    id_counters: FxMap<char, u64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            names: Rodeo::default(),
            entries: Vec::new(),
            index: FxMap::default(),
            id_counters: FxMap::default(),
        }
    }

    fn intern(&mut self, symbol: Symbol) -> SymbolId {
        if let Some(&id) = self.index.get(&symbol) {
            return id;
        }
        let id = SymbolId(self.entries.len() as u32);
        self.entries.push(Entry { symbol, refs: 0 });
        self.index.insert(symbol, id);
        id
    }

    /// Create a new identifier with the given letter (`'S'` produces `S1`, `S2`, ...).
    pub fn new_identifier(&mut self, letter: char) -> SymbolId {
        let letter = if letter.is_ascii_alphabetic() {
            letter.to_ascii_uppercase()
        } else {
            'I'
        };
        let counter = self.id_counters.entry(letter).or_insert(0);
        *counter += 1;
        let number = *counter;
        self.intern(Symbol::Identifier { letter, number })
    }

    /// Intern a string constant.
    pub fn str_constant(&mut self, name: &str) -> SymbolId {
        let spur = self.names.get_or_intern(name);
        self.intern(Symbol::Str(spur))
    }

    /// Intern an integer constant.
    pub fn int_constant(&mut self, value: i64) -> SymbolId {
        self.intern(Symbol::Int(value))
    }

    /// Intern a float constant.
    pub fn float_constant(&mut self, value: f64) -> SymbolId {
        self.intern(Symbol::Float(value.to_bits()))
    }

    /// Intern a variable. `name` is given without angle brackets.
    pub fn variable(&mut self, name: &str) -> SymbolId {
        let spur = self.names.get_or_intern(name);
        self.intern(Symbol::Variable(spur))
    }

    /// Look up a variable without creating it.
    pub fn find_variable(&self, name: &str) -> Option<SymbolId> {
        let spur = self.names.get(name)?;
        self.index.get(&Symbol::Variable(spur)).copied()
    }

    /// Look up a string constant without creating it.
    pub fn find_str_constant(&self, name: &str) -> Option<SymbolId> {
        let spur = self.names.get(name)?;
        self.index.get(&Symbol::Str(spur)).copied()
    }

    /// Resolve a SymbolId to its symbol.
    ///
    /// Panics on a handle from another table; handles are never forged.
    pub fn resolve(&self, id: SymbolId) -> Symbol {
        self.entries[id.0 as usize].symbol
    }

    pub fn symbol_type(&self, id: SymbolId) -> SymbolType {
        match self.resolve(id) {
            Symbol::Identifier { .. } => SymbolType::Identifier,
            Symbol::Variable(_) => SymbolType::Variable,
            Symbol::Str(_) => SymbolType::StrConstant,
            Symbol::Int(_) => SymbolType::IntConstant,
            Symbol::Float(_) => SymbolType::FloatConstant,
        }
    }

    pub fn is_identifier(&self, id: SymbolId) -> bool {
        matches!(self.resolve(id), Symbol::Identifier { .. })
    }

    pub fn is_variable(&self, id: SymbolId) -> bool {
        matches!(self.resolve(id), Symbol::Variable(_))
    }

    /// Constants are everything that is neither an identifier nor a variable.
    pub fn is_constant(&self, id: SymbolId) -> bool {
        !self.is_identifier(id) && !self.is_variable(id)
    }

    /// String name of a string constant or variable.
    pub fn name(&self, id: SymbolId) -> Option<&str> {
        match self.resolve(id) {
            Symbol::Str(spur) | Symbol::Variable(spur) => Some(self.names.resolve(&spur)),
            _ => None,
        }
    }

    /// Letter used when generating a variable for this symbol.
    ///
    /// Identifiers use their own letter, string constants their first ASCII
    /// letter, and everything else falls back to `c`.
    pub fn variable_letter(&self, id: SymbolId) -> char {
        match self.resolve(id) {
            Symbol::Identifier { letter, .. } => letter.to_ascii_lowercase(),
            Symbol::Str(spur) => self
                .names
                .resolve(&spur)
                .chars()
                .find(|c| c.is_ascii_alphabetic())
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or('c'),
            _ => 'c',
        }
    }

    /// Add one reference to a symbol.
    pub fn add_ref(&mut self, id: SymbolId) {
        self.entries[id.0 as usize].refs += 1;
    }

    /// Remove one reference from a symbol.
    pub fn remove_ref(&mut self, id: SymbolId) {
        let entry = &mut self.entries[id.0 as usize];
        debug_assert!(entry.refs > 0, "reference count underflow on {:?}", id);
        entry.refs = entry.refs.saturating_sub(1);
    }

    pub fn refcount(&self, id: SymbolId) -> u32 {
        self.entries[id.0 as usize].refs
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow a symbol for printing.
    pub fn display(&self, id: SymbolId) -> SymbolDisplay<'_> {
        SymbolDisplay { id, table: self }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Display adapter for a single symbol.
pub struct SymbolDisplay<'a> {
    id: SymbolId,
    table: &'a SymbolTable,
}

impl fmt::Display for SymbolDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table.resolve(self.id) {
            Symbol::Identifier { letter, number } => write!(f, "{}{}", letter, number),
            Symbol::Variable(spur) => write!(f, "<{}>", self.table.names.resolve(&spur)),
            Symbol::Str(spur) => f.write_str(self.table.names.resolve(&spur)),
            Symbol::Int(v) => write!(f, "{}", v),
            Symbol::Float(bits) => write!(f, "{:?}", f64::from_bits(bits)),
        }
    }
}

#[cfg(test)]
#[path = "tests/symbol.rs"]
mod tests;
