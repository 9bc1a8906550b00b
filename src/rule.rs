//! Learned rules and production memory.
//!
//! Production memory owns installed rules, indexes them by name, and detects
//! structural duplicates through a fingerprint. Conditions and actions are
//! put in a canonical order first, then variables are renamed by order of
//! first occurrence, so neither condition order nor variable names matter.

use crate::condition::{Condition, Constraint, Field, Relation, Test};
use crate::instantiation::PrefKind;
use crate::symbol::{FxMap, SymbolId, SymbolTable};
use rustc_hash::FxHasher;
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Written by hand and loaded into the agent.
    User,
    /// Learned and generalized for reuse.
    Chunk,
    /// Learned without generalization; only supports the results it explains.
    Justification,
}

/// One right-hand-side action of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: PrefKind,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
}

impl Action {
    pub fn symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        [self.id, self.attr, self.value]
            .into_iter()
            .chain(self.referent)
    }
}

#[derive(Debug, Clone)]
pub struct Production {
    pub name: String,
    pub kind: RuleKind,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl Production {
    pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> ProductionDisplay<'a> {
        ProductionDisplay {
            production: self,
            symbols,
        }
    }

    fn symbols(&self) -> Vec<SymbolId> {
        let mut out = Vec::new();
        for cond in &self.conditions {
            cond.for_each_operand(&mut |op| out.push(op.symbol));
        }
        for action in &self.actions {
            out.extend(action.symbols());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductionId(u32);

impl ProductionId {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Token of a canonical rule fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FpToken {
    Open(u8),
    Close,
    Acceptable,
    Var(u32),
    Sym(SymbolId),
    Rel(Relation),
    Goal,
    Any(SmallVec<[SymbolId; 4]>),
    Blank,
    Pref(PrefKind),
    Arrow,
}

struct Canonicalizer<'a> {
    symbols: &'a SymbolTable,
    /// Every variable becomes the same token; used for ordering keys.
    anonymous: bool,
    renames: FxMap<SymbolId, u32>,
    tokens: Vec<FpToken>,
}

impl<'a> Canonicalizer<'a> {
    fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            anonymous: false,
            renames: FxMap::default(),
            tokens: Vec::new(),
        }
    }

    fn anonymous(symbols: &'a SymbolTable) -> Self {
        Self {
            anonymous: true,
            ..Self::new(symbols)
        }
    }

    fn symbol(&mut self, sym: SymbolId) {
        if !self.symbols.is_variable(sym) {
            self.tokens.push(FpToken::Sym(sym));
        } else if self.anonymous {
            self.tokens.push(FpToken::Var(0));
        } else {
            let next = self.renames.len() as u32;
            let idx = *self.renames.entry(sym).or_insert(next);
            self.tokens.push(FpToken::Var(idx));
        }
    }

    fn test(&mut self, test: &Test) {
        match test.equality {
            Some(op) => self.symbol(op.symbol),
            None => self.tokens.push(FpToken::Blank),
        }
        for constraint in &test.constraints {
            match constraint {
                Constraint::Relational { relation, operand } => {
                    self.tokens.push(FpToken::Rel(*relation));
                    self.symbol(operand.symbol);
                }
                Constraint::Disjunction(options) => {
                    let mut sorted = options.clone();
                    sorted.sort_unstable();
                    self.tokens.push(FpToken::Any(sorted));
                }
                Constraint::Goal => self.tokens.push(FpToken::Goal),
            }
        }
    }

    fn condition(&mut self, cond: &Condition) {
        match cond {
            Condition::Positive {
                tests, acceptable, ..
            }
            | Condition::Negative { tests, acceptable } => {
                self.tokens
                    .push(FpToken::Open(if cond.is_positive() { 0 } else { 1 }));
                if *acceptable {
                    self.tokens.push(FpToken::Acceptable);
                }
                for field in Field::ALL {
                    self.test(tests.field(field));
                }
            }
            Condition::Ncc(conds) => {
                self.tokens.push(FpToken::Open(2));
                let mut inner: Vec<(u64, &Condition)> = conds
                    .iter()
                    .map(|c| (condition_shape(self.symbols, c), c))
                    .collect();
                inner.sort_by_key(|&(shape, _)| shape);
                for (_, c) in inner {
                    self.condition(c);
                }
            }
        }
        self.tokens.push(FpToken::Close);
    }

    fn action(&mut self, action: &Action) {
        self.tokens.push(FpToken::Pref(action.kind));
        for sym in action.symbols() {
            self.symbol(sym);
        }
    }
}

/// Hash of a condition with every variable blanked out.
fn condition_shape(symbols: &SymbolTable, cond: &Condition) -> u64 {
    let mut canon = Canonicalizer::anonymous(symbols);
    canon.condition(cond);
    hash_tokens(&canon.tokens)
}

fn action_shape(symbols: &SymbolTable, action: &Action) -> u64 {
    let mut canon = Canonicalizer::anonymous(symbols);
    canon.action(action);
    hash_tokens(&canon.tokens)
}

/// Ordering key: the item's shape, refined by the shapes of every condition
/// position its variables also occur in.
fn refined_key(
    shape: u64,
    vars: &[SymbolId],
    signatures: &FxMap<SymbolId, Vec<(u64, usize)>>,
) -> u64 {
    let mut hasher = FxHasher::default();
    shape.hash(&mut hasher);
    for var in vars {
        signatures.get(var).hash(&mut hasher);
    }
    hasher.finish()
}

fn condition_variables(symbols: &SymbolTable, cond: &Condition) -> Vec<SymbolId> {
    let mut vars = Vec::new();
    cond.for_each_operand(&mut |op| {
        if symbols.is_variable(op.symbol) {
            vars.push(op.symbol);
        }
    });
    vars
}

fn fingerprint(symbols: &SymbolTable, conditions: &[Condition], actions: &[Action]) -> Vec<FpToken> {
    let shapes: Vec<u64> = conditions
        .iter()
        .map(|c| condition_shape(symbols, c))
        .collect();
    let vars: Vec<Vec<SymbolId>> = conditions
        .iter()
        .map(|c| condition_variables(symbols, c))
        .collect();

    // Where each variable occurs, as (shape, position) pairs, order-free.
    let mut signatures: FxMap<SymbolId, Vec<(u64, usize)>> = FxMap::default();
    for (shape, cond_vars) in shapes.iter().zip(&vars) {
        for (pos, &var) in cond_vars.iter().enumerate() {
            signatures.entry(var).or_default().push((*shape, pos));
        }
    }
    for occurrences in signatures.values_mut() {
        occurrences.sort_unstable();
    }

    let mut order: Vec<(u64, u64, usize)> = shapes
        .iter()
        .zip(&vars)
        .enumerate()
        .map(|(i, (&shape, cond_vars))| (shape, refined_key(shape, cond_vars, &signatures), i))
        .collect();
    order.sort_unstable();

    let mut action_order: Vec<(u64, u64, usize)> = actions
        .iter()
        .enumerate()
        .map(|(i, action)| {
            let shape = action_shape(symbols, action);
            let action_vars: Vec<SymbolId> = action
                .symbols()
                .filter(|&sym| symbols.is_variable(sym))
                .collect();
            (shape, refined_key(shape, &action_vars, &signatures), i)
        })
        .collect();
    action_order.sort_unstable();

    let mut canon = Canonicalizer::new(symbols);
    for &(_, _, i) in &order {
        canon.condition(&conditions[i]);
    }
    canon.tokens.push(FpToken::Arrow);
    for &(_, _, i) in &action_order {
        canon.action(&actions[i]);
    }
    canon.tokens
}

fn hash_tokens(tokens: &[FpToken]) -> u64 {
    let mut hasher = FxHasher::default();
    tokens.hash(&mut hasher);
    hasher.finish()
}

struct Installed {
    production: Production,
    fingerprint: Vec<FpToken>,
}

/// Installed rules, with a duplicate index.
#[derive(Default)]
pub struct ProductionMemory {
    rules: Vec<Option<Installed>>,
    by_name: FxMap<String, ProductionId>,
    by_fingerprint: FxMap<u64, SmallVec<[ProductionId; 2]>>,
}

impl ProductionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a rule. Its symbols gain a reference each.
    ///
    /// A rule with the name of an installed one replaces it.
    pub fn add(&mut self, symbols: &mut SymbolTable, production: Production) -> ProductionId {
        if let Some(existing) = self.by_name.get(&production.name).copied() {
            self.excise(symbols, existing);
        }
        for sym in production.symbols() {
            symbols.add_ref(sym);
        }
        let fp = fingerprint(symbols, &production.conditions, &production.actions);
        let id = ProductionId(self.rules.len() as u32);
        self.by_fingerprint
            .entry(hash_tokens(&fp))
            .or_default()
            .push(id);
        self.by_name.insert(production.name.clone(), id);
        self.rules.push(Some(Installed {
            production,
            fingerprint: fp,
        }));
        id
    }

    /// An installed rule with the same structure, modulo variable names.
    pub fn find_duplicate(
        &self,
        symbols: &SymbolTable,
        conditions: &[Condition],
        actions: &[Action],
    ) -> Option<ProductionId> {
        let fp = fingerprint(symbols, conditions, actions);
        self.by_fingerprint
            .get(&hash_tokens(&fp))?
            .iter()
            .copied()
            .find(|&id| {
                self.rules[id.0 as usize]
                    .as_ref()
                    .is_some_and(|r| r.fingerprint == fp)
            })
    }

    /// Remove a rule and release its symbol references.
    pub fn excise(&mut self, symbols: &mut SymbolTable, id: ProductionId) -> Option<Production> {
        let installed = self.rules.get_mut(id.0 as usize)?.take()?;
        for sym in installed.production.symbols() {
            symbols.remove_ref(sym);
        }
        self.by_name.remove(&installed.production.name);
        let hash = hash_tokens(&installed.fingerprint);
        if let Some(bucket) = self.by_fingerprint.get_mut(&hash) {
            bucket.retain(|p| *p != id);
            if bucket.is_empty() {
                self.by_fingerprint.remove(&hash);
            }
        }
        Some(installed.production)
    }

    pub fn get(&self, id: ProductionId) -> Option<&Production> {
        self.rules
            .get(id.0 as usize)
            .and_then(|r| r.as_ref())
            .map(|r| &r.production)
    }

    pub fn by_name(&self, name: &str) -> Option<&Production> {
        self.by_name.get(name).and_then(|&id| self.get(id))
    }

    /// Installed rules in installation order.
    pub fn iter(&self) -> impl Iterator<Item = (ProductionId, &Production)> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (ProductionId(i as u32), &r.production)))
    }

    pub fn count(&self, kind: RuleKind) -> usize {
        self.iter().filter(|(_, p)| p.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Excise every rule.
    pub fn clear(&mut self, symbols: &mut SymbolTable) {
        let ids: Vec<ProductionId> = self.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.excise(symbols, id);
        }
        self.rules.clear();
    }
}

/// Display adapter printing a rule in `sp {...}` form.
pub struct ProductionDisplay<'a> {
    production: &'a Production,
    symbols: &'a SymbolTable,
}

impl fmt::Display for ProductionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = |id| self.symbols.display(id);
        writeln!(f, "sp {{{}", self.production.name)?;
        for cond in &self.production.conditions {
            writeln!(f, "   {}", cond.display(self.symbols))?;
        }
        writeln!(f, "   -->")?;
        for action in &self.production.actions {
            write!(
                f,
                "   ({} ^{} {} {}",
                sym(action.id),
                sym(action.attr),
                sym(action.value),
                action.kind
            )?;
            if let Some(referent) = action.referent {
                write!(f, " {}", sym(referent))?;
            }
            writeln!(f, ")")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
#[path = "tests/rule.rs"]
mod tests;
