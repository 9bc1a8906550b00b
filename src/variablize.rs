//! Variablization: replacing matched symbols with rule variables.
//!
//! Identifiers are looked up by the identifier itself; constants are looked up
//! by the representative of their identity class. The tables live for one
//! learning pass and are cleared at its end.
//!
//! Variablization runs in two passes. Pass 1 walks the equality tests of
//! positive conditions and creates the canonical variable for every bound
//! value. Pass 2 only looks variables up: a constraint or negation on an
//! identifier that pass 1 never bound is dropped, while one on a constant keeps
//! the constant.

use crate::condition::{ChunkCondition, Condition, Constraint, Field, FieldTests, Operand, Test};
use crate::identity::{Identity, IdentityRegistry, OperationalSite};
use crate::instantiation::Preference;
use crate::rule::Action;
use crate::symbol::{FxMap, SymbolId, SymbolTable};
use crate::trace::trace;

/// Result of a pass-2 lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Variable(SymbolId),
    /// The operand stays as its matched symbol.
    Literal,
    /// An identifier no equality test bound.
    Unbound,
}

#[derive(Default)]
pub struct VariablizationManager {
    by_identifier: FxMap<SymbolId, SymbolId>,
    by_identity: FxMap<Identity, SymbolId>,
    /// Renames for variables local to negations.
    locals: FxMap<SymbolId, SymbolId>,
    counters: FxMap<char, u32>,
    /// Every reference taken by the tables, released by `clear`.
    held: Vec<SymbolId>,
    dropped: u64,
}

impl VariablizationManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn hold(&mut self, symbols: &mut SymbolTable, sym: SymbolId) {
        symbols.add_ref(sym);
        self.held.push(sym);
    }

    /// Generate a fresh variable: `<x>`, then `<x1>`, `<x2>`, ...
    fn fresh(&mut self, symbols: &mut SymbolTable, letter: char) -> SymbolId {
        let n = self.counters.entry(letter).or_insert(0);
        let name = if *n == 0 {
            letter.to_string()
        } else {
            format!("{}{}", letter, n)
        };
        *n += 1;
        symbols.variable(&name)
    }

    /// Variable for a matched operand, created on first sight.
    ///
    /// Returns `None` for operands that stay literal: constants without an
    /// identity and constants whose class was literalized.
    pub fn variablize(
        &mut self,
        symbols: &mut SymbolTable,
        identities: &mut IdentityRegistry,
        op: Operand,
    ) -> Option<SymbolId> {
        if symbols.is_identifier(op.symbol) {
            if let Some(&var) = self.by_identifier.get(&op.symbol) {
                return Some(var);
            }
            let letter = symbols.variable_letter(op.symbol);
            let var = self.fresh(symbols, letter);
            self.hold(symbols, op.symbol);
            self.hold(symbols, var);
            self.by_identifier.insert(op.symbol, var);
            if let Some(id) = op.identity {
                identities.set_variable(id, var);
            }
            return Some(var);
        }
        let id = op.identity?;
        if identities.is_literalized(id) {
            return None;
        }
        let rep = identities.representative(id);
        if let Some(&var) = self.by_identity.get(&rep) {
            return Some(var);
        }
        let letter = symbols.variable_letter(op.symbol);
        let var = self.fresh(symbols, letter);
        self.hold(symbols, var);
        self.by_identity.insert(rep, var);
        identities.set_variable(rep, var);
        Some(var)
    }

    /// Pass-2 lookup; never creates a variable.
    pub fn lookup(&self, symbols: &SymbolTable, identities: &IdentityRegistry, op: Operand) -> Lookup {
        if symbols.is_identifier(op.symbol) {
            return match self.by_identifier.get(&op.symbol) {
                Some(&var) => Lookup::Variable(var),
                None => Lookup::Unbound,
            };
        }
        match op.identity {
            Some(id) if !identities.is_literalized(id) => self
                .by_identity
                .get(&identities.representative(id))
                .map_or(Lookup::Literal, |&var| Lookup::Variable(var)),
            _ => Lookup::Literal,
        }
    }

    /// Pass 1 over one positive condition: variablize its equality tests and
    /// record the operational site of each identity class.
    pub fn variablize_equalities(
        &mut self,
        symbols: &mut SymbolTable,
        identities: &mut IdentityRegistry,
        cond: &mut ChunkCondition,
        index: usize,
    ) {
        let Condition::Positive { tests, .. } = &mut cond.variablized else {
            return;
        };
        for field in Field::ALL {
            let test = tests.field_mut(field);
            let Some(op) = test.equality else { continue };
            if let Some(id) = op.identity {
                identities.set_operational_if_absent(id, OperationalSite { condition: index, field });
            }
            if let Some(var) = self.variablize(symbols, identities, op) {
                test.equality = Some(Operand { symbol: var, identity: op.identity });
            }
        }
    }

    /// Pass 2 over one condition.
    pub fn variablize_by_lookup(
        &mut self,
        symbols: &mut SymbolTable,
        identities: &IdentityRegistry,
        cond: &mut ChunkCondition,
    ) {
        match &mut cond.variablized {
            Condition::Positive { tests, .. } => {
                for field in Field::ALL {
                    self.constraints_by_lookup(symbols, identities, tests.field_mut(field));
                }
            }
            negated => self.negation_by_lookup(symbols, identities, negated),
        }
    }

    fn constraints_by_lookup(
        &mut self,
        symbols: &SymbolTable,
        identities: &IdentityRegistry,
        test: &mut Test,
    ) {
        let before = test.constraints.len();
        test.constraints.retain(|constraint| {
            let Constraint::Relational { operand, .. } = constraint else {
                return true;
            };
            match self.lookup(symbols, identities, *operand) {
                Lookup::Variable(var) => {
                    *operand = Operand { symbol: var, identity: operand.identity };
                    true
                }
                Lookup::Literal => {
                    *operand = Operand::literal(operand.symbol);
                    true
                }
                Lookup::Unbound => false,
            }
        });
        let dropped = before - test.constraints.len();
        if dropped > 0 {
            trace!(dropped, "dropped constraints on unbound identifiers");
            self.dropped += dropped as u64;
        }
    }

    fn negation_by_lookup(
        &mut self,
        symbols: &mut SymbolTable,
        identities: &IdentityRegistry,
        cond: &mut Condition,
    ) {
        match cond {
            Condition::Positive { tests, .. } | Condition::Negative { tests, .. } => {
                self.negated_tests(symbols, identities, tests);
            }
            Condition::Ncc(conds) => {
                for inner in conds {
                    self.negation_by_lookup(symbols, identities, inner);
                }
            }
        }
    }

    fn negated_tests(
        &mut self,
        symbols: &mut SymbolTable,
        identities: &IdentityRegistry,
        tests: &mut FieldTests,
    ) {
        for field in Field::ALL {
            let test = tests.field_mut(field);
            if let Some(op) = test.equality {
                test.equality = Some(self.negated_operand(symbols, identities, op));
            }
            for constraint in test.constraints.iter_mut() {
                if let Constraint::Relational { operand, .. } = constraint {
                    *operand = self.negated_operand(symbols, identities, *operand);
                }
            }
        }
    }

    /// Inside a negation, unbound identifiers and the negation's own variables
    /// become variables local to it.
    fn negated_operand(
        &mut self,
        symbols: &mut SymbolTable,
        identities: &IdentityRegistry,
        op: Operand,
    ) -> Operand {
        match self.lookup(symbols, identities, op) {
            Lookup::Variable(var) => Operand { symbol: var, identity: op.identity },
            Lookup::Unbound => Operand::literal(self.local(symbols, op.symbol)),
            Lookup::Literal if symbols.is_variable(op.symbol) => {
                Operand::literal(self.local(symbols, op.symbol))
            }
            Lookup::Literal => Operand::literal(op.symbol),
        }
    }

    fn local(&mut self, symbols: &mut SymbolTable, original: SymbolId) -> SymbolId {
        if let Some(&var) = self.locals.get(&original) {
            return var;
        }
        let letter = match symbols.name(original) {
            Some(name) if symbols.is_variable(original) => name
                .chars()
                .find(|c| c.is_ascii_alphabetic())
                .map_or('v', |c| c.to_ascii_lowercase()),
            _ => symbols.variable_letter(original),
        };
        let var = self.fresh(symbols, letter);
        self.hold(symbols, var);
        self.locals.insert(original, var);
        var
    }

    /// Turn a result preference into an action of the learned rule.
    ///
    /// Identifiers the conditions never bound get new variables, which makes
    /// the rule create new identifiers when it fires.
    pub fn variablize_action(
        &mut self,
        symbols: &mut SymbolTable,
        identities: &mut IdentityRegistry,
        pref: &Preference,
    ) -> Action {
        let mut field = |sym: SymbolId, identity: Option<Identity>| {
            let op = Operand { symbol: sym, identity };
            if symbols.is_identifier(sym) {
                return self.variablize(symbols, identities, op).unwrap_or(sym);
            }
            match self.lookup(symbols, identities, op) {
                Lookup::Variable(var) => var,
                _ => sym,
            }
        };
        let ids = pref.identities;
        Action {
            kind: pref.kind,
            id: field(pref.id, ids.id),
            attr: field(pref.attr, ids.attr),
            value: field(pref.value, ids.value),
            referent: pref.referent.map(|r| field(r, ids.referent)),
        }
    }

    /// Variable assigned to an identifier, if any.
    pub fn variable_for_identifier(&self, id: SymbolId) -> Option<SymbolId> {
        self.by_identifier.get(&id).copied()
    }

    /// Constraints dropped because they tested unbound identifiers.
    pub fn dropped_constraints(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len() + self.by_identity.len() + self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every table entry. Safe to call repeatedly.
    pub fn clear(&mut self, symbols: &mut SymbolTable) {
        for sym in self.held.drain(..) {
            symbols.remove_ref(sym);
        }
        self.by_identifier.clear();
        self.by_identity.clear();
        self.locals.clear();
        self.counters.clear();
        self.dropped = 0;
    }
}

#[cfg(test)]
#[path = "tests/variablize.rs"]
mod tests;
