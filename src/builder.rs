//! Recording instantiations without a match engine.
//!
//! [`InstantiationBuilder`] plays the part of the matcher that would normally
//! produce instantiation traces. Conditions are matched against working
//! memory as they are added, binding rule variables to the symbols they
//! match. Every variable receives one fresh identity per instantiation, which
//! is what the chunker later unifies and variablizes.
//!
//! ```rust,ignore
//! use chunklearn::builder::{lit, v};
//! use chunklearn::instantiation::PrefKind;
//!
//! let inst = agent
//!     .instantiate("answer", s2)
//!     .matches([v("s"), lit(superstate), v("t")])
//!     .matches([v("t"), lit(foo), v("x")])
//!     .matches([v("x"), lit(bar), lit(five)])
//!     .prefer(PrefKind::Acceptable, [v("t"), lit(answer), lit(five)])
//!     .fire()?;
//! ```
//!
//! Constraints are recorded as written; the builder does not evaluate them.

use crate::agent::Agent;
use crate::condition::{Backtrace, Condition, Constraint, Field, FieldTests, Operand, Relation, Test};
use crate::error::TraceError;
use crate::identity::Identity;
use crate::instantiation::{InstId, PrefIdentities, PrefKind, Preference};
use crate::rule::RuleKind;
use crate::symbol::{FxMap, SymbolId};
use crate::wm::{GoalLevel, TOP_GOAL_LEVEL};
use smallvec::SmallVec;

/// A field of a condition or action: a rule variable or a literal symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term<'n> {
    Var(&'n str),
    Lit(SymbolId),
}

/// Shorthand for [`Term::Var`].
pub fn v(name: &str) -> Term<'_> {
    Term::Var(name)
}

/// Shorthand for [`Term::Lit`].
pub fn lit(sym: SymbolId) -> Term<'static> {
    Term::Lit(sym)
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    symbol: SymbolId,
    identity: Identity,
}

struct PendingAction {
    kind: PrefKind,
    fields: [Operand; 3],
    referent: Option<Operand>,
}

pub struct InstantiationBuilder<'a> {
    agent: &'a mut Agent,
    rule: String,
    kind: RuleKind,
    goal: SymbolId,
    bindings: FxMap<String, Binding>,
    conditions: Vec<Condition>,
    actions: Vec<PendingAction>,
    /// Identifiers created by actions.
    created: SmallVec<[SymbolId; 4]>,
    error: Option<TraceError>,
}

impl<'a> InstantiationBuilder<'a> {
    pub(crate) fn new(agent: &'a mut Agent, rule: &str, goal: SymbolId) -> Self {
        Self {
            agent,
            rule: rule.to_string(),
            kind: RuleKind::User,
            goal,
            bindings: FxMap::default(),
            conditions: Vec::new(),
            actions: Vec::new(),
            created: SmallVec::new(),
            error: None,
        }
    }

    /// Record the firing as one of a learned rule.
    pub fn kind(mut self, kind: RuleKind) -> Self {
        self.kind = kind;
        self
    }

    fn fail(&mut self, err: TraceError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn bound(&self, term: Term<'_>) -> Option<SymbolId> {
        match term {
            Term::Lit(sym) => Some(sym),
            Term::Var(name) => self.bindings.get(name).map(|b| b.symbol),
        }
    }

    fn operand(&self, term: Term<'_>) -> Option<Operand> {
        match term {
            Term::Lit(sym) => Some(Operand::literal(sym)),
            Term::Var(name) => self
                .bindings
                .get(name)
                .map(|b| Operand::with_identity(b.symbol, b.identity)),
        }
    }

    fn bind(&mut self, name: &str, symbol: SymbolId) -> Operand {
        let identity = self.agent.chunker.identities_mut().new_identity();
        self.bindings
            .insert(name.to_string(), Binding { symbol, identity });
        Operand::with_identity(symbol, identity)
    }

    fn show(&self, terms: &[Term<'_>; 3]) -> String {
        let field = |t: &Term<'_>| match t {
            Term::Var(name) => format!("<{}>", name),
            Term::Lit(sym) => self.agent.symbols.display(*sym).to_string(),
        };
        format!("({} ^{} {})", field(&terms[0]), field(&terms[1]), field(&terms[2]))
    }

    /// Match a positive condition against working memory.
    ///
    /// The identifier must be a literal or an already-bound variable. The
    /// first WME consistent with the current bindings is taken.
    pub fn matches(mut self, terms: [Term<'_>; 3]) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(id) = self.bound(terms[0]) else {
            let var = match terms[0] {
                Term::Var(name) => name.to_string(),
                Term::Lit(_) => String::new(),
            };
            self.fail(TraceError::UnboundVariable { var });
            return self;
        };
        let (attr, value) = (self.bound(terms[1]), self.bound(terms[2]));
        let wm = &self.agent.wm;
        let found = wm.wmes_of(id).iter().copied().find(|&h| {
            let wme = wm.wme(h);
            attr.map_or(true, |a| a == wme.attr) && value.map_or(true, |v| v == wme.value)
        });
        let Some(handle) = found else {
            let condition = self.show(&terms);
            self.fail(TraceError::NoMatch { condition });
            return self;
        };

        let wme = self.agent.wm.wme(handle).clone();
        let matched = [wme.id, wme.attr, wme.value];
        let mut ops = [Operand::literal(wme.id); 3];
        for (slot, (term, symbol)) in terms.iter().zip(matched).enumerate() {
            ops[slot] = match *term {
                Term::Lit(sym) => Operand::literal(sym),
                Term::Var(name) => match self.operand(*term) {
                    Some(op) => op,
                    None => self.bind(name, symbol),
                },
            };
        }
        let bt = Backtrace {
            wme: Some(handle),
            level: self.agent.wm.level_of(wme.id).unwrap_or(TOP_GOAL_LEVEL),
            trace: wme.supported_by,
        };
        self.conditions.push(Condition::Positive {
            tests: FieldTests::new(Test::equal(ops[0]), Test::equal(ops[1]), Test::equal(ops[2])),
            acceptable: wme.acceptable,
            bt,
        });
        self
    }

    fn last_test(&mut self, field: Field, what: &'static str) -> Option<&mut Test> {
        if !matches!(self.conditions.last(), Some(Condition::Positive { .. })) {
            self.fail(TraceError::NoCondition { what });
            return None;
        }
        match self.conditions.last_mut() {
            Some(Condition::Positive { tests, .. }) => Some(tests.field_mut(field)),
            _ => None,
        }
    }

    /// Add a relational test to a field of the last positive condition.
    pub fn constraint(mut self, field: Field, relation: Relation, term: Term<'_>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(operand) = self.operand(term) else {
            if let Term::Var(name) = term {
                self.fail(TraceError::UnboundVariable {
                    var: name.to_string(),
                });
            }
            return self;
        };
        if let Some(test) = self.last_test(field, "a constraint") {
            test.add_constraint(Constraint::Relational { relation, operand });
        }
        self
    }

    /// Add a disjunction test to a field of the last positive condition.
    pub fn one_of(mut self, field: Field, options: &[SymbolId]) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some(test) = self.last_test(field, "a disjunction") {
            test.add_constraint(Constraint::Disjunction(options.iter().copied().collect()));
        }
        self
    }

    /// Test for one field of a negated condition. Unbound variables stay
    /// variables, local to the negation.
    fn negated_test(&mut self, term: Term<'_>) -> Test {
        match (self.operand(term), term) {
            (Some(op), _) => Test::equal(op),
            (None, Term::Var(name)) => Test::literal(self.agent.symbols.variable(name)),
            (None, Term::Lit(sym)) => Test::literal(sym),
        }
    }

    fn negated_tests(&mut self, terms: [Term<'_>; 3]) -> FieldTests {
        let id = self.negated_test(terms[0]);
        let attr = self.negated_test(terms[1]);
        let value = self.negated_test(terms[2]);
        FieldTests::new(id, attr, value)
    }

    /// Record a negated condition. The builder trusts that no WME matches it.
    pub fn negated(mut self, terms: [Term<'_>; 3]) -> Self {
        if self.error.is_none() {
            let tests = self.negated_tests(terms);
            self.conditions.push(Condition::negative(tests));
        }
        self
    }

    /// Record a negated conjunction.
    pub fn ncc(mut self, conjuncts: &[[Term<'_>; 3]]) -> Self {
        if self.error.is_none() {
            let inner = conjuncts
                .iter()
                .map(|&terms| Condition::positive(self.negated_tests(terms), Backtrace::default()))
                .collect();
            self.conditions.push(Condition::Ncc(inner));
        }
        self
    }

    fn action_operand(&mut self, term: Term<'_>) -> Operand {
        match (self.operand(term), term) {
            (Some(op), _) => op,
            (None, Term::Lit(sym)) => Operand::literal(sym),
            (None, Term::Var(name)) => {
                let letter = name.chars().next().unwrap_or('n');
                let id = self.agent.symbols.new_identifier(letter);
                self.created.push(id);
                self.bind(name, id)
            }
        }
    }

    /// Add a preference. Unbound variables create new identifiers.
    pub fn prefer(self, kind: PrefKind, terms: [Term<'_>; 3]) -> Self {
        self.push_action(kind, terms, None)
    }

    /// Add a binary preference comparing the value against `referent`.
    pub fn prefer_with_referent(self, kind: PrefKind, terms: [Term<'_>; 3], referent: Term<'_>) -> Self {
        self.push_action(kind, terms, Some(referent))
    }

    fn push_action(mut self, kind: PrefKind, terms: [Term<'_>; 3], referent: Option<Term<'_>>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let fields = [
            self.action_operand(terms[0]),
            self.action_operand(terms[1]),
            self.action_operand(terms[2]),
        ];
        let referent = referent.map(|r| self.action_operand(r));
        self.actions.push(PendingAction {
            kind,
            fields,
            referent,
        });
        self
    }

    /// Record the instantiation, its preferences and the WMEs they create.
    ///
    /// New identifiers start at the match goal's level. Identifiers that a
    /// preference links into a superstate are promoted to that level.
    pub fn fire(self) -> Result<InstId, TraceError> {
        let Self {
            agent,
            rule,
            kind,
            goal,
            conditions,
            actions,
            created,
            error,
            ..
        } = self;
        if let Some(err) = error {
            return Err(err);
        }
        let level: GoalLevel = agent.wm.goal_level(goal).ok_or_else(|| TraceError::NotAGoal {
            goal: agent.symbols.display(goal).to_string(),
        })?;
        for id in created {
            agent.wm.set_level(id, level);
        }

        let inst = agent
            .trace
            .add_instantiation(rule, kind, goal, level, conditions);
        let mut links: Vec<(SymbolId, GoalLevel)> = Vec::new();
        for action in actions {
            let [id, attr, value] = action.fields;
            let pref = agent.trace.add_preference(Preference {
                kind: action.kind,
                id: id.symbol,
                attr: attr.symbol,
                value: value.symbol,
                referent: action.referent.map(|r| r.symbol),
                identities: PrefIdentities {
                    id: id.identity,
                    attr: attr.identity,
                    value: value.identity,
                    referent: action.referent.and_then(|r| r.identity),
                },
                inst,
                level,
                wme: None,
            });
            if action.kind.creates_wme() {
                let handle = match agent.wm.find(id.symbol, attr.symbol, value.symbol, false) {
                    Some(existing) => existing,
                    None => agent
                        .wm
                        .add_wme(&mut agent.symbols, id.symbol, attr.symbol, value.symbol, false),
                };
                agent.trace.pref_mut(pref).wme = Some(handle);
                agent.wm.set_support(handle, pref);
            }
            if let Some(target) = agent.wm.level_of(id.symbol).filter(|&l| l < level) {
                links.extend(
                    [Some(value.symbol), action.referent.map(|r| r.symbol)]
                        .into_iter()
                        .flatten()
                        .map(|sym| (sym, target)),
                );
            }
        }
        for (sym, target) in links {
            if agent.symbols.is_identifier(sym) {
                agent.wm.promote(&agent.symbols, sym, target);
            }
        }
        Ok(inst)
    }
}

#[cfg(test)]
#[path = "tests/builder.rs"]
mod tests;
