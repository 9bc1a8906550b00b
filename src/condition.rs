//! Conditions and field tests as they appear in instantiation traces and in
//! rules under construction.
//!
//! A field test is normalized to at most one equality test plus a list of
//! other constraints. In an instantiated condition the equality operand is the
//! matched symbol; in a variablized condition it is a rule variable or a literal.

use crate::identity::{Identity, IdentityRegistry};
use crate::instantiation::PrefId;
use crate::symbol::{SymbolId, SymbolTable};
use crate::wm::{GoalLevel, WmeId};
use rustc_hash::FxHasher;
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One of the three fields of a working-memory test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Attr,
    Value,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Id, Field::Attr, Field::Value];
}

/// A symbol together with the identity it carried in its instantiation.
///
/// `identity == None` marks a literal: the rule that produced it tested or
/// wrote that exact symbol, so it never generalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub symbol: SymbolId,
    pub identity: Option<Identity>,
}

impl Operand {
    pub fn literal(symbol: SymbolId) -> Self {
        Self {
            symbol,
            identity: None,
        }
    }

    pub fn with_identity(symbol: SymbolId, identity: Identity) -> Self {
        Self {
            symbol,
            identity: Some(identity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    SameType,
}

impl Relation {
    pub fn as_str(self) -> &'static str {
        match self {
            Relation::NotEqual => "<>",
            Relation::Less => "<",
            Relation::Greater => ">",
            Relation::LessOrEqual => "<=",
            Relation::GreaterOrEqual => ">=",
            Relation::SameType => "<=>",
        }
    }
}

/// A non-equality test attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constraint {
    Relational { relation: Relation, operand: Operand },
    Disjunction(SmallVec<[SymbolId; 4]>),
    /// The field must be a goal (`state` in printed rules).
    Goal,
}

/// Normalized test on one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Test {
    pub equality: Option<Operand>,
    pub constraints: SmallVec<[Constraint; 2]>,
}

impl Test {
    pub fn equal(operand: Operand) -> Self {
        Self {
            equality: Some(operand),
            constraints: SmallVec::new(),
        }
    }

    pub fn literal(symbol: SymbolId) -> Self {
        Self::equal(Operand::literal(symbol))
    }

    /// Symbol of the equality test, if any.
    pub fn referent(&self) -> Option<SymbolId> {
        self.equality.map(|op| op.symbol)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.equality.and_then(|op| op.identity)
    }

    /// Add a constraint unless an identical one is already present.
    /// Returns whether the test changed.
    pub fn add_constraint(&mut self, constraint: Constraint) -> bool {
        if self.constraints.contains(&constraint) {
            return false;
        }
        self.constraints.push(constraint);
        true
    }

    pub fn has_goal_test(&self) -> bool {
        self.constraints.contains(&Constraint::Goal)
    }

    pub fn is_blank(&self) -> bool {
        self.equality.is_none() && self.constraints.is_empty()
    }

    /// Every operand in this test, equality first.
    pub fn operands(&self) -> impl Iterator<Item = &Operand> + '_ {
        self.equality
            .iter()
            .chain(self.constraints.iter().filter_map(|c| match c {
                Constraint::Relational { operand, .. } => Some(operand),
                _ => None,
            }))
    }
}

/// Tests on the identifier, attribute and value of a WME.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldTests {
    pub id: Test,
    pub attr: Test,
    pub value: Test,
}

impl FieldTests {
    pub fn new(id: Test, attr: Test, value: Test) -> Self {
        Self { id, attr, value }
    }

    pub fn field(&self, field: Field) -> &Test {
        match field {
            Field::Id => &self.id,
            Field::Attr => &self.attr,
            Field::Value => &self.value,
        }
    }

    pub fn field_mut(&mut self, field: Field) -> &mut Test {
        match field {
            Field::Id => &mut self.id,
            Field::Attr => &mut self.attr,
            Field::Value => &mut self.value,
        }
    }
}

/// Where a positive condition's match came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Backtrace {
    /// The WME the condition matched.
    pub wme: Option<WmeId>,
    /// Goal level of the WME's identifier at match time.
    pub level: GoalLevel,
    /// Preference that supports the WME, if a rule created it.
    pub trace: Option<PrefId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Positive {
        tests: FieldTests,
        acceptable: bool,
        bt: Backtrace,
    },
    Negative {
        tests: FieldTests,
        acceptable: bool,
    },
    /// Negated conjunction.
    Ncc(Vec<Condition>),
}

impl Condition {
    pub fn positive(tests: FieldTests, bt: Backtrace) -> Self {
        Condition::Positive {
            tests,
            acceptable: false,
            bt,
        }
    }

    pub fn negative(tests: FieldTests) -> Self {
        Condition::Negative {
            tests,
            acceptable: false,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Condition::Positive { .. })
    }

    pub fn tests(&self) -> Option<&FieldTests> {
        match self {
            Condition::Positive { tests, .. } | Condition::Negative { tests, .. } => Some(tests),
            Condition::Ncc(_) => None,
        }
    }

    pub fn tests_mut(&mut self) -> Option<&mut FieldTests> {
        match self {
            Condition::Positive { tests, .. } | Condition::Negative { tests, .. } => Some(tests),
            Condition::Ncc(_) => None,
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Condition::Positive { bt, .. } => Some(bt),
            _ => None,
        }
    }

    pub fn id_referent(&self) -> Option<SymbolId> {
        self.tests().and_then(|t| t.id.referent())
    }

    pub fn attr_referent(&self) -> Option<SymbolId> {
        self.tests().and_then(|t| t.attr.referent())
    }

    pub fn value_referent(&self) -> Option<SymbolId> {
        self.tests().and_then(|t| t.value.referent())
    }

    /// Visit every operand, descending into negated conjunctions.
    pub fn for_each_operand(&self, f: &mut impl FnMut(&Operand)) {
        match self {
            Condition::Positive { tests, .. } | Condition::Negative { tests, .. } => {
                for field in Field::ALL {
                    for op in tests.field(field).operands() {
                        f(op);
                    }
                }
            }
            Condition::Ncc(conds) => {
                for cond in conds {
                    cond.for_each_operand(f);
                }
            }
        }
    }

    /// Identities mentioned anywhere in the condition.
    pub fn identities(&self) -> Vec<Identity> {
        let mut out = Vec::new();
        self.for_each_operand(&mut |op| {
            if let Some(id) = op.identity {
                out.push(id);
            }
        });
        out
    }

    /// Hash of the condition's shape: polarity plus the equality referents of
    /// every field. Constraints and identities do not participate, so conditions
    /// that only differ there land in the same bucket.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash_shape(&mut hasher);
        hasher.finish()
    }

    fn hash_shape(&self, hasher: &mut FxHasher) {
        match self {
            Condition::Positive {
                tests, acceptable, ..
            } => {
                0u8.hash(hasher);
                acceptable.hash(hasher);
                hash_referents(tests, hasher);
            }
            Condition::Negative { tests, acceptable } => {
                1u8.hash(hasher);
                acceptable.hash(hasher);
                hash_referents(tests, hasher);
            }
            Condition::Ncc(conds) => {
                2u8.hash(hasher);
                conds.len().hash(hasher);
                for cond in conds {
                    cond.hash_shape(hasher);
                }
            }
        }
    }

    /// Whether two conditions test the same triple with the same polarity.
    pub fn same_structure(&self, other: &Condition) -> bool {
        match (self, other) {
            (
                Condition::Positive {
                    tests: a,
                    acceptable: acc_a,
                    ..
                },
                Condition::Positive {
                    tests: b,
                    acceptable: acc_b,
                    ..
                },
            ) => acc_a == acc_b && same_referents(a, b),
            (
                Condition::Negative {
                    tests: a,
                    acceptable: acc_a,
                },
                Condition::Negative {
                    tests: b,
                    acceptable: acc_b,
                },
            ) => acc_a == acc_b && equivalent_tests(a, b),
            (Condition::Ncc(a), Condition::Ncc(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equivalent(y))
            }
            _ => false,
        }
    }

    /// Full equality ignoring identities and backtrace records.
    pub fn equivalent(&self, other: &Condition) -> bool {
        match (self, other) {
            (
                Condition::Positive {
                    tests: a,
                    acceptable: acc_a,
                    ..
                },
                Condition::Positive {
                    tests: b,
                    acceptable: acc_b,
                    ..
                },
            ) => acc_a == acc_b && equivalent_tests(a, b),
            _ => self.same_structure(other),
        }
    }

    /// Fold `other` into `self`, which must have the same structure.
    ///
    /// Positive conditions merge their constraints and join the identities of
    /// their equality tests so both copies generalize to the same variables.
    /// Returns whether anything was added to `self`.
    pub fn merge_from(&mut self, other: &Condition, identities: &mut IdentityRegistry) -> bool {
        debug_assert!(self.same_structure(other));
        let (Condition::Positive { tests, .. }, Condition::Positive { tests: incoming, .. }) =
            (self, other)
        else {
            return false;
        };
        let mut changed = false;
        for field in Field::ALL {
            let target = tests.field_mut(field);
            let source = incoming.field(field);
            match (target.identity(), source.identity()) {
                (Some(a), Some(b)) => {
                    identities.union(a, b);
                }
                (Some(a), None) => identities.literalize(a),
                (None, Some(b)) => identities.literalize(b),
                (None, None) => {}
            }
            for constraint in &source.constraints {
                changed |= target.add_constraint(constraint.clone());
            }
        }
        changed
    }

    /// Borrow the condition for printing.
    pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> ConditionDisplay<'a> {
        ConditionDisplay {
            cond: self,
            symbols,
        }
    }
}

fn hash_referents(tests: &FieldTests, hasher: &mut FxHasher) {
    for field in Field::ALL {
        tests.field(field).referent().hash(hasher);
    }
}

fn same_referents(a: &FieldTests, b: &FieldTests) -> bool {
    Field::ALL
        .iter()
        .all(|&f| a.field(f).referent() == b.field(f).referent())
}

fn strip_identity(constraint: &Constraint) -> Constraint {
    match constraint {
        Constraint::Relational { relation, operand } => Constraint::Relational {
            relation: *relation,
            operand: Operand::literal(operand.symbol),
        },
        other => other.clone(),
    }
}

fn equivalent_tests(a: &FieldTests, b: &FieldTests) -> bool {
    Field::ALL.iter().all(|&f| {
        let (x, y) = (a.field(f), b.field(f));
        x.referent() == y.referent()
            && x.constraints.len() == y.constraints.len()
            && x
                .constraints
                .iter()
                .all(|c| y.constraints.iter().any(|d| strip_identity(c) == strip_identity(d)))
    })
}

/// A condition of the rule being built, paired with its still-instantiated twin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCondition {
    pub instantiated: Condition,
    pub variablized: Condition,
}

impl ChunkCondition {
    /// Start a pair whose variablized half is a copy of the instantiated one.
    pub fn new(instantiated: Condition) -> Self {
        Self {
            variablized: instantiated.clone(),
            instantiated,
        }
    }
}

/// Display adapter rendering a condition in rule syntax.
pub struct ConditionDisplay<'a> {
    cond: &'a Condition,
    symbols: &'a SymbolTable,
}

impl ConditionDisplay<'_> {
    fn write_test(&self, f: &mut fmt::Formatter<'_>, test: &Test) -> fmt::Result {
        let extra: SmallVec<[&Constraint; 2]> = test
            .constraints
            .iter()
            .filter(|c| !matches!(c, Constraint::Goal))
            .collect();
        if extra.is_empty() {
            return match test.equality {
                Some(op) => write!(f, "{}", self.symbols.display(op.symbol)),
                None => f.write_str("{ }"),
            };
        }
        f.write_str("{")?;
        if let Some(op) = test.equality {
            write!(f, " {}", self.symbols.display(op.symbol))?;
        }
        for constraint in extra {
            match constraint {
                Constraint::Relational { relation, operand } => write!(
                    f,
                    " {} {}",
                    relation.as_str(),
                    self.symbols.display(operand.symbol)
                )?,
                Constraint::Disjunction(options) => {
                    f.write_str(" <<")?;
                    for sym in options {
                        write!(f, " {}", self.symbols.display(*sym))?;
                    }
                    f.write_str(" >>")?;
                }
                Constraint::Goal => {}
            }
        }
        f.write_str(" }")
    }

    fn write_triple(
        &self,
        f: &mut fmt::Formatter<'_>,
        tests: &FieldTests,
        acceptable: bool,
    ) -> fmt::Result {
        f.write_str("(")?;
        if tests.id.has_goal_test() {
            f.write_str("state ")?;
        }
        self.write_test(f, &tests.id)?;
        f.write_str(" ^")?;
        self.write_test(f, &tests.attr)?;
        f.write_str(" ")?;
        self.write_test(f, &tests.value)?;
        if acceptable {
            f.write_str(" +")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for ConditionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cond {
            Condition::Positive {
                tests, acceptable, ..
            } => self.write_triple(f, tests, *acceptable),
            Condition::Negative { tests, acceptable } => {
                f.write_str("-")?;
                self.write_triple(f, tests, *acceptable)
            }
            Condition::Ncc(conds) => {
                f.write_str("-{")?;
                for cond in conds {
                    write!(f, " {}", cond.display(self.symbols))?;
                }
                f.write_str(" }")
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/condition.rs"]
mod tests;
