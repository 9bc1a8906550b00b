//! Connectivity check and condition ordering for learned rules.
//!
//! A rule is valid when every positive condition can be reached from the goal
//! through equality tests, every negation tests a bound identifier, every
//! constraint operand is bound, and every action acts on a bound identifier
//! (or one another action creates).

use crate::condition::{ChunkCondition, Condition, Constraint, Field};
use crate::error::ValidationError;
use crate::rule::Action;
use crate::symbol::{FxSet, SymbolId, SymbolTable};

/// Result of ordering a condition list from a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connectivity {
    /// Indices of conditions in match order: connected positives, then
    /// connected negations.
    pub order: Vec<usize>,
    /// Indices of conditions that could not be connected.
    pub dangling: Vec<usize>,
    pub bound: FxSet<SymbolId>,
}

fn bindable(symbols: &SymbolTable, sym: SymbolId) -> bool {
    symbols.is_variable(sym) || symbols.is_identifier(sym)
}

fn bind_equalities(symbols: &SymbolTable, cond: &Condition, bound: &mut FxSet<SymbolId>) {
    if let Some(tests) = cond.tests() {
        for field in Field::ALL {
            if let Some(sym) = tests.field(field).referent() {
                if bindable(symbols, sym) {
                    bound.insert(sym);
                }
            }
        }
    }
}

/// Greedily order positive conditions so each one's identifier is bound by
/// an earlier condition. Returns the picked indices.
fn order_positives<'a>(
    symbols: &SymbolTable,
    conds: impl Iterator<Item = (usize, &'a Condition)>,
    bound: &mut FxSet<SymbolId>,
) -> (Vec<usize>, Vec<usize>) {
    let mut remaining: Vec<(usize, &Condition)> = conds.collect();
    let mut order = Vec::with_capacity(remaining.len());
    loop {
        let next = remaining.iter().position(|(_, cond)| {
            cond.id_referent()
                .is_some_and(|id| !bindable(symbols, id) || bound.contains(&id))
        });
        let Some(pos) = next else { break };
        let (idx, cond) = remaining.remove(pos);
        bind_equalities(symbols, cond, bound);
        order.push(idx);
    }
    (order, remaining.into_iter().map(|(idx, _)| idx).collect())
}

fn negation_connected(symbols: &SymbolTable, cond: &Condition, bound: &FxSet<SymbolId>) -> bool {
    match cond {
        Condition::Negative { .. } | Condition::Positive { .. } => cond
            .id_referent()
            .is_some_and(|id| !bindable(symbols, id) || bound.contains(&id)),
        Condition::Ncc(inner) => {
            let mut local = bound.clone();
            let (_, dangling) = order_positives(symbols, inner.iter().enumerate(), &mut local);
            dangling.is_empty()
        }
    }
}

/// Order the variablized conditions from `root`.
pub fn connect(symbols: &SymbolTable, conds: &[ChunkCondition], root: SymbolId) -> Connectivity {
    let mut bound = FxSet::default();
    bound.insert(root);
    let positives = conds
        .iter()
        .enumerate()
        .filter(|(_, c)| c.variablized.is_positive())
        .map(|(i, c)| (i, &c.variablized));
    let (mut order, mut dangling) = order_positives(symbols, positives, &mut bound);
    for (idx, cond) in conds.iter().enumerate() {
        if cond.variablized.is_positive() {
            continue;
        }
        if negation_connected(symbols, &cond.variablized, &bound) {
            order.push(idx);
        } else {
            dangling.push(idx);
        }
    }
    dangling.sort_unstable();
    Connectivity {
        order,
        dangling,
        bound,
    }
}

/// Identifiers of the instantiated conditions that could not be connected.
pub fn dangling_identifiers(
    symbols: &SymbolTable,
    conds: &[ChunkCondition],
    root: SymbolId,
) -> Vec<SymbolId> {
    let mut out = Vec::new();
    for idx in connect(symbols, conds, root).dangling {
        let cond = &conds[idx].instantiated;
        let mut first = None;
        match cond {
            Condition::Ncc(inner) => {
                for c in inner {
                    c.for_each_operand(&mut |op| {
                        if first.is_none() && symbols.is_identifier(op.symbol) {
                            first = Some(op.symbol);
                        }
                    });
                }
            }
            _ => first = cond.id_referent().filter(|&id| symbols.is_identifier(id)),
        }
        if let Some(id) = first {
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    out
}

fn unbound_actions(symbols: &SymbolTable, actions: &[Action], bound: &FxSet<SymbolId>) -> Vec<usize> {
    let created: FxSet<SymbolId> = actions
        .iter()
        .flat_map(|a| [a.value].into_iter().chain(a.referent))
        .filter(|&s| bindable(symbols, s))
        .collect();
    actions
        .iter()
        .enumerate()
        .filter(|(_, a)| bindable(symbols, a.id) && !bound.contains(&a.id) && !created.contains(&a.id))
        .map(|(i, _)| i)
        .collect()
}

/// Indices of actions whose identifier no condition binds and no other
/// action creates.
pub fn unconnected_actions(
    symbols: &SymbolTable,
    conds: &[ChunkCondition],
    actions: &[Action],
    root: SymbolId,
) -> Vec<usize> {
    let bound = connect(symbols, conds, root).bound;
    unbound_actions(symbols, actions, &bound)
}

/// Validate a rule and reorder its conditions into match order.
pub fn validate(
    symbols: &SymbolTable,
    conds: &mut Vec<ChunkCondition>,
    actions: &[Action],
    root: SymbolId,
) -> Result<(), ValidationError> {
    if !conds.iter().any(|c| c.variablized.is_positive()) {
        return Err(ValidationError::NoConditions);
    }
    let Connectivity {
        order,
        dangling,
        bound,
    } = connect(symbols, conds, root);
    if !dangling.is_empty() {
        let mut names: Vec<String> = Vec::new();
        for idx in dangling {
            if let Some(id) = conds[idx].variablized.id_referent() {
                let name = symbols.display(id).to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        return Err(ValidationError::Unconnected { dangling: names });
    }

    for cond in conds.iter().filter(|c| c.variablized.is_positive()) {
        let Some(tests) = cond.variablized.tests() else {
            continue;
        };
        for field in Field::ALL {
            for constraint in &tests.field(field).constraints {
                if let Constraint::Relational { operand, .. } = constraint {
                    if bindable(symbols, operand.symbol) && !bound.contains(&operand.symbol) {
                        return Err(ValidationError::UnboundConstraint {
                            variable: symbols.display(operand.symbol).to_string(),
                        });
                    }
                }
            }
        }
    }

    if let Some(&index) = unbound_actions(symbols, actions, &bound).first() {
        return Err(ValidationError::UnconnectedAction {
            variable: symbols.display(actions[index].id).to_string(),
        });
    }

    let mut slots: Vec<Option<ChunkCondition>> = conds.drain(..).map(Some).collect();
    conds.extend(order.into_iter().filter_map(|idx| slots[idx].take()));
    Ok(())
}

#[cfg(test)]
#[path = "tests/reorder.rs"]
mod tests;
