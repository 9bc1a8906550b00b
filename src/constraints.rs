//! Attach constraints seen during backtrace to the rule being built.
//!
//! A constraint that tested a local condition is carried over to the
//! condition and field that holds the equality test of the constrained
//! identity's class (its operational site). Must run after pass 1 of
//! variablization, which records the sites, and before pass 2, which resolves
//! the constraint operands.

use crate::condition::{ChunkCondition, Constraint};
use crate::identity::{Identity, IdentityRegistry};
use crate::trace::trace;

/// Returns the number of constraints attached.
pub fn attach_constraints(
    identities: &IdentityRegistry,
    conds: &mut [ChunkCondition],
    cached: &[(Identity, Constraint)],
) -> usize {
    let mut attached = 0;
    for (identity, constraint) in cached {
        if identities.is_literalized(*identity) {
            continue;
        }
        let Some(site) = identities.operational(*identity) else {
            trace!(identity = identity.raw(), "constraint has no operational site");
            continue;
        };
        let Some(cond) = conds.get_mut(site.condition) else {
            continue;
        };
        let mut added = false;
        if let Some(tests) = cond.instantiated.tests_mut() {
            added |= tests.field_mut(site.field).add_constraint(constraint.clone());
        }
        if let Some(tests) = cond.variablized.tests_mut() {
            added |= tests.field_mut(site.field).add_constraint(constraint.clone());
        }
        if added {
            attached += 1;
        }
    }
    attached
}

#[cfg(test)]
#[path = "tests/constraints.rs"]
mod tests;
