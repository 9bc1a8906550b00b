//! Dependency analysis over instantiation traces.
//!
//! Starting from the instantiations that produced a pass's results, every
//! matched condition is sorted into one of three groups:
//!
//! - **grounds**: its identifier is reachable from a goal at or above the
//!   grounds level, so the learned rule can test it directly
//! - **potentials**: it tests superstate structure that is not (yet) connected
//!   to any grounded identifier
//! - **locals**: it tests sub-goal structure and must be explained by the
//!   instantiation that created its WME
//!
//! Locals are traced recursively. Potentials that become connected along the
//! way are promoted into the grounds; potentials created by sub-goal rules are
//! traced like locals. Negated conditions are kept only when every identifier
//! they test is grounded.

use crate::cond_set::{ChunkConditionSet, Insert};
use crate::condition::{ChunkCondition, Condition, Constraint, Field};
use crate::config::ChunkConfig;
use crate::identity::{Identity, IdentityRegistry};
use crate::instantiation::{InstId, PrefId, Preference, TraceStore};
use crate::symbol::{FxSet, SymbolId, SymbolTable};
use crate::trace::{debug, trace};
use crate::wm::{GoalLevel, WorkingMemory, TOP_GOAL_LEVEL};
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacktracePhase {
    Idle,
    CollectingGrounds,
    TracingLocals,
    TracingPotentials,
    Success,
    NoGrounds,
}

/// Read-only collaborators of a backtrace.
pub struct TraceInputs<'a> {
    pub symbols: &'a SymbolTable,
    pub wm: &'a WorkingMemory,
    pub trace: &'a TraceStore,
    pub config: &'a ChunkConfig,
}

/// Counters describing one backtrace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BacktraceSummary {
    pub instantiations: u64,
    pub grounds: usize,
    pub merged: u64,
    pub potentials_promoted: u64,
    pub potentials_dropped: u64,
    pub locals_discarded: u64,
    pub negations_kept: u64,
    pub negations_dropped: u64,
    /// A local goal condition tested `^quiescence t`.
    pub tested_quiescence: bool,
    /// A negation tested structure that is not grounded.
    pub tested_local_negation: bool,
}

/// What a successful backtrace hands to variablization.
#[derive(Debug, Clone)]
pub struct BacktraceOutcome {
    /// Grounds in discovery order, then grounded negations.
    pub conditions: Vec<ChunkCondition>,
    /// Non-equality tests seen on local conditions, keyed by the identity of
    /// the field they constrain.
    pub constraints: Vec<(Identity, Constraint)>,
    pub summary: BacktraceSummary,
}

pub struct Backtracer {
    phase: BacktracePhase,
    grounds_level: GoalLevel,
    grounds: ChunkConditionSet,
    locals: Vec<Condition>,
    potentials: Vec<Condition>,
    negated: Vec<Condition>,
    seen: FxSet<InstId>,
    /// Identifiers reachable from the grounds.
    grounds_tc: FxSet<SymbolId>,
    constraints: Vec<(Identity, Constraint)>,
    summary: BacktraceSummary,
}

impl Backtracer {
    pub fn new() -> Self {
        Self {
            phase: BacktracePhase::Idle,
            grounds_level: TOP_GOAL_LEVEL,
            grounds: ChunkConditionSet::new(),
            locals: Vec::new(),
            potentials: Vec::new(),
            negated: Vec::new(),
            seen: FxSet::default(),
            grounds_tc: FxSet::default(),
            constraints: Vec::new(),
            summary: BacktraceSummary::default(),
        }
    }

    pub fn phase(&self) -> BacktracePhase {
        self.phase
    }

    /// Drop all per-pass state.
    pub fn reset(&mut self) {
        self.phase = BacktracePhase::Idle;
        self.grounds.clear();
        self.locals.clear();
        self.potentials.clear();
        self.negated.clear();
        self.seen.clear();
        self.grounds_tc.clear();
        self.constraints.clear();
        self.summary = BacktraceSummary::default();
    }

    /// Backtrace from the instantiations that made the results.
    ///
    /// Returns `None` when nothing could be grounded.
    pub fn run(
        &mut self,
        cx: &TraceInputs<'_>,
        identities: &mut IdentityRegistry,
        starts: &[InstId],
        grounds_level: GoalLevel,
    ) -> Option<BacktraceOutcome> {
        self.reset();
        self.grounds_level = grounds_level;
        for level in TOP_GOAL_LEVEL..=grounds_level {
            if let Some(goal) = cx.wm.goal_at(level) {
                self.grounds_tc.insert(goal);
            }
        }

        self.phase = BacktracePhase::CollectingGrounds;
        for &inst in starts {
            self.backtrace_through_instantiation(cx, identities, inst, None);
        }

        loop {
            self.phase = BacktracePhase::TracingLocals;
            self.trace_locals(cx, identities);
            self.trace_grounded_potentials(cx, identities);
            self.phase = BacktracePhase::TracingPotentials;
            if !self.trace_ungrounded_potentials(cx, identities) {
                break;
            }
        }

        for cond in mem::take(&mut self.potentials) {
            if cx.config.keep_ungrounded_potentials {
                self.add_ground(cx, identities, cond);
                self.summary.potentials_promoted += 1;
            } else {
                self.summary.potentials_dropped += 1;
            }
        }

        if self.grounds.is_empty() {
            self.phase = BacktracePhase::NoGrounds;
            debug!(
                instantiations = self.summary.instantiations,
                "backtrace found no grounds"
            );
            return None;
        }

        let negations = self.ground_negations(cx);
        self.summary.grounds = self.grounds.len();
        self.summary.merged = self.grounds.merged_count();
        let mut conditions = self.grounds.drain();
        conditions.extend(negations);
        self.phase = BacktracePhase::Success;
        debug!(
            grounds = self.summary.grounds,
            instantiations = self.summary.instantiations,
            "backtrace finished"
        );
        Some(BacktraceOutcome {
            conditions,
            constraints: mem::take(&mut self.constraints),
            summary: self.summary.clone(),
        })
    }

    /// Classify the conditions of one instantiation.
    ///
    /// When reached through a local condition, the condition's identities are
    /// first unified with those of the preference that made its WME.
    pub fn backtrace_through_instantiation(
        &mut self,
        cx: &TraceInputs<'_>,
        identities: &mut IdentityRegistry,
        inst_id: InstId,
        via: Option<(&Condition, PrefId)>,
    ) {
        if let Some((cond, pref)) = via {
            unify_with_preference(identities, cond, cx.trace.pref(pref));
        }
        if !self.seen.insert(inst_id) {
            return;
        }
        let inst = cx.trace.inst(inst_id);
        self.summary.instantiations += 1;
        trace!(rule = %inst.rule, inst = inst_id.raw(), "backtracing");

        // Identifiers this instantiation connects to the grounds.
        let mut local_tc: FxSet<SymbolId> = FxSet::default();
        loop {
            let mut changed = false;
            for cond in &inst.conditions {
                let Condition::Positive { tests, .. } = cond else {
                    continue;
                };
                let (Some(id), Some(value)) = (tests.id.referent(), tests.value.referent()) else {
                    continue;
                };
                let reached = self.grounds_tc.contains(&id) || local_tc.contains(&id);
                if reached
                    && cx.symbols.is_identifier(value)
                    && !self.grounds_tc.contains(&value)
                    && local_tc.insert(value)
                {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for cond in &inst.conditions {
            match cond {
                Condition::Positive { bt, .. } => {
                    let grounded = cond
                        .id_referent()
                        .is_some_and(|id| self.grounds_tc.contains(&id) || local_tc.contains(&id));
                    if grounded {
                        self.add_ground(cx, identities, cond.clone());
                    } else if bt.level <= self.grounds_level {
                        self.potentials.push(cond.clone());
                    } else {
                        self.cache_constraints(cond);
                        self.locals.push(cond.clone());
                    }
                }
                _ => self.negated.push(cond.clone()),
            }
        }
    }

    /// Trace every local condition into the instantiation that created its WME.
    pub fn trace_locals(&mut self, cx: &TraceInputs<'_>, identities: &mut IdentityRegistry) {
        while !self.locals.is_empty() {
            for cond in mem::take(&mut self.locals) {
                let bt = cond.backtrace().copied().unwrap_or_default();
                if let Some(pref) = self.traceable(cx, bt.trace) {
                    let inst = cx.trace.pref(pref).inst;
                    self.backtrace_through_instantiation(cx, identities, inst, Some((&cond, pref)));
                    continue;
                }
                if cond.id_referent().is_some_and(|id| cx.wm.is_goal(id)) && is_quiescence_test(cx, &cond) {
                    trace!("local condition tests quiescence");
                    self.summary.tested_quiescence = true;
                }
                self.summary.locals_discarded += 1;
            }
        }
    }

    /// Promote potentials whose identifier the grounds now reach.
    pub fn trace_grounded_potentials(&mut self, cx: &TraceInputs<'_>, identities: &mut IdentityRegistry) {
        loop {
            let before = self.potentials.len();
            for cond in mem::take(&mut self.potentials) {
                let reached = cond
                    .id_referent()
                    .is_some_and(|id| self.grounds_tc.contains(&id));
                if reached {
                    self.add_ground(cx, identities, cond);
                    self.summary.potentials_promoted += 1;
                } else {
                    self.potentials.push(cond);
                }
            }
            if self.potentials.len() == before {
                break;
            }
        }
    }

    /// Trace potentials that sub-goal rules created. Returns whether any were
    /// traced, in which case new locals and potentials may be pending.
    pub fn trace_ungrounded_potentials(
        &mut self,
        cx: &TraceInputs<'_>,
        identities: &mut IdentityRegistry,
    ) -> bool {
        let mut progressed = false;
        for cond in mem::take(&mut self.potentials) {
            let bt = cond.backtrace().copied().unwrap_or_default();
            match self.traceable(cx, bt.trace) {
                Some(pref) => {
                    progressed = true;
                    let inst = cx.trace.pref(pref).inst;
                    self.backtrace_through_instantiation(cx, identities, inst, Some((&cond, pref)));
                }
                None => self.potentials.push(cond),
            }
        }
        progressed
    }

    /// A supporting preference worth tracing: made by a live sub-goal rule.
    fn traceable(&self, cx: &TraceInputs<'_>, pref: Option<PrefId>) -> Option<PrefId> {
        let pref = pref?;
        let p = cx.trace.pref(pref);
        let live = !cx.trace.inst(p.inst).retracted;
        (live && p.level > self.grounds_level).then_some(pref)
    }

    fn add_ground(&mut self, cx: &TraceInputs<'_>, identities: &mut IdentityRegistry, cond: Condition) {
        if let Some(value) = cond.value_referent() {
            if cx.symbols.is_identifier(value) {
                self.grounds_tc.insert(value);
            }
        }
        let registry = if cx.config.merge_conditions {
            Some(identities)
        } else {
            None
        };
        if let Insert::Merged(_) = self.grounds.insert(ChunkCondition::new(cond), registry) {
            trace!("merged duplicate ground");
        }
    }

    fn cache_constraints(&mut self, cond: &Condition) {
        let Some(tests) = cond.tests() else { return };
        for field in Field::ALL {
            let test = tests.field(field);
            let Some(identity) = test.identity() else {
                continue;
            };
            for constraint in &test.constraints {
                if !matches!(constraint, Constraint::Goal) {
                    self.constraints.push((identity, constraint.clone()));
                }
            }
        }
    }

    fn ground_negations(&mut self, cx: &TraceInputs<'_>) -> Vec<ChunkCondition> {
        let mut kept = ChunkConditionSet::new();
        for cond in mem::take(&mut self.negated) {
            let mut grounded = true;
            cond.for_each_operand(&mut |op| {
                if cx.symbols.is_identifier(op.symbol) && !self.grounds_tc.contains(&op.symbol) {
                    grounded = false;
                }
            });
            if grounded {
                if let Insert::Added(_) = kept.insert(ChunkCondition::new(cond), None) {
                    self.summary.negations_kept += 1;
                }
            } else {
                self.summary.negations_dropped += 1;
                self.summary.tested_local_negation = true;
            }
        }
        kept.drain()
    }
}

impl Default for Backtracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Join each field's identity with the identity the preference gave it.
/// A literal on either side literalizes the other.
fn unify_with_preference(identities: &mut IdentityRegistry, cond: &Condition, pref: &Preference) {
    let Some(tests) = cond.tests() else { return };
    let pairs = [
        (&tests.id, pref.identities.id),
        (&tests.attr, pref.identities.attr),
        (&tests.value, pref.identities.value),
    ];
    for (test, pref_identity) in pairs {
        if test.equality.is_none() {
            continue;
        }
        match (test.identity(), pref_identity) {
            (Some(a), Some(b)) => {
                identities.union(a, b);
            }
            (Some(a), None) => identities.literalize(a),
            (None, Some(b)) => identities.literalize(b),
            (None, None) => {}
        }
    }
}

fn is_quiescence_test(cx: &TraceInputs<'_>, cond: &Condition) -> bool {
    let Condition::Positive {
        tests, acceptable, ..
    } = cond
    else {
        return false;
    };
    let quiescence = cx.symbols.find_str_constant("quiescence");
    let t = cx.symbols.find_str_constant("t");
    !acceptable
        && quiescence.is_some()
        && tests.attr.referent() == quiescence
        && tests.value.referent() == t
}

#[cfg(test)]
#[path = "tests/backtrace.rs"]
mod tests;
