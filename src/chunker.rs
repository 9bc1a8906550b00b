//! The learning pass: from a firing that produced superstate results to an
//! installed rule.
//!
//! A pass collects the results of the firing, backtraces from the
//! instantiations that made them, variablizes the grounds into a chunk (or
//! keeps them as a justification), validates the rule, repairs it once if it
//! lost its connection to the goal, and installs it. The identity registry,
//! variablization tables and backtrace state are owned here and cleaned up at
//! the end of every pass, whatever its outcome.

use crate::backtrace::{BacktraceOutcome, Backtracer, TraceInputs};
use crate::condition::{ChunkCondition, Condition, Constraint, Field, Operand};
use crate::config::{ChunkConfig, LearningMode};
use crate::constraints::attach_constraints;
use crate::error::{ChunkError, ChunkResult, ValidationError};
use crate::explain::{ChunkSummary, ExplanationEvent, ExplanationSink};
use crate::identity::{Identity, IdentityRegistry};
use crate::instantiation::{InstId, PrefId, PrefIdentities, Preference, TraceStore};
use crate::reorder::{dangling_identifiers, unconnected_actions, validate};
use crate::repair::{RepairEngine, RepairVariablizer};
use crate::rule::{Action, Production, ProductionId, ProductionMemory, RuleKind};
use crate::stats::{ChunkStats, StatsReport};
use crate::symbol::{FxSet, SymbolId, SymbolTable};
use crate::trace::{debug, debug_span, info, trace};
use crate::variablize::VariablizationManager;
use crate::wm::{GoalLevel, WorkingMemory, TOP_GOAL_LEVEL};
use std::collections::VecDeque;

/// Collaborators a learning pass reads and writes.
pub struct ChunkContext<'a> {
    pub symbols: &'a mut SymbolTable,
    pub wm: &'a mut WorkingMemory,
    pub trace: &'a mut TraceStore,
    pub productions: &'a mut ProductionMemory,
    pub sink: &'a mut dyn ExplanationSink,
    pub decision_cycle: u64,
}

/// A rule installed by a learning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnedRule {
    pub id: ProductionId,
    pub name: String,
    pub kind: RuleKind,
    /// Instantiation of the new rule that now supports the results.
    pub inst: InstId,
    pub repaired: bool,
}

/// The rule under construction.
struct Draft {
    kind: RuleKind,
    conditions: Vec<ChunkCondition>,
    actions: Vec<Action>,
    /// Symbol the conditions must connect to: the goal's variable for chunks,
    /// the goal itself for justifications.
    root: SymbolId,
}

pub struct Chunker {
    config: ChunkConfig,
    identities: IdentityRegistry,
    vars: VariablizationManager,
    backtracer: Backtracer,
    repair: RepairEngine,
    stats: ChunkStats,
    chunk_count: u64,
    justification_count: u64,
    learned_this_cycle: u64,
    force_learn: FxSet<SymbolId>,
    dont_learn: FxSet<SymbolId>,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config,
            identities: IdentityRegistry::new(),
            vars: VariablizationManager::new(),
            backtracer: Backtracer::new(),
            repair: RepairEngine::new(),
            stats: ChunkStats::new(),
            chunk_count: 0,
            justification_count: 0,
            learned_this_cycle: 0,
            force_learn: FxSet::default(),
            dont_learn: FxSet::default(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ChunkConfig {
        &mut self.config
    }

    /// Get a reference to the identity registry.
    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Get a mutable reference to the identity registry.
    pub fn identities_mut(&mut self) -> &mut IdentityRegistry {
        &mut self.identities
    }

    pub fn stats(&self) -> StatsReport {
        self.stats.report()
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Learn chunks in `goal` even when the mode is `only`.
    pub fn set_force_learn(&mut self, goal: SymbolId, on: bool) {
        if on {
            self.force_learn.insert(goal);
        } else {
            self.force_learn.remove(&goal);
        }
    }

    /// Learn only justifications in `goal` when the mode is `except`.
    pub fn set_dont_learn(&mut self, goal: SymbolId, on: bool) {
        if on {
            self.dont_learn.insert(goal);
        } else {
            self.dont_learn.remove(&goal);
        }
    }

    /// Reset the per-cycle rule cap.
    pub fn new_decision_cycle(&mut self) {
        self.learned_this_cycle = 0;
    }

    /// Queue the identities of a retracted instantiation for release at the
    /// next pass boundary.
    pub fn release_identities(&mut self, released: impl IntoIterator<Item = Identity>) {
        for id in released {
            self.identities.queue_deallocation(id);
        }
    }

    /// Drop every table. Installed rules and name counters survive.
    pub fn reinitialize(&mut self, symbols: &mut SymbolTable) {
        self.vars.clear(symbols);
        self.identities.reset_all();
        self.backtracer.reset();
        self.repair.clear();
        self.learned_this_cycle = 0;
        self.force_learn.clear();
        self.dont_learn.clear();
    }

    /// Run one learning pass over the results of `inst_id`.
    pub fn learn(&mut self, cx: &mut ChunkContext<'_>, inst_id: InstId) -> ChunkResult<LearnedRule> {
        let _span = debug_span!("learn", inst = inst_id.raw()).entered();
        let result = self.build(cx, inst_id);
        self.vars.clear(cx.symbols);
        self.identities.clean_up_all_dirty();
        self.backtracer.reset();
        if let Err(err) = &result {
            self.record_failure(cx, inst_id, err);
        }
        result
    }

    fn build(&mut self, cx: &mut ChunkContext<'_>, inst_id: InstId) -> ChunkResult<LearnedRule> {
        if self.config.learning == LearningMode::Off {
            return Err(ChunkError::LearningDisabled);
        }
        let inst = cx.trace.inst(inst_id);
        let rule = inst.rule.clone();
        let match_goal = inst.match_goal;
        let match_level = inst.match_goal_level;
        if match_level <= TOP_GOAL_LEVEL {
            return Err(ChunkError::NoResults { rule });
        }
        let grounds_level = match_level - 1;
        let results = collect_results(cx.wm, cx.trace, inst_id, grounds_level);
        if results.is_empty() {
            return Err(ChunkError::NoResults { rule });
        }
        if self.learned_this_cycle >= self.config.max_chunks_per_cycle {
            return Err(ChunkError::MaxChunksReached {
                limit: self.config.max_chunks_per_cycle,
            });
        }
        let Some(goal) = cx.wm.goal_at(grounds_level) else {
            return Err(ChunkError::NoResults { rule });
        };

        let mut starts: Vec<InstId> = results.iter().map(|&p| cx.trace.pref(p).inst).collect();
        starts.sort_unstable();
        starts.dedup();
        let outcome = {
            let inputs = TraceInputs {
                symbols: cx.symbols,
                wm: cx.wm,
                trace: cx.trace,
                config: &self.config,
            };
            self.backtracer
                .run(&inputs, &mut self.identities, &starts, grounds_level)
        };
        let Some(BacktraceOutcome {
            mut conditions,
            constraints,
            summary,
        }) = outcome
        else {
            return Err(ChunkError::NoGrounds { rule });
        };
        self.stats.record_backtrace(&summary);

        let mut kind = if self.chunk_allowed(cx.wm, match_goal, match_level) {
            RuleKind::Chunk
        } else {
            RuleKind::Justification
        };
        if kind == RuleKind::Chunk && summary.tested_quiescence {
            debug!("quiescence test makes this a justification");
            self.stats.record_quiescence_demotion();
            kind = RuleKind::Justification;
        }
        if kind == RuleKind::Chunk && summary.tested_local_negation && !self.config.allow_local_negations {
            debug!("local negation makes this a justification");
            self.stats.record_local_negation_demotion();
            kind = RuleKind::Justification;
        }

        add_goal_tests(cx.wm, &mut conditions);
        let mut draft = self.draft(cx, kind, conditions, &constraints, &results, goal);
        let name = self.next_name(kind, cx.decision_cycle);
        let repaired = self.validate_or_repair(cx, &mut draft, &constraints, &results, goal, grounds_level, &name)?;

        let lhs: Vec<Condition> = draft
            .conditions
            .iter()
            .map(|c| c.variablized.clone())
            .collect();
        if kind == RuleKind::Chunk {
            if let Some(existing) = cx.productions.find_duplicate(cx.symbols, &lhs, &draft.actions) {
                let existing = cx
                    .productions
                    .get(existing)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                return Err(ChunkError::DuplicateChunk { name, existing });
            }
        }

        let production = Production {
            name: name.clone(),
            kind,
            conditions: lhs,
            actions: draft.actions.clone(),
        };
        let text = cx
            .sink
            .wants_detail()
            .then(|| production.display(cx.symbols).to_string());
        let id = cx.productions.add(cx.symbols, production);
        let chunk_inst = self.instantiate_learned(cx, &name, kind, goal, grounds_level, &draft, &results);

        match kind {
            RuleKind::Chunk => {
                self.chunk_count += 1;
                self.stats.record_chunk();
            }
            _ => {
                self.justification_count += 1;
                self.stats.record_justification();
            }
        }
        self.learned_this_cycle += 1;
        info!(name = %name, conditions = draft.conditions.len(), "learned rule");
        cx.sink.record(&ExplanationEvent::ChunkLearned(ChunkSummary {
            name: name.clone(),
            kind,
            source: rule,
            conditions: draft.conditions.len(),
            actions: draft.actions.len(),
            instantiations: summary.instantiations,
            repaired,
            text,
        }));
        Ok(LearnedRule {
            id,
            name,
            kind,
            inst: chunk_inst,
            repaired,
        })
    }

    fn chunk_allowed(&self, wm: &WorkingMemory, goal: SymbolId, match_level: GoalLevel) -> bool {
        let by_mode = match self.config.learning {
            LearningMode::Off => false,
            LearningMode::On => true,
            LearningMode::Only => self.force_learn.contains(&goal),
            LearningMode::Except => !self.dont_learn.contains(&goal),
        };
        by_mode && (!self.config.bottom_only || match_level == wm.bottom_level())
    }

    /// Name the next rule of `kind` would get.
    fn next_name(&self, kind: RuleKind, cycle: u64) -> String {
        match kind {
            RuleKind::Chunk => format!("{}-{}*d{}", self.config.chunk_prefix, self.chunk_count + 1, cycle),
            _ => format!(
                "{}-{}*d{}",
                self.config.justification_prefix,
                self.justification_count + 1,
                cycle
            ),
        }
    }

    /// Turn the grounds and results into a rule. Chunks are variablized;
    /// justifications keep their matched symbols.
    fn draft(
        &mut self,
        cx: &mut ChunkContext<'_>,
        kind: RuleKind,
        conditions: Vec<ChunkCondition>,
        constraints: &[(Identity, Constraint)],
        results: &[PrefId],
        goal: SymbolId,
    ) -> Draft {
        let mut draft = Draft {
            kind,
            conditions,
            actions: Vec::new(),
            root: goal,
        };
        match kind {
            RuleKind::Chunk => {
                let attached = self.variablize(cx.symbols, cx.trace, &mut draft, constraints, results, goal);
                self.stats
                    .record_constraints(attached, self.vars.dropped_constraints());
            }
            _ => {
                draft.actions = results
                    .iter()
                    .map(|&p| instantiated_action(cx.trace.pref(p)))
                    .collect();
            }
        }
        draft
    }

    /// Variablize a draft from its instantiated halves. Safe to run again
    /// after repair: variables already assigned are reused.
    fn variablize(
        &mut self,
        symbols: &mut SymbolTable,
        trace: &TraceStore,
        draft: &mut Draft,
        constraints: &[(Identity, Constraint)],
        results: &[PrefId],
        goal: SymbolId,
    ) -> usize {
        // The goal is variablized first so it always gets the first `s` name.
        draft.root = self
            .vars
            .variablize(symbols, &mut self.identities, Operand::literal(goal))
            .unwrap_or(goal);
        for cond in draft.conditions.iter_mut() {
            cond.variablized = cond.instantiated.clone();
        }
        for (index, cond) in draft.conditions.iter_mut().enumerate() {
            self.vars
                .variablize_equalities(symbols, &mut self.identities, cond, index);
        }
        let attached = if self.config.attach_constraints {
            attach_constraints(&self.identities, &mut draft.conditions, constraints)
        } else {
            0
        };
        for cond in draft.conditions.iter_mut() {
            self.vars
                .variablize_by_lookup(symbols, &self.identities, cond);
        }
        draft.actions = results
            .iter()
            .map(|&p| {
                self.vars
                    .variablize_action(symbols, &mut self.identities, trace.pref(p))
            })
            .collect();
        trace!(variables = self.vars.len(), attached, "variablized rule");
        attached
    }

    /// Validate the draft, repairing it once when conditions or actions are
    /// unconnected.
    /// Returns whether a repair was needed.
    #[allow(clippy::too_many_arguments)]
    fn validate_or_repair(
        &mut self,
        cx: &mut ChunkContext<'_>,
        draft: &mut Draft,
        constraints: &[(Identity, Constraint)],
        results: &[PrefId],
        goal: SymbolId,
        grounds_level: GoalLevel,
        name: &str,
    ) -> ChunkResult<bool> {
        let err = match validate(cx.symbols, &mut draft.conditions, &draft.actions, draft.root) {
            Ok(()) => return Ok(false),
            Err(err) => err,
        };
        let chunk = draft.kind == RuleKind::Chunk;
        let may_repair = self.config.repair.enabled && (chunk || self.config.repair.justifications);
        if !err.is_connectivity() || !may_repair {
            return Err(rejection(name, err));
        }

        let mut dangling = dangling_identifiers(cx.symbols, &draft.conditions, draft.root);
        // Actions line up with the results they came from.
        for index in unconnected_actions(cx.symbols, &draft.conditions, &draft.actions, draft.root) {
            let id = cx.trace.pref(results[index]).id;
            if cx.symbols.is_identifier(id) && !dangling.contains(&id) {
                dangling.push(id);
            }
        }
        debug!(name = %name, dangling = dangling.len(), "repairing rule");
        let variablizer = chunk.then(|| RepairVariablizer {
            vars: &mut self.vars,
            identities: &mut self.identities,
        });
        let report = match self.repair.repair(
            cx.symbols,
            cx.wm,
            &mut draft.conditions,
            &dangling,
            grounds_level,
            variablizer,
        ) {
            Ok(report) => report,
            Err(repair_err) => {
                debug!(error = %repair_err, "repair failed");
                self.stats.record_repair(false);
                return Err(rejection(name, err));
            }
        };
        cx.sink.record(&ExplanationEvent::Repaired {
            rule: name.to_string(),
            conditions_added: report.conditions_added,
        });

        if chunk {
            self.variablize(cx.symbols, cx.trace, draft, constraints, results, goal);
        }
        match validate(cx.symbols, &mut draft.conditions, &draft.actions, draft.root) {
            Ok(()) => {
                self.stats.record_repair(true);
                Ok(true)
            }
            Err(err) => {
                self.stats.record_repair(false);
                Err(rejection(name, err))
            }
        }
    }

    /// Record an instantiation of the new rule at the grounds level and move
    /// the support of the result WMEs onto it.
    #[allow(clippy::too_many_arguments)]
    fn instantiate_learned(
        &mut self,
        cx: &mut ChunkContext<'_>,
        name: &str,
        kind: RuleKind,
        goal: SymbolId,
        grounds_level: GoalLevel,
        draft: &Draft,
        results: &[PrefId],
    ) -> InstId {
        let conditions: Vec<Condition> = draft
            .conditions
            .iter()
            .map(|c| {
                let mut cond = c.instantiated.clone();
                self.clone_condition_identities(&mut cond);
                cond
            })
            .collect();
        let inst = cx
            .trace
            .add_instantiation(name.to_string(), kind, goal, grounds_level, conditions);
        for &result in results {
            let original = cx.trace.pref(result).clone();
            let (ids, wme) = (original.identities, original.wme);
            let identities = PrefIdentities {
                id: self.clone_of(ids.id),
                attr: self.clone_of(ids.attr),
                value: self.clone_of(ids.value),
                referent: self.clone_of(ids.referent),
            };
            let pref = cx.trace.add_preference(Preference {
                identities,
                inst,
                level: grounds_level,
                ..original
            });
            if let Some(wme) = wme {
                cx.wm.set_support(wme, pref);
            }
        }
        inst
    }

    fn clone_of(&mut self, identity: Option<Identity>) -> Option<Identity> {
        let id = identity?;
        if self.identities.is_literalized(id) {
            return None;
        }
        Some(self.identities.clone_identity(id))
    }

    fn clone_condition_identities(&mut self, cond: &mut Condition) {
        match cond {
            Condition::Positive { tests, .. } | Condition::Negative { tests, .. } => {
                for field in Field::ALL {
                    let test = tests.field_mut(field);
                    if let Some(op) = test.equality.as_mut() {
                        op.identity = self.clone_of(op.identity);
                    }
                    for constraint in test.constraints.iter_mut() {
                        if let Constraint::Relational { operand, .. } = constraint {
                            operand.identity = self.clone_of(operand.identity);
                        }
                    }
                }
            }
            Condition::Ncc(inner) => {
                for cond in inner {
                    self.clone_condition_identities(cond);
                }
            }
        }
    }

    fn record_failure(&mut self, cx: &mut ChunkContext<'_>, inst_id: InstId, err: &ChunkError) {
        match err {
            ChunkError::NoResults { .. } | ChunkError::LearningDisabled => return,
            ChunkError::NoGrounds { .. } => self.stats.record_no_grounds(),
            ChunkError::MaxChunksReached { .. } => self.stats.record_max_chunks(),
            ChunkError::DuplicateChunk { .. } => self.stats.record_duplicate(),
            ChunkError::Unconnected { .. } | ChunkError::ReorderFailure { .. } => {
                self.stats.record_validation_failure()
            }
        }
        cx.sink.record(&ExplanationEvent::RuleRejected {
            rule: cx.trace.inst(inst_id).rule.clone(),
            reason: err.to_string(),
            policy: err.is_policy_stop(),
        });
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkConfig::default())
    }
}

fn rejection(name: &str, err: ValidationError) -> ChunkError {
    if err.is_connectivity() {
        ChunkError::Unconnected {
            name: name.to_string(),
            source: err,
        }
    } else {
        ChunkError::ReorderFailure {
            name: name.to_string(),
            source: err,
        }
    }
}

/// Preferences of the firing on superstate identifiers, plus the sub-goal
/// preferences on identifiers linked from them.
pub fn collect_results(
    wm: &WorkingMemory,
    trace: &TraceStore,
    inst_id: InstId,
    grounds_level: GoalLevel,
) -> Vec<PrefId> {
    let mut results = Vec::new();
    let mut taken: FxSet<PrefId> = FxSet::default();
    let mut visited: FxSet<SymbolId> = FxSet::default();
    let mut queue: VecDeque<SymbolId> = VecDeque::new();

    let mut take = |pref_id: PrefId, queue: &mut VecDeque<SymbolId>, results: &mut Vec<PrefId>| {
        if taken.insert(pref_id) {
            let pref = trace.pref(pref_id);
            queue.extend([pref.value].into_iter().chain(pref.referent));
            results.push(pref_id);
        }
    };

    for &pref_id in &trace.inst(inst_id).preferences {
        let pref = trace.pref(pref_id);
        if wm.level_of(pref.id).is_some_and(|level| level <= grounds_level) {
            take(pref_id, &mut queue, &mut results);
        }
    }
    while let Some(id) = queue.pop_front() {
        if wm.level_of(id).is_none() || !visited.insert(id) {
            continue;
        }
        for &pref_id in trace.prefs_on(id) {
            let pref = trace.pref(pref_id);
            if pref.level > grounds_level && !trace.inst(pref.inst).retracted {
                take(pref_id, &mut queue, &mut results);
            }
        }
    }
    results
}

/// Add a `state` test to every condition whose identifier is a goal.
fn add_goal_tests(wm: &WorkingMemory, conds: &mut [ChunkCondition]) {
    for cond in conds.iter_mut() {
        let is_goal = cond
            .instantiated
            .id_referent()
            .is_some_and(|id| wm.is_goal(id));
        if !is_goal {
            continue;
        }
        for half in [&mut cond.instantiated, &mut cond.variablized] {
            if let Some(tests) = half.tests_mut() {
                tests.id.add_constraint(Constraint::Goal);
            }
        }
    }
}

fn instantiated_action(pref: &Preference) -> Action {
    Action {
        kind: pref.kind,
        id: pref.id,
        attr: pref.attr,
        value: pref.value,
        referent: pref.referent,
    }
}

#[cfg(test)]
#[path = "tests/chunker.rs"]
mod tests;
