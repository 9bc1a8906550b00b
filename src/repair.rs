//! Reconnecting learned rules whose conditions lost their link to the goal.
//!
//! For each dangling identifier, a breadth-first search over working memory
//! finds a chain of WMEs from a goal at or above the grounds level. The WMEs
//! of every chain, plus the `^superstate` links between the grounds-level goal
//! and the highest goal a chain starts from, become new conditions.

use crate::condition::{Backtrace, ChunkCondition, Condition, Constraint, FieldTests, Test};
use crate::error::RepairError;
use crate::identity::IdentityRegistry;
use crate::symbol::{FxMap, FxSet, SymbolId, SymbolTable};
use crate::trace::{debug, trace};
use crate::variablize::VariablizationManager;
use crate::wm::{GoalLevel, WmeId, WorkingMemory, TOP_GOAL_LEVEL};
use std::collections::VecDeque;

/// What a repair added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub wmes: Vec<WmeId>,
    pub conditions_added: usize,
}

/// WME through which an identifier was reached; `None` for goals.
#[derive(Debug, Clone, Copy)]
struct Mark {
    via: Option<WmeId>,
}

/// Variablization state a repair must stay consistent with. `None` leaves new
/// conditions instantiated, as justifications need.
pub struct RepairVariablizer<'a> {
    pub vars: &'a mut VariablizationManager,
    pub identities: &'a mut IdentityRegistry,
}

/// Breadth-first search state. Marks only live for one search.
#[derive(Default)]
pub struct RepairEngine {
    marks: FxMap<SymbolId, Mark>,
}

impl RepairEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(&mut self, id: SymbolId, via: Option<WmeId>) -> bool {
        if self.marks.contains_key(&id) {
            return false;
        }
        self.marks.insert(id, Mark { via });
        true
    }

    /// Identifiers marked by the search in progress.
    pub fn marked(&self) -> usize {
        self.marks.len()
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    /// Shortest WME chain from a goal at or above `grounds_level` to `target`.
    ///
    /// The chain is ordered goal first. An empty chain means `target` is such
    /// a goal itself.
    pub fn find_path(
        &mut self,
        symbols: &SymbolTable,
        wm: &WorkingMemory,
        grounds_level: GoalLevel,
        target: SymbolId,
    ) -> Result<Vec<WmeId>, RepairError> {
        self.marks.clear();
        let mut queue = VecDeque::new();
        for level in TOP_GOAL_LEVEL..=grounds_level {
            if let Some(goal) = wm.goal_at(level) {
                self.mark(goal, None);
                queue.push_back(goal);
            }
        }
        while let Some(id) = queue.pop_front() {
            if id == target {
                return Ok(self.path_to(wm, target));
            }
            for &handle in wm.wmes_of(id) {
                let value = wm.wme(handle).value;
                if symbols.is_identifier(value) && self.mark(value, Some(handle)) {
                    queue.push_back(value);
                }
            }
        }
        Err(RepairError::NoPath {
            target: symbols.display(target).to_string(),
        })
    }

    fn path_to(&self, wm: &WorkingMemory, target: SymbolId) -> Vec<WmeId> {
        let mut path = Vec::new();
        let mut current = target;
        while let Some(Mark { via: Some(handle), .. }) = self.marks.get(&current).copied() {
            path.push(handle);
            current = wm.wme(handle).id;
        }
        path.reverse();
        path
    }

    /// Splice conditions connecting every dangling identifier onto `conds`.
    pub fn repair(
        &mut self,
        symbols: &mut SymbolTable,
        wm: &WorkingMemory,
        conds: &mut Vec<ChunkCondition>,
        dangling: &[SymbolId],
        grounds_level: GoalLevel,
        mut variablizer: Option<RepairVariablizer<'_>>,
    ) -> Result<RepairReport, RepairError> {
        let mut path_wmes: Vec<WmeId> = Vec::new();
        let mut highest = grounds_level;
        for &target in dangling {
            let found = self.find_path(symbols, wm, grounds_level, target);
            self.marks.clear();
            let path = found?;
            let start = path.first().map_or(target, |&h| wm.wme(h).id);
            if let Some(level) = wm.goal_level(start) {
                highest = highest.min(level);
            }
            trace!(target = target.raw(), length = path.len(), "repair path");
            path_wmes.extend(path);
        }

        // Superstate links from the grounds-level goal up to the highest goal
        // a path started from.
        let mut repair_set: Vec<WmeId> = Vec::new();
        let mut level = grounds_level;
        while level > highest {
            if let Some(link) = wm.goal_at(level).and_then(|g| wm.superstate_wme(g)) {
                repair_set.push(link);
            }
            level -= 1;
        }
        repair_set.extend(path_wmes);

        let mut present: FxSet<WmeId> = conds
            .iter()
            .filter_map(|c| c.instantiated.backtrace().and_then(|bt| bt.wme))
            .collect();
        let mut report = RepairReport::default();
        for handle in repair_set {
            if !present.insert(handle) {
                continue;
            }
            let mut cond = ChunkCondition::new(condition_for_wme(wm, handle));
            if let Some(v) = variablizer.as_mut() {
                v.vars
                    .variablize_equalities(symbols, v.identities, &mut cond, conds.len());
            }
            conds.push(cond);
            report.wmes.push(handle);
            report.conditions_added += 1;
        }
        debug!(added = report.conditions_added, "repair spliced conditions");
        Ok(report)
    }
}

/// Instantiated condition testing exactly one WME.
pub fn condition_for_wme(wm: &WorkingMemory, handle: WmeId) -> Condition {
    let wme = wm.wme(handle);
    let mut id = Test::literal(wme.id);
    if wm.is_goal(wme.id) {
        id.add_constraint(Constraint::Goal);
    }
    Condition::Positive {
        tests: FieldTests::new(id, Test::literal(wme.attr), Test::literal(wme.value)),
        acceptable: wme.acceptable,
        bt: Backtrace {
            wme: Some(handle),
            level: wm.level_of(wme.id).unwrap_or(TOP_GOAL_LEVEL),
            trace: wme.supported_by,
        },
    }
}

#[cfg(test)]
#[path = "tests/repair.rs"]
mod tests;
