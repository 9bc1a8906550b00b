//! Working memory and the goal stack.
//!
//! This is the minimal collaborator the chunker reads from: WMEs indexed by
//! identifier, the goal level of each identifier, and the stack of goals with
//! their `^superstate` links.

use crate::instantiation::PrefId;
use crate::symbol::{FxMap, SymbolId, SymbolTable};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Depth of a goal in the stack. The top goal is level 1.
pub type GoalLevel = u32;

pub const TOP_GOAL_LEVEL: GoalLevel = 1;

/// Handle to a working-memory element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WmeId(u32);

impl WmeId {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wme {
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    /// Acceptable-preference WME (`+`).
    pub acceptable: bool,
    pub timetag: u64,
    /// Preference currently supporting this WME; `None` for architecture WMEs
    /// and input.
    pub supported_by: Option<PrefId>,
}

#[derive(Debug, Clone)]
struct Goal {
    id: SymbolId,
    superstate_wme: Option<WmeId>,
}

pub struct WorkingMemory {
    wmes: Vec<Wme>,
    slots: FxMap<SymbolId, SmallVec<[WmeId; 4]>>,
    levels: FxMap<SymbolId, GoalLevel>,
    /// Index 0 holds the top goal.
    goals: Vec<Goal>,
    superstate_attr: Option<SymbolId>,
    next_timetag: u64,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self {
            wmes: Vec::new(),
            slots: FxMap::default(),
            levels: FxMap::default(),
            goals: Vec::new(),
            superstate_attr: None,
            next_timetag: 1,
        }
    }

    /// Add a WME. Every symbol in it gains a reference.
    pub fn add_wme(
        &mut self,
        symbols: &mut SymbolTable,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        acceptable: bool,
    ) -> WmeId {
        let handle = WmeId(self.wmes.len() as u32);
        symbols.add_ref(id);
        symbols.add_ref(attr);
        symbols.add_ref(value);
        self.wmes.push(Wme {
            id,
            attr,
            value,
            acceptable,
            timetag: self.next_timetag,
            supported_by: None,
        });
        self.next_timetag += 1;
        self.slots.entry(id).or_default().push(handle);
        if symbols.is_identifier(value) && !self.levels.contains_key(&value) {
            if let Some(level) = self.levels.get(&id).copied() {
                self.levels.insert(value, level);
            }
        }
        handle
    }

    /// Panics on a handle from another memory; handles are never forged.
    pub fn wme(&self, handle: WmeId) -> &Wme {
        &self.wmes[handle.0 as usize]
    }

    /// WMEs whose identifier is `id`, oldest first.
    pub fn wmes_of(&self, id: SymbolId) -> &[WmeId] {
        self.slots.get(&id).map(|s| s.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.wmes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wmes.is_empty()
    }

    pub fn set_level(&mut self, id: SymbolId, level: GoalLevel) {
        self.levels.insert(id, level);
    }

    /// Goal level of an identifier, if it is linked into the goal stack.
    pub fn level_of(&self, id: SymbolId) -> Option<GoalLevel> {
        self.levels.get(&id).copied()
    }

    /// Move `id` and every identifier reachable from it that lives deeper than
    /// `level` up to `level`. Used when sub-goal structure becomes a result.
    pub fn promote(&mut self, symbols: &SymbolTable, id: SymbolId, level: GoalLevel) {
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            match self.levels.get(&current) {
                Some(&existing) if existing <= level => continue,
                _ => {}
            }
            self.levels.insert(current, level);
            for &handle in self.wmes_of(current) {
                let value = self.wmes[handle.0 as usize].value;
                if symbols.is_identifier(value) {
                    queue.push_back(value);
                }
            }
        }
    }

    /// Push a new goal under the current bottom goal.
    ///
    /// The first goal pushed becomes the top goal. Every later goal receives a
    /// `^superstate` WME pointing at the goal above it.
    pub fn push_goal(
        &mut self,
        symbols: &mut SymbolTable,
        goal: SymbolId,
        superstate_attr: SymbolId,
    ) -> GoalLevel {
        let level = self.goals.len() as GoalLevel + 1;
        self.levels.insert(goal, level);
        self.superstate_attr = Some(superstate_attr);
        let superstate_wme = match self.goals.last().map(|g| g.id) {
            Some(parent) => Some(self.add_wme(symbols, goal, superstate_attr, parent, false)),
            None => None,
        };
        self.goals.push(Goal {
            id: goal,
            superstate_wme,
        });
        level
    }

    pub fn goal_at(&self, level: GoalLevel) -> Option<SymbolId> {
        if level < TOP_GOAL_LEVEL {
            return None;
        }
        self.goals.get((level - TOP_GOAL_LEVEL) as usize).map(|g| g.id)
    }

    /// Level of `goal` if it is on the stack.
    pub fn goal_level(&self, goal: SymbolId) -> Option<GoalLevel> {
        self.goals
            .iter()
            .position(|g| g.id == goal)
            .map(|idx| idx as GoalLevel + TOP_GOAL_LEVEL)
    }

    pub fn is_goal(&self, id: SymbolId) -> bool {
        self.goals.iter().any(|g| g.id == id)
    }

    pub fn top_goal(&self) -> Option<SymbolId> {
        self.goals.first().map(|g| g.id)
    }

    pub fn bottom_goal(&self) -> Option<SymbolId> {
        self.goals.last().map(|g| g.id)
    }

    pub fn bottom_level(&self) -> GoalLevel {
        self.goals.len() as GoalLevel
    }

    /// The `(goal ^superstate parent)` WME of a non-top goal.
    pub fn superstate_wme(&self, goal: SymbolId) -> Option<WmeId> {
        self.goals
            .iter()
            .find(|g| g.id == goal)
            .and_then(|g| g.superstate_wme)
    }

    pub fn superstate_attr(&self) -> Option<SymbolId> {
        self.superstate_attr
    }

    /// Attach a supporting preference to a WME, replacing any earlier one.
    pub fn set_support(&mut self, handle: WmeId, pref: PrefId) {
        self.wmes[handle.0 as usize].supported_by = Some(pref);
    }

    /// Find the WME for a triple, if present.
    pub fn find(
        &self,
        id: SymbolId,
        attr: SymbolId,
        value: SymbolId,
        acceptable: bool,
    ) -> Option<WmeId> {
        self.wmes_of(id).iter().copied().find(|&h| {
            let w = self.wme(h);
            w.attr == attr && w.value == value && w.acceptable == acceptable
        })
    }

    /// Drop every WME and goal, releasing the references they held.
    pub fn clear(&mut self, symbols: &mut SymbolTable) {
        for wme in self.wmes.drain(..) {
            symbols.remove_ref(wme.id);
            symbols.remove_ref(wme.attr);
            symbols.remove_ref(wme.value);
        }
        self.slots.clear();
        self.levels.clear();
        self.goals.clear();
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/wm.rs"]
mod tests;
