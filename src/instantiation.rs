//! Instantiation traces and the preferences they produced.
//!
//! The trace store is what the backtracer walks: every WME a rule created
//! points at its supporting preference, and every preference points back at
//! the instantiation that made it.

use crate::condition::Condition;
use crate::identity::Identity;
use crate::rule::RuleKind;
use crate::symbol::{FxMap, SymbolId};
use crate::wm::{GoalLevel, WmeId};
use smallvec::SmallVec;
use std::fmt;

/// Handle to a recorded instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Handle to a recorded preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefId(u32);

impl PrefId {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKind {
    Acceptable,
    Require,
    Prohibit,
    Reject,
    Best,
    Worst,
    Better,
    Worse,
    Indifferent,
    NumericIndifferent,
}

impl PrefKind {
    /// Binary preferences compare the value against a referent.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            PrefKind::Better | PrefKind::Worse | PrefKind::Indifferent | PrefKind::NumericIndifferent
        )
    }

    /// Preferences that put a WME into working memory.
    pub fn creates_wme(self) -> bool {
        matches!(self, PrefKind::Acceptable | PrefKind::Require)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrefKind::Acceptable => "+",
            PrefKind::Require => "!",
            PrefKind::Prohibit => "~",
            PrefKind::Reject => "-",
            PrefKind::Best | PrefKind::Better => ">",
            PrefKind::Worst | PrefKind::Worse => "<",
            PrefKind::Indifferent | PrefKind::NumericIndifferent => "=",
        }
    }
}

impl fmt::Display for PrefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity carried by each field of a preference. `None` is a literal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PrefIdentities {
    pub id: Option<Identity>,
    pub attr: Option<Identity>,
    pub value: Option<Identity>,
    pub referent: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preference {
    pub kind: PrefKind,
    pub id: SymbolId,
    pub attr: SymbolId,
    pub value: SymbolId,
    pub referent: Option<SymbolId>,
    pub identities: PrefIdentities,
    pub inst: InstId,
    /// Match goal level of the instantiation that made the preference.
    pub level: GoalLevel,
    /// WME this preference put into working memory, if any.
    pub wme: Option<WmeId>,
}

#[derive(Debug, Clone)]
pub struct Instantiation {
    pub id: InstId,
    pub rule: String,
    pub kind: RuleKind,
    pub match_goal: SymbolId,
    pub match_goal_level: GoalLevel,
    pub conditions: Vec<Condition>,
    pub preferences: SmallVec<[PrefId; 4]>,
    pub retracted: bool,
}

impl Instantiation {
    /// Every identity the instantiation's conditions mention.
    pub fn condition_identities(&self) -> Vec<Identity> {
        self.conditions.iter().flat_map(|c| c.identities()).collect()
    }
}

/// Arena of instantiations and preferences.
#[derive(Default)]
pub struct TraceStore {
    insts: Vec<Instantiation>,
    prefs: Vec<Preference>,
    prefs_by_id: FxMap<SymbolId, SmallVec<[PrefId; 4]>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an instantiation. Its `id` and `preferences` are assigned here.
    pub fn add_instantiation(
        &mut self,
        rule: String,
        kind: RuleKind,
        match_goal: SymbolId,
        match_goal_level: GoalLevel,
        conditions: Vec<Condition>,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Instantiation {
            id,
            rule,
            kind,
            match_goal,
            match_goal_level,
            conditions,
            preferences: SmallVec::new(),
            retracted: false,
        });
        id
    }

    /// Panics on a handle from another store; handles are never forged.
    pub fn inst(&self, id: InstId) -> &Instantiation {
        &self.insts[id.0 as usize]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instantiation {
        &mut self.insts[id.0 as usize]
    }

    pub fn pref(&self, id: PrefId) -> &Preference {
        &self.prefs[id.0 as usize]
    }

    pub fn pref_mut(&mut self, id: PrefId) -> &mut Preference {
        &mut self.prefs[id.0 as usize]
    }

    /// Record a preference and link it to its instantiation.
    pub fn add_preference(&mut self, pref: Preference) -> PrefId {
        let handle = PrefId(self.prefs.len() as u32);
        self.prefs_by_id.entry(pref.id).or_default().push(handle);
        self.insts[pref.inst.0 as usize].preferences.push(handle);
        self.prefs.push(pref);
        handle
    }

    /// Every preference whose identifier is `id`, oldest first.
    pub fn prefs_on(&self, id: SymbolId) -> &[PrefId] {
        self.prefs_by_id
            .get(&id)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    /// Mark an instantiation retracted and return the identities it held so
    /// the caller can release them.
    pub fn retract(&mut self, id: InstId) -> Vec<Identity> {
        let inst = &mut self.insts[id.0 as usize];
        if inst.retracted {
            return Vec::new();
        }
        inst.retracted = true;
        let mut released = inst.condition_identities();
        for &pref in &self.insts[id.0 as usize].preferences {
            let ids = self.prefs[pref.0 as usize].identities;
            released.extend([ids.id, ids.attr, ids.value, ids.referent].into_iter().flatten());
        }
        released.sort_unstable();
        released.dedup();
        released
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn clear(&mut self) {
        self.insts.clear();
        self.prefs.clear();
        self.prefs_by_id.clear();
    }
}

#[cfg(test)]
#[path = "tests/instantiation.rs"]
mod tests;
