//! Explanation sinks: read-only observers of learning passes.
//!
//! The chunker reports what it learned, rejected and repaired. Nothing it
//! does depends on the sink.

use crate::rule::RuleKind;
use std::cell::RefCell;
use std::rc::Rc;

/// Structural summary of an installed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    pub name: String,
    pub kind: RuleKind,
    /// Rule that fired in the sub-goal.
    pub source: String,
    pub conditions: usize,
    pub actions: usize,
    pub instantiations: u64,
    pub repaired: bool,
    /// Printed rule, only when the sink asked for detail.
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplanationEvent {
    ChunkLearned(ChunkSummary),
    RuleRejected {
        rule: String,
        reason: String,
        /// A policy stop rather than a failure.
        policy: bool,
    },
    Repaired {
        rule: String,
        conditions_added: usize,
    },
}

pub trait ExplanationSink {
    fn record(&mut self, event: &ExplanationEvent);

    /// Whether events should carry printed rules.
    fn wants_detail(&self) -> bool {
        false
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ExplanationSink for NullSink {
    fn record(&mut self, _event: &ExplanationEvent) {}
}

/// Collects events for inspection. Clones share one buffer, so a caller can
/// keep a handle while the agent owns the sink.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<ExplanationEvent>>>,
    detail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose events include printed rules.
    pub fn detailed() -> Self {
        Self {
            detail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ExplanationEvent> {
        self.events.borrow().clone()
    }

    /// Summaries of every learned rule, oldest first.
    pub fn learned(&self) -> Vec<ChunkSummary> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                ExplanationEvent::ChunkLearned(summary) => Some(summary.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl ExplanationSink for RecordingSink {
    fn record(&mut self, event: &ExplanationEvent) {
        self.events.borrow_mut().push(event.clone());
    }

    fn wants_detail(&self) -> bool {
        self.detail
    }
}

#[cfg(test)]
#[path = "tests/explain.rs"]
mod tests;
