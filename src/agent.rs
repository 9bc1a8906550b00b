//! An agent: the collaborators a chunker works against, owned together.
//!
//! The agent holds the symbol table, working memory with its goal stack, the
//! instantiation trace store, production memory, the chunker and an
//! explanation sink. It is the surface tests and embedding code drive: push
//! goals, add WMEs, record firings through [`Agent::instantiate`], and learn
//! from them.

use crate::builder::InstantiationBuilder;
use crate::chunker::{ChunkContext, Chunker, LearnedRule};
use crate::config::ChunkConfig;
use crate::error::ChunkResult;
use crate::explain::{ExplanationSink, NullSink};
use crate::instantiation::{InstId, TraceStore};
use crate::rule::ProductionMemory;
use crate::stats::StatsReport;
use crate::symbol::{SymbolId, SymbolTable};
use crate::trace::{info, warn};
use crate::wm::{WmeId, WorkingMemory};

pub struct Agent {
    pub symbols: SymbolTable,
    pub wm: WorkingMemory,
    pub trace: TraceStore,
    pub productions: ProductionMemory,
    pub chunker: Chunker,
    sink: Box<dyn ExplanationSink>,
    decision_cycle: u64,
    superstate_attr: SymbolId,
}

impl Agent {
    /// Create an agent with the default configuration and no observer.
    pub fn new() -> Self {
        Self::with_config(ChunkConfig::default())
    }

    pub fn with_config(config: ChunkConfig) -> Self {
        Self::with_sink(config, Box::new(NullSink))
    }

    pub fn with_sink(config: ChunkConfig, sink: Box<dyn ExplanationSink>) -> Self {
        let mut symbols = SymbolTable::new();
        let superstate_attr = symbols.str_constant("superstate");
        Self {
            symbols,
            wm: WorkingMemory::new(),
            trace: TraceStore::new(),
            productions: ProductionMemory::new(),
            chunker: Chunker::new(config),
            sink,
            decision_cycle: 1,
            superstate_attr,
        }
    }

    /// Replace the explanation sink.
    pub fn set_sink(&mut self, sink: Box<dyn ExplanationSink>) {
        self.sink = sink;
    }

    pub fn decision_cycle(&self) -> u64 {
        self.decision_cycle
    }

    /// Push a new goal below the current bottom goal and return it.
    pub fn push_goal(&mut self) -> SymbolId {
        let goal = self.symbols.new_identifier('S');
        self.wm.push_goal(&mut self.symbols, goal, self.superstate_attr);
        goal
    }

    /// Create a new identifier.
    pub fn new_identifier(&mut self, letter: char) -> SymbolId {
        self.symbols.new_identifier(letter)
    }

    /// Intern a string constant.
    pub fn sym(&mut self, name: &str) -> SymbolId {
        self.symbols.str_constant(name)
    }

    /// Intern an integer constant.
    pub fn int(&mut self, value: i64) -> SymbolId {
        self.symbols.int_constant(value)
    }

    /// Add `(id ^attr value)` to working memory.
    pub fn add_wme(&mut self, id: SymbolId, attr: &str, value: SymbolId) -> WmeId {
        let attr = self.symbols.str_constant(attr);
        self.wm.add_wme(&mut self.symbols, id, attr, value, false)
    }

    /// Start recording a firing of `rule` matched in `goal`.
    pub fn instantiate(&mut self, rule: &str, goal: SymbolId) -> InstantiationBuilder<'_> {
        InstantiationBuilder::new(self, rule, goal)
    }

    /// Learn from the results of an instantiation.
    pub fn learn(&mut self, inst: InstId) -> ChunkResult<LearnedRule> {
        let mut cx = ChunkContext {
            symbols: &mut self.symbols,
            wm: &mut self.wm,
            trace: &mut self.trace,
            productions: &mut self.productions,
            sink: self.sink.as_mut(),
            decision_cycle: self.decision_cycle,
        };
        self.chunker.learn(&mut cx, inst)
    }

    /// Learn from a firing the way the decision cycle does: failures are
    /// logged and the agent carries on.
    pub fn learn_from_firing(&mut self, inst: InstId) -> Option<LearnedRule> {
        match self.learn(inst) {
            Ok(learned) => Some(learned),
            Err(err) if err.is_policy_stop() => {
                info!(error = %err, "no rule learned");
                None
            }
            Err(err) => {
                warn!(error = %err, "learned rule discarded");
                None
            }
        }
    }

    /// Advance the decision cycle, resetting the per-cycle rule cap.
    pub fn new_decision_cycle(&mut self) {
        self.decision_cycle += 1;
        self.chunker.new_decision_cycle();
    }

    /// Retract an instantiation. Its identities are released at the next
    /// learning pass boundary.
    pub fn retract_instantiation(&mut self, inst: InstId) {
        let released = self.trace.retract(inst);
        self.chunker.release_identities(released);
    }

    /// Clear working memory, the trace and every chunker table. Installed
    /// rules are kept. Safe to call repeatedly.
    pub fn reinitialize(&mut self) {
        self.chunker.reinitialize(&mut self.symbols);
        self.wm.clear(&mut self.symbols);
        self.trace.clear();
        self.decision_cycle = 1;
    }

    pub fn stats(&self) -> StatsReport {
        self.chunker.stats()
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/agent.rs"]
mod tests;
