//! Learning statistics.
//!
//! Counters are advisory: nothing in a learning pass reads them back.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chunklearn::Agent;
//!
//! let agent = Agent::new();
//! // ... fire rules and learn ...
//! let report = agent.stats();
//! println!("chunks: {}, duplicates: {}", report.chunks, report.duplicates);
//! ```

use crate::backtrace::BacktraceSummary;

/// Aggregate counters collected across learning passes.
#[derive(Debug, Clone, Default)]
pub struct ChunkStats {
    /// Chunks installed
    pub chunks: u64,
    /// Justifications installed
    pub justifications: u64,
    /// Rules discarded as duplicates of installed ones
    pub duplicates: u64,
    /// Passes with nothing grounded
    pub no_grounds: u64,
    /// Passes skipped because the per-cycle cap was reached
    pub max_chunks_stops: u64,
    /// Rules that failed validation even after repair
    pub validation_failures: u64,
    /// Repairs attempted
    pub repairs: u64,
    /// Repairs whose rule then validated
    pub repairs_succeeded: u64,
    /// Instantiations visited by the backtracer
    pub instantiations_backtraced: u64,
    /// Ground conditions merged into an existing one
    pub conditions_merged: u64,
    /// Constraints attached at operational sites
    pub constraints_attached: u64,
    /// Constraints dropped for testing unbound identifiers
    pub constraints_dropped: u64,
    /// Chunks demoted to justifications by a local negation
    pub local_negation_demotions: u64,
    /// Chunks demoted to justifications by a quiescence test
    pub quiescence_demotions: u64,
}

impl ChunkStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_chunk(&mut self) {
        self.chunks += 1;
    }

    #[inline]
    pub fn record_justification(&mut self) {
        self.justifications += 1;
    }

    #[inline]
    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    #[inline]
    pub fn record_no_grounds(&mut self) {
        self.no_grounds += 1;
    }

    #[inline]
    pub fn record_max_chunks(&mut self) {
        self.max_chunks_stops += 1;
    }

    #[inline]
    pub fn record_validation_failure(&mut self) {
        self.validation_failures += 1;
    }

    /// Record a repair and whether the repaired rule validated.
    #[inline]
    pub fn record_repair(&mut self, succeeded: bool) {
        self.repairs += 1;
        if succeeded {
            self.repairs_succeeded += 1;
        }
    }

    #[inline]
    pub fn record_constraints(&mut self, attached: usize, dropped: u64) {
        self.constraints_attached += attached as u64;
        self.constraints_dropped += dropped;
    }

    #[inline]
    pub fn record_local_negation_demotion(&mut self) {
        self.local_negation_demotions += 1;
    }

    #[inline]
    pub fn record_quiescence_demotion(&mut self) {
        self.quiescence_demotions += 1;
    }

    /// Fold in the counters of one backtrace.
    pub fn record_backtrace(&mut self, summary: &BacktraceSummary) {
        self.instantiations_backtraced += summary.instantiations;
        self.conditions_merged += summary.merged;
    }

    /// Snapshot of every counter.
    pub fn report(&self) -> StatsReport {
        StatsReport {
            chunks: self.chunks,
            justifications: self.justifications,
            duplicates: self.duplicates,
            no_grounds: self.no_grounds,
            max_chunks_stops: self.max_chunks_stops,
            validation_failures: self.validation_failures,
            repairs: self.repairs,
            repairs_succeeded: self.repairs_succeeded,
            instantiations_backtraced: self.instantiations_backtraced,
            conditions_merged: self.conditions_merged,
            constraints_attached: self.constraints_attached,
            constraints_dropped: self.constraints_dropped,
            local_negation_demotions: self.local_negation_demotions,
            quiescence_demotions: self.quiescence_demotions,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Snapshot of the statistics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub chunks: u64,
    pub justifications: u64,
    pub duplicates: u64,
    pub no_grounds: u64,
    pub max_chunks_stops: u64,
    pub validation_failures: u64,
    pub repairs: u64,
    pub repairs_succeeded: u64,
    pub instantiations_backtraced: u64,
    pub conditions_merged: u64,
    pub constraints_attached: u64,
    pub constraints_dropped: u64,
    pub local_negation_demotions: u64,
    pub quiescence_demotions: u64,
}

impl StatsReport {
    /// Rules installed, of either kind.
    pub fn learned(&self) -> u64 {
        self.chunks + self.justifications
    }

    /// Fraction of repairs that produced a valid rule.
    pub fn repair_success_rate(&self) -> f64 {
        if self.repairs == 0 {
            1.0
        } else {
            self.repairs_succeeded as f64 / self.repairs as f64
        }
    }

    /// Fraction of finished rules that were duplicates.
    pub fn duplicate_rate(&self) -> f64 {
        let total = self.learned() + self.duplicates;
        if total == 0 {
            0.0
        } else {
            self.duplicates as f64 / total as f64
        }
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Chunking Statistics ===")?;
        writeln!(f, "Chunks learned:        {}", self.chunks)?;
        writeln!(f, "Justifications:        {}", self.justifications)?;
        writeln!(
            f,
            "Duplicates:            {} ({:.1}% of finished rules)",
            self.duplicates,
            self.duplicate_rate() * 100.0
        )?;
        writeln!(f, "No grounds:            {}", self.no_grounds)?;
        writeln!(f, "Max-chunk stops:       {}", self.max_chunks_stops)?;
        writeln!(f, "Validation failures:   {}", self.validation_failures)?;
        writeln!(
            f,
            "Repairs:               {} ({} succeeded, {:.1}% success)",
            self.repairs,
            self.repairs_succeeded,
            self.repair_success_rate() * 100.0
        )?;
        writeln!(f, "Instantiations traced: {}", self.instantiations_backtraced)?;
        writeln!(f, "Conditions merged:     {}", self.conditions_merged)?;
        writeln!(
            f,
            "Constraints:           {} attached, {} dropped",
            self.constraints_attached, self.constraints_dropped
        )?;
        writeln!(
            f,
            "Demotions:             {} local negation, {} quiescence",
            self.local_negation_demotions, self.quiescence_demotions
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/stats.rs"]
mod tests;
