//! Error types for learning passes, rule validation, repair and configuration.

use thiserror::Error;

/// Outcome of a learning pass that did not install a rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("instantiation of {rule} produced no results in a superstate")]
    NoResults { rule: String },

    #[error("learning is disabled")]
    LearningDisabled,

    #[error("no conditions of {rule} are grounded in a superstate")]
    NoGrounds { rule: String },

    #[error("reached the limit of {limit} learned rules this decision cycle")]
    MaxChunksReached { limit: u64 },

    #[error("{name} is not connected to the goal: {source}")]
    Unconnected {
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error("{name} could not be ordered: {source}")]
    ReorderFailure {
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error("{name} duplicates {existing}")]
    DuplicateChunk { name: String, existing: String },
}

impl ChunkError {
    /// Outcomes that are expected policy stops rather than failures a user
    /// should hear about.
    pub fn is_policy_stop(&self) -> bool {
        !matches!(
            self,
            ChunkError::Unconnected { .. } | ChunkError::ReorderFailure { .. }
        )
    }
}

pub type ChunkResult<T> = Result<T, ChunkError>;

/// Structural problems found when checking a learned rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("rule has no conditions")]
    NoConditions,

    #[error("{} condition identifier(s) unreachable from the goal", dangling.len())]
    Unconnected { dangling: Vec<String> },

    #[error("constraint tests unbound variable {variable}")]
    UnboundConstraint { variable: String },

    #[error("action identifier {variable} is never bound")]
    UnconnectedAction { variable: String },
}

impl ValidationError {
    /// Whether repair can help: some condition or action identifier has no
    /// link to the goal.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ValidationError::Unconnected { .. } | ValidationError::UnconnectedAction { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepairError {
    #[error("no working-memory path from the goal stack reaches {target}")]
    NoPath { target: String },
}

/// Problems recording an instantiation through the builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("no working-memory element matches {condition}")]
    NoMatch { condition: String },

    #[error("variable <{var}> is used before it is bound")]
    UnboundVariable { var: String },

    #[error("{what} requires a preceding positive condition")]
    NoCondition { what: &'static str },

    #[error("identifier {goal} is not on the goal stack")]
    NotAGoal { goal: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse chunking config: {0}")]
    Parse(#[from] toml::de::Error),
}
