pub mod agent;
pub mod backtrace;
pub mod builder;
pub mod chunker;
pub mod cond_set;
pub mod condition;
pub mod config;
pub mod constraints;
pub mod error;
pub mod explain;
pub mod identity;
pub mod instantiation;
pub mod repair;
pub mod reorder;
pub mod rule;
pub mod stats;
pub mod symbol;
pub mod trace;
pub mod variablize;
pub mod wm;

pub use agent::Agent;
pub use chunker::{Chunker, LearnedRule};
pub use config::{ChunkConfig, LearningMode};
pub use error::{ChunkError, ChunkResult};

#[cfg(test)]
pub(crate) mod test_utils;
