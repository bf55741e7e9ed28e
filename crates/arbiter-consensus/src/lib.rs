//! Multi-strategy decision aggregation for pools of independent agents.
//!
//! Agents cast one verdict each into a [`DecisionRequest`] round; the
//! [`DecisionAggregator`] combines them with a selectable
//! [`AggregationMethod`], resolves disagreement with a
//! [`ConflictStrategy`], and produces a single [`AggregatedDecision`] with
//! traceable reasoning and evidence summaries.
//!
//! # Main types
//!
//! - [`DecisionAggregator`] — Owns pending and completed rounds.
//! - [`AgentDecision`] / [`DecisionRequest`] / [`AggregatedDecision`] —
//!   One voting round's data entities.
//! - [`AgentVotingProfile`] — Per-agent weight and expertise table used
//!   for contextual scoring.
//! - [`ConsensusConfig`] — TOML-loadable tunables.

/// The decision aggregator and its round lifecycle.
pub mod aggregator;
/// TOML-loadable aggregator configuration.
pub mod config;
/// Conflict detection and resolution strategies.
pub mod conflict;
/// Contextual expertise scoring.
pub mod expertise;
/// The aggregation methods.
pub mod methods;
/// Reasoning, evidence, and consensus-level summaries.
pub mod summary;
/// Shared consensus entities.
pub mod types;

pub use aggregator::DecisionAggregator;
pub use config::ConsensusConfig;
pub use expertise::AgentVotingProfile;
pub use methods::MethodOutcome;
pub use types::{
    AgentDecision, AggregatedDecision, AggregationMethod, ConflictStrategy, Decision,
    DecisionRequest, DecisionStatistics, EvidenceStat,
};
