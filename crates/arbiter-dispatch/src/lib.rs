//! Task routing and load balancing for pools of independent worker agents.
//!
//! The distributor owns an agent registry and a bounded priority queue of
//! pending tasks. While started, a routing loop binds tasks to agents via a
//! selectable [`RoutingStrategy`] and a monitoring loop handles heartbeat
//! expiry, rolling statistics, auto-scaling recommendations, and retention
//! of completed work.
//!
//! # Main types
//!
//! - [`WorkloadDistributor`] — Owns all shared state and the two loops.
//! - [`TaskQueue`] — Bounded, concurrency-safe priority queue.
//! - [`RoutingStrategy`] — Closed set of agent-selection algorithms.
//! - [`Task`] / [`AgentRecord`] / [`TaskAssignment`] — Data entities.
//! - [`DispatchConfig`] — TOML-loadable tunables.

/// TOML-loadable distributor configuration.
pub mod config;
/// The workload distributor and its background loops.
pub mod distributor;
/// Bounded blocking priority queue.
pub mod queue;
/// Agent-selection strategies.
pub mod strategy;
/// Shared dispatch entities and snapshots.
pub mod types;

pub use config::DispatchConfig;
pub use distributor::WorkloadDistributor;
pub use queue::TaskQueue;
pub use strategy::RoutingStrategy;
pub use types::{
    AgentLoadSnapshot, AgentRecord, AgentStatus, AssignmentStatus, DispatchMetrics,
    DispatchStatus, PerformanceSample, ScaleSignal, Task, TaskAssignment, TaskPriority,
};
