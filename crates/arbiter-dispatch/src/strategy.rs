use crate::types::{AgentRecord, Task};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Agent-selection algorithm used by the routing loop.
///
/// A closed set: adding a strategy means adding a variant here, not
/// registering a function at runtime. Every strategy operates only over
/// eligible agents (status `Available` and spare capacity); the distributor
/// filters before calling [`RoutingStrategy::select`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Cyclic index over the eligible set.
    RoundRobin {
        /// Position of the next pick within the eligible set.
        #[serde(default)]
        cursor: usize,
    },
    /// Minimum load fraction (`current_load / max_concurrent`).
    LeastLoaded,
    /// Maximum specialization score for the task's type.
    Specialization,
    /// Maximum `success_rate / (avg_processing_time + 1)`.
    Performance,
    /// Weighted blend of spare capacity, specialization, and performance.
    Hybrid,
}

impl RoutingStrategy {
    /// The default strategy.
    pub fn hybrid() -> Self {
        RoutingStrategy::Hybrid
    }

    /// Round-robin with a reset cursor.
    pub fn round_robin() -> Self {
        RoutingStrategy::RoundRobin { cursor: 0 }
    }

    /// Name of the strategy as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            RoutingStrategy::RoundRobin { .. } => "round_robin",
            RoutingStrategy::LeastLoaded => "least_loaded",
            RoutingStrategy::Specialization => "specialization",
            RoutingStrategy::Performance => "performance",
            RoutingStrategy::Hybrid => "hybrid",
        }
    }

    /// Pick an agent for `task` from the eligible set.
    ///
    /// Returns the chosen agent's id, or `None` when `eligible` is empty.
    /// Score ties break by lexicographic agent id so selection is
    /// deterministic regardless of registry iteration order.
    pub fn select(&mut self, task: &Task, eligible: &[&AgentRecord]) -> Option<String> {
        if eligible.is_empty() {
            return None;
        }

        match self {
            RoutingStrategy::RoundRobin { cursor } => {
                let picked = &eligible[*cursor % eligible.len()];
                *cursor = cursor.wrapping_add(1);
                Some(picked.id.clone())
            }
            RoutingStrategy::LeastLoaded => pick_min_by(eligible, |a| a.load_fraction()),
            RoutingStrategy::Specialization => {
                pick_max_by(eligible, |a| a.specialization_for(&task.task_type))
            }
            RoutingStrategy::Performance => pick_max_by(eligible, performance_score),
            RoutingStrategy::Hybrid => pick_max_by(eligible, |a| {
                0.4 * (1.0 - a.load_fraction())
                    + 0.4 * a.specialization_for(&task.task_type)
                    + 0.2 * performance_score(a)
            }),
        }
    }
}

fn performance_score(agent: &AgentRecord) -> f64 {
    agent.success_rate / (agent.avg_processing_time_ms + 1.0)
}

fn pick_max_by(eligible: &[&AgentRecord], score: impl Fn(&AgentRecord) -> f64) -> Option<String> {
    eligible
        .iter()
        .map(|a| (score(a), &a.id))
        .max_by(|(sa, ida), (sb, idb)| {
            sa.total_cmp(sb).then_with(|| idb.cmp(ida))
        })
        .map(|(_, id)| id.clone())
}

fn pick_min_by(eligible: &[&AgentRecord], score: impl Fn(&AgentRecord) -> f64) -> Option<String> {
    pick_max_by(eligible, |a| -score(a))
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        RoutingStrategy::Hybrid
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(RoutingStrategy::round_robin()),
            "least_loaded" => Ok(RoutingStrategy::LeastLoaded),
            "specialization" => Ok(RoutingStrategy::Specialization),
            "performance" => Ok(RoutingStrategy::Performance),
            "hybrid" => Ok(RoutingStrategy::Hybrid),
            other => Err(format!("unknown routing strategy: {other}")),
        }
    }
}
