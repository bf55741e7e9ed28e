use crate::config::ConsensusConfig;
use crate::conflict;
use crate::expertise::{contextual_expertise, AgentVotingProfile};
use crate::methods;
use crate::summary;
use crate::types::{
    AgentDecision, AggregatedDecision, DecisionRequest, DecisionStatistics,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// State machine guarding the check-readiness-then-aggregate sequence.
///
/// A round leaves `Collecting` exactly once, under the pending-map write
/// lock. An `Aggregating` round stays in the pending map until the
/// completed-map insert, so its id is present in exactly one of the two
/// maps at every instant and a racing duplicate request or submission can
/// never reopen or re-aggregate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundState {
    Collecting,
    Aggregating,
}

#[derive(Debug)]
struct PendingRound {
    request: DecisionRequest,
    decisions: HashMap<String, AgentDecision>,
    started_at: DateTime<Utc>,
    state: RoundState,
}

impl PendingRound {
    fn timed_out(&self, now: DateTime<Utc>) -> bool {
        let timeout = ChronoDuration::from_std(self.request.timeout)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        now - self.started_at > timeout
    }

    fn all_required_present(&self) -> bool {
        self.request
            .required_agents
            .iter()
            .all(|agent| self.decisions.contains_key(agent))
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    total_aggregated: u64,
    method_usage: HashMap<String, u64>,
    decision_counts: HashMap<String, u64>,
    consensus_sum: f64,
}

/// Combines independent agent verdicts into one authoritative decision per
/// round, with conflict resolution and traceable reasoning.
///
/// A round id lives in exactly one of the pending or completed maps at any
/// time. Aggregation happens at most once per round: automatically when all
/// required agents have voted, lazily on lookup once the round's timeout
/// has elapsed with enough verdicts, or explicitly via
/// [`DecisionAggregator::force_aggregation`].
pub struct DecisionAggregator {
    config: ConsensusConfig,
    pending: RwLock<HashMap<String, PendingRound>>,
    completed: RwLock<HashMap<String, AggregatedDecision>>,
    profiles: RwLock<HashMap<String, AgentVotingProfile>>,
    stats: RwLock<StatsInner>,
}

impl DecisionAggregator {
    /// Create an aggregator with the given configuration.
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            pending: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            stats: RwLock::new(StatsInner::default()),
        }
    }

    /// Register an agent's voting weight and per-area expertise table.
    ///
    /// Replaces any previous profile for the same agent.
    pub async fn register_agent_profile(&self, agent_id: impl Into<String>, profile: AgentVotingProfile) {
        self.profiles.write().await.insert(agent_id.into(), profile);
    }

    /// Open a voting round. Returns the round id.
    ///
    /// A duplicate id is ignored (the existing round wins) so a round can
    /// never be silently reset while verdicts are in flight.
    pub async fn request_decision(&self, request: DecisionRequest) -> String {
        let id = request.id.clone();
        if self.completed.read().await.contains_key(&id) {
            warn!(request_id = %id, "Round id already aggregated, ignoring new request");
            return id;
        }
        let mut pending = self.pending.write().await;
        if pending.contains_key(&id) {
            warn!(request_id = %id, "Round already open, ignoring duplicate request");
            return id;
        }
        info!(
            request_id = %id,
            required = request.required_agents.len(),
            min_agents = request.min_agents,
            method = %request.method,
            "Decision round opened"
        );
        pending.insert(
            id.clone(),
            PendingRound {
                request,
                decisions: HashMap::new(),
                started_at: Utc::now(),
                state: RoundState::Collecting,
            },
        );
        id
    }

    /// Record one agent's verdict for a round.
    ///
    /// Attaches the agent's configured weight and its contextual expertise
    /// for the round's transaction context, then aggregates if every
    /// required agent has now voted. Returns `false` (without mutating the
    /// round) when the id is unknown, the round is already aggregating, or
    /// the round's timeout has elapsed.
    pub async fn submit_agent_decision(
        &self,
        request_id: &str,
        mut decision: AgentDecision,
    ) -> bool {
        let mut pending = self.pending.write().await;
        let Some(round) = pending.get_mut(request_id) else {
            warn!(request_id, "Verdict for unknown round rejected");
            return false;
        };
        if round.state != RoundState::Collecting {
            warn!(request_id, "Verdict arrived while round was aggregating");
            return false;
        }
        if round.timed_out(Utc::now()) {
            warn!(
                request_id,
                agent_id = %decision.agent_id,
                "Verdict after round timeout rejected"
            );
            return false;
        }

        {
            let profiles = self.profiles.read().await;
            if let Some(profile) = profiles.get(&decision.agent_id) {
                decision.weight = profile.weight;
                decision.expertise =
                    contextual_expertise(&round.request.context, &profile.expertise, &self.config);
            }
        }

        debug!(
            request_id,
            agent_id = %decision.agent_id,
            verdict = %decision.decision,
            weight = decision.weight,
            expertise = decision.expertise,
            "Verdict recorded"
        );
        round.decisions.insert(decision.agent_id.clone(), decision);

        if round.all_required_present() {
            round.state = RoundState::Aggregating;
            let request = round.request.clone();
            let decisions = std::mem::take(&mut round.decisions);
            drop(pending);
            self.finalize(request, decisions).await;
        }
        true
    }

    /// Fetch a round's outcome.
    ///
    /// A still-pending round whose timeout has elapsed with at least
    /// `min_agents` verdicts is aggregated on the spot; late submissions
    /// are rejected, so this lookup is how timeout-driven readiness
    /// completes.
    pub async fn get_aggregated_decision(&self, request_id: &str) -> Option<AggregatedDecision> {
        if let Some(done) = self.completed.read().await.get(request_id) {
            return Some(done.clone());
        }

        let (request, decisions) = {
            let mut pending = self.pending.write().await;
            let Some(round) = pending.get_mut(request_id) else {
                return None;
            };
            let ready = round.state == RoundState::Collecting
                && round.timed_out(Utc::now())
                && round.decisions.len() >= round.request.min_agents;
            if !ready {
                return None;
            }
            round.state = RoundState::Aggregating;
            (round.request.clone(), std::mem::take(&mut round.decisions))
        };
        Some(self.finalize(request, decisions).await)
    }

    /// Aggregate a round immediately with whatever verdicts exist.
    ///
    /// Ignores readiness entirely and never blocks. Returns `None` when
    /// the round is unknown, has no verdicts at all (an empty round stays
    /// open), or is already being aggregated by a racing caller.
    pub async fn force_aggregation(&self, request_id: &str) -> Option<AggregatedDecision> {
        if let Some(done) = self.completed.read().await.get(request_id) {
            return Some(done.clone());
        }

        let (request, decisions) = {
            let mut pending = self.pending.write().await;
            match pending.get_mut(request_id) {
                Some(round) if round.state != RoundState::Collecting => return None,
                Some(round) if round.decisions.is_empty() => {
                    warn!(request_id, "Cannot force-aggregate a round without verdicts");
                    return None;
                }
                Some(round) => {
                    round.state = RoundState::Aggregating;
                    (round.request.clone(), std::mem::take(&mut round.decisions))
                }
                None => return None,
            }
        };
        info!(request_id, "Forcing aggregation below readiness");
        Some(self.finalize(request, decisions).await)
    }

    /// Read-only aggregator statistics.
    pub async fn get_decision_statistics(&self) -> DecisionStatistics {
        let stats = self.stats.read().await;
        DecisionStatistics {
            pending_rounds: self.pending.read().await.len(),
            total_aggregated: stats.total_aggregated,
            method_usage: stats.method_usage.clone(),
            decision_counts: stats.decision_counts.clone(),
            avg_consensus_level: if stats.total_aggregated == 0 {
                0.0
            } else {
                stats.consensus_sum / stats.total_aggregated as f64
            },
        }
    }

    /// Drop completed decisions older than `max_age`, along with pending
    /// rounds that have been open longer than `max_age`. Newer entries are
    /// untouched; running it twice removes nothing more.
    ///
    /// Returns the number of entries removed.
    pub async fn cleanup_old_decisions(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let cutoff = ChronoDuration::from_std(max_age)
            .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 1_000));

        let mut removed = 0;
        {
            let mut completed = self.completed.write().await;
            let before = completed.len();
            completed.retain(|_, d| now - d.aggregated_at <= cutoff);
            removed += before - completed.len();
        }
        {
            let mut pending = self.pending.write().await;
            let before = pending.len();
            // Rounds mid-aggregation are left for finalize to remove.
            pending.retain(|_, round| {
                round.state == RoundState::Aggregating || now - round.started_at <= cutoff
            });
            removed += before - pending.len();
        }
        if removed > 0 {
            info!(removed, "Cleaned up old decision rounds");
        }
        removed
    }

    /// Run the round's method and conflict strategy, move the round from
    /// pending to completed, and feed the statistics.
    ///
    /// Callers must have transitioned the round to `Aggregating` and must
    /// not hold the pending lock.
    async fn finalize(
        &self,
        request: DecisionRequest,
        decisions: HashMap<String, AgentDecision>,
    ) -> AggregatedDecision {
        // Sort by agent id so the output never depends on map iteration
        // order or submission interleaving.
        let mut decisions: Vec<AgentDecision> = decisions.into_values().collect();
        decisions.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        let method_outcome = methods::aggregate(request.method, &decisions);
        let conflicted = conflict::has_conflict(&decisions);
        let outcome = if conflicted {
            conflict::resolve(request.conflict_strategy, method_outcome, &decisions)
        } else {
            method_outcome
        };

        let weights = decisions
            .iter()
            .map(|d| (d.agent_id.clone(), d.effective_weight()))
            .collect();
        let aggregated = AggregatedDecision {
            request_id: request.id.clone(),
            decision: outcome.decision,
            confidence: outcome.confidence.clamp(0.0, 1.0),
            method: request.method,
            conflict_strategy: conflicted.then_some(request.conflict_strategy),
            reasoning_summary: summary::reasoning_summary(&decisions),
            evidence_summary: summary::evidence_summary(&decisions),
            consensus_level: summary::consensus_level(&decisions, outcome.decision),
            weights,
            contributing: decisions,
            aggregated_at: Utc::now(),
        };

        info!(
            request_id = %aggregated.request_id,
            decision = %aggregated.decision,
            confidence = aggregated.confidence,
            consensus_level = aggregated.consensus_level,
            method = %aggregated.method,
            conflicted,
            "Round aggregated"
        );

        {
            let mut stats = self.stats.write().await;
            stats.total_aggregated += 1;
            *stats
                .method_usage
                .entry(aggregated.method.name().to_string())
                .or_insert(0) += 1;
            *stats
                .decision_counts
                .entry(aggregated.decision.to_string())
                .or_insert(0) += 1;
            stats.consensus_sum += aggregated.consensus_level;
        }
        // Hand-off under both write locks: the id moves between the maps
        // without ever being absent from both.
        {
            let mut pending = self.pending.write().await;
            let mut completed = self.completed.write().await;
            completed.insert(aggregated.request_id.clone(), aggregated.clone());
            pending.remove(&aggregated.request_id);
        }
        aggregated
    }
}

impl Default for DecisionAggregator {
    fn default() -> Self {
        Self::new(ConsensusConfig::default())
    }
}
