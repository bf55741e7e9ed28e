use crate::methods::{top_expert, MethodOutcome};
use crate::types::{AgentDecision, ConflictStrategy, Decision};
use tracing::debug;

/// Whether the round holds at least two distinct verdict values.
pub fn has_conflict(decisions: &[AgentDecision]) -> bool {
    decisions
        .windows(2)
        .any(|pair| pair[0].decision != pair[1].decision)
}

/// Apply a conflict-resolution strategy to a disputed round.
///
/// `method_outcome` is what the aggregation method produced; strategies
/// either replace it or pass it through.
pub fn resolve(
    strategy: ConflictStrategy,
    method_outcome: MethodOutcome,
    decisions: &[AgentDecision],
) -> MethodOutcome {
    let resolved = match strategy {
        ConflictStrategy::MostConservative => {
            let most_conservative = decisions
                .iter()
                .map(|d| d.decision)
                .max_by_key(|d| d.conservatism_rank())
                .unwrap_or(method_outcome.decision);
            MethodOutcome {
                decision: most_conservative,
                confidence: method_outcome.confidence,
            }
        }
        ConflictStrategy::HighestConfidence => decisions
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.agent_id.cmp(&a.agent_id))
            })
            .map(|d| MethodOutcome {
                decision: d.decision,
                confidence: d.confidence,
            })
            .unwrap_or(method_outcome),
        ConflictStrategy::ExpertPriority => top_expert(decisions)
            .map(|d| MethodOutcome {
                decision: d.decision,
                confidence: d.confidence,
            })
            .unwrap_or(method_outcome),
        ConflictStrategy::WeightedAverage => method_outcome,
        ConflictStrategy::EscalateToHuman => MethodOutcome {
            decision: Decision::Escalate,
            confidence: 0.5,
        },
    };
    debug!(
        strategy = %strategy,
        decision = %resolved.decision,
        "Conflict resolved"
    );
    resolved
}
