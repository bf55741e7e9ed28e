use crate::types::{AgentDecision, AggregationMethod, Decision};

/// Verdict and confidence produced by one aggregation method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodOutcome {
    /// Winning verdict.
    pub decision: Decision,
    /// Confidence in the winner, in [0, 1].
    pub confidence: f64,
}

/// Expert-override thresholds: the top expert's verdict is adopted only
/// when both its confidence and expertise reach this bar.
const EXPERT_OVERRIDE_BAR: f64 = 0.8;

/// Combine a round's verdicts with the given method.
///
/// An empty slice always yields review at zero confidence rather than an
/// error, for every method.
pub fn aggregate(method: AggregationMethod, decisions: &[AgentDecision]) -> MethodOutcome {
    if decisions.is_empty() {
        return MethodOutcome {
            decision: Decision::Review,
            confidence: 0.0,
        };
    }
    match method {
        AggregationMethod::MajorityVote => majority_vote(decisions),
        AggregationMethod::WeightedVote => weighted_vote(decisions),
        AggregationMethod::Consensus => consensus(decisions),
        AggregationMethod::ExpertOverride => expert_override(decisions),
        AggregationMethod::ConfidenceWeighted => confidence_weighted(decisions),
        AggregationMethod::Hybrid => hybrid(decisions),
    }
}

/// Sum a per-decision mass per verdict value and pick the winner.
///
/// Ties break by `Decision` declaration order: iterating in that order
/// with a strict comparison keeps the earliest-declared value.
fn tally(
    decisions: &[AgentDecision],
    mass: impl Fn(&AgentDecision) -> f64,
) -> (Decision, f64, f64) {
    let mut totals = [0.0f64; Decision::ALL.len()];
    let mut grand_total = 0.0;
    for d in decisions {
        let m = mass(d);
        totals[d.decision.declaration_index()] += m;
        grand_total += m;
    }

    let mut winner = Decision::Approve;
    let mut winner_mass = f64::NEG_INFINITY;
    for value in Decision::ALL {
        let m = totals[value.declaration_index()];
        if m > winner_mass {
            winner = value;
            winner_mass = m;
        }
    }
    (winner, winner_mass, grand_total)
}

fn majority_vote(decisions: &[AgentDecision]) -> MethodOutcome {
    let (winner, count, total) = tally(decisions, |_| 1.0);
    MethodOutcome {
        decision: winner,
        confidence: count / total,
    }
}

fn weighted_vote(decisions: &[AgentDecision]) -> MethodOutcome {
    let (winner, mass, total) = tally(decisions, AgentDecision::effective_weight);
    MethodOutcome {
        decision: winner,
        confidence: if total > 0.0 { mass / total } else { 0.0 },
    }
}

fn consensus(decisions: &[AgentDecision]) -> MethodOutcome {
    let first = decisions[0].decision;
    if decisions.iter().all(|d| d.decision == first) {
        let mean_confidence =
            decisions.iter().map(|d| d.confidence).sum::<f64>() / decisions.len() as f64;
        MethodOutcome {
            decision: first,
            confidence: mean_confidence,
        }
    } else {
        MethodOutcome {
            decision: Decision::Review,
            confidence: 0.5,
        }
    }
}

/// The decision with the highest expertise, ties broken by agent id so the
/// pick does not depend on submission order.
pub(crate) fn top_expert(decisions: &[AgentDecision]) -> Option<&AgentDecision> {
    decisions.iter().max_by(|a, b| {
        a.expertise
            .total_cmp(&b.expertise)
            .then_with(|| b.agent_id.cmp(&a.agent_id))
    })
}

fn expert_override(decisions: &[AgentDecision]) -> MethodOutcome {
    if let Some(expert) = top_expert(decisions) {
        if expert.confidence >= EXPERT_OVERRIDE_BAR && expert.expertise >= EXPERT_OVERRIDE_BAR {
            return MethodOutcome {
                decision: expert.decision,
                confidence: expert.confidence,
            };
        }
    }
    weighted_vote(decisions)
}

fn confidence_weighted(decisions: &[AgentDecision]) -> MethodOutcome {
    let (winner, mass, total) = tally(decisions, |d| d.confidence);
    MethodOutcome {
        decision: winner,
        confidence: if total > 0.0 { mass / total } else { 0.0 },
    }
}

fn hybrid(decisions: &[AgentDecision]) -> MethodOutcome {
    let unanimous = consensus(decisions);
    if unanimous.decision != Decision::Review {
        return unanimous;
    }
    let expert = expert_override(decisions);
    if expert.confidence >= EXPERT_OVERRIDE_BAR {
        return expert;
    }
    confidence_weighted(decisions)
}
