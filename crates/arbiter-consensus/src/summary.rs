use crate::types::{AgentDecision, Decision, EvidenceStat};
use std::collections::HashMap;

/// Number of reasoning lines kept in a summary.
const REASONING_TOP_N: usize = 10;

/// Blend of raw agreement and confidence-weighted agreement with the final
/// verdict, in [0, 1].
pub fn consensus_level(decisions: &[AgentDecision], final_decision: Decision) -> f64 {
    if decisions.is_empty() {
        return 0.0;
    }
    let total = decisions.len() as f64;
    let agreeing: Vec<&AgentDecision> = decisions
        .iter()
        .filter(|d| d.decision == final_decision)
        .collect();
    let agreement_fraction = agreeing.len() as f64 / total;
    let confidence_fraction = agreeing.iter().map(|d| d.confidence).sum::<f64>() / total;
    (agreement_fraction + confidence_fraction) / 2.0
}

/// Deduplicated reasoning lines ranked by frequency, top 10.
///
/// Equal frequencies keep first-appearance order so the output is stable
/// across runs.
pub fn reasoning_summary(decisions: &[AgentDecision]) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for line in decisions.iter().flat_map(|d| d.reasoning.iter()) {
        match counts.iter_mut().find(|(seen, _)| seen == line) {
            Some((_, n)) => *n += 1,
            None => counts.push((line.clone(), 1)),
        }
    }
    // Stable sort preserves first-appearance order among equal counts.
    counts.sort_by(|(_, a), (_, b)| b.cmp(a));
    counts
        .into_iter()
        .take(REASONING_TOP_N)
        .map(|(line, _)| line)
        .collect()
}

/// Per-key evidence aggregation: numeric keys as avg/min/max/count,
/// anything else as distinct values plus count.
pub fn evidence_summary(decisions: &[AgentDecision]) -> HashMap<String, EvidenceStat> {
    let mut by_key: HashMap<String, Vec<&serde_json::Value>> = HashMap::new();
    let mut key_order: Vec<String> = Vec::new();
    for d in decisions {
        for (key, value) in &d.evidence {
            if !by_key.contains_key(key) {
                key_order.push(key.clone());
            }
            by_key.entry(key.clone()).or_default().push(value);
        }
    }

    let mut summary = HashMap::new();
    for key in key_order {
        let Some(values) = by_key.get(&key) else {
            continue;
        };
        let numbers: Vec<f64> = values
            .iter()
            .filter_map(|v| v.as_f64())
            .collect();
        let stat = if numbers.len() == values.len() && !numbers.is_empty() {
            let sum: f64 = numbers.iter().sum();
            EvidenceStat::Numeric {
                avg: sum / numbers.len() as f64,
                min: numbers.iter().copied().fold(f64::INFINITY, f64::min),
                max: numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                count: numbers.len(),
            }
        } else {
            let mut distinct: Vec<serde_json::Value> = Vec::new();
            for v in values {
                if !distinct.contains(v) {
                    distinct.push((*v).clone());
                }
            }
            EvidenceStat::Categorical {
                values: distinct,
                count: values.len(),
            }
        };
        summary.insert(key, stat);
    }
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vote(agent: &str, decision: Decision, confidence: f64) -> AgentDecision {
        AgentDecision::new(agent, "scorer", decision, confidence)
    }

    #[test]
    fn test_consensus_level_unanimous() {
        let decisions = vec![
            vote("a1", Decision::Approve, 1.0),
            vote("a2", Decision::Approve, 1.0),
        ];
        assert_eq!(consensus_level(&decisions, Decision::Approve), 1.0);
    }

    #[test]
    fn test_consensus_level_split() {
        let decisions = vec![
            vote("a1", Decision::Approve, 0.8),
            vote("a2", Decision::Decline, 0.6),
        ];
        // Agreement 1/2, agreeing confidence 0.8/2 → (0.5 + 0.4) / 2.
        assert!((consensus_level(&decisions, Decision::Approve) - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_consensus_level_empty() {
        assert_eq!(consensus_level(&[], Decision::Review), 0.0);
    }

    #[test]
    fn test_reasoning_frequency_ranking() {
        let decisions = vec![
            vote("a1", Decision::Decline, 0.9)
                .with_reasoning(vec!["velocity spike".into(), "new device".into()]),
            vote("a2", Decision::Decline, 0.8)
                .with_reasoning(vec!["velocity spike".into()]),
            vote("a3", Decision::Flag, 0.5).with_reasoning(vec!["new device".into()]),
            vote("a4", Decision::Flag, 0.5)
                .with_reasoning(vec!["velocity spike".into(), "odd hour".into()]),
        ];
        let summary = reasoning_summary(&decisions);
        assert_eq!(summary[0], "velocity spike");
        assert_eq!(summary[1], "new device");
        assert_eq!(summary[2], "odd hour");
    }

    #[test]
    fn test_reasoning_top_ten_truncation() {
        let reasoning: Vec<String> = (0..15).map(|i| format!("signal {i}")).collect();
        let decisions = vec![vote("a1", Decision::Flag, 0.5).with_reasoning(reasoning)];
        assert_eq!(reasoning_summary(&decisions).len(), 10);
    }

    #[test]
    fn test_evidence_numeric_aggregation() {
        let decisions = vec![
            vote("a1", Decision::Decline, 0.9).with_evidence(HashMap::from([(
                "risk_score".to_string(),
                json!(0.8),
            )])),
            vote("a2", Decision::Decline, 0.9).with_evidence(HashMap::from([(
                "risk_score".to_string(),
                json!(0.4),
            )])),
        ];
        let summary = evidence_summary(&decisions);
        match summary.get("risk_score").unwrap() {
            EvidenceStat::Numeric {
                avg,
                min,
                max,
                count,
            } => {
                assert!((avg - 0.6).abs() < 1e-9);
                assert_eq!(*min, 0.4);
                assert_eq!(*max, 0.8);
                assert_eq!(*count, 2);
            }
            other => panic!("expected numeric stat, got {other:?}"),
        }
    }

    #[test]
    fn test_evidence_categorical_aggregation() {
        let decisions = vec![
            vote("a1", Decision::Flag, 0.5).with_evidence(HashMap::from([(
                "device".to_string(),
                json!("android"),
            )])),
            vote("a2", Decision::Flag, 0.5).with_evidence(HashMap::from([(
                "device".to_string(),
                json!("ios"),
            )])),
            vote("a3", Decision::Flag, 0.5).with_evidence(HashMap::from([(
                "device".to_string(),
                json!("android"),
            )])),
        ];
        let summary = evidence_summary(&decisions);
        match summary.get("device").unwrap() {
            EvidenceStat::Categorical { values, count } => {
                assert_eq!(values, &vec![json!("android"), json!("ios")]);
                assert_eq!(*count, 3);
            }
            other => panic!("expected categorical stat, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_evidence_falls_back_to_categorical() {
        let decisions = vec![
            vote("a1", Decision::Flag, 0.5)
                .with_evidence(HashMap::from([("ip".to_string(), json!(10))])),
            vote("a2", Decision::Flag, 0.5)
                .with_evidence(HashMap::from([("ip".to_string(), json!("10.0.0.1"))])),
        ];
        let summary = evidence_summary(&decisions);
        assert!(matches!(
            summary.get("ip").unwrap(),
            EvidenceStat::Categorical { .. }
        ));
    }
}
