use crate::config::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An agent's voting profile: its configured weight and its declared
/// expertise per context area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVotingProfile {
    /// Voting weight in [0, 2], clamped on construction.
    pub weight: f64,
    /// Expertise per area (e.g. "high_value", "crypto", "international"),
    /// each in [0, 1], clamped on construction.
    pub expertise: HashMap<String, f64>,
}

impl AgentVotingProfile {
    /// Create a profile, clamping weight and per-area scores into range.
    pub fn new(weight: f64, expertise: HashMap<String, f64>) -> Self {
        Self {
            weight: weight.clamp(0.0, 2.0),
            expertise: expertise
                .into_iter()
                .map(|(k, v)| (k, v.clamp(0.0, 1.0)))
                .collect(),
        }
    }
}

/// Derive the expertise areas implied by a transaction context.
///
/// - `amount` at or above the high-value band → "high_value"; below the
///   micro band → "micro".
/// - `category` string value is used verbatim as an area.
/// - `location` present and different from the domestic marker →
///   "international".
pub fn context_areas(
    context: &HashMap<String, serde_json::Value>,
    config: &ConsensusConfig,
) -> Vec<String> {
    let mut areas = Vec::new();

    if let Some(amount) = context.get("amount").and_then(serde_json::Value::as_f64) {
        if amount >= config.high_value_threshold {
            areas.push("high_value".to_string());
        } else if amount < config.micro_threshold {
            areas.push("micro".to_string());
        }
    }
    if let Some(category) = context.get("category").and_then(serde_json::Value::as_str) {
        areas.push(category.to_string());
    }
    if let Some(location) = context.get("location").and_then(serde_json::Value::as_str) {
        if location != config.domestic_marker {
            areas.push("international".to_string());
        }
    }

    areas
}

/// Score an agent's expertise for a specific transaction context.
///
/// Intersects the context's areas with the agent's declared table and
/// averages the matches. No matching area (or no area at all) scores a
/// neutral 1.0 so unprofiled agents are not penalized.
pub fn contextual_expertise(
    context: &HashMap<String, serde_json::Value>,
    table: &HashMap<String, f64>,
    config: &ConsensusConfig,
) -> f64 {
    let areas = context_areas(context, config);
    let matched: Vec<f64> = areas
        .iter()
        .filter_map(|area| table.get(area).copied())
        .collect();
    if matched.is_empty() {
        return 1.0;
    }
    matched.iter().sum::<f64>() / matched.len() as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_high_value_banding() {
        let config = ConsensusConfig::default();
        let areas = context_areas(&context(&[("amount", json!(25_000.0))]), &config);
        assert_eq!(areas, vec!["high_value"]);
    }

    #[test]
    fn test_micro_banding() {
        let config = ConsensusConfig::default();
        let areas = context_areas(&context(&[("amount", json!(2.5))]), &config);
        assert_eq!(areas, vec!["micro"]);
    }

    #[test]
    fn test_mid_range_amount_has_no_band() {
        let config = ConsensusConfig::default();
        let areas = context_areas(&context(&[("amount", json!(500.0))]), &config);
        assert!(areas.is_empty());
    }

    #[test]
    fn test_category_and_location() {
        let config = ConsensusConfig::default();
        let ctx = context(&[
            ("category", json!("crypto")),
            ("location", json!("overseas")),
        ]);
        let areas = context_areas(&ctx, &config);
        assert_eq!(areas, vec!["crypto", "international"]);

        let domestic = context(&[("location", json!("domestic"))]);
        assert!(context_areas(&domestic, &config).is_empty());
    }

    #[test]
    fn test_expertise_averages_matched_areas() {
        let config = ConsensusConfig::default();
        let ctx = context(&[
            ("amount", json!(50_000.0)),
            ("category", json!("crypto")),
        ]);
        let table = HashMap::from([
            ("high_value".to_string(), 0.9),
            ("crypto".to_string(), 0.5),
            ("velocity".to_string(), 0.2),
        ]);
        let score = contextual_expertise(&ctx, &table, &config);
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_expertise_defaults_to_one_without_match() {
        let config = ConsensusConfig::default();
        let ctx = context(&[("category", json!("gift_cards"))]);
        let table = HashMap::from([("crypto".to_string(), 0.4)]);
        assert_eq!(contextual_expertise(&ctx, &table, &config), 1.0);
        assert_eq!(contextual_expertise(&HashMap::new(), &table, &config), 1.0);
    }

    #[test]
    fn test_profile_clamps_on_construction() {
        let profile = AgentVotingProfile::new(
            3.0,
            HashMap::from([("crypto".to_string(), 1.4)]),
        );
        assert_eq!(profile.weight, 2.0);
        assert_eq!(profile.expertise.get("crypto"), Some(&1.0));
    }
}
