use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Verdict an agent can cast on a decision round.
///
/// Declaration order is the documented tie-break for equal vote counts:
/// when two values tie, the one declared first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Let the transaction through.
    Approve,
    /// Block the transaction.
    Decline,
    /// Let it through but mark for later analysis.
    Flag,
    /// Route to manual review.
    Review,
    /// Escalate to a human operator immediately.
    Escalate,
}

impl Decision {
    /// All values in declaration order.
    pub const ALL: [Decision; 5] = [
        Decision::Approve,
        Decision::Decline,
        Decision::Flag,
        Decision::Review,
        Decision::Escalate,
    ];

    /// Position in declaration order, used as the deterministic tie-break.
    pub fn declaration_index(self) -> usize {
        match self {
            Decision::Approve => 0,
            Decision::Decline => 1,
            Decision::Flag => 2,
            Decision::Review => 3,
            Decision::Escalate => 4,
        }
    }

    /// Conservatism rank: DECLINE > ESCALATE > REVIEW > FLAG > APPROVE.
    ///
    /// Higher means more conservative.
    pub fn conservatism_rank(self) -> u8 {
        match self {
            Decision::Decline => 4,
            Decision::Escalate => 3,
            Decision::Review => 2,
            Decision::Flag => 1,
            Decision::Approve => 0,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Decline => write!(f, "decline"),
            Decision::Flag => write!(f, "flag"),
            Decision::Review => write!(f, "review"),
            Decision::Escalate => write!(f, "escalate"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Decision::Approve),
            "decline" => Ok(Decision::Decline),
            "flag" => Ok(Decision::Flag),
            "review" => Ok(Decision::Review),
            "escalate" => Ok(Decision::Escalate),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

/// One agent's verdict within a decision round.
///
/// Confidence is clamped to [0, 1], weight to [0, 2], and expertise to
/// [0, 1] on every write; out-of-range inputs never reach storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    /// The voting agent.
    pub agent_id: String,
    /// Agent type label.
    pub agent_type: String,
    /// The verdict.
    pub decision: Decision,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    /// Free-form reasoning lines.
    #[serde(default)]
    pub reasoning: Vec<String>,
    /// Supporting evidence keyed by signal name.
    #[serde(default)]
    pub evidence: HashMap<String, serde_json::Value>,
    /// Voting weight in [0, 2], attached by the aggregator.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Contextual expertise in [0, 1], attached by the aggregator.
    #[serde(default = "default_expertise")]
    pub expertise: f64,
    /// When the verdict was cast.
    pub timestamp: DateTime<Utc>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_expertise() -> f64 {
    1.0
}

impl AgentDecision {
    /// Create a verdict with neutral weight and expertise.
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        decision: Decision,
        confidence: f64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: Vec::new(),
            evidence: HashMap::new(),
            weight: 1.0,
            expertise: 1.0,
            timestamp: Utc::now(),
        }
    }

    /// Attach reasoning lines.
    pub fn with_reasoning(mut self, reasoning: Vec<String>) -> Self {
        self.reasoning = reasoning;
        self
    }

    /// Attach evidence.
    pub fn with_evidence(mut self, evidence: HashMap<String, serde_json::Value>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Set the voting weight (clamped to [0, 2]).
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.clamp(0.0, 2.0);
        self
    }

    /// Set the expertise score (clamped to [0, 1]).
    pub fn with_expertise(mut self, expertise: f64) -> Self {
        self.expertise = expertise.clamp(0.0, 1.0);
        self
    }

    /// Effective voting mass: weight scaled by contextual expertise.
    pub fn effective_weight(&self) -> f64 {
        self.weight * self.expertise
    }
}

/// How a round's verdicts are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    /// Plurality of raw verdicts.
    #[default]
    MajorityVote,
    /// Plurality by `weight × expertise` mass.
    WeightedVote,
    /// Unanimity or fall back to review.
    Consensus,
    /// Defer to a sufficiently confident top expert.
    ExpertOverride,
    /// Plurality by summed confidence.
    ConfidenceWeighted,
    /// Consensus, then expert override, then confidence weighting.
    Hybrid,
}

impl AggregationMethod {
    /// Name of the method as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            AggregationMethod::MajorityVote => "majority_vote",
            AggregationMethod::WeightedVote => "weighted_vote",
            AggregationMethod::Consensus => "consensus",
            AggregationMethod::ExpertOverride => "expert_override",
            AggregationMethod::ConfidenceWeighted => "confidence_weighted",
            AggregationMethod::Hybrid => "hybrid",
        }
    }

    /// Parse a method name, falling back to majority vote with a warning.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| {
            tracing::warn!("{e}; falling back to majority_vote");
            AggregationMethod::MajorityVote
        })
    }
}

impl std::fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "majority_vote" => Ok(AggregationMethod::MajorityVote),
            "weighted_vote" => Ok(AggregationMethod::WeightedVote),
            "consensus" => Ok(AggregationMethod::Consensus),
            "expert_override" => Ok(AggregationMethod::ExpertOverride),
            "confidence_weighted" => Ok(AggregationMethod::ConfidenceWeighted),
            "hybrid" => Ok(AggregationMethod::Hybrid),
            other => Err(format!("unknown aggregation method: {other}")),
        }
    }
}

/// Policy applied when agents disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Pick the most conservative verdict present.
    #[default]
    MostConservative,
    /// Adopt the single most confident verdict.
    HighestConfidence,
    /// Adopt the verdict of the highest-expertise agent.
    ExpertPriority,
    /// Keep the aggregation-method result unchanged.
    WeightedAverage,
    /// Force escalation to a human operator.
    EscalateToHuman,
}

impl ConflictStrategy {
    /// Name of the strategy as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            ConflictStrategy::MostConservative => "most_conservative",
            ConflictStrategy::HighestConfidence => "highest_confidence",
            ConflictStrategy::ExpertPriority => "expert_priority",
            ConflictStrategy::WeightedAverage => "weighted_average",
            ConflictStrategy::EscalateToHuman => "escalate_to_human",
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "most_conservative" => Ok(ConflictStrategy::MostConservative),
            "highest_confidence" => Ok(ConflictStrategy::HighestConfidence),
            "expert_priority" => Ok(ConflictStrategy::ExpertPriority),
            "weighted_average" => Ok(ConflictStrategy::WeightedAverage),
            "escalate_to_human" => Ok(ConflictStrategy::EscalateToHuman),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

/// One voting round. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Round identifier.
    pub id: String,
    /// Transaction context the agents voted on; also feeds contextual
    /// expertise scoring.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Agents whose verdicts are required before auto-aggregation.
    pub required_agents: Vec<String>,
    /// Agents that may contribute but are not waited for.
    #[serde(default)]
    pub optional_agents: Vec<String>,
    /// Window during which verdicts are accepted.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Minimum verdicts for timeout-driven aggregation.
    pub min_agents: usize,
    /// How verdicts are combined.
    #[serde(default)]
    pub method: AggregationMethod,
    /// Policy applied when agents disagree.
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
}

impl DecisionRequest {
    /// Create a round requiring the given agents.
    pub fn new(id: impl Into<String>, required_agents: Vec<String>) -> Self {
        Self {
            id: id.into(),
            context: HashMap::new(),
            required_agents,
            optional_agents: Vec::new(),
            timeout: Duration::from_secs(300),
            min_agents: 1,
            method: AggregationMethod::default(),
            conflict_strategy: ConflictStrategy::default(),
        }
    }

    /// Attach the transaction context.
    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    /// Set the acceptance window.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the minimum verdict count for timeout-driven aggregation.
    pub fn with_min_agents(mut self, min_agents: usize) -> Self {
        self.min_agents = min_agents.max(1);
        self
    }

    /// Set the aggregation method.
    pub fn with_method(mut self, method: AggregationMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the conflict-resolution strategy.
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Aggregated statistic for one evidence key across a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EvidenceStat {
    /// All contributions were numeric.
    Numeric {
        /// Mean of the contributions.
        avg: f64,
        /// Minimum contribution.
        min: f64,
        /// Maximum contribution.
        max: f64,
        /// Number of contributions.
        count: usize,
    },
    /// At least one non-numeric contribution; values kept verbatim.
    Categorical {
        /// Distinct values in first-seen order.
        values: Vec<serde_json::Value>,
        /// Number of contributions.
        count: usize,
    },
}

/// The authoritative outcome of one decision round.
///
/// Produced exactly once per request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedDecision {
    /// The round this decision answers.
    pub request_id: String,
    /// Final verdict.
    pub decision: Decision,
    /// Confidence in the final verdict, in [0, 1].
    pub confidence: f64,
    /// Aggregation method that produced the result.
    pub method: AggregationMethod,
    /// Conflict strategy applied, when agents disagreed.
    pub conflict_strategy: Option<ConflictStrategy>,
    /// The verdicts that contributed.
    pub contributing: Vec<AgentDecision>,
    /// Effective voting weight per agent.
    pub weights: HashMap<String, f64>,
    /// Deduplicated reasoning lines ranked by frequency, top 10.
    pub reasoning_summary: Vec<String>,
    /// Per-key evidence aggregation.
    pub evidence_summary: HashMap<String, EvidenceStat>,
    /// Blend of agreement fraction and confidence-weighted agreement.
    pub consensus_level: f64,
    /// When aggregation happened.
    pub aggregated_at: DateTime<Utc>,
}

/// Read-only aggregator statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionStatistics {
    /// Rounds still collecting verdicts.
    pub pending_rounds: usize,
    /// Rounds aggregated since start (survives cleanup).
    pub total_aggregated: u64,
    /// Aggregation-method usage histogram.
    pub method_usage: HashMap<String, u64>,
    /// Final-verdict histogram.
    pub decision_counts: HashMap<String, u64>,
    /// Mean consensus level across aggregated rounds.
    pub avg_consensus_level: f64,
}
