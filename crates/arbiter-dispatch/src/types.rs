use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Maximum number of performance samples retained per agent.
pub const PERFORMANCE_HISTORY_LIMIT: usize = 100;

/// Priority band of a task. Higher bands are always dequeued first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work, served last.
    Low,
    /// Default band.
    #[default]
    Normal,
    /// Served before normal traffic.
    High,
    /// Served before everything else.
    Critical,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A unit of work routed to exactly one agent.
///
/// Immutable once submitted, except for `retry_count` which the distributor
/// increments when the task is re-queued after an agent loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-supplied identifier.
    pub id: String,
    /// Task type, matched against agent specialization scores.
    pub task_type: String,
    /// Priority band.
    pub priority: TaskPriority,
    /// Opaque payload forwarded to the executing agent.
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
    /// Capability tags an agent must advertise to receive this task.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Optional deadline; informational only.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Times this task has been re-queued after a failed assignment.
    #[serde(default)]
    pub retry_count: u32,
    /// Re-queue budget before the task is permanently failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Estimated processing time in milliseconds.
    #[serde(default)]
    pub estimated_duration_ms: u64,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    /// Create a task with default priority and retry budget.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            payload: HashMap::new(),
            required_capabilities: Vec::new(),
            deadline: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            estimated_duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    /// Set the priority band.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: HashMap<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Require capability tags of the executing agent.
    pub fn with_required_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    /// Set the re-queue budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the estimated processing time.
    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    /// Whether the retry budget still allows another re-queue.
    pub fn can_retry(&self) -> bool {
        self.retry_count <= self.max_retries
    }
}

/// Availability state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Accepting new assignments.
    Available,
    /// At capacity; no new assignments until load drops.
    Busy,
    /// Over a soft limit; excluded from routing.
    Overloaded,
    /// Missed its heartbeat window; in-flight work gets reassigned.
    Offline,
    /// Administratively removed from routing.
    Maintenance,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Available => write!(f, "available"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Overloaded => write!(f, "overloaded"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// One completed-assignment sample in an agent's rolling history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Wall-clock processing time of the assignment.
    pub duration_ms: u64,
    /// Whether the assignment completed without error.
    pub success: bool,
    /// When the sample was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Registry entry for a worker agent. Mutated only by the distributor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique agent identifier.
    pub id: String,
    /// Agent type label (e.g. "rule_engine", "ml_scorer").
    pub agent_type: String,
    /// Capability tags the agent advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Concurrent-assignment capacity.
    pub max_concurrent: u32,
    /// Assignments currently in flight on this agent.
    #[serde(default)]
    pub current_load: u32,
    /// Rolling average processing time in milliseconds.
    #[serde(default)]
    pub avg_processing_time_ms: f64,
    /// Rolling success rate over the bounded history, in [0, 1].
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    /// Last liveness signal.
    pub last_heartbeat: DateTime<Utc>,
    /// Availability state.
    pub status: AgentStatus,
    /// Per-task-type suitability scores in [0, 1].
    #[serde(default)]
    pub specialization: HashMap<String, f64>,
    /// Bounded rolling history of completed assignments.
    #[serde(default)]
    pub performance_history: VecDeque<PerformanceSample>,
}

fn default_success_rate() -> f64 {
    1.0
}

impl AgentRecord {
    /// Create a registry entry with full capacity and a fresh heartbeat.
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            capabilities: Vec::new(),
            max_concurrent: max_concurrent.max(1),
            current_load: 0,
            avg_processing_time_ms: 0.0,
            success_rate: 1.0,
            last_heartbeat: Utc::now(),
            status: AgentStatus::Available,
            specialization: HashMap::new(),
            performance_history: VecDeque::new(),
        }
    }

    /// Set the advertised capability tags.
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set per-task-type suitability scores (clamped to [0, 1]).
    pub fn with_specialization(mut self, specialization: HashMap<String, f64>) -> Self {
        self.specialization = specialization
            .into_iter()
            .map(|(k, v)| (k, v.clamp(0.0, 1.0)))
            .collect();
        self
    }

    /// Whether the agent can accept another assignment right now.
    pub fn is_eligible(&self) -> bool {
        self.status == AgentStatus::Available && self.current_load < self.max_concurrent
    }

    /// Whether the agent advertises every capability the task requires.
    pub fn has_capabilities(&self, task: &Task) -> bool {
        task.required_capabilities
            .iter()
            .all(|c| self.capabilities.contains(c))
    }

    /// Load fraction in [0, 1].
    pub fn load_fraction(&self) -> f64 {
        f64::from(self.current_load) / f64::from(self.max_concurrent)
    }

    /// Suitability score for a task type, defaulting to 0.5 when unset.
    pub fn specialization_for(&self, task_type: &str) -> f64 {
        self.specialization.get(task_type).copied().unwrap_or(0.5)
    }

    /// Record a completed assignment, keeping the history bounded and
    /// recomputing the rolling average and success rate.
    pub fn record_completion(&mut self, duration_ms: u64, success: bool) {
        self.performance_history.push_back(PerformanceSample {
            duration_ms,
            success,
            recorded_at: Utc::now(),
        });
        while self.performance_history.len() > PERFORMANCE_HISTORY_LIMIT {
            self.performance_history.pop_front();
        }

        let count = self.performance_history.len() as f64;
        let total_ms: u64 = self.performance_history.iter().map(|s| s.duration_ms).sum();
        let successes = self.performance_history.iter().filter(|s| s.success).count();
        self.avg_processing_time_ms = total_ms as f64 / count;
        self.success_rate = successes as f64 / count;
    }
}

/// Lifecycle state of a task assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    /// Handed to an agent, result not yet reported.
    Active,
    /// Finished without error.
    Completed,
    /// Finished with an error, or permanently failed after retries ran out.
    Failed,
}

/// Binding of one task to one agent, moving through active → completed maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// Assignment identifier.
    pub id: Uuid,
    /// The task being executed. Owned by the assignment once routed.
    pub task: Task,
    /// The agent the task was routed to.
    pub agent_id: String,
    /// When the assignment was created.
    pub assigned_at: DateTime<Utc>,
    /// When the agent reported starting, if it did.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the assignment reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload reported by the agent.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error reported by the agent, or the terminal reassignment failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Lifecycle state.
    pub status: AssignmentStatus,
}

impl TaskAssignment {
    /// Create an active assignment binding `task` to `agent_id`.
    pub fn new(task: Task, agent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            agent_id: agent_id.into(),
            assigned_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            status: AssignmentStatus::Active,
        }
    }

    /// Wall-clock duration from assignment to completion, in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at.map(|done| {
            (done - self.assigned_at)
                .num_milliseconds()
                .max(0) as u64
        })
    }
}

/// Auto-scaling recommendation derived from aggregate pool utilization.
///
/// Advisory only — the distributor never provisions resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSignal {
    /// Pool utilization above the scale-up threshold.
    Up,
    /// Pool utilization below the scale-down threshold.
    Down,
    /// Utilization within the configured band.
    #[default]
    Steady,
}

/// Read-only per-agent slice of a metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoadSnapshot {
    /// Agent identifier.
    pub id: String,
    /// Availability state at snapshot time.
    pub status: AgentStatus,
    /// In-flight assignments.
    pub current_load: u32,
    /// Capacity.
    pub max_concurrent: u32,
    /// Rolling success rate.
    pub success_rate: f64,
    /// Rolling average processing time.
    pub avg_processing_time_ms: f64,
}

/// Read-only distributor metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMetrics {
    /// Tasks waiting in the queue.
    pub queue_depth: usize,
    /// Assignments currently in flight.
    pub active_assignments: usize,
    /// Assignments in the completed map (within retention).
    pub completed_assignments: usize,
    /// Per-task-type submission counters.
    pub tasks_by_type: HashMap<String, u64>,
    /// Per-agent load and quality figures.
    pub agents: Vec<AgentLoadSnapshot>,
    /// Success rate across all completed assignments since start.
    pub aggregate_success_rate: f64,
    /// Tasks lost to queue overflow during re-queue attempts.
    pub dropped_tasks: u64,
    /// Average assignment duration over the rolling window.
    pub rolling_avg_assignment_ms: f64,
    /// Current auto-scaling recommendation.
    pub scale_signal: ScaleSignal,
}

/// Read-only distributor status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchStatus {
    /// Whether the routing and monitoring loops are running.
    pub running: bool,
    /// Active routing strategy name.
    pub strategy: String,
    /// Registered agents.
    pub agent_count: usize,
    /// Tasks waiting in the queue.
    pub queue_depth: usize,
    /// Assignments currently in flight.
    pub active_assignments: usize,
    /// Assignments in the completed map.
    pub completed_assignments: usize,
}
