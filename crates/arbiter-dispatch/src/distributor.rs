use crate::config::DispatchConfig;
use crate::queue::TaskQueue;
use crate::strategy::RoutingStrategy;
use crate::types::{
    AgentLoadSnapshot, AgentRecord, AgentStatus, AssignmentStatus, DispatchMetrics,
    DispatchStatus, ScaleSignal, Task, TaskAssignment,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rolling counters shared by the routing and monitoring loops.
#[derive(Debug, Default)]
struct DistributionStats {
    tasks_by_type: HashMap<String, u64>,
    /// (completion time, duration) pairs inside the rolling window.
    completions: VecDeque<(DateTime<Utc>, u64)>,
    total_completed: u64,
    total_failed: u64,
    total_dropped: u64,
    rolling_avg_ms: f64,
    scale_signal: ScaleSignal,
}

/// Lock order wherever two locks overlap: agents → strategy → stats →
/// active → completed.
struct Inner {
    config: DispatchConfig,
    agents: RwLock<HashMap<String, AgentRecord>>,
    queue: TaskQueue,
    active: RwLock<HashMap<Uuid, TaskAssignment>>,
    completed: RwLock<HashMap<Uuid, TaskAssignment>>,
    strategy: RwLock<RoutingStrategy>,
    stats: RwLock<DistributionStats>,
    shutdown: watch::Sender<bool>,
}

/// Task-routing and load-balancing scheduler for a pool of worker agents.
///
/// Owns the agent registry, a bounded priority queue of pending tasks, and
/// the active/completed assignment maps. Two background loops run while
/// started: the routing loop pulls tasks off the queue and binds them to
/// agents via the active [`RoutingStrategy`]; the monitoring loop expires
/// stale heartbeats, maintains rolling statistics, emits scaling
/// recommendations, and purges old completed assignments.
///
/// All mutation of shared state goes through per-collection locks owned by
/// this type; no raw maps are ever exposed.
pub struct WorkloadDistributor {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl WorkloadDistributor {
    /// Create a distributor with the given configuration. Loops are not
    /// started until [`WorkloadDistributor::start`] is called.
    pub fn new(config: DispatchConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let queue = TaskQueue::new(config.queue_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                agents: RwLock::new(HashMap::new()),
                queue,
                active: RwLock::new(HashMap::new()),
                completed: RwLock::new(HashMap::new()),
                strategy: RwLock::new(RoutingStrategy::default()),
                stats: RwLock::new(DistributionStats::default()),
                shutdown,
            }),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Register a worker agent. Returns `false` if the id is already taken.
    pub async fn register_agent(&self, record: AgentRecord) -> bool {
        let mut agents = self.inner.agents.write().await;
        if agents.contains_key(&record.id) {
            warn!(agent_id = %record.id, "Agent already registered");
            return false;
        }
        info!(
            agent_id = %record.id,
            agent_type = %record.agent_type,
            max_concurrent = record.max_concurrent,
            "Agent registered"
        );
        agents.insert(record.id.clone(), record);
        true
    }

    /// Unregister an agent, reassigning its in-flight work first.
    ///
    /// Returns `false` if the agent is unknown.
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        if !self.inner.agents.read().await.contains_key(agent_id) {
            warn!(agent_id, "Cannot unregister unknown agent");
            return false;
        }
        self.inner.reassign_agent(agent_id).await;
        self.inner.agents.write().await.remove(agent_id);
        info!(agent_id, "Agent unregistered");
        true
    }

    /// Submit a task for routing. Returns `false` on queue overflow.
    pub async fn submit_task(&self, task: Task) -> bool {
        let task_type = task.task_type.clone();
        if !self.inner.queue.push(task) {
            return false;
        }
        let mut stats = self.inner.stats.write().await;
        *stats.tasks_by_type.entry(task_type).or_insert(0) += 1;
        true
    }

    /// Launch the routing and monitoring loops. Idempotent while running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Distributor already running");
            return;
        }
        // Reset the stop flag so a stopped distributor can be restarted.
        let _ = self.inner.shutdown.send(false);

        let mut handles = self.handles.lock().await;
        handles.push(spawn_routing_loop(self.inner.clone()));
        handles.push(spawn_monitor_loop(self.inner.clone()));
        info!("Workload distributor started");
    }

    /// Signal both loops to stop and wait for them to drain.
    ///
    /// Waiting is bounded by `stop_timeout_secs`; loops that do not finish
    /// in time are aborted. Unfinished tasks stay in the queue and active
    /// assignments stay in the active map, queryable via
    /// [`WorkloadDistributor::metrics`].
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(self.inner.config.stop_timeout(), &mut handle)
                .await
                .is_err()
            {
                warn!("Loop did not stop within the drain timeout, aborting");
                handle.abort();
            }
        }
        info!(
            queue_depth = self.inner.queue.len(),
            active = self.inner.active.read().await.len(),
            "Workload distributor stopped"
        );
    }

    /// Refresh an agent's heartbeat and status, optionally updating its
    /// reported load (clamped to its capacity). Returns `false` if unknown.
    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        load: Option<u32>,
    ) -> bool {
        let mut agents = self.inner.agents.write().await;
        let Some(agent) = agents.get_mut(agent_id) else {
            warn!(agent_id, "Status update for unknown agent");
            return false;
        };
        agent.status = status;
        agent.last_heartbeat = Utc::now();
        if let Some(load) = load {
            agent.current_load = load.min(agent.max_concurrent);
        }
        debug!(agent_id, status = %status, "Agent status updated");
        true
    }

    /// Report the outcome of an assignment.
    ///
    /// Decrements the agent's load, records the performance sample, moves
    /// the assignment to the completed map, and feeds the rolling
    /// statistics. Returns `false` for an unknown assignment id.
    pub async fn complete_task(
        &self,
        assignment_id: Uuid,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let Some(mut assignment) = self.inner.active.write().await.remove(&assignment_id) else {
            warn!(%assignment_id, "Completion for unknown assignment");
            return false;
        };

        let success = error.is_none();
        assignment.completed_at = Some(Utc::now());
        assignment.result = result;
        assignment.error = error;
        assignment.status = if success {
            AssignmentStatus::Completed
        } else {
            AssignmentStatus::Failed
        };
        let duration_ms = assignment.duration_ms().unwrap_or(0);

        {
            let mut agents = self.inner.agents.write().await;
            if let Some(agent) = agents.get_mut(&assignment.agent_id) {
                agent.current_load = agent.current_load.saturating_sub(1);
                if agent.status == AgentStatus::Busy && agent.current_load < agent.max_concurrent {
                    agent.status = AgentStatus::Available;
                }
                agent.record_completion(duration_ms, success);
            }
        }

        {
            let mut stats = self.inner.stats.write().await;
            stats.completions.push_back((Utc::now(), duration_ms));
            if success {
                stats.total_completed += 1;
            } else {
                stats.total_failed += 1;
            }
        }

        info!(
            %assignment_id,
            agent_id = %assignment.agent_id,
            task_id = %assignment.task.id,
            duration_ms,
            success,
            "Assignment completed"
        );
        self.inner
            .completed
            .write()
            .await
            .insert(assignment_id, assignment);
        true
    }

    /// Switch the routing strategy by name.
    ///
    /// Unknown names fall back to `hybrid` and return `false`.
    pub async fn set_routing_strategy(&self, name: &str) -> bool {
        match name.parse::<RoutingStrategy>() {
            Ok(strategy) => {
                info!(strategy = %strategy, "Routing strategy changed");
                *self.inner.strategy.write().await = strategy;
                true
            }
            Err(e) => {
                warn!(requested = name, "{e}; falling back to hybrid");
                *self.inner.strategy.write().await = RoutingStrategy::hybrid();
                false
            }
        }
    }

    /// Read-only metrics snapshot.
    pub async fn metrics(&self) -> DispatchMetrics {
        let agents = self.inner.agents.read().await;
        let stats = self.inner.stats.read().await;
        let total = stats.total_completed + stats.total_failed;
        let aggregate_success_rate = if total == 0 {
            1.0
        } else {
            stats.total_completed as f64 / total as f64
        };

        DispatchMetrics {
            queue_depth: self.inner.queue.len(),
            active_assignments: self.inner.active.read().await.len(),
            completed_assignments: self.inner.completed.read().await.len(),
            tasks_by_type: stats.tasks_by_type.clone(),
            agents: agents
                .values()
                .map(|a| AgentLoadSnapshot {
                    id: a.id.clone(),
                    status: a.status,
                    current_load: a.current_load,
                    max_concurrent: a.max_concurrent,
                    success_rate: a.success_rate,
                    avg_processing_time_ms: a.avg_processing_time_ms,
                })
                .collect(),
            aggregate_success_rate,
            dropped_tasks: stats.total_dropped,
            rolling_avg_assignment_ms: stats.rolling_avg_ms,
            scale_signal: stats.scale_signal,
        }
    }

    /// Read-only status snapshot.
    pub async fn status(&self) -> DispatchStatus {
        // Copy the name out first: the strategy guard must not overlap the
        // agents lock below, since routing takes agents before strategy.
        let strategy = self.inner.strategy.read().await.name().to_string();
        DispatchStatus {
            running: self.running.load(Ordering::SeqCst),
            strategy,
            agent_count: self.inner.agents.read().await.len(),
            queue_depth: self.inner.queue.len(),
            active_assignments: self.inner.active.read().await.len(),
            completed_assignments: self.inner.completed.read().await.len(),
        }
    }

    /// Look up an assignment in the active or completed maps.
    pub async fn get_assignment(&self, assignment_id: Uuid) -> Option<TaskAssignment> {
        if let Some(a) = self.inner.active.read().await.get(&assignment_id) {
            return Some(a.clone());
        }
        self.inner
            .completed
            .read()
            .await
            .get(&assignment_id)
            .cloned()
    }
}

impl Inner {
    /// Try to bind one task to an agent. On failure the task is re-queued
    /// and `false` is returned so the routing loop can back off.
    async fn route_once(&self, task: Task) -> bool {
        let picked = {
            let mut agents = self.agents.write().await;
            let mut strategy = self.strategy.write().await;

            let picked = {
                let mut eligible: Vec<&AgentRecord> = agents
                    .values()
                    .filter(|a| a.is_eligible() && a.has_capabilities(&task))
                    .collect();
                eligible.sort_by(|a, b| a.id.cmp(&b.id));
                strategy.select(&task, &eligible)
            };

            match picked {
                Some(agent_id) => {
                    // Re-check under the same write lock: the selected agent
                    // is guaranteed to still be eligible here.
                    if let Some(agent) = agents.get_mut(&agent_id) {
                        agent.current_load += 1;
                        if agent.current_load >= agent.max_concurrent {
                            agent.status = AgentStatus::Busy;
                        }
                        Some(agent_id)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        match picked {
            Some(agent_id) => {
                let assignment = TaskAssignment::new(task, &agent_id);
                info!(
                    assignment_id = %assignment.id,
                    task_id = %assignment.task.id,
                    agent_id = %agent_id,
                    priority = %assignment.task.priority,
                    "Task assigned"
                );
                self.active.write().await.insert(assignment.id, assignment);
                true
            }
            None => {
                debug!(task_id = %task.id, "No eligible agent, re-queueing");
                let task_id = task.id.clone();
                if !self.queue.push(task) {
                    error!(task_id = %task_id, "Re-queue failed, task dropped by overflow policy");
                    self.stats.write().await.total_dropped += 1;
                }
                false
            }
        }
    }

    /// Pull an agent's in-flight assignments and retry or terminally fail
    /// each one, then reset the agent's load.
    async fn reassign_agent(&self, agent_id: &str) {
        let affected: Vec<TaskAssignment> = {
            let mut active = self.active.write().await;
            let ids: Vec<Uuid> = active
                .values()
                .filter(|a| a.agent_id == agent_id)
                .map(|a| a.id)
                .collect();
            ids.into_iter().filter_map(|id| active.remove(&id)).collect()
        };

        for mut assignment in affected {
            assignment.task.retry_count += 1;
            if assignment.task.retry_count <= assignment.task.max_retries {
                info!(
                    task_id = %assignment.task.id,
                    retry = assignment.task.retry_count,
                    "Re-queueing task after agent loss"
                );
                let task_id = assignment.task.id.clone();
                if !self.queue.push(assignment.task) {
                    error!(task_id = %task_id, "Re-queue after agent loss failed, task dropped");
                    self.stats.write().await.total_dropped += 1;
                }
            } else {
                warn!(
                    task_id = %assignment.task.id,
                    retries = assignment.task.retry_count,
                    "Retry budget exhausted, task permanently failed"
                );
                assignment.status = AssignmentStatus::Failed;
                assignment.completed_at = Some(Utc::now());
                assignment.error = Some(format!(
                    "agent {agent_id} lost and retry budget of {} exhausted",
                    assignment.task.max_retries
                ));
                self.stats.write().await.total_failed += 1;
                self.completed
                    .write()
                    .await
                    .insert(assignment.id, assignment);
            }
        }

        if let Some(agent) = self.agents.write().await.get_mut(agent_id) {
            agent.current_load = 0;
        }
    }

    /// One pass of the monitoring loop: heartbeat expiry, rolling average,
    /// scaling recommendation, retention purge.
    async fn monitor_tick(&self) {
        let now = Utc::now();
        let heartbeat_timeout = ChronoDuration::from_std(self.config.heartbeat_timeout())
            .unwrap_or_else(|_| ChronoDuration::seconds(60));

        // (a) Heartbeat expiry.
        let expired: Vec<String> = {
            let mut agents = self.agents.write().await;
            let expired: Vec<String> = agents
                .values()
                .filter(|a| {
                    a.status != AgentStatus::Offline && now - a.last_heartbeat > heartbeat_timeout
                })
                .map(|a| a.id.clone())
                .collect();
            for id in &expired {
                if let Some(agent) = agents.get_mut(id) {
                    warn!(agent_id = %id, "Heartbeat timeout, marking agent offline");
                    agent.status = AgentStatus::Offline;
                }
            }
            expired
        };
        for id in &expired {
            self.reassign_agent(id).await;
        }

        // (b) Rolling average assignment time.
        {
            let window = ChronoDuration::seconds(self.config.rolling_window_secs as i64);
            let mut stats = self.stats.write().await;
            while stats
                .completions
                .front()
                .is_some_and(|(at, _)| now - *at > window)
            {
                stats.completions.pop_front();
            }
            stats.rolling_avg_ms = if stats.completions.is_empty() {
                0.0
            } else {
                let total: u64 = stats.completions.iter().map(|(_, ms)| ms).sum();
                total as f64 / stats.completions.len() as f64
            };
        }

        // (c) Auto-scaling recommendation. Advisory only.
        {
            let agents = self.agents.read().await;
            let (load, capacity) = agents
                .values()
                .filter(|a| {
                    a.status != AgentStatus::Offline && a.status != AgentStatus::Maintenance
                })
                .fold((0u64, 0u64), |(l, c), a| {
                    (l + u64::from(a.current_load), c + u64::from(a.max_concurrent))
                });
            let signal = if capacity == 0 {
                ScaleSignal::Steady
            } else {
                let utilization = load as f64 / capacity as f64;
                if utilization > self.config.scale_up_threshold {
                    info!(utilization, "Pool utilization high, recommending scale-up");
                    ScaleSignal::Up
                } else if utilization < self.config.scale_down_threshold {
                    ScaleSignal::Down
                } else {
                    ScaleSignal::Steady
                }
            };
            self.stats.write().await.scale_signal = signal;
        }

        // (d) Retention purge of completed assignments.
        {
            let retention = ChronoDuration::seconds(self.config.completed_retention_secs as i64);
            let mut completed = self.completed.write().await;
            let before = completed.len();
            completed.retain(|_, a| match a.completed_at {
                Some(done) => now - done <= retention,
                None => true,
            });
            let purged = before - completed.len();
            if purged > 0 {
                debug!(purged, "Purged completed assignments past retention");
            }
        }
    }
}

fn spawn_routing_loop(inner: Arc<Inner>) -> JoinHandle<()> {
    let mut shutdown = inner.shutdown.subscribe();
    tokio::spawn(async move {
        debug!("Routing loop started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                task = inner.queue.pop() => {
                    if !inner.route_once(task).await {
                        // Nothing routable right now; back off instead of
                        // spinning on the same head-of-queue task.
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                            () = tokio::time::sleep(inner.config.routing_backoff()) => {}
                        }
                    }
                }
            }
        }
        debug!("Routing loop stopped");
    })
}

fn spawn_monitor_loop(inner: Arc<Inner>) -> JoinHandle<()> {
    let mut shutdown = inner.shutdown.subscribe();
    tokio::spawn(async move {
        debug!("Monitoring loop started");
        let mut interval = tokio::time::interval(inner.config.monitor_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a tick always means
        // one full interval has elapsed.
        interval.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    inner.monitor_tick().await;
                }
            }
        }
        debug!("Monitoring loop stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;
    use std::time::Duration;

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            queue_capacity: 16,
            monitor_interval_secs: 1,
            heartbeat_timeout_secs: 60,
            routing_backoff_ms: 10,
            stop_timeout_secs: 2,
            ..DispatchConfig::default()
        }
    }

    async fn wait_for_active(distributor: &WorkloadDistributor, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if distributor.metrics().await.active_assignments == n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let distributor = WorkloadDistributor::new(test_config());
        assert!(distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await);
        assert!(!distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await);
        assert!(distributor.unregister_agent("a1").await);
        assert!(!distributor.unregister_agent("a1").await);
    }

    #[tokio::test]
    async fn test_submit_rejected_on_overflow() {
        let config = DispatchConfig {
            queue_capacity: 1,
            ..test_config()
        };
        let distributor = WorkloadDistributor::new(config);
        assert!(distributor.submit_task(Task::new("t1", "check")).await);
        assert!(!distributor.submit_task(Task::new("t2", "check")).await);

        let metrics = distributor.metrics().await;
        assert_eq!(metrics.queue_depth, 1);
        assert_eq!(metrics.tasks_by_type.get("check"), Some(&1));
    }

    #[tokio::test]
    async fn test_route_once_assigns_and_loads_agent() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await;

        assert!(distributor.inner.route_once(Task::new("t1", "check")).await);

        let active = distributor.inner.active.read().await;
        assert_eq!(active.len(), 1);
        let agents = distributor.inner.agents.read().await;
        assert_eq!(agents.get("a1").unwrap().current_load, 1);
    }

    #[tokio::test]
    async fn test_route_once_requeues_without_agents() {
        let distributor = WorkloadDistributor::new(test_config());
        assert!(!distributor.inner.route_once(Task::new("t1", "check")).await);
        assert_eq!(distributor.inner.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_overflow_counts_dropped_tasks() {
        let config = DispatchConfig {
            queue_capacity: 1,
            ..test_config()
        };
        let distributor = WorkloadDistributor::new(config);
        assert!(distributor.submit_task(Task::new("t1", "check")).await);

        // No agents and a full queue: the routed task cannot go back.
        assert!(!distributor.inner.route_once(Task::new("t2", "check")).await);

        let metrics = distributor.metrics().await;
        assert_eq!(metrics.dropped_tasks, 1);
        assert_eq!(metrics.queue_depth, 1);
    }

    #[tokio::test]
    async fn test_route_once_honors_required_capabilities() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor
            .register_agent(AgentRecord::new("plain", "scorer", 2))
            .await;
        distributor
            .register_agent(
                AgentRecord::new("gpu", "scorer", 2)
                    .with_capabilities(vec!["gpu".into(), "batch".into()]),
            )
            .await;

        let task =
            Task::new("t1", "check").with_required_capabilities(vec!["gpu".into()]);
        assert!(distributor.inner.route_once(task).await);

        let agents = distributor.inner.agents.read().await;
        assert_eq!(agents.get("gpu").unwrap().current_load, 1);
        assert_eq!(agents.get("plain").unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn test_agent_marked_busy_at_capacity() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 1)).await;

        assert!(distributor.inner.route_once(Task::new("t1", "check")).await);
        let agents = distributor.inner.agents.read().await;
        assert_eq!(agents.get("a1").unwrap().status, AgentStatus::Busy);
        drop(agents);

        // Second task finds no eligible agent.
        assert!(!distributor.inner.route_once(Task::new("t2", "check")).await);
    }

    #[tokio::test]
    async fn test_complete_task_moves_assignment_and_frees_agent() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 1)).await;
        distributor.inner.route_once(Task::new("t1", "check")).await;

        let assignment_id = {
            let active = distributor.inner.active.read().await;
            *active.keys().next().unwrap()
        };

        assert!(
            distributor
                .complete_task(assignment_id, Some(serde_json::json!({"score": 0.1})), None)
                .await
        );
        assert!(!distributor.complete_task(assignment_id, None, None).await);

        let agents = distributor.inner.agents.read().await;
        let agent = agents.get("a1").unwrap();
        assert_eq!(agent.current_load, 0);
        assert_eq!(agent.status, AgentStatus::Available);
        assert_eq!(agent.performance_history.len(), 1);
        drop(agents);

        let metrics = distributor.metrics().await;
        assert_eq!(metrics.active_assignments, 0);
        assert_eq!(metrics.completed_assignments, 1);
        assert_eq!(metrics.aggregate_success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_failed_completion_lowers_success_rate() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await;

        for id in ["t1", "t2"] {
            distributor.inner.route_once(Task::new(id, "check")).await;
        }
        let ids: Vec<Uuid> = distributor.inner.active.read().await.keys().copied().collect();
        distributor.complete_task(ids[0], None, None).await;
        distributor
            .complete_task(ids[1], None, Some("model crashed".into()))
            .await;

        let metrics = distributor.metrics().await;
        assert_eq!(metrics.aggregate_success_rate, 0.5);
        let agent = &metrics.agents[0];
        assert_eq!(agent.success_rate, 0.5);
    }

    #[tokio::test]
    async fn test_unregister_requeues_inflight_work() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await;
        distributor
            .inner
            .route_once(Task::new("t1", "check").with_max_retries(3))
            .await;

        assert!(distributor.unregister_agent("a1").await);
        assert_eq!(distributor.inner.active.read().await.len(), 0);

        let requeued = distributor.inner.queue.try_pop().unwrap();
        assert_eq!(requeued.id, "t1");
        assert_eq!(requeued.retry_count, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_terminal() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await;
        distributor
            .inner
            .route_once(Task::new("t1", "check").with_max_retries(0))
            .await;

        distributor.inner.reassign_agent("a1").await;

        // Not re-queued: retry_count 1 > max_retries 0.
        assert!(distributor.inner.queue.is_empty());
        let completed = distributor.inner.completed.read().await;
        assert_eq!(completed.len(), 1);
        let assignment = completed.values().next().unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Failed);
        assert!(assignment.error.as_deref().unwrap().contains("retry budget"));
    }

    #[tokio::test]
    async fn test_heartbeat_expiry_marks_offline_and_reassigns() {
        let config = DispatchConfig {
            heartbeat_timeout_secs: 1,
            ..test_config()
        };
        let distributor = WorkloadDistributor::new(config);
        distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await;
        distributor.inner.route_once(Task::new("t1", "check")).await;

        {
            let mut agents = distributor.inner.agents.write().await;
            agents.get_mut("a1").unwrap().last_heartbeat =
                Utc::now() - ChronoDuration::seconds(120);
        }

        distributor.inner.monitor_tick().await;

        let agents = distributor.inner.agents.read().await;
        assert_eq!(agents.get("a1").unwrap().status, AgentStatus::Offline);
        drop(agents);

        let requeued = distributor.inner.queue.try_pop().unwrap();
        assert_eq!(requeued.retry_count, 1);
    }

    #[tokio::test]
    async fn test_scale_signal_thresholds() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 10)).await;

        // 9/10 load: above the 0.8 scale-up threshold.
        distributor
            .update_agent_status("a1", AgentStatus::Available, Some(9))
            .await;
        distributor.inner.monitor_tick().await;
        assert_eq!(distributor.metrics().await.scale_signal, ScaleSignal::Up);

        // 1/10 load: below the 0.3 scale-down threshold.
        distributor
            .update_agent_status("a1", AgentStatus::Available, Some(1))
            .await;
        distributor.inner.monitor_tick().await;
        assert_eq!(distributor.metrics().await.scale_signal, ScaleSignal::Down);

        // 5/10 load: inside the band.
        distributor
            .update_agent_status("a1", AgentStatus::Available, Some(5))
            .await;
        distributor.inner.monitor_tick().await;
        assert_eq!(distributor.metrics().await.scale_signal, ScaleSignal::Steady);
    }

    #[tokio::test]
    async fn test_retention_purge() {
        let config = DispatchConfig {
            completed_retention_secs: 60,
            ..test_config()
        };
        let distributor = WorkloadDistributor::new(config);

        let mut old = TaskAssignment::new(Task::new("old", "check"), "a1");
        old.status = AssignmentStatus::Completed;
        old.completed_at = Some(Utc::now() - ChronoDuration::seconds(3600));
        let mut fresh = TaskAssignment::new(Task::new("fresh", "check"), "a1");
        fresh.status = AssignmentStatus::Completed;
        fresh.completed_at = Some(Utc::now());
        {
            let mut completed = distributor.inner.completed.write().await;
            completed.insert(old.id, old);
            completed.insert(fresh.id, fresh);
        }

        distributor.inner.monitor_tick().await;

        let completed = distributor.inner.completed.read().await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed.values().next().unwrap().task.id, "fresh");
    }

    #[tokio::test]
    async fn test_unknown_strategy_falls_back_to_hybrid() {
        let distributor = WorkloadDistributor::new(test_config());
        assert!(distributor.set_routing_strategy("least_loaded").await);
        assert_eq!(distributor.status().await.strategy, "least_loaded");

        assert!(!distributor.set_routing_strategy("quantum").await);
        assert_eq!(distributor.status().await.strategy, "hybrid");
    }

    #[tokio::test]
    async fn test_update_agent_status_clamps_load() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 3)).await;
        assert!(
            distributor
                .update_agent_status("a1", AgentStatus::Overloaded, Some(99))
                .await
        );
        let agents = distributor.inner.agents.read().await;
        let agent = agents.get("a1").unwrap();
        assert_eq!(agent.current_load, 3);
        assert_eq!(agent.status, AgentStatus::Overloaded);
    }

    #[tokio::test]
    async fn test_end_to_end_routing_loop() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.register_agent(AgentRecord::new("a1", "scorer", 2)).await;
        distributor.start().await;

        assert!(
            distributor
                .submit_task(Task::new("t1", "check").with_priority(TaskPriority::Critical))
                .await
        );

        wait_for_active(&distributor, 1).await;

        let assignment_id = {
            let active = distributor.inner.active.read().await;
            *active.keys().next().unwrap()
        };
        assert!(distributor.complete_task(assignment_id, None, None).await);

        distributor.stop().await;
        let status = distributor.status().await;
        assert!(!status.running);
        assert_eq!(status.completed_assignments, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_status_and_routing_make_progress_concurrently() {
        let distributor = Arc::new(WorkloadDistributor::new(test_config()));
        distributor
            .register_agent(AgentRecord::new("a1", "scorer", 1_000))
            .await;

        let router = {
            let distributor = distributor.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    distributor
                        .inner
                        .route_once(Task::new(format!("t{i}"), "check"))
                        .await;
                }
            })
        };
        let poller = {
            let distributor = distributor.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    distributor.status().await;
                }
            })
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            router.await.unwrap();
            poller.await.unwrap();
        })
        .await
        .expect("status and routing must not block each other");
    }

    #[tokio::test]
    async fn test_stop_leaves_pending_work_queryable() {
        let distributor = WorkloadDistributor::new(test_config());
        distributor.start().await;
        // No agents registered, so the task stays queued.
        distributor.submit_task(Task::new("t1", "check")).await;
        distributor.stop().await;

        let status = distributor.status().await;
        assert!(!status.running);
        assert_eq!(status.queue_depth + status.active_assignments, 1);
    }
}
