//! Orchestrator: priority task queue, worker selection, bounded
//! concurrent execution, and performance-based mode rebalancing.

pub mod performance;
pub mod task;

pub use performance::BotPerformanceTracker;
pub use task::PendingTask;

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::service::ArbitrageService;
use crate::types::{
    BotMode, BotPerformance, BotStatus, DecisionType, Opportunity, OrchestrationOutcome, Task,
    TaskResult, TaskStatus,
};

const COMPLETED_TASKS_CAP: usize = 100;
const REBALANCE_MIN_TASKS: u64 = 5;
const PROMOTE_SUCCESS_RATE: f64 = 0.8;
const DEMOTE_SUCCESS_RATE: f64 = 0.5;
const EXECUTE_PRIORITY: u8 = 8;

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorSnapshot {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub success_rate: f64,
    pub bot_utilization: f64,
    pub active_bots: usize,
}

/// Receives submissions (priority, FIFO tie-break) and runs the
/// assign/timeout/gc/rebalance loop at a fixed cadence. Owns the queue,
/// active-task map, and completed list directly — callers reach it only
/// through `submit`/`process_with_rehoboam`/`set_bot_mode`/`status`.
pub struct Orchestrator {
    config: CoreConfig,
    queue: RwLock<BinaryHeap<PendingTask>>,
    active: DashMap<String, Task>,
    completed: RwLock<VecDeque<Task>>,
    performance: BotPerformanceTracker,
    bot_modes: DashMap<String, BotMode>,
    sequence: AtomicU64,
    semaphore: Arc<Semaphore>,
    pipeline: Arc<Pipeline>,
    service: Arc<ArbitrageService>,
}

impl Orchestrator {
    pub fn new(config: CoreConfig, pipeline: Arc<Pipeline>, service: Arc<ArbitrageService>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Self {
            config,
            queue: RwLock::new(BinaryHeap::new()),
            active: DashMap::new(),
            completed: RwLock::new(VecDeque::new()),
            performance: BotPerformanceTracker::new(),
            bot_modes: DashMap::new(),
            sequence: AtomicU64::new(0),
            semaphore,
            pipeline,
            service,
        }
    }

    pub fn set_bot_mode(&self, bot_id: impl Into<String>, mode: BotMode) {
        self.bot_modes.insert(bot_id.into(), mode);
    }

    pub fn bot_mode(&self, bot_id: &str) -> Option<BotMode> {
        self.bot_modes.get(bot_id).map(|m| *m)
    }

    /// Enqueues a `Task` ordered by priority descending, ties broken by
    /// submission sequence (FIFO). Returns the new task's id.
    pub fn submit(&self, opportunity: Opportunity, priority: u8) -> String {
        let task_id = uuid::Uuid::new_v4().to_string();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let task = Task {
            task_id: task_id.clone(),
            bot_id: None,
            opportunity,
            priority,
            created_at: Utc::now(),
            deadline: Utc::now() + ChronoDuration::seconds(self.config.task_timeout_seconds as i64),
            status: TaskStatus::Pending,
            result: None,
            sequence,
        };
        self.queue.write().push(PendingTask::new(task));
        info!(%task_id, priority, "task submitted");
        task_id
    }

    /// Runs the pipeline; if the decision is `execute`, also submits a
    /// priority-8 task and returns the resulting orchestration outcome
    /// alongside the pipeline record.
    pub async fn process_with_rehoboam(
        &self,
        opportunity: Opportunity,
    ) -> (crate::pipeline::PipelineRecord, Option<OrchestrationOutcome>) {
        let record = self.pipeline.run(opportunity).await;
        let outcome = match &record.decision {
            Some(decision) if decision.decision_type == DecisionType::Execute => {
                let task_id = self.submit(record.opportunity.clone(), EXECUTE_PRIORITY);
                Some(OrchestrationOutcome::SubmittedForExecution { task_id })
            }
            Some(decision) => Some(OrchestrationOutcome::Action {
                decision_type: decision.decision_type.as_str().to_string(),
            }),
            None => None,
        };
        (record, outcome)
    }

    pub fn status(&self) -> OrchestratorSnapshot {
        let completed = self.completed.read();
        let successes = completed.iter().filter(|t| t.result.as_ref().map(|r| r.success).unwrap_or(false)).count();
        let success_rate = if completed.is_empty() {
            0.0
        } else {
            successes as f64 / completed.len() as f64
        };
        let active_bots = self
            .bot_modes
            .iter()
            .filter(|e| matches!(*e.value(), BotMode::Autonomous | BotMode::Supervised))
            .count();
        let bot_utilization = if active_bots == 0 {
            0.0
        } else {
            self.active.len() as f64 / active_bots as f64
        };
        OrchestratorSnapshot {
            pending: self.queue.read().len(),
            active: self.active.len(),
            completed: completed.len(),
            success_rate,
            bot_utilization,
            active_bots,
        }
    }

    /// One full cycle of the cooperative loop: assign, timeout, gc,
    /// rebalance. The facade drives this on a fixed cadence and also
    /// calls it whenever new work arrives.
    pub async fn run_cycle(self: &Arc<Self>) {
        self.assign().await;
        self.expire_overdue();
        self.trim_completed();
        self.rebalance();
    }

    async fn assign(self: &Arc<Self>) {
        loop {
            if self.active.len() >= self.config.max_concurrent_tasks {
                break;
            }
            let next = self.queue.write().pop();
            let Some(pending) = next else { break };
            let mut task = pending.into_task();

            let Some(bot_id) = self.select_bot() else {
                // No bot available: re-insert at the head of the queue
                // and wait for the next cycle.
                self.queue.write().push(PendingTask::requeue_head(task));
                break;
            };

            task.bot_id = Some(bot_id.clone());
            task.status = TaskStatus::Assigned;
            self.active.insert(task.task_id.clone(), task.clone());

            let orchestrator = self.clone();
            let task_id = task.task_id.clone();
            tokio::spawn(async move {
                let permit = orchestrator.semaphore.clone().acquire_owned().await;
                let Ok(_permit) = permit else { return };
                orchestrator.execute_task(task_id).await;
            });
        }
    }

    /// Only bots that are both in an auto-assignable mode and actually
    /// `running` are eligible — a stopped or errored bot keeping its last
    /// mode around must not keep receiving work.
    fn select_bot(&self) -> Option<String> {
        let mut candidates: Vec<(String, f64)> = self
            .bot_modes
            .iter()
            .filter(|e| matches!(*e.value(), BotMode::Autonomous | BotMode::Supervised))
            .filter_map(|e| {
                let bot_id = e.key().clone();
                let running = self
                    .service
                    .bot_status(&bot_id)
                    .map(|d| d.status == BotStatus::Running)
                    .unwrap_or(false);
                if !running {
                    return None;
                }
                let rate = self.performance.success_rate(&bot_id).unwrap_or(0.5);
                Some((bot_id, rate))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap()
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.into_iter().next().map(|(id, _)| id)
    }

    async fn execute_task(self: Arc<Self>, task_id: String) {
        let Some(mut entry) = self.active.get_mut(&task_id) else { return };
        entry.status = TaskStatus::Executing;
        let opportunity = entry.opportunity.clone();
        let bot_id = entry.bot_id.clone();
        drop(entry);

        let started = std::time::Instant::now();
        let outcome = self.service.execute_arbitrage(opportunity, None).await;
        let elapsed_ms = started.elapsed().as_millis() as f64;

        let result = match outcome {
            Ok(exec) => TaskResult {
                success: exec.success,
                profit_realized_usd: exec.profit_realized_usd,
                gas_cost_usd: exec.gas_cost_usd,
                error: exec.error,
            },
            Err(e) => TaskResult {
                success: false,
                profit_realized_usd: 0.0,
                gas_cost_usd: 0.0,
                error: Some(e.to_string()),
            },
        };

        if let Some(bot_id) = &bot_id {
            self.performance.record_completion(bot_id, result.success, elapsed_ms);
        }

        if let Some((_, mut task)) = self.active.remove(&task_id) {
            task.status = if result.success { TaskStatus::Completed } else { TaskStatus::Failed };
            task.result = Some(result);
            self.push_completed(task);
        }
    }

    /// Times out tasks past their deadline whether they're already
    /// assigned or still waiting for a worker. A task stuck in the queue
    /// because no bot was ever available still needs to surface as a
    /// timeout rather than sit there forever.
    fn expire_overdue(&self) {
        let now = Utc::now();
        let overdue: Vec<String> = self
            .active
            .iter()
            .filter(|e| e.value().deadline < now)
            .map(|e| e.key().clone())
            .collect();

        for task_id in overdue {
            if let Some((_, task)) = self.active.remove(&task_id) {
                self.timeout_task(task);
            }
        }

        let mut queue = self.queue.write();
        let (expired, remaining): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *queue).into_iter().partition(|p| p.deadline() < now);
        *queue = remaining.into_iter().collect();
        drop(queue);

        for pending in expired {
            self.timeout_task(pending.into_task());
        }
    }

    fn timeout_task(&self, mut task: Task) {
        warn!(task_id = %task.task_id, "task passed its deadline");
        task.status = TaskStatus::Timeout;
        task.result = Some(TaskResult {
            success: false,
            profit_realized_usd: 0.0,
            gas_cost_usd: 0.0,
            error: Some("deadline exceeded".to_string()),
        });
        self.push_completed(task);
    }

    fn push_completed(&self, task: Task) {
        let mut completed = self.completed.write();
        completed.push_back(task);
        while completed.len() > COMPLETED_TASKS_CAP {
            completed.pop_front();
        }
    }

    fn trim_completed(&self) {
        let mut completed = self.completed.write();
        while completed.len() > COMPLETED_TASKS_CAP {
            completed.pop_front();
        }
    }

    /// Promotes/demotes any bot with at least `REBALANCE_MIN_TASKS`
    /// completed tasks based on its rolling success rate.
    fn rebalance(&self) {
        for bot_id in self.performance.bot_ids() {
            let Some(stats) = self.performance.get(&bot_id) else { continue };
            if stats.tasks_completed < REBALANCE_MIN_TASKS {
                continue;
            }
            let Some(mut mode) = self.bot_modes.get_mut(&bot_id) else { continue };
            if stats.success_rate > PROMOTE_SUCCESS_RATE && *mode == BotMode::Supervised {
                *mode = BotMode::Autonomous;
                self.performance.record_mode_change(&bot_id);
                info!(%bot_id, "rebalanced to autonomous");
            } else if stats.success_rate < DEMOTE_SUCCESS_RATE && *mode == BotMode::Autonomous {
                *mode = BotMode::Supervised;
                self.performance.record_mode_change(&bot_id);
                info!(%bot_id, "rebalanced to supervised");
            }
        }
    }

    pub fn bot_performance(&self, bot_id: &str) -> Option<BotPerformance> {
        self.performance.get(bot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpClient;

    fn orchestrator() -> Arc<Orchestrator> {
        let config = CoreConfig::default();
        let mcp = Arc::new(McpClient::new("http://localhost:1"));
        let service = Arc::new(ArbitrageService::new(config.clone()));
        let pipeline = Arc::new(Pipeline::new(mcp, service.clone()));
        Arc::new(Orchestrator::new(config, pipeline, service))
    }

    fn opportunity() -> Opportunity {
        Opportunity::new("op-1", "ETH/USDC", "a", "b", 0.01, 50.0, 5.0, 0.1)
    }

    #[test]
    fn submit_orders_by_priority_then_fifo() {
        let orchestrator = orchestrator();
        orchestrator.submit(opportunity(), 3);
        orchestrator.submit(opportunity(), 8);
        orchestrator.submit(opportunity(), 5);

        let mut queue = orchestrator.queue.write();
        let first = queue.pop().unwrap();
        assert_eq!(first.priority(), 8);
    }

    #[tokio::test]
    async fn task_with_past_deadline_is_reinserted_then_times_out() {
        let orchestrator = orchestrator();
        let task = Task {
            task_id: "t1".to_string(),
            bot_id: Some("b1".to_string()),
            opportunity: opportunity(),
            priority: 5,
            created_at: Utc::now(),
            deadline: Utc::now() - ChronoDuration::milliseconds(1),
            status: TaskStatus::Executing,
            result: None,
            sequence: 0,
        };
        orchestrator.active.insert("t1".to_string(), task);
        orchestrator.expire_overdue();

        assert!(orchestrator.active.is_empty());
        let completed = orchestrator.completed.read();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, TaskStatus::Timeout);
    }

    #[test]
    fn pending_task_past_deadline_times_out_without_ever_being_assigned() {
        let orchestrator = orchestrator();
        let task = Task {
            task_id: "t2".to_string(),
            bot_id: None,
            opportunity: opportunity(),
            priority: 9,
            created_at: Utc::now(),
            deadline: Utc::now() - ChronoDuration::milliseconds(1),
            status: TaskStatus::Pending,
            result: None,
            sequence: 0,
        };
        orchestrator.queue.write().push(PendingTask::new(task));
        orchestrator.expire_overdue();

        assert!(orchestrator.queue.read().is_empty());
        let completed = orchestrator.completed.read();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, TaskStatus::Timeout);
    }

    #[test]
    fn select_bot_ignores_a_mode_set_for_a_bot_that_is_not_running() {
        let orchestrator = orchestrator();
        orchestrator.service.register_bot("b1", "Bot One", "bot_one.py");
        orchestrator.set_bot_mode("b1", BotMode::Autonomous);
        // b1 has an autonomous mode set but its descriptor is still
        // `stopped` (the registration default): not eligible.
        assert_eq!(orchestrator.select_bot(), None);

        orchestrator.service.with_descriptor_mut("b1", |d| d.status = crate::types::BotStatus::Running);
        assert_eq!(orchestrator.select_bot(), Some("b1".to_string()));
    }

    #[test]
    fn bot_with_four_completions_is_never_rebalanced() {
        let orchestrator = orchestrator();
        orchestrator.set_bot_mode("b1", BotMode::Supervised);
        for _ in 0..4 {
            orchestrator.performance.record_completion("b1", true, 10.0);
        }
        orchestrator.rebalance();
        assert_eq!(orchestrator.bot_mode("b1"), Some(BotMode::Supervised));
    }

    #[test]
    fn bot_promotes_at_five_completions_with_high_success_rate() {
        let orchestrator = orchestrator();
        orchestrator.set_bot_mode("b1", BotMode::Supervised);
        // 0.81 isn't reachable from 5 binary outcomes; set it directly to
        // exercise the boundary case (tasks_completed=5, rate=0.81).
        orchestrator.performance.set_success_rate_for_test("b1", 0.81);
        orchestrator.rebalance();
        assert_eq!(orchestrator.bot_mode("b1"), Some(BotMode::Autonomous));
    }
}
