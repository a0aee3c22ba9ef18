//! 编排器集成测试：用桩能力驱动完整流水线

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use hive::agents::{AgentCapability, AgentContext, AgentResponse};
use hive::config::AppConfig;
use hive::core::{
    CapabilityRegistry, HiveError, Result, Task, TaskEvent, TaskOrchestrator, TaskOutcome, TaskRequest,
    TaskStatus,
};
use hive::core::builder::IN_MEMORY_DATABASE;
use hive::llm::HashEmbedder;
use hive::memory::{ExperienceKind, ExperienceRecord, ExperienceStore};
use hive::persistence::{InMemoryTaskStore, SqliteTaskStore, TaskStore};
use hive::queue::{InProcessQueue, JobQueue, QueueWorker};
use hive::OrchestratorBuilder;

enum Behavior {
    Succeed,
    Fail,
    Raise,
}

/// 通用桩：按 behavior 返回结果，并记录每次调用看到的 prior_outputs 键
struct Stub {
    label: &'static str,
    behavior: Behavior,
    output: Value,
    seen: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Stub {
    fn new(label: &'static str, behavior: Behavior, output: Value) -> Self {
        Self {
            label,
            behavior,
            output,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn ok(label: &'static str) -> Self {
        Self::new(label, Behavior::Succeed, json!({ "by": label }))
    }
}

#[async_trait]
impl AgentCapability for Stub {
    fn label(&self) -> &str {
        self.label
    }

    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        self.seen
            .lock()
            .unwrap()
            .push(context.prior_outputs.keys().cloned().collect());
        match self.behavior {
            Behavior::Succeed => Ok(AgentResponse::ok(self.output.clone(), "ok")),
            Behavior::Fail => Ok(AgentResponse::failed(self.output.clone(), "nope")),
            Behavior::Raise => Err(HiveError::Capability("kaboom".to_string())),
        }
    }
}

fn plan(steps: &[&str]) -> Value {
    Value::Array(
        steps
            .iter()
            .enumerate()
            .map(|(i, agent)| json!({ "description": format!("step {}", i + 1), "agent": agent }))
            .collect(),
    )
}

fn planner(plan: Value) -> Stub {
    Stub::new("Planner", Behavior::Succeed, json!({ "plan": plan }))
}

fn perceptor() -> Stub {
    Stub::new("Perceptor", Behavior::Succeed, json!({ "tasks": ["a", "b"] }))
}

fn critic() -> Stub {
    Stub::new("Critic", Behavior::Succeed, json!({ "verdict": "approve" }))
}

struct Harness {
    orchestrator: TaskOrchestrator,
    cbr: Arc<ExperienceStore>,
}

fn harness(registry: CapabilityRegistry) -> Harness {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let cbr = Arc::new(ExperienceStore::new(
        Arc::clone(&store),
        Arc::new(HashEmbedder::new(16)),
    ));
    let orchestrator = TaskOrchestrator::new(registry, store, Arc::clone(&cbr)).unwrap();
    Harness { orchestrator, cbr }
}

fn registry_with_plan(steps: &[&str]) -> CapabilityRegistry {
    CapabilityRegistry::new()
        .with(perceptor())
        .with(planner(plan(steps)))
        .with(critic())
        .with(Stub::ok("Writer"))
        .with(Stub::new("Broken", Behavior::Fail, json!({ "why": "bad" })))
        .with(Stub::new("Exploder", Behavior::Raise, Value::Null))
}

fn execution_len(summary: &Value) -> usize {
    summary["execution"].as_array().map(|a| a.len()).unwrap_or(0)
}

async fn event_types(orchestrator: &TaskOrchestrator, task_id: &str) -> Vec<String> {
    orchestrator
        .list_events(task_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

#[tokio::test]
async fn test_successful_steps_produce_one_log_entry_each_plus_critique() {
    let h = harness(registry_with_plan(&["Writer", "Writer", "Writer"]));
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("write three things").sync())
        .await
        .unwrap();

    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert!(status.started_at.is_some());
    assert!(status.finished_at.is_some());
    let summary = status.result_summary.unwrap();
    assert_eq!(execution_len(&summary), 4);
    assert_eq!(summary["execution"][3]["step"]["description"], "Final critique");
    assert_eq!(summary["execution"][3]["agent"], "Critic");
    assert_eq!(summary["verdict"]["verdict"], "approve");

    assert_eq!(
        event_types(&h.orchestrator, &task_id).await,
        vec![
            "created",
            "perception_completed",
            "planning_completed",
            "writer_completed",
            "writer_completed",
            "writer_completed",
            "critic_completed",
        ]
    );
}

#[tokio::test]
async fn test_failing_step_stops_pipeline() {
    let h = harness(registry_with_plan(&["Writer", "Broken", "Writer"]));
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap();

    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert_eq!(status.error_message.as_deref(), Some("Step 2 handled by Broken failed."));
    assert_eq!(execution_len(&status.result_summary.unwrap()), 2);

    let events = event_types(&h.orchestrator, &task_id).await;
    assert!(events.contains(&"broken_failed".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("task_failed"));
    assert!(!events.contains(&"critic_completed".to_string()));
}

#[tokio::test]
async fn test_raised_error_is_recorded_and_returned() {
    let h = harness(registry_with_plan(&["Exploder"]));
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap();

    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    let message = status.error_message.unwrap();
    assert!(message.starts_with("Step 1 handled by Exploder raised an error"));
    assert!(message.contains("kaboom"));

    let events = h.orchestrator.list_events(&task_id).await.unwrap();
    let error_event = events.iter().find(|e| e.event_type == "exploder_error").unwrap();
    assert!(error_event.payload["error"].as_str().unwrap().contains("kaboom"));
    assert_eq!(error_event.payload["step"]["agent"], "Exploder");
}

#[tokio::test]
async fn test_empty_plan_only_logs_critique() {
    let h = harness(registry_with_plan(&[]));
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("nothing to do").sync())
        .await
        .unwrap();
    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(execution_len(&status.result_summary.unwrap()), 1);
}

#[tokio::test]
async fn test_unmapped_agent_is_skipped() {
    let h = harness(registry_with_plan(&["ArtDirector", "Writer"]));
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("draw and write").sync())
        .await
        .unwrap();
    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(execution_len(&status.result_summary.unwrap()), 2);
    let events = event_types(&h.orchestrator, &task_id).await;
    assert!(!events.iter().any(|e| e.starts_with("artdirector")));
}

#[tokio::test]
async fn test_prior_outputs_accumulate_across_steps() {
    let writer = Stub::ok("Writer");
    let seen = Arc::clone(&writer.seen);
    let registry = CapabilityRegistry::new()
        .with(perceptor())
        .with(planner(plan(&["Writer", "Writer"])))
        .with(critic())
        .with(writer);
    let h = harness(registry);
    h.orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], vec!["perceptor", "planner"]);
    assert_eq!(seen[1], vec!["perceptor", "planner", "writer"]);
}

#[tokio::test]
async fn test_stage_failures_have_fixed_messages() {
    let registry = CapabilityRegistry::new()
        .with(Stub::new("Perceptor", Behavior::Fail, Value::Null))
        .with(planner(plan(&[])))
        .with(critic());
    let h = harness(registry);
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap();
    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.error_message.as_deref(), Some("Perceptor failed to derive tasks."));
    assert!(status.result_summary.is_none());

    let registry = CapabilityRegistry::new()
        .with(perceptor())
        .with(Stub::new("Planner", Behavior::Fail, Value::Null))
        .with(critic());
    let h = harness(registry);
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap();
    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.error_message.as_deref(), Some("Planner failed to produce a plan."));
}

#[tokio::test]
async fn test_malformed_plan_fails_task() {
    let registry = CapabilityRegistry::new()
        .with(perceptor())
        .with(Stub::new("Planner", Behavior::Succeed, json!({ "plan": "not a list" })))
        .with(critic());
    let h = harness(registry);
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap();
    let status = h.orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert!(status.error_message.unwrap().starts_with("Planner produced a malformed plan"));
}

#[tokio::test]
async fn test_task_runs_at_most_once() {
    let h = harness(registry_with_plan(&["Writer"]));
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap();
    let err = h.orchestrator.execute_task(&task_id).await.unwrap_err();
    assert!(matches!(
        err,
        HiveError::InvalidTransition { from: TaskStatus::Completed, to: TaskStatus::Running, .. }
    ));
}

#[tokio::test]
async fn test_unknown_task_id() {
    let h = harness(registry_with_plan(&[]));
    assert!(h.orchestrator.get_status("missing").await.unwrap().is_none());
    assert!(h.orchestrator.list_events("missing").await.unwrap().is_empty());
    assert!(matches!(
        h.orchestrator.execute_task("missing").await.unwrap_err(),
        HiveError::TaskNotFound(_)
    ));
}

#[tokio::test]
async fn test_registry_without_required_stages_is_rejected() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let cbr = Arc::new(ExperienceStore::new(Arc::clone(&store), Arc::new(HashEmbedder::new(8))));
    let registry = CapabilityRegistry::new().with(perceptor()).with(critic());
    assert!(matches!(
        TaskOrchestrator::new(registry, store, cbr),
        Err(HiveError::Config(_))
    ));
}

#[tokio::test]
async fn test_completed_task_is_remembered() {
    let h = harness(registry_with_plan(&["Writer"]));
    let task_id = h
        .orchestrator
        .start_task(TaskRequest::new("summarise the logs").with_name("log summary").sync())
        .await
        .unwrap();

    let cases = h
        .cbr
        .find_similar("summarise the logs", Some(ExperienceKind::Plan), 3)
        .await
        .unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].reference_id, task_id);
    assert_eq!(cases[0].title, "log summary");
    assert!(cases[0].metadata["execution_log"].is_array());
}

#[tokio::test]
async fn test_full_queue_falls_back_to_inline_execution() {
    let (queue, _receiver) = InProcessQueue::new(1);
    queue.enqueue("occupied").await.unwrap();

    let h = harness(registry_with_plan(&["Writer"]));
    let orchestrator = h.orchestrator.with_queue(Arc::new(queue));
    let task_id = orchestrator
        .start_task(TaskRequest::new("goal"))
        .await
        .unwrap();

    let status = orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert!(status.status.is_terminal());
    let events = event_types(&orchestrator, &task_id).await;
    assert_eq!(events[..3], ["created", "queued", "queue_fallback"]);
    assert_eq!(events[3], "perception_completed");
}

#[tokio::test]
async fn test_queued_task_is_executed_by_worker() {
    let (queue, receiver) = InProcessQueue::new(8);
    let h = harness(registry_with_plan(&["Writer"]));
    let orchestrator = Arc::new(h.orchestrator.with_queue(Arc::new(queue)));
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(
        QueueWorker::new(Arc::clone(&orchestrator), 2).run(receiver, shutdown.clone()),
    );

    let task_id = orchestrator
        .start_task(TaskRequest::new("background goal"))
        .await
        .unwrap();
    let events = event_types(&orchestrator, &task_id).await;
    assert_eq!(events[0], "created");
    assert_eq!(events[1], "queued");

    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = orchestrator.get_status(&task_id).await.unwrap().unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(status.status, TaskStatus::Completed);

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_event_precedes_pipeline_events() {
    let (queue, receiver) = InProcessQueue::new(64);
    let h = harness(registry_with_plan(&["Writer", "Writer"]));
    let orchestrator = Arc::new(h.orchestrator.with_queue(Arc::new(queue)));
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(
        QueueWorker::new(Arc::clone(&orchestrator), 4).run(receiver, shutdown.clone()),
    );

    let mut task_ids = Vec::new();
    for i in 0..20 {
        let task_id = orchestrator
            .start_task(TaskRequest::new(format!("goal {i}")))
            .await
            .unwrap();
        task_ids.push(task_id);
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        for task_id in &task_ids {
            loop {
                let status = orchestrator.get_status(task_id).await.unwrap().unwrap();
                if status.status.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    })
    .await
    .unwrap();

    for task_id in &task_ids {
        let events = event_types(&orchestrator, task_id).await;
        assert_eq!(events[..2], ["created", "queued"], "{events:?}");
    }

    shutdown.cancel();
    worker.await.unwrap();
}

/// 委托给内存存储，但拒绝写入 created 事件；记录创建过的任务 id
#[derive(Default)]
struct RejectCreatedEvent {
    inner: InMemoryTaskStore,
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskStore for RejectCreatedEvent {
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.created.lock().unwrap().push(task.id.clone());
        self.inner.create_task(task).await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.inner.get_task(task_id).await
    }

    async fn claim_task(&self, task_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.inner.claim_task(task_id, started_at).await
    }

    async fn finish_task(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.finish_task(task_id, outcome, finished_at).await
    }

    async fn append_event(&self, task_id: &str, event: &TaskEvent) -> Result<()> {
        if event.event_type == "created" {
            return Err(HiveError::Storage("event log unavailable".to_string()));
        }
        self.inner.append_event(task_id, event).await
    }

    async fn list_events(&self, task_id: &str) -> Result<Vec<TaskEvent>> {
        self.inner.list_events(task_id).await
    }

    async fn insert_experience(&self, record: &ExperienceRecord) -> Result<()> {
        self.inner.insert_experience(record).await
    }

    async fn list_experiences(&self, kind: Option<ExperienceKind>) -> Result<Vec<ExperienceRecord>> {
        self.inner.list_experiences(kind).await
    }
}

#[tokio::test]
async fn test_unrecordable_creation_does_not_leave_task_pending() {
    let rejecting = Arc::new(RejectCreatedEvent::default());
    let store: Arc<dyn TaskStore> = rejecting.clone();
    let cbr = Arc::new(ExperienceStore::new(Arc::clone(&store), Arc::new(HashEmbedder::new(16))));
    let orchestrator =
        TaskOrchestrator::new(registry_with_plan(&["Writer"]), store, cbr).unwrap();

    let err = orchestrator
        .start_task(TaskRequest::new("goal").sync())
        .await
        .unwrap_err();
    assert!(matches!(err, HiveError::Storage(_)));

    let task_id = rejecting.created.lock().unwrap()[0].clone();
    let status = orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert!(status.error_message.unwrap().contains("event log unavailable"));
    assert_eq!(event_types(&orchestrator, &task_id).await, vec!["task_failed"]);
}

#[tokio::test]
async fn test_sqlite_store_backs_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TaskStore> =
        Arc::new(SqliteTaskStore::open(dir.path().join("hive.db")).unwrap());
    let cbr = Arc::new(ExperienceStore::new(Arc::clone(&store), Arc::new(HashEmbedder::new(16))));
    let orchestrator =
        TaskOrchestrator::new(registry_with_plan(&["Writer", "Broken"]), store, cbr).unwrap();

    let task_id = orchestrator
        .start_task(TaskRequest::new("goal").with_metadata(json!({ "priority": "high" })).sync())
        .await
        .unwrap();
    let status = orchestrator.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Failed);

    let events = orchestrator.list_events(&task_id).await.unwrap();
    assert_eq!(events[0].event_type, "created");
    assert_eq!(events[0].payload["metadata"]["priority"], "high");
}

#[tokio::test]
async fn test_builtin_agents_end_to_end() {
    let mut cfg = AppConfig::default();
    cfg.app.database_path = PathBuf::from(IN_MEMORY_DATABASE);
    cfg.embedding.dimensions = 32;
    let orchestrator = OrchestratorBuilder::from_config(cfg).build().unwrap();

    let goal = "- Draft the introduction\n- Build a slug helper";
    let request = || {
        TaskRequest::new(goal)
            .with_metadata(json!({ "run_in_sandbox": false }))
            .sync()
    };
    let first = orchestrator.start_task(request()).await.unwrap();
    let status = orchestrator.get_status(&first).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed, "{:?}", status.error_message);

    let summary = status.result_summary.unwrap();
    let agents: Vec<&str> = summary["plan"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["agent"].as_str().unwrap())
        .collect();
    assert_eq!(agents, vec!["Writer", "ToolSmith", "Critic"]);
    assert_eq!(execution_len(&summary), 4);

    // 第二次同一目标：规划阶段引用第一次的案例
    let second = orchestrator.start_task(request()).await.unwrap();
    let events = orchestrator.list_events(&second).await.unwrap();
    let planning = events
        .iter()
        .find(|e| e.event_type == "planning_completed")
        .unwrap();
    assert_eq!(planning.payload["output"]["metadata"]["references"], json!([first]));
}
