//! 任务编排器：感知 → 规划 → 逐步执行 → 评审 → 收尾
//!
//! 每个任务至多被一次流水线运行持有（pending → running 为 CAS 认领）。阶段顺序执行，
//! 状态与事件写入 TaskStore；成功的任务计划作为经验写入 CBR 经验库，供后续规划参考。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::agents::{AgentContext, AgentResponse, PriorOutputs, CRITIC, PERCEPTOR, PLANNER};
use crate::core::registry::CapabilityRegistry;
use crate::core::task::{
    ExecutionLogEntry, PlanStep, Task, TaskEvent, TaskOutcome, TaskStatusView,
};
use crate::core::{HiveError, Result};
use crate::memory::{ExperienceKind, ExperienceStore};
use crate::persistence::TaskStore;
use crate::queue::JobQueue;

/// 提交任务的参数
#[derive(Debug, Clone, Serialize)]
pub struct TaskRequest {
    pub goal: String,
    pub name: Option<String>,
    pub metadata: Value,
    /// true 时跳过队列，在调用方内联执行
    pub sync: bool,
}

impl TaskRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            name: None,
            metadata: json!({}),
            sync: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }
}

/// 一次流水线运行的可变状态；失败时用于保留已产生的计划与日志
#[derive(Debug, Default)]
struct PipelineRun {
    plan: Vec<PlanStep>,
    prior_outputs: PriorOutputs,
    log: Vec<ExecutionLogEntry>,
}

impl PipelineRun {
    fn partial_summary(&self, goal: &str) -> Option<Value> {
        if self.plan.is_empty() && self.log.is_empty() {
            return None;
        }
        Some(json!({
            "goal": goal,
            "plan": self.plan,
            "execution": self.log,
        }))
    }
}

pub struct TaskOrchestrator {
    registry: CapabilityRegistry,
    store: Arc<dyn TaskStore>,
    cbr: Arc<ExperienceStore>,
    queue: Option<Arc<dyn JobQueue>>,
}

impl TaskOrchestrator {
    /// 构造时校验注册表包含 Perceptor / Planner / Critic
    pub fn new(
        registry: CapabilityRegistry,
        store: Arc<dyn TaskStore>,
        cbr: Arc<ExperienceStore>,
    ) -> Result<Self> {
        registry.validate()?;
        Ok(Self {
            registry,
            store,
            cbr,
            queue: None,
        })
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn has_queue(&self) -> bool {
        self.queue.is_some()
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn experience_store(&self) -> &Arc<ExperienceStore> {
        &self.cbr
    }

    /// 创建任务并触发执行，返回 task_id
    ///
    /// 非 sync 且配置了队列时入队后立即返回；入队失败、sync 或无队列时在当前调用内执行。
    /// 内联执行失败且失败已持久化时仍返回 task_id，调用方通过 get_status 观察 failed。
    pub async fn start_task(&self, request: TaskRequest) -> Result<String> {
        let task = Task::new(request.goal, request.name, request.metadata);
        self.store.create_task(&task).await?;
        if let Err(e) = self
            .record_event(&task.id, "created", json!({ "metadata": task.metadata }))
            .await
        {
            self.abandon(&task, &e).await;
            return Err(e);
        }
        tracing::info!(task_id = %task.id, name = %task.name, "task created");

        if !request.sync {
            if let Some(queue) = &self.queue {
                // queued 先于入队写入：worker 可能在 enqueue 返回前就开始执行
                if let Err(e) = self.record_event(&task.id, "queued", json!({})).await {
                    self.abandon(&task, &e).await;
                    return Err(e);
                }
                match queue.enqueue(&task.id).await {
                    Ok(()) => {
                        tracing::info!(task_id = %task.id, "task queued");
                        return Ok(task.id);
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %task.id, "Falling back to synchronous execution: {}", e);
                        let payload = json!({ "error": e.to_string() });
                        if let Err(e) = self.record_event(&task.id, "queue_fallback", payload).await {
                            self.abandon(&task, &e).await;
                            return Err(e);
                        }
                    }
                }
            }
        }

        match self.execute_task(&task.id).await {
            Ok(()) => Ok(task.id),
            Err(e) => {
                let persisted = matches!(
                    self.store.get_task(&task.id).await,
                    Ok(Some(ref t)) if t.is_finished()
                );
                if persisted {
                    Ok(task.id)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// 执行任务流水线
    ///
    /// 任务不存在返回 `TaskNotFound`；不处于 pending 返回 `InvalidTransition`。
    /// 流水线失败时先把任务标记为 failed 并记录 task_failed 事件，再返回原始错误。
    pub async fn execute_task(&self, task_id: &str) -> Result<()> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| HiveError::TaskNotFound(task_id.to_string()))?;
        self.store.claim_task(task_id, Utc::now()).await?;
        tracing::info!(task_id, goal = %task.goal, "task started");

        let mut run = PipelineRun::default();
        let outcome = match self.run_pipeline(&task, &mut run).await {
            Ok(result_summary) => {
                self.store
                    .finish_task(task_id, TaskOutcome::Completed { result_summary }, Utc::now())
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(task_id, steps = run.plan.len(), "task completed");
                self.remember(&task, &run).await;
                Ok(())
            }
            Err(e) => {
                self.mark_failed(&task, &run, &e).await;
                Err(e)
            }
        }
    }

    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskStatusView>> {
        Ok(self.store.get_task(task_id).await?.map(TaskStatusView::from))
    }

    pub async fn list_events(&self, task_id: &str) -> Result<Vec<TaskEvent>> {
        self.store.list_events(task_id).await
    }

    async fn run_pipeline(&self, task: &Task, run: &mut PipelineRun) -> Result<Value> {
        // 感知
        let perceptor = self.registry.require(PERCEPTOR)?;
        let context = AgentContext::new(&task.id, &task.goal).with_payload(task.metadata.clone());
        let perception = perceptor.execute(&context).await?;
        if !perception.success {
            return Err(HiveError::Stage("Perceptor failed to derive tasks.".to_string()));
        }
        self.record_response(&task.id, "perception_completed", &perception)
            .await?;

        // 规划
        let tasks = perception
            .output
            .get("tasks")
            .cloned()
            .unwrap_or_else(|| json!([]));
        let mut prior_outputs = PriorOutputs::new();
        prior_outputs.insert(PERCEPTOR.to_lowercase(), perception.output);

        let planner = self.registry.require(PLANNER)?;
        let context = AgentContext::new(&task.id, &task.goal)
            .with_payload(json!({ "tasks": tasks }))
            .with_prior_outputs(prior_outputs.clone());
        let planning = planner.execute(&context).await?;
        if !planning.success {
            return Err(HiveError::Stage("Planner failed to produce a plan.".to_string()));
        }
        run.plan = match planning.output.get("plan") {
            None | Some(Value::Null) => Vec::new(),
            Some(plan) => serde_json::from_value(plan.clone()).map_err(|e| {
                HiveError::Stage(format!("Planner produced a malformed plan: {e}"))
            })?,
        };
        self.record_response(&task.id, "planning_completed", &planning)
            .await?;
        prior_outputs.insert(PLANNER.to_lowercase(), planning.output);
        run.prior_outputs = prior_outputs;
        run.log.clear();
        tracing::debug!(task_id = %task.id, steps = run.plan.len(), "plan accepted");

        // 逐步执行
        for (index, step) in run.plan.iter().enumerate() {
            let step_index = index + 1;
            let Some(capability) = self.registry.get(&step.agent) else {
                tracing::warn!(
                    task_id = %task.id,
                    step = step_index,
                    agent = %step.agent,
                    "No capability mapped for agent, skipping step"
                );
                continue;
            };
            let key = step.agent.to_lowercase();
            let context = AgentContext::new(&task.id, &task.goal)
                .with_payload(json!({
                    "task": step.description,
                    "step_index": step_index,
                    "metadata": task.metadata,
                    "requires_review": step.requires_review,
                }))
                .with_prior_outputs(run.prior_outputs.clone());

            let response = match capability.execute(&context).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(task_id = %task.id, step = step_index, agent = %step.agent, error = %e, "step raised an error");
                    self.record_event(
                        &task.id,
                        &format!("{key}_error"),
                        json!({ "error": e.to_string(), "step": step }),
                    )
                    .await?;
                    return Err(HiveError::Stage(format!(
                        "Step {step_index} handled by {} raised an error: {e}",
                        step.agent
                    )));
                }
            };

            let success = response.success;
            let status = if success { "completed" } else { "failed" };
            let payload = json!({ "step": step, "response": response });
            run.prior_outputs
                .insert(key.clone(), response.output.clone());
            run.log.push(ExecutionLogEntry {
                step: step.clone(),
                agent: step.agent.clone(),
                response,
            });
            self.record_event(&task.id, &format!("{key}_{status}"), payload)
                .await?;
            tracing::info!(task_id = %task.id, step = step_index, agent = %step.agent, success, "step finished");

            if !success {
                return Err(HiveError::Stage(format!(
                    "Step {step_index} handled by {} failed.",
                    step.agent
                )));
            }
        }

        // 评审：结论仅作参考
        let critic = self.registry.require(CRITIC)?;
        let context = AgentContext::new(&task.id, &task.goal)
            .with_payload(json!({
                "summary": {
                    "goal": task.goal,
                    "plan": run.plan,
                    "execution_log": run.log,
                }
            }))
            .with_prior_outputs(run.prior_outputs.clone());
        let critique = critic.execute(&context).await?;
        let verdict = critique.output.clone();
        let payload = serde_json::to_value(&critique)?;
        run.log.push(ExecutionLogEntry {
            step: PlanStep::new("Final critique", CRITIC),
            agent: CRITIC.to_string(),
            response: critique,
        });
        self.record_event(&task.id, "critic_completed", payload).await?;

        Ok(json!({
            "goal": task.goal,
            "plan": run.plan,
            "execution": run.log,
            "verdict": verdict,
        }))
    }

    /// 已完成任务的计划写入经验库；任务已是终态，写入失败只记录日志
    async fn remember(&self, task: &Task, run: &PipelineRun) {
        let descriptions: Vec<&str> = run.plan.iter().map(|s| s.description.as_str()).collect();
        let content = format!("Goal: {}\nPlan:\n{}", task.goal, descriptions.join("\n"));
        let result = self
            .cbr
            .add_experience(
                &task.id,
                ExperienceKind::Plan,
                &task.name,
                &content,
                Some(json!({ "execution_log": run.log })),
                None,
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(task_id = %task.id, error = %e, "failed to record experience");
        }
    }

    /// 尽力把任务标记为 failed；这里的二次失败只记录，不覆盖原始错误
    async fn mark_failed(&self, task: &Task, run: &PipelineRun, error: &HiveError) {
        let message = error.to_string();
        tracing::error!(task_id = %task.id, error = %message, "task failed");

        let outcome = TaskOutcome::Failed {
            error_message: message.clone(),
            result_summary: run.partial_summary(&task.goal),
        };
        if let Err(e) = self.store.finish_task(&task.id, outcome, Utc::now()).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to mark task as failed");
        }
        if let Err(e) = self
            .record_event(&task.id, "task_failed", json!({ "error": message }))
            .await
        {
            tracing::error!(task_id = %task.id, error = %e, "failed to record task_failed event");
        }
    }

    /// 任务已创建但无法开始时，尽力走 pending → running → failed，避免残留 pending
    async fn abandon(&self, task: &Task, error: &HiveError) {
        if let Err(e) = self.store.claim_task(&task.id, Utc::now()).await {
            tracing::error!(task_id = %task.id, error = %e, "failed to claim abandoned task");
            return;
        }
        self.mark_failed(task, &PipelineRun::default(), error).await;
    }

    async fn record_response(
        &self,
        task_id: &str,
        event_type: &str,
        response: &AgentResponse,
    ) -> Result<()> {
        self.record_event(task_id, event_type, serde_json::to_value(response)?)
            .await
    }

    async fn record_event(&self, task_id: &str, event_type: &str, payload: Value) -> Result<()> {
        self.store
            .append_event(task_id, &TaskEvent::new(event_type, payload))
            .await
    }
}
