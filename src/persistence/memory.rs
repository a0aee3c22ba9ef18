//! 内存存储：测试与无数据库场景使用

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::core::task::{Task, TaskEvent, TaskOutcome, TaskStatus};
use crate::core::{HiveError, Result};
use crate::memory::{ExperienceKind, ExperienceRecord};
use crate::persistence::TaskStore;

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    events: HashMap<String, Vec<TaskEvent>>,
    experiences: Vec<ExperienceRecord>,
}

impl State {
    /// 校验迁移并返回可修改的任务
    fn transition(&mut self, task_id: &str, to: TaskStatus) -> Result<&mut Task> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| HiveError::TaskNotFound(task_id.to_string()))?;
        if !task.status.can_transition_to(to) {
            return Err(HiveError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to,
            });
        }
        task.status = to;
        Ok(task)
    }
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<State>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(HiveError::Storage(format!("task {} already exists", task.id)));
        }
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(task_id).cloned())
    }

    async fn claim_task(&self, task_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let task = state.transition(task_id, TaskStatus::Running)?;
        task.started_at = Some(started_at);
        Ok(())
    }

    async fn finish_task(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let task = state.transition(task_id, outcome.status())?;
        match outcome {
            TaskOutcome::Completed { result_summary } => {
                task.result_summary = Some(result_summary);
                task.error_message = None;
            }
            TaskOutcome::Failed {
                error_message,
                result_summary,
            } => {
                task.result_summary = result_summary;
                task.error_message = Some(error_message);
            }
        }
        task.finished_at = Some(finished_at);
        Ok(())
    }

    async fn append_event(&self, task_id: &str, event: &TaskEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.tasks.contains_key(task_id) {
            return Err(HiveError::TaskNotFound(task_id.to_string()));
        }
        state
            .events
            .entry(task_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events(&self, task_id: &str) -> Result<Vec<TaskEvent>> {
        Ok(self
            .state
            .lock()
            .await
            .events
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_experience(&self, record: &ExperienceRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let duplicate = state
            .experiences
            .iter()
            .any(|r| r.reference_id == record.reference_id && r.kind == record.kind);
        if duplicate {
            return Err(HiveError::DuplicateExperience {
                reference_id: record.reference_id.clone(),
                kind: record.kind,
            });
        }
        state.experiences.push(record.clone());
        Ok(())
    }

    async fn list_experiences(&self, kind: Option<ExperienceKind>) -> Result<Vec<ExperienceRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .experiences
            .iter()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect())
    }
}
