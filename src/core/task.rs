//! 任务数据模型：Task / TaskEvent / PlanStep / ExecutionLogEntry
//!
//! Task 在提交时处于 pending，仅由持有它的那一次流水线运行修改；completed / failed / cancelled 为终态。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentResponse;
use crate::core::error::HiveError;

/// 任务名缺省时取 goal 的前若干字符
const DEFAULT_NAME_CHARS: usize = 120;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 已创建，等待执行
    Pending,
    /// 流水线运行中
    Running,
    Completed,
    Failed,
    /// 仅存在于类型中，当前没有内部路径会进入该状态
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// 合法迁移：pending → running → {completed, failed}
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(HiveError::Storage(format!("unknown task status '{other}'"))),
        }
    }
}

/// 一次端到端编排的目标及其持久化状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub status: TaskStatus,
    /// 调用方附带的不透明元数据（JSON 对象）
    pub metadata: Value,
    pub result_summary: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(goal: impl Into<String>, name: Option<String>, metadata: Value) -> Self {
        let goal = goal.into();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| goal.chars().take(DEFAULT_NAME_CHARS).collect());
        let metadata = if metadata.is_null() {
            Value::Object(Default::default())
        } else {
            metadata
        };
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name,
            goal,
            status: TaskStatus::Pending,
            metadata,
            result_summary: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 任务结束时写入的结果
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed {
        result_summary: Value,
    },
    Failed {
        error_message: String,
        /// 失败前已产生的计划与执行日志（若有）
        result_summary: Option<Value>,
    },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// 只追加的任务事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// get_status 返回的任务投影
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub name: String,
    pub goal: String,
    pub status: TaskStatus,
    pub result_summary: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskStatusView {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            name: task.name,
            goal: task.goal,
            status: task.status,
            result_summary: task.result_summary,
            error_message: task.error_message,
            started_at: task.started_at,
            finished_at: task.finished_at,
        }
    }
}

fn default_step_agent() -> String {
    "Writer".to_string()
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// 计划中的一步：描述 + 负责的能力标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default = "default_step_agent")]
    pub agent: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_review: bool,
}

impl PlanStep {
    pub fn new(description: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            agent: agent.into(),
            requires_review: false,
        }
    }

    pub fn reviewed(mut self) -> Self {
        self.requires_review = true;
        self
    }
}

/// 执行日志条目：每个完成的步骤与最终评审各一条
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub step: PlanStep,
    pub agent: String,
    pub response: AgentResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_task_defaults() {
        let goal = "x".repeat(300);
        let task = Task::new(goal.clone(), None, Value::Null);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.name.chars().count(), 120);
        assert!(task.metadata.is_object());
        assert_eq!(task.id.len(), 32);

        let named = Task::new("goal", Some("Report".to_string()), serde_json::json!({"k": 1}));
        assert_eq!(named.name, "Report");
        assert_eq!(named.metadata["k"], 1);
    }

    #[test]
    fn test_plan_step_defaults_agent_to_writer() {
        let step: PlanStep = serde_json::from_value(serde_json::json!({"description": "draft"})).unwrap();
        assert_eq!(step.agent, "Writer");
        assert!(!step.requires_review);

        let value = serde_json::to_value(PlanStep::new("review", "Critic").reviewed()).unwrap();
        assert_eq!(value["requires_review"], true);
    }
}
