//! 持久化：任务、任务事件、经验案例
//!
//! 编排器只依赖 [`TaskStore`]；每次调用各自原子。pending → running 的认领与
//! running → 终态的结束都是比较并交换，保证同一任务至多被一次流水线运行持有。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::task::{Task, TaskEvent, TaskOutcome};
use crate::core::Result;
use crate::memory::{ExperienceKind, ExperienceRecord};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> Result<()>;

    /// 未找到时返回 None
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// pending → running 并写入 started_at
    ///
    /// 任务不存在返回 `TaskNotFound`；不处于 pending 返回 `InvalidTransition`。
    async fn claim_task(&self, task_id: &str, started_at: DateTime<Utc>) -> Result<()>;

    /// running → completed / failed 并写入 finished_at
    async fn finish_task(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn append_event(&self, task_id: &str, event: &TaskEvent) -> Result<()>;

    /// 按写入顺序返回；未知任务返回空
    async fn list_events(&self, task_id: &str) -> Result<Vec<TaskEvent>>;

    /// (reference_id, kind) 重复时返回 `DuplicateExperience`
    async fn insert_experience(&self, record: &ExperienceRecord) -> Result<()>;

    /// 按写入顺序返回，可按类别过滤
    async fn list_experiences(&self, kind: Option<ExperienceKind>) -> Result<Vec<ExperienceRecord>>;
}
