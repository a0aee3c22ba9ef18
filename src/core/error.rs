//! 编排错误类型
//!
//! 两类失败共用一个枚举：可预期失败（阶段失败、能力报告失败）由编排器写入任务记录后返回；
//! 非预期失败（存储、进程创建、内部缺陷）直接向上传播。

use thiserror::Error;

use crate::core::task::TaskStatus;
use crate::memory::ExperienceKind;

/// 编排、沙箱、经验库、存储共用的错误
#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Task {0} not found.")]
    TaskNotFound(String),

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// 流水线阶段失败；消息即持久化到任务记录的 error_message
    #[error("{0}")]
    Stage(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Experience ({reference_id}, {kind}) already exists")]
    DuplicateExperience {
        reference_id: String,
        kind: ExperienceKind,
    },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for HiveError {
    fn from(err: rusqlite::Error) -> Self {
        HiveError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for HiveError {
    fn from(err: config::ConfigError) -> Self {
        HiveError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HiveError>;
