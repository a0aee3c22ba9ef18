//! 核心编排层：错误、任务模型、能力注册表、编排器与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod task;

pub use builder::OrchestratorBuilder;
pub use error::{HiveError, Result};
pub use orchestrator::{TaskOrchestrator, TaskRequest};
pub use registry::CapabilityRegistry;
pub use task::{
    ExecutionLogEntry, PlanStep, Task, TaskEvent, TaskOutcome, TaskStatus, TaskStatusView,
};
