//! Hive - 多阶段任务编排
//!
//! 模块划分：
//! - **agents**: 能力契约（AgentCapability）与内置智能体（Perceptor / Planner / Writer / ToolSmith / Critic）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务模型、能力注册表、编排器、构建器
//! - **llm**: LLM 客户端与嵌入提供方（OpenAI 兼容 / Mock / 哈希向量）
//! - **memory**: 案例推理（CBR）经验库
//! - **persistence**: 任务、事件、经验的存储（SQLite / 内存）
//! - **queue**: 进程内任务队列与后台 worker
//! - **sandbox**: 超时受限的子进程代码执行

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod persistence;
pub mod queue;
pub mod sandbox;

pub use crate::core::{HiveError, OrchestratorBuilder, Result, TaskOrchestrator, TaskRequest};
