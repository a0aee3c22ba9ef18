//! LLM 客户端抽象
//!
//! 内置智能体只依赖 LlmClient::complete（非流式）；后端为 OpenAI 兼容端点或离线 Mock。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Result;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String>;

    /// 单条 user prompt 的便捷调用
    async fn prompt(&self, prompt: &str) -> Result<String> {
        self.complete(&[Message::user(prompt)]).await
    }
}
