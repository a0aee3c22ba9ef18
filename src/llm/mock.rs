//! Mock LLM 客户端（离线 / 测试用，无需 API）
//!
//! 回显最后一条 User 消息的首行，输出确定，便于本地跑通整条流水线。

use async_trait::async_trait;

use crate::core::Result;
use crate::llm::{LlmClient, Message, Role};

/// 回显截断长度（字符）
const ECHO_CHARS: usize = 180;

/// Mock 客户端：回显用户最后一条消息的首行
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let head: String = last_user
            .trim()
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(ECHO_CHARS)
            .collect();

        Ok(format!(
            "Offline completion (mock LLM). Echo of prompt head: {}",
            head
        ))
    }
}
