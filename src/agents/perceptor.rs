//! Perceptor：把高层目标拆成可执行的任务列表

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::{clean_list_item, AgentCapability, AgentContext, AgentResponse, PERCEPTOR};
use crate::core::Result;
use crate::llm::LlmClient;

const MAX_TASKS: usize = 5;

pub struct PerceptorAgent {
    llm: Arc<dyn LlmClient>,
}

impl PerceptorAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 多行目标直接按行拆分；单行目标交给 LLM，最多取 5 条
    async fn derive_tasks(&self, goal: &str) -> Result<Vec<String>> {
        if goal.trim().is_empty() {
            return Ok(vec!["Clarify the user's goal.".to_string()]);
        }
        let tokens: Vec<String> = goal
            .lines()
            .map(clean_list_item)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if tokens.len() > 1 {
            return Ok(tokens);
        }

        let prompt = format!(
            "You are the Perceptor agent. Given the following goal, produce a concise \
             ordered list of 3-5 high-level tasks. Use short imperative phrases.\n\nGoal:\n{goal}"
        );
        let response = self.llm.prompt(&prompt).await?;
        let mut tasks: Vec<String> = response
            .lines()
            .map(clean_list_item)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if tasks.is_empty() {
            tasks.push(goal.to_string());
        }
        tasks.truncate(MAX_TASKS);
        Ok(tasks)
    }
}

#[async_trait]
impl AgentCapability for PerceptorAgent {
    fn label(&self) -> &str {
        PERCEPTOR
    }

    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        let goal = if context.goal.trim().is_empty() {
            context.option_str("prompt").unwrap_or_default()
        } else {
            context.goal.as_str()
        };
        let tasks = self.derive_tasks(goal).await?;
        tracing::debug!(task_id = %context.task_id, count = tasks.len(), "perception derived tasks");
        Ok(AgentResponse::ok(
            json!({ "tasks": tasks, "task_count": tasks.len() }),
            "Perception completed",
        ))
    }
}
