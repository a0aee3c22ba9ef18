//! Critic：对执行结果做最终评审（结论仅供参考，不影响任务成败）

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{AgentCapability, AgentContext, AgentResponse, CRITIC};
use crate::core::Result;
use crate::llm::LlmClient;

pub const APPROVE: &str = "approve";
pub const REQUEST_CHANGES: &str = "request_changes";

pub struct CriticAgent {
    llm: Arc<dyn LlmClient>,
}

impl CriticAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

/// 回复可能不是 JSON，按关键词判断结论
fn verdict_of(response: &str) -> &'static str {
    if response.to_lowercase().contains(APPROVE) {
        APPROVE
    } else {
        REQUEST_CHANGES
    }
}

#[async_trait]
impl AgentCapability for CriticAgent {
    fn label(&self) -> &str {
        CRITIC
    }

    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        let summary = match context.option("summary") {
            Some(Value::String(s)) => s.clone(),
            Some(v) => serde_json::to_string_pretty(v)?,
            None => context.instruction().to_string(),
        };
        let checklist = context
            .option("checklist")
            .cloned()
            .unwrap_or_else(|| json!([]));

        let prompt = format!(
            "You are the Critic agent. Evaluate the provided summary for completeness, \
             correctness, and adherence to the checklist. Respond with JSON containing \
             fields: verdict (approve/request_changes), score (0-1), issues (list of strings), \
             and recommendations (list of strings).\n\nSummary:\n{summary}\n\nChecklist:\n{checklist}"
        );
        let response = self.llm.prompt(&prompt).await?;

        let verdict = verdict_of(&response);
        let (score, issues) = if verdict == APPROVE {
            (0.8, Vec::new())
        } else {
            tracing::info!(task_id = %context.task_id, "critic requested changes");
            (0.3, vec!["LLM critique requested changes."])
        };
        Ok(AgentResponse::ok(
            json!({
                "verdict": verdict,
                "score": score,
                "issues": issues,
                "raw_response": response,
            }),
            "Critique completed",
        ))
    }
}
