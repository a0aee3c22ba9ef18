//! Writer：把计划步骤落实为代码，并在沙箱中验证

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::{extract_fenced_code, AgentCapability, AgentContext, AgentResponse, WRITER};
use crate::core::Result;
use crate::llm::LlmClient;
use crate::sandbox::Sandbox;

/// 指令中出现这些词且已有上一步代码时，直接复用上一步代码
const RERUN_KEYWORDS: &[&str] = &["run", "execute"];

pub struct WriterAgent {
    llm: Arc<dyn LlmClient>,
    sandbox: Sandbox,
}

impl WriterAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sandbox: Sandbox) -> Self {
        Self { llm, sandbox }
    }

    fn prior_code(context: &AgentContext) -> Option<&str> {
        context
            .prior(WRITER)
            .and_then(|out| out.get("code"))
            .and_then(|v| v.as_str())
            .filter(|code| !code.trim().is_empty())
    }

    async fn generate_code(&self, context: &AgentContext) -> Result<String> {
        if let Some(code) = context.option_str("code_override") {
            return Ok(code.to_string());
        }

        let instructions = context.instruction();
        let prior_code = Self::prior_code(context);
        let lowered = instructions.to_lowercase();
        if let Some(code) = prior_code {
            if RERUN_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                return Ok(code.to_string());
            }
        }

        let mut prompt = format!(
            "You are the Writer agent. Generate Python code to accomplish the task below.\n\
             Ensure the code is self-contained (standard library only unless otherwise noted) and \
             return the code inside a markdown code block in the format ```python ... ```.\n\
             Task: {instructions}"
        );
        if let Some(code) = prior_code {
            prompt.push_str(&format!(
                "\n\nPrevious step generated this code:\n```python\n{code}\n```\n\
                 If the task requires using or building upon the previous code, incorporate it appropriately."
            ));
        }

        let response = self.llm.prompt(&prompt).await?;
        let generated = extract_fenced_code(&response);
        if !generated.is_empty() {
            return Ok(generated);
        }
        // 模型没有返回代码块：退回最小可执行模板
        Ok(format!(
            "print(\"Task description: {}\")",
            instructions.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " ")
        ))
    }
}

#[async_trait]
impl AgentCapability for WriterAgent {
    fn label(&self) -> &str {
        WRITER
    }

    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        let code = self.generate_code(context).await?;

        let sandbox_result = if context.option_bool("run_in_sandbox").unwrap_or(true) {
            Some(self.sandbox.run(&code).await?)
        } else {
            None
        };
        let success = sandbox_result.as_ref().map_or(true, |r| r.success);
        if !success {
            tracing::warn!(task_id = %context.task_id, "writer code failed in sandbox");
        }

        let output = json!({ "code": code, "sandbox": sandbox_result });
        let message = if success {
            "Writer execution completed"
        } else {
            "Writer code failed in sandbox"
        };
        Ok(if success {
            AgentResponse::ok(output, message)
        } else {
            AgentResponse::failed(output, message)
        })
    }
}
