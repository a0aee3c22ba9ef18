//! ToolSmith：按需生成可复用的工具函数，可附带测试片段在沙箱中验证

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::{extract_fenced_code, AgentCapability, AgentContext, AgentResponse, TOOLSMITH};
use crate::core::Result;
use crate::llm::LlmClient;
use crate::sandbox::Sandbox;

const FALLBACK_TOOL: &str =
    "def generated_tool(*args, **kwargs):\n    \"\"\"Fallback tool.\"\"\"\n    return None\n";

pub struct ToolSmithAgent {
    llm: Arc<dyn LlmClient>,
    sandbox: Sandbox,
}

impl ToolSmithAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sandbox: Sandbox) -> Self {
        Self { llm, sandbox }
    }

    async fn generate_tool(&self, specification: &str) -> Result<String> {
        let prompt = format!(
            "Create a reusable Python utility function matching the specification below. \
             Ensure it is pure and contains docstrings.\nSpecification: {specification}"
        );
        let response = self.llm.prompt(&prompt).await?;
        let code = extract_fenced_code(&response);
        Ok(if code.is_empty() {
            FALLBACK_TOOL.to_string()
        } else {
            code
        })
    }
}

/// 工具代码 + `__main__` 块中的测试片段（逐行缩进）
fn with_test_harness(code: &str, snippet: &str) -> String {
    let body: Vec<String> = snippet.lines().map(|line| format!("    {line}")).collect();
    format!("{code}\n\nif __name__ == '__main__':\n{}\n", body.join("\n"))
}

#[async_trait]
impl AgentCapability for ToolSmithAgent {
    fn label(&self) -> &str {
        TOOLSMITH
    }

    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        let specification = context
            .option_str("tool_spec")
            .unwrap_or_else(|| context.instruction());
        let code = self.generate_tool(specification).await?;

        let test = match context.option_str("test_snippet") {
            Some(snippet) => Some(self.sandbox.run(&with_test_harness(&code, snippet)).await?),
            None => None,
        };
        let success = test.as_ref().map_or(true, |r| r.success);
        let output = json!({ "code": code, "test": test });

        Ok(if success {
            AgentResponse::ok(output, "ToolSmith generated tool")
        } else {
            tracing::warn!(task_id = %context.task_id, "generated tool failed its test snippet");
            AgentResponse::failed(output, "ToolSmith encountered errors")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, MockLlmClient};
    use std::time::Duration;

    struct AddTool;

    #[async_trait]
    impl LlmClient for AddTool {
        async fn complete(&self, _messages: &[Message]) -> Result<String> {
            Ok("```python\ndef add(a, b):\n    \"\"\"Add.\"\"\"\n    return a + b\n```".to_string())
        }
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn toolsmith(llm: Arc<dyn LlmClient>) -> ToolSmithAgent {
        ToolSmithAgent::new(llm, Sandbox::new("python3", Duration::from_secs(10)))
    }

    #[test]
    fn test_harness_indents_snippet() {
        let combined = with_test_harness("def f():\n    return 1", "x = f()\nprint(x)");
        assert!(combined.ends_with("if __name__ == '__main__':\n    x = f()\n    print(x)\n"));
    }

    #[tokio::test]
    async fn test_fallback_tool_without_test() {
        let agent = toolsmith(Arc::new(MockLlmClient));
        let resp = agent.execute(&AgentContext::new("t", "make a slugify helper")).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.output["code"], FALLBACK_TOOL);
        assert!(resp.output["test"].is_null());
    }

    #[tokio::test]
    async fn test_snippet_runs_in_sandbox() {
        if !python_available() {
            return;
        }
        let agent = toolsmith(Arc::new(AddTool));
        let passing = AgentContext::new("t", "adder")
            .with_payload(json!({"test_snippet": "assert add(2, 3) == 5\nprint('ok')"}));
        let resp = agent.execute(&passing).await.unwrap();
        assert!(resp.success);
        assert!(resp.output["test"]["stdout"].as_str().unwrap().contains("ok"));

        let failing = AgentContext::new("t", "adder")
            .with_payload(json!({"test_snippet": "assert add(2, 2) == 5"}));
        let resp = agent.execute(&failing).await.unwrap();
        assert!(!resp.success);
        assert_eq!(resp.message, "ToolSmith encountered errors");
    }
}
