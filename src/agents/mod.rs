//! 智能体能力：统一的 execute(context) → response 契约与内置实现
//!
//! 编排器只通过 AgentCapability 调用各阶段，从不关心其内部。内置实现：
//! Perceptor（拆解目标）、Planner（结合 CBR 生成计划）、Writer（生成代码并在沙箱验证）、
//! ToolSmith（生成工具函数并可选测试）、Critic（最终评审）。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Result;

pub mod critic;
pub mod perceptor;
pub mod planner;
pub mod toolsmith;
pub mod writer;

pub use critic::CriticAgent;
pub use perceptor::PerceptorAgent;
pub use planner::PlannerAgent;
pub use toolsmith::ToolSmithAgent;
pub use writer::WriterAgent;

/// 能力标签
pub const PERCEPTOR: &str = "Perceptor";
pub const PLANNER: &str = "Planner";
pub const WRITER: &str = "Writer";
pub const TOOLSMITH: &str = "ToolSmith";
pub const CRITIC: &str = "Critic";
pub const ART_DIRECTOR: &str = "ArtDirector";

/// 各阶段累计输出，键为小写能力标签
pub type PriorOutputs = BTreeMap<String, Value>;

/// 执行上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    pub task_id: String,
    pub goal: String,
    /// 步骤参数（JSON 对象），由编排器构造
    pub payload: Value,
    pub prior_outputs: PriorOutputs,
}

impl AgentContext {
    pub fn new(task_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            goal: goal.into(),
            payload: Value::Object(Default::default()),
            prior_outputs: PriorOutputs::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_prior_outputs(mut self, prior_outputs: PriorOutputs) -> Self {
        self.prior_outputs = prior_outputs;
        self
    }

    /// 读取参数：先查 payload 顶层，再查 payload.metadata（任务元数据）
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.payload
            .get(key)
            .or_else(|| self.payload.get("metadata").and_then(|m| m.get(key)))
            .filter(|v| !v.is_null())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.option(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.option(key).and_then(|v| v.as_bool())
    }

    /// 当前步骤的指令；缺省时退回总体目标
    pub fn instruction(&self) -> &str {
        self.payload
            .get("task")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.goal)
    }

    pub fn prior(&self, label: &str) -> Option<&Value> {
        self.prior_outputs.get(&label.to_lowercase())
    }
}

fn default_media_type() -> String {
    "text/plain".to_string()
}

/// 智能体产出的工件（文件、图表等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentArtifact {
    pub uri: Option<String>,
    pub description: String,
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

/// 统一的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub artifacts: Vec<AgentArtifact>,
}

impl AgentResponse {
    pub fn ok(output: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            output,
            message: message.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn failed(output: Value, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output,
            message: message.into(),
            artifacts: Vec::new(),
        }
    }
}

/// 能力契约：标签 + 异步执行
///
/// 返回 `Ok(response)` 且 `success == false` 表示能力报告失败；返回 `Err` 表示执行中出错。
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// 注册表中的标签（如 "Writer"）
    fn label(&self) -> &str;

    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse>;
}

/// 去掉列表项前缀（"-"、"•"）与首尾空白
pub(crate) fn clean_list_item(line: &str) -> &str {
    line.trim_matches(|c: char| c == '-' || c == '•' || c.is_whitespace())
}

/// 从 LLM 回复中提取 ``` 围起来的代码块；没有代码块时返回空串
pub(crate) fn extract_fenced_code(response: &str) -> String {
    let mut lines = Vec::new();
    let mut inside = false;
    for line in response.lines() {
        if line.trim().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            lines.push(line);
        }
    }
    lines.join("\n").trim().to_string()
}
