//! Planner：结合相似历史案例（CBR）生成执行计划
//!
//! 每个任务按关键词分配给执行能力；历史案例 metadata 中的 `insight` 追加为
//! "Apply lesson" 步骤；计划末尾固定一步 Critic 总结。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::{
    clean_list_item, AgentCapability, AgentContext, AgentResponse, ART_DIRECTOR, CRITIC, PLANNER,
    TOOLSMITH, WRITER,
};
use crate::core::task::PlanStep;
use crate::core::Result;
use crate::llm::LlmClient;
use crate::memory::{ExperienceKind, ExperienceStore, RetrievedCase, DEFAULT_LIMIT};

const MAX_LLM_STEPS: usize = 5;

const VISUAL_KEYWORDS: &[&str] = &["diagram", "image", "visual", "plot"];
const REVIEW_KEYWORDS: &[&str] = &["test", "review", "validate"];
const TOOL_KEYWORDS: &[&str] = &["tool", "utility", "helper"];

/// 按关键词为任务选择能力标签
pub fn assign_agent(task: &str) -> &'static str {
    let lowered = task.to_lowercase();
    let has = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));
    if has(VISUAL_KEYWORDS) {
        ART_DIRECTOR
    } else if has(REVIEW_KEYWORDS) {
        CRITIC
    } else if has(TOOL_KEYWORDS) {
        TOOLSMITH
    } else {
        WRITER
    }
}

pub struct PlannerAgent {
    llm: Arc<dyn LlmClient>,
    cbr: Arc<ExperienceStore>,
}

impl PlannerAgent {
    pub fn new(llm: Arc<dyn LlmClient>, cbr: Arc<ExperienceStore>) -> Self {
        Self { llm, cbr }
    }

    fn build_plan(tasks: &[String], references: &[RetrievedCase]) -> Vec<PlanStep> {
        let mut plan = Vec::with_capacity(tasks.len() + references.len() + 2);
        let mut visual = false;
        for task in tasks {
            let agent = assign_agent(task);
            visual |= agent == ART_DIRECTOR;
            let step = PlanStep::new(task.clone(), agent);
            plan.push(if agent == WRITER || agent == TOOLSMITH {
                step.reviewed()
            } else {
                step
            });
        }
        if visual {
            plan.push(PlanStep::new("Review visual assets", CRITIC).reviewed());
        }
        for case in references {
            if let Some(insight) = case
                .metadata
                .get("insight")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
            {
                plan.push(PlanStep::new(format!("Apply lesson: {insight}"), WRITER));
            }
        }
        plan.push(PlanStep::new("Final quality review and summary", CRITIC).reviewed());
        plan
    }

    async fn llm_breakdown(&self, goal: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "Decompose the following goal into 4 concrete steps. \
             Return each step on a new line without numbering and using imperative verbs.\nGoal: {goal}"
        );
        let response = self.llm.prompt(&prompt).await?;
        let mut steps: Vec<String> = response
            .lines()
            .map(clean_list_item)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        steps.truncate(MAX_LLM_STEPS);
        if steps.is_empty() {
            steps.push(goal.to_string());
        }
        Ok(steps)
    }
}

#[async_trait]
impl AgentCapability for PlannerAgent {
    fn label(&self) -> &str {
        PLANNER
    }

    async fn execute(&self, context: &AgentContext) -> Result<AgentResponse> {
        let mut tasks: Vec<String> = context
            .payload
            .get("tasks")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|t| t.as_str())
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if tasks.is_empty() {
            tasks = self.llm_breakdown(&context.goal).await?;
        }

        let references = self
            .cbr
            .find_similar(&context.goal, Some(ExperienceKind::Plan), DEFAULT_LIMIT)
            .await?;
        let plan = Self::build_plan(&tasks, &references);
        tracing::info!(
            task_id = %context.task_id,
            steps = plan.len(),
            references = references.len(),
            "plan built"
        );

        let reference_ids: Vec<&str> = references.iter().map(|c| c.reference_id.as_str()).collect();
        Ok(AgentResponse::ok(
            json!({
                "plan": plan,
                "metadata": {
                    "references": reference_ids,
                    "step_count": plan.len(),
                }
            }),
            "Planning completed",
        ))
    }
}
