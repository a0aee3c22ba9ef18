//! 能力注册表
//!
//! 标签 → AgentCapability 的静态映射，在构造编排器时一次性校验；运行期只做查找。

use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::{AgentCapability, CRITIC, PERCEPTOR, PLANNER};
use crate::core::{HiveError, Result};

/// 流水线必需的阶段角色
pub const REQUIRED_STAGES: &[&str] = &[PERCEPTOR, PLANNER, CRITIC];

/// 能力注册表：按标签存储 Arc<dyn AgentCapability>
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn AgentCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以能力自身的 label 注册
    pub fn register(&mut self, capability: impl AgentCapability + 'static) {
        let label = capability.label().to_string();
        self.capabilities.insert(label, Arc::new(capability));
    }

    /// 以指定标签注册（同一实现可挂在多个标签下）
    pub fn register_as(&mut self, label: impl Into<String>, capability: Arc<dyn AgentCapability>) {
        self.capabilities.insert(label.into(), capability);
    }

    pub fn with(mut self, capability: impl AgentCapability + 'static) -> Self {
        self.register(capability);
        self
    }

    pub fn get(&self, label: &str) -> Option<Arc<dyn AgentCapability>> {
        self.capabilities.get(label).cloned()
    }

    /// 查找必需阶段；缺失视为配置错误
    pub fn require(&self, label: &str) -> Result<Arc<dyn AgentCapability>> {
        self.get(label)
            .ok_or_else(|| HiveError::Config(format!("no capability registered for stage '{label}'")))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.capabilities.contains_key(label)
    }

    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.capabilities.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// 构造期校验：Perceptor / Planner / Critic 必须存在
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_STAGES
            .iter()
            .copied()
            .filter(|label| !self.contains(label))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HiveError::Config(format!(
                "capability registry is missing required stages: {}",
                missing.join(", ")
            )))
        }
    }
}
