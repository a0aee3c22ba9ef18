//! 编排器构建器：按配置装配存储、嵌入、LLM、沙箱、内置智能体与可选队列
//!
//! 依赖均可显式注入（with_*），未注入时按配置创建。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agents::{CriticAgent, PerceptorAgent, PlannerAgent, ToolSmithAgent, WriterAgent};
use crate::config::AppConfig;
use crate::core::{CapabilityRegistry, Result, TaskOrchestrator};
use crate::llm::{create_embedder_from_config, create_llm_from_config, EmbeddingProvider, LlmClient};
use crate::memory::ExperienceStore;
use crate::persistence::{InMemoryTaskStore, SqliteTaskStore, TaskStore};
use crate::queue::{InProcessQueue, QueueWorker};
use crate::sandbox::Sandbox;

/// 数据库路径为该值时使用内存存储
pub const IN_MEMORY_DATABASE: &str = ":memory:";

pub struct OrchestratorBuilder {
    config: AppConfig,
    store: Option<Arc<dyn TaskStore>>,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    registry: Option<CapabilityRegistry>,
}

impl OrchestratorBuilder {
    pub fn from_config(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            llm: None,
            embedder: None,
            registry: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// 使用自定义注册表代替内置智能体
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn open_store(&self) -> Result<Arc<dyn TaskStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        let path = &self.config.app.database_path;
        if path.as_os_str() == IN_MEMORY_DATABASE {
            return Ok(Arc::new(InMemoryTaskStore::new()));
        }
        Ok(Arc::new(SqliteTaskStore::open(path)?))
    }

    /// 内置智能体注册表：Perceptor / Planner / Writer / ToolSmith / Critic
    pub fn builtin_registry(
        llm: Arc<dyn LlmClient>,
        cbr: Arc<ExperienceStore>,
        sandbox: Sandbox,
    ) -> CapabilityRegistry {
        CapabilityRegistry::new()
            .with(PerceptorAgent::new(Arc::clone(&llm)))
            .with(PlannerAgent::new(Arc::clone(&llm), cbr))
            .with(WriterAgent::new(Arc::clone(&llm), sandbox.clone()))
            .with(ToolSmithAgent::new(Arc::clone(&llm), sandbox))
            .with(CriticAgent::new(llm))
    }

    /// 构建不带队列的编排器（所有任务在 start_task 内执行）
    pub fn build(self) -> Result<TaskOrchestrator> {
        let store = self.open_store()?;
        let embedder = self
            .embedder
            .clone()
            .unwrap_or_else(|| create_embedder_from_config(&self.config.embedding, self.config.llm.base_url.as_deref()));
        let cbr = Arc::new(ExperienceStore::new(Arc::clone(&store), embedder));

        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                let llm = self
                    .llm
                    .clone()
                    .unwrap_or_else(|| create_llm_from_config(&self.config.llm));
                let sandbox = Sandbox::from_config(&self.config.sandbox);
                Self::builtin_registry(llm, Arc::clone(&cbr), sandbox)
            }
        };
        tracing::info!(capabilities = ?registry.labels(), "orchestrator assembled");
        TaskOrchestrator::new(registry, store, cbr)
    }

    /// 按 `queue.enabled` 构建编排器：开启时附带进程内队列，并返回消费该队列的 worker 与接收端
    ///
    /// 队列关闭时不返回 worker，所有任务在 start_task 内执行。
    /// 调用方负责 `tokio::spawn(worker.run(receiver, shutdown))`。
    pub fn build_queued(
        self,
    ) -> Result<(Arc<TaskOrchestrator>, Option<(QueueWorker, mpsc::Receiver<String>)>)> {
        if !self.config.queue.enabled {
            tracing::info!("task queue disabled, tasks run inline");
            return Ok((Arc::new(self.build()?), None));
        }
        let capacity = self.config.queue.capacity;
        let max_concurrent = self.config.app.max_concurrent_tasks;
        let (queue, receiver) = InProcessQueue::new(capacity);
        let orchestrator = Arc::new(self.build()?.with_queue(Arc::new(queue)));
        let worker = QueueWorker::new(Arc::clone(&orchestrator), max_concurrent);
        Ok((orchestrator, Some((worker, receiver))))
    }
}
