//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、嵌入提供方

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashEmbedder, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, Message, Role};

use std::sync::Arc;

use crate::config::LlmSection;

/// 根据配置选择 LLM 后端：provider=openai 且有 API Key 时走远端，否则使用 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    if cfg.provider.eq_ignore_ascii_case("openai") {
        if let Some(key) = openai::resolve_api_key(None) {
            tracing::info!("Using OpenAI LLM ({})", cfg.model);
            return Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, key));
        }
        tracing::warn!("No OPENAI_API_KEY set, using Mock LLM");
    }
    Arc::new(MockLlmClient)
}
