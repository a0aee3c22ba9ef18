//! 嵌入 API：为经验库（CBR）提供文本向量
//!
//! - HashEmbedder：基于 SHA-256 计数流的确定性向量，离线可用，维度与生产向量一致
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点，失败时回退到哈希向量

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingSection;
use crate::core::{HiveError, Result};
use crate::llm::openai::{openai_config, resolve_api_key};

/// 外部提供的 embedding 函数
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为定长向量
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// 确定性哈希向量：sha256(text || counter_le) 的字节依次 /255 填充，再做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let seed = text.as_bytes();
        let mut raw: Vec<f32> = Vec::with_capacity(self.dimensions + 32);
        let mut counter: u32 = 0;
        while raw.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(counter.to_le_bytes());
            raw.extend(hasher.finalize().iter().map(|b| *b as f32 / 255.0));
            counter += 1;
        }
        raw.truncate(self.dimensions);

        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return vec![0.0; self.dimensions];
        }
        raw.iter().map(|v| v / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    fallback: HashEmbedder,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: String, dimensions: usize) -> Self {
        Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
            fallback: HashEmbedder::new(dimensions),
        }
    }

    async fn embed_remote(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| HiveError::Embedding(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| HiveError::Embedding(e.to_string()))?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| HiveError::Embedding("empty embedding response".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.embed_remote(text).await {
            Ok(vec) => Ok(vec),
            Err(e) => {
                tracing::warn!(error = %e, "remote embedding failed, using hash embedding");
                Ok(self.fallback.embed_text(text))
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.fallback.dimensions
    }
}

/// 从配置创建嵌入提供方；provider=openai 且有 API Key 时走远端，否则用哈希向量
pub fn create_embedder_from_config(
    cfg: &EmbeddingSection,
    base_url: Option<&str>,
) -> Arc<dyn EmbeddingProvider> {
    if cfg.provider.eq_ignore_ascii_case("openai") {
        if let Some(key) = resolve_api_key(None) {
            tracing::info!(model = %cfg.model, "Using OpenAI embeddings");
            return Arc::new(OpenAiEmbedder::new(base_url, &cfg.model, key, cfg.dimensions));
        }
        tracing::warn!("embedding provider is openai but OPENAI_API_KEY is not set, using hash embeddings");
    }
    Arc::new(HashEmbedder::new(cfg.dimensions))
}
