//! 案例推理（CBR）经验库
//!
//! 每条经验在写入时计算 embedding 并持久化；检索时对查询做 embedding，
//! 按余弦相似度降序返回最相近的若干案例（同分按写入顺序）。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{HiveError, Result};
use crate::llm::EmbeddingProvider;
use crate::persistence::TaskStore;

/// find_similar 的默认返回条数
pub const DEFAULT_LIMIT: usize = 3;

/// 经验类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceKind {
    Plan,
    Tool,
    Artifact,
}

impl ExperienceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Tool => "tool",
            Self::Artifact => "artifact",
        }
    }
}

impl fmt::Display for ExperienceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperienceKind {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plan" => Ok(Self::Plan),
            "tool" => Ok(Self::Tool),
            "artifact" => Ok(Self::Artifact),
            other => Err(HiveError::Storage(format!("unknown experience kind '{other}'"))),
        }
    }
}

/// 持久化的经验案例；(reference_id, kind) 唯一，写入后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub reference_id: String,
    pub kind: ExperienceKind,
    pub title: String,
    pub content: String,
    pub metadata: Value,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// 检索结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedCase {
    pub reference_id: String,
    pub kind: ExperienceKind,
    pub title: String,
    pub metadata: Value,
    pub score: f32,
}

/// 余弦相似度；维度不一致、空向量或零范数时为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 经验库：持久化交给 TaskStore，向量化交给 EmbeddingProvider
pub struct ExperienceStore {
    store: Arc<dyn TaskStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ExperienceStore {
    pub fn new(store: Arc<dyn TaskStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 写入一条经验；未提供 embedding（或为空）时对 content 计算
    pub async fn add_experience(
        &self,
        reference_id: &str,
        kind: ExperienceKind,
        title: &str,
        content: &str,
        metadata: Option<Value>,
        embedding: Option<Vec<f32>>,
    ) -> Result<ExperienceRecord> {
        let embedding = match embedding.filter(|e| !e.is_empty()) {
            Some(e) => e,
            None => self.embedder.embed(content).await?,
        };
        let record = ExperienceRecord {
            reference_id: reference_id.to_string(),
            kind,
            title: title.to_string(),
            content: content.to_string(),
            metadata: metadata
                .filter(|m| !m.is_null())
                .unwrap_or_else(|| Value::Object(Default::default())),
            embedding,
            created_at: Utc::now(),
        };
        self.store.insert_experience(&record).await?;
        tracing::debug!(reference_id, kind = %kind, "experience recorded");
        Ok(record)
    }

    /// 相似案例检索
    pub async fn find_similar(
        &self,
        query: &str,
        kind: Option<ExperienceKind>,
        limit: usize,
    ) -> Result<Vec<RetrievedCase>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let records = self.store.list_experiences(kind).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<RetrievedCase> = records
            .into_iter()
            .filter(|r| !r.embedding.is_empty())
            .map(|r| RetrievedCase {
                score: cosine_similarity(&query_embedding, &r.embedding),
                reference_id: r.reference_id,
                kind: r.kind,
                title: r.title,
                metadata: r.metadata,
            })
            .collect();

        // sort_by 是稳定排序：同分保持写入顺序
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }
}
