//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__SANDBOX__TIMEOUT_SECS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub sandbox: SandboxSection,
    pub embedding: EmbeddingSection,
    pub llm: LlmSection,
    pub queue: QueueSection,
}

/// [app] 段：数据库位置与 worker 并发
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// SQLite 文件路径；":memory:" 使用内存存储
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// 队列 worker 同时执行的任务数
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/hive.db")
}

fn default_max_concurrent_tasks() -> usize {
    4
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

/// [sandbox] 段：解释器、超时、脚本文件名
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_script_file_name")]
    pub file_name: String,
}

fn default_sandbox_timeout_secs() -> u64 {
    30
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script_file_name() -> String {
    "sandbox_exec.py".to_string()
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout_secs(),
            interpreter: default_interpreter(),
            file_name: default_script_file_name(),
        }
    }
}

/// [embedding] 段：hash（离线确定性向量）/ openai
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

/// [llm] 段：mock / openai（需要 OPENAI_API_KEY）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_llm_provider() -> String {
    "mock".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: None,
        }
    }
}

/// [queue] 段：是否启用进程内队列及容量
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_queue_enabled")]
    pub enabled: bool,
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_enabled() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            enabled: default_queue_enabled(),
            capacity: default_queue_capacity(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sandbox.timeout_secs, 30);
        assert_eq!(cfg.sandbox.file_name, "sandbox_exec.py");
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.embedding.dimensions, 1536);
        assert_eq!(cfg.llm.provider, "mock");
        assert!(cfg.queue.enabled);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sandbox]\ntimeout_secs = 5\n\n[embedding]\ndimensions = 64").unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.sandbox.timeout_secs, 5);
        assert_eq!(cfg.sandbox.interpreter, "python3");
        assert_eq!(cfg.embedding.dimensions, 64);
        assert_eq!(cfg.app.max_concurrent_tasks, 4);
    }
}
