//! 隔离沙箱：在独立子进程中执行生成的代码
//!
//! 每次执行都使用私有临时目录（执行结束即删除），子进程 stdin 置空、stdout/stderr 捕获，
//! 超时后强制结束并回收进程。只提供超时 + 进程隔离，不做系统级隔离。

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::config::SandboxSection;
use crate::core::{HiveError, Result};

/// 一次执行的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// 进程退出码；被信号结束或超时为 -1
    pub return_code: i32,
    pub error: Option<String>,
}

impl SandboxResult {
    pub fn timed_out() -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: "Execution timed out".to_string(),
            return_code: -1,
            error: Some("timeout".to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some("timeout")
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: String,
    timeout: Duration,
    file_name: String,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::from_config(&SandboxSection::default())
    }
}

impl Sandbox {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            file_name: SandboxSection::default().file_name,
        }
    }

    pub fn from_config(cfg: &SandboxSection) -> Self {
        Self {
            interpreter: cfg.interpreter.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            file_name: cfg.file_name.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行代码；确定性的执行结果（非零退出、超时）不会转成错误
    pub async fn run(&self, code: &str) -> Result<SandboxResult> {
        let dir = tempfile::Builder::new().prefix("hive-sandbox-").tempdir()?;
        let result = self.run_in(dir.path(), code).await;
        if let Err(e) = dir.close() {
            tracing::warn!(error = %e, "failed to remove sandbox directory");
        }
        result
    }

    async fn run_in(&self, dir: &Path, code: &str) -> Result<SandboxResult> {
        let script = dir.join(&self.file_name);
        tokio::fs::write(&script, code).await?;

        let mut child = Command::new(&self.interpreter)
            .arg(&script)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HiveError::Sandbox(format!("failed to spawn '{}': {e}", self.interpreter)))?;

        let mut stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        // 超时覆盖进程退出与管道读尽：后台子进程继承管道时也不会无限等待
        let finished = tokio::time::timeout(self.timeout, async {
            tokio::join!(child.wait(), &mut stdout_task, &mut stderr_task)
        })
        .await;

        match finished {
            Ok((status, stdout, stderr)) => {
                let status = status?;
                let stdout = stdout.unwrap_or_default();
                let stderr = stderr.unwrap_or_default();
                let success = status.success();
                tracing::debug!(return_code = ?status.code(), success, "sandbox execution finished");
                Ok(SandboxResult {
                    success,
                    error: (!success).then(|| stderr.trim().to_string()),
                    stdout,
                    stderr,
                    return_code: status.code().unwrap_or(-1),
                })
            }
            Err(_) => {
                // kill() 会等待进程退出，回收后不留僵尸进程
                if !matches!(child.try_wait(), Ok(Some(_))) {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill timed out sandbox process");
                    }
                }
                stdout_task.abort();
                stderr_task.abort();
                tracing::warn!(
                    "Sandbox execution timed out after {} seconds",
                    self.timeout.as_secs_f64()
                );
                Ok(SandboxResult::timed_out())
            }
        }
    }

    /// 同步包装
    ///
    /// 当前线程没有 tokio 运行时：建一个 current-thread 运行时执行；
    /// 已在运行时内：在独立线程上用自己的运行时执行并等待，线程 panic 视为内部错误。
    pub fn run_sync(&self, code: &str) -> Result<SandboxResult> {
        if tokio::runtime::Handle::try_current().is_err() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            return runtime.block_on(self.run(code));
        }

        let sandbox = self.clone();
        let code = code.to_string();
        std::thread::spawn(move || -> Result<SandboxResult> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(sandbox.run(&code))
        })
        .join()
        .map_err(|_| HiveError::Internal("sandbox thread panicked".to_string()))?
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "sandbox pipe read failed");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
