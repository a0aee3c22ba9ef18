//! Hive - 多阶段任务编排
//!
//! 入口：初始化日志、按配置装配编排器，同步执行命令行给出的目标并打印状态与事件。
//!
//! 用法：`hive [--config <path>] <goal...>`；目标为 `-` 时从 stdin 读取（可多行）。

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use hive::config::load_config;
use hive::{observability, OrchestratorBuilder, TaskRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut words: Vec<String> = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(PathBuf::from(args.next().context("--config requires a path")?));
        } else {
            words.push(arg);
        }
    }

    let goal = if words.len() == 1 && words[0] == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read goal from stdin")?;
        buf
    } else {
        words.join(" ")
    };
    if goal.trim().is_empty() {
        bail!("usage: hive [--config <path>] <goal...>");
    }

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let orchestrator = OrchestratorBuilder::from_config(cfg)
        .build()
        .context("Failed to assemble orchestrator")?;

    let task_id = orchestrator
        .start_task(TaskRequest::new(goal).sync())
        .await
        .context("Task run failed")?;

    let status = orchestrator
        .get_status(&task_id)
        .await
        .context("Failed to load task status")?
        .context("Task record disappeared")?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    for event in orchestrator
        .list_events(&task_id)
        .await
        .context("Failed to load task events")?
    {
        println!("{} {}", event.created_at.to_rfc3339(), event.event_type);
    }
    Ok(())
}
