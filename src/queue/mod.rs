//! 任务队列：入队 task_id，由后台 worker 以有限并发调用 execute_task
//!
//! 队列只传递 task_id；任务状态以 TaskStore 中的记录为准，worker 中的执行失败只记录日志。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::{HiveError, Result, TaskOrchestrator};

/// 外部作业队列
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, task_id: &str) -> Result<()>;
}

/// 进程内有界队列（tokio mpsc）
#[derive(Clone)]
pub struct InProcessQueue {
    sender: mpsc::Sender<String>,
}

impl InProcessQueue {
    /// 返回队列与接收端；接收端交给 [`QueueWorker::run`]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    /// 不等待空位：队列满或已关闭立即返回错误，由调用方回退到内联执行
    async fn enqueue(&self, task_id: &str) -> Result<()> {
        self.sender.try_send(task_id.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HiveError::Queue("queue is full".to_string()),
            mpsc::error::TrySendError::Closed(_) => HiveError::Queue("queue is closed".to_string()),
        })
    }
}

/// 后台 worker：Semaphore 限制同时执行的任务数
pub struct QueueWorker {
    orchestrator: Arc<TaskOrchestrator>,
    max_concurrent: usize,
}

impl QueueWorker {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// 消费队列直到 shutdown 被取消或发送端全部关闭，然后等待在途任务结束
    pub async fn run(self, mut receiver: mpsc::Receiver<String>, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut in_flight = JoinSet::new();
        tracing::info!(max_concurrent = self.max_concurrent, "queue worker started");

        loop {
            let task_id = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(task_id) => task_id,
                    None => break,
                },
            };
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let orchestrator = Arc::clone(&self.orchestrator);
            in_flight.spawn(async move {
                let _permit = permit;
                if let Err(e) = orchestrator.execute_task(&task_id).await {
                    tracing::warn!(task_id = %task_id, error = %e, "queued task did not complete");
                }
            });
            // 回收已结束的任务，避免 JoinSet 无限增长
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        tracing::info!("queue worker stopped");
    }
}
