use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::JobStatus;

/// 每次状态查询产生的进度事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobProgress {
    pub request_id: String,
    pub job_type: String,
    /// 从 1 开始的轮询次数
    pub attempt: u32,
    pub status: JobStatus,
    /// 生成服务返回的日志行
    pub logs: Vec<String>,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &JobProgress);
}

/// 默认实现：写入 tracing 日志
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: &JobProgress) {
        info!(
            request_id = %event.request_id,
            job_type = %event.job_type,
            attempt = event.attempt,
            status = %event.status,
            "job status"
        );
        for line in &event.logs {
            debug!(request_id = %event.request_id, "provider: {line}");
        }
    }
}

/// 收集所有事件，供测试和 CLI 汇总使用
#[derive(Clone, Debug, Default)]
pub struct RecordingProgress {
    events: Arc<Mutex<Vec<JobProgress>>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobProgress> {
        self.events.lock().clone()
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.events.lock().iter().map(|event| event.status).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: &JobProgress) {
        self.events.lock().push(event.clone());
    }
}
