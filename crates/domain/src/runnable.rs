use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use jobstore_errors::{JobResult, JobStoreError};

use crate::entities::{JobDefinition, JobExecutionPriority, RemoteJobStatus, ResultCode};
use crate::repositories::JobInfoRepository;

/// 生命周期钩子所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Prepare,
    Execute,
    AfterExecution,
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            ExecutionPhase::Prepare => "prepare",
            ExecutionPhase::Execute => "execute",
            ExecutionPhase::AfterExecution => "afterExecution",
        };
        f.write_str(phase)
    }
}

/// 钩子异常的处置结果：恢复后继续，或者以错误终止本次执行
#[derive(Debug)]
pub enum OnExceptionOutcome {
    Recovered,
    Terminal(JobStoreError),
}

impl OnExceptionOutcome {
    pub fn has_recovered(&self) -> bool {
        matches!(self, OnExceptionOutcome::Recovered)
    }
}

/// 运行中作业写回存储的通道
#[async_trait]
pub trait JobLogger: Send + Sync {
    /// 追加一条日志行
    async fn add_logging_data(&self, line: &str) -> JobResult<()>;

    /// 写入或覆盖 additionalData
    async fn insert_or_update_additional_data(&self, key: &str, value: &str) -> JobResult<()>;

    /// 读取 additionalData 中的值
    async fn additional_data(&self, key: &str) -> JobResult<Option<String>>;
}

/// 单次作业执行的上下文，贯穿所有生命周期钩子
pub struct JobExecutionContext {
    id: i64,
    name: String,
    execution_priority: JobExecutionPriority,
    logger: Arc<dyn JobLogger>,
    repository: Arc<dyn JobInfoRepository>,
    result_code: Mutex<Option<ResultCode>>,
}

impl JobExecutionContext {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        execution_priority: JobExecutionPriority,
        logger: Arc<dyn JobLogger>,
        repository: Arc<dyn JobInfoRepository>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            execution_priority,
            logger,
            repository,
            result_code: Mutex::new(None),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execution_priority(&self) -> JobExecutionPriority {
        self.execution_priority
    }

    pub fn logger(&self) -> &Arc<dyn JobLogger> {
        &self.logger
    }

    pub fn repository(&self) -> &Arc<dyn JobInfoRepository> {
        &self.repository
    }

    /// runnable 可以覆盖默认的 SUCCESSFUL 结果码
    pub fn set_result_code(&self, code: ResultCode) {
        *self.result_code.lock().unwrap() = Some(code);
    }

    pub fn result_code(&self) -> Option<ResultCode> {
        *self.result_code.lock().unwrap()
    }

    /// 中止信号探针，可中止的 runnable 应在执行中周期性检查
    pub async fn is_abort_requested(&self) -> JobResult<bool> {
        Ok(self
            .repository
            .find_by_id(self.id)
            .await?
            .map(|job| job.abort_requested)
            .unwrap_or(false))
    }
}

/// 作业行为的进程内载体。
///
/// 调度器按 prepare → execute → afterExecution 的顺序驱动钩子，任一阶段
/// 的错误都交给 `on_exception` 裁决；默认裁决是原样终止。远程作业通过
/// `remote_status` 汇报远端状态。
#[async_trait]
pub trait JobRunnable: Send + Sync {
    fn definition(&self) -> &JobDefinition;

    /// 返回 `false` 表示前置条件不满足，记录以 NOT_EXECUTED 收尾
    async fn prepare(&self, _context: &JobExecutionContext) -> JobResult<bool> {
        Ok(true)
    }

    async fn execute(&self, context: &JobExecutionContext) -> JobResult<()>;

    async fn after_execution(&self, _context: &JobExecutionContext) -> JobResult<()> {
        Ok(())
    }

    fn on_exception(
        &self,
        _context: &JobExecutionContext,
        error: JobStoreError,
        _phase: ExecutionPhase,
    ) -> OnExceptionOutcome {
        OnExceptionOutcome::Terminal(error)
    }

    /// 远程作业的状态探询，本地作业保持默认实现
    async fn remote_status(
        &self,
        _context: &JobExecutionContext,
    ) -> JobResult<Option<RemoteJobStatus>> {
        Ok(None)
    }
}
