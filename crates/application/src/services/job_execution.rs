use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use jobstore_common::ABORTED_KEY;
use jobstore_domain::{
    ExecutionPhase, JobExecutionContext, JobExecutionPriority, JobInfoRepository, JobLogger,
    JobRunnable, OnExceptionOutcome, ResultCode, RunningState,
};
use jobstore_errors::JobResult;

/// 本进程正在执行的作业任务句柄，按作业名索引。
/// 停机清扫和最大执行时长超时都通过它取消本地 worker
#[derive(Clone, Default)]
pub struct JobExecutionTracker {
    handles: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl JobExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, name: &str, handle: JoinHandle<()>) {
        self.handles.lock().unwrap().insert(name.to_string(), handle);
    }

    fn finish(&self, name: &str) {
        self.handles.lock().unwrap().remove(name);
    }

    /// 取消某个作业的本地任务，返回是否存在这样的任务
    pub fn abort(&self, name: &str) -> bool {
        match self.handles.lock().unwrap().remove(name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self, name: &str) -> bool {
        self.handles.lock().unwrap().contains_key(name)
    }
}

/// 运行中作业写回存储的默认通道：日志行追加、additionalData 覆盖写
pub struct SimpleJobLogger {
    job_name: String,
    repository: Arc<dyn JobInfoRepository>,
}

impl SimpleJobLogger {
    pub fn new(job_name: impl Into<String>, repository: Arc<dyn JobInfoRepository>) -> Self {
        Self {
            job_name: job_name.into(),
            repository,
        }
    }
}

#[async_trait]
impl JobLogger for SimpleJobLogger {
    async fn add_logging_data(&self, line: &str) -> JobResult<()> {
        self.repository.append_log_line(&self.job_name, line).await
    }

    async fn insert_or_update_additional_data(&self, key: &str, value: &str) -> JobResult<()> {
        self.repository
            .add_additional_data(&self.job_name, key, value)
            .await
    }

    async fn additional_data(&self, key: &str) -> JobResult<Option<String>> {
        Ok(self
            .repository
            .find_by_name_and_state(&self.job_name, RunningState::Running)
            .await?
            .and_then(|job| job.additional_data.get(key).map(str::to_owned)))
    }
}

/// 在独立任务中驱动一次作业执行
pub(crate) fn dispatch_job(
    runnable: Arc<dyn JobRunnable>,
    repository: Arc<dyn JobInfoRepository>,
    tracker: JobExecutionTracker,
    id: i64,
    priority: JobExecutionPriority,
) {
    let name = runnable.definition().name.clone();
    let logger = Arc::new(SimpleJobLogger::new(name.clone(), repository.clone()));
    let context = JobExecutionContext::new(id, name.clone(), priority, logger, repository.clone());

    let task_tracker = tracker.clone();
    let task_name = name.clone();
    let handle = tokio::spawn(async move {
        run_job(runnable, repository, context).await;
        task_tracker.finish(&task_name);
    });
    tracker.register(&name, handle);
}

enum Outcome {
    Completed,
    NotExecuted,
    Failed(String),
}

/// 完整的 worker 生命周期：prepare → execute → afterExecution。
///
/// 任一阶段的错误交给 `on_exception` 裁决。afterExecution 在成功、
/// execute 异常、prepare 异常的每条路径上都会被调用。远程作业启动成功后
/// 记录保持 RUNNING，终结迁移由远程监管环节完成。
async fn run_job(
    runnable: Arc<dyn JobRunnable>,
    repository: Arc<dyn JobInfoRepository>,
    context: JobExecutionContext,
) {
    let name = context.name().to_string();
    let remote = runnable.definition().remote;

    let prepared = match runnable.prepare(&context).await {
        Ok(prepared) => Ok(prepared),
        Err(e) => match runnable.on_exception(&context, e, ExecutionPhase::Prepare) {
            OnExceptionOutcome::Recovered => Ok(true),
            OnExceptionOutcome::Terminal(err) => Err(err),
        },
    };

    let mut outcome = match prepared {
        Ok(true) => match runnable.execute(&context).await {
            Ok(()) => Outcome::Completed,
            Err(e) => match runnable.on_exception(&context, e, ExecutionPhase::Execute) {
                OnExceptionOutcome::Recovered => Outcome::Completed,
                OnExceptionOutcome::Terminal(err) => Outcome::Failed(err.to_string()),
            },
        },
        Ok(false) => {
            info!("作业 {} 前置条件不满足，跳过执行", name);
            Outcome::NotExecuted
        }
        Err(err) => Outcome::Failed(err.to_string()),
    };

    if let Err(e) = runnable.after_execution(&context).await {
        if let OnExceptionOutcome::Terminal(err) =
            runnable.on_exception(&context, e, ExecutionPhase::AfterExecution)
        {
            warn!("作业 {} 的 afterExecution 失败: {}", name, err);
            if matches!(outcome, Outcome::Completed) {
                outcome = Outcome::Failed(err.to_string());
            }
        }
    }

    if remote && matches!(outcome, Outcome::Completed) {
        info!("远程作业 {} 已启动，等待远程监管收尾", name);
        return;
    }

    if let Err(e) = resolve_outcome(&repository, &context, &name, outcome).await {
        error!("作业 {} 的终结迁移失败: {}", name, e);
    }
}

async fn resolve_outcome(
    repository: &Arc<dyn JobInfoRepository>,
    context: &JobExecutionContext,
    name: &str,
    outcome: Outcome,
) -> JobResult<()> {
    match outcome {
        Outcome::Completed => {
            let aborted = repository
                .find_by_id(context.id())
                .await?
                .map(|job| job.abort_requested)
                .unwrap_or(false);
            if aborted {
                repository
                    .add_additional_data(name, ABORTED_KEY, "true")
                    .await?;
                repository
                    .mark_running_as_finished(name, ResultCode::Aborted, None)
                    .await?;
                info!("作业 {} 已按请求中止", name);
                return Ok(());
            }
            match context.result_code().unwrap_or(ResultCode::Successful) {
                ResultCode::Successful => {
                    repository.mark_running_as_finished_successfully(name).await?;
                }
                code => {
                    repository.mark_running_as_finished(name, code, None).await?;
                }
            }
        }
        Outcome::NotExecuted => {
            repository
                .mark_running_as_finished(name, ResultCode::NotExecuted, None)
                .await?;
        }
        Outcome::Failed(message) => {
            repository
                .mark_running_as_finished(name, ResultCode::Failed, Some(&message))
                .await?;
        }
    }
    Ok(())
}
