use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jobstore_common::{REMOTE_JOB_URI_KEY, RESUMED_ALREADY_RUNNING_JOB_KEY};
use jobstore_domain::{
    JobDefinition, JobExecutionContext, JobInfoRepository, JobRunnable, RemoteJob,
    RemoteJobExecutor, RemoteJobStatus,
};
use jobstore_errors::{JobResult, JobStoreError};

/// 远程作业的通用 runnable。
///
/// `execute` 只负责触发远端执行并把返回的作业 URI 写入
/// additionalData；之后记录保持 RUNNING，由调度服务的远程轮询环节
/// 推进状态。远端报告同名作业已在运行时复用其 URI 并留下审计记录。
pub struct RemoteJobRunnable {
    definition: JobDefinition,
    executor: Arc<dyn RemoteJobExecutor>,
    repository: Arc<dyn JobInfoRepository>,
}

impl RemoteJobRunnable {
    /// `definition.remote` 会被强制置位
    pub fn new(
        definition: JobDefinition,
        executor: Arc<dyn RemoteJobExecutor>,
        repository: Arc<dyn JobInfoRepository>,
    ) -> Self {
        let mut definition = definition;
        definition.remote = true;
        Self {
            definition,
            executor,
            repository,
        }
    }

    /// 通过远端的 stop 接口取消作业。远端回答“未在运行”视为已停止
    pub async fn stop(&self, context: &JobExecutionContext) -> JobResult<()> {
        let Some(job_uri) = context.logger().additional_data(REMOTE_JOB_URI_KEY).await? else {
            return Ok(());
        };
        match self.executor.stop_job(&job_uri).await {
            Ok(()) => Ok(()),
            Err(JobStoreError::RemoteJobNotRunning { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl JobRunnable for RemoteJobRunnable {
    fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    async fn execute(&self, context: &JobExecutionContext) -> JobResult<()> {
        let job_info = self
            .repository
            .find_by_id(context.id())
            .await?
            .ok_or(JobStoreError::JobInfoNotFound { id: context.id() })?;
        let remote_job = RemoteJob {
            name: self.definition.name.clone(),
            id: context.id(),
            parameters: job_info.parameters,
        };

        info!(
            "触发远程作业 {} (id={}) ...",
            self.definition.name,
            context.id()
        );
        match self.executor.start_job(&remote_job).await {
            Ok(job_uri) => {
                context
                    .logger()
                    .insert_or_update_additional_data(REMOTE_JOB_URI_KEY, &job_uri)
                    .await?;
                Ok(())
            }
            Err(JobStoreError::RemoteJobAlreadyRunning { message, job_uri }) => {
                info!(
                    "远程作业 {} (id={}) 已在运行，复用 {}: {}",
                    self.definition.name,
                    context.id(),
                    job_uri,
                    message
                );
                context
                    .logger()
                    .insert_or_update_additional_data(RESUMED_ALREADY_RUNNING_JOB_KEY, &job_uri)
                    .await?;
                context
                    .logger()
                    .insert_or_update_additional_data(REMOTE_JOB_URI_KEY, &job_uri)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remote_status(
        &self,
        context: &JobExecutionContext,
    ) -> JobResult<Option<RemoteJobStatus>> {
        let Some(job_uri) = context.logger().additional_data(REMOTE_JOB_URI_KEY).await? else {
            return Ok(None);
        };
        let mut status = self.executor.status(&job_uri).await?;

        // 已持久化的行视为远端返回列表的前缀，按行数截断，不比较内容
        if let Some(job_info) = self.repository.find_by_id(context.id()).await? {
            let current = job_info.log_lines.len();
            if current > 0 && current <= status.log_lines.len() {
                status.log_lines.drain(..current);
            }
        }
        Ok(Some(status))
    }
}
