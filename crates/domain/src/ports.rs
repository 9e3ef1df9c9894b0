use async_trait::async_trait;

use jobstore_errors::JobResult;

use crate::entities::{RemoteJob, RemoteJobStatus};

/// 远程执行器客户端端口。
///
/// `start_job` 成功返回远程作业 URI；远端已有同名作业运行时以
/// `JobStoreError::RemoteJobAlreadyRunning` 携带既有 URI 返回，调用方
/// 据此复用该作业。
#[async_trait]
pub trait RemoteJobExecutor: Send + Sync {
    /// 执行器的基础 URI
    fn executor_uri(&self) -> &str;

    async fn start_job(&self, job: &RemoteJob) -> JobResult<String>;

    async fn status(&self, job_uri: &str) -> JobResult<RemoteJobStatus>;

    /// 远端返回 403 映射为 `RemoteJobNotRunning`
    async fn stop_job(&self, job_uri: &str) -> JobResult<()>;

    async fn is_alive(&self) -> bool;
}

/// 提供随启动请求上送的脚本 tar.gz 归档。打包本身由嵌入方实现
pub trait ScriptArchiveProvider: Send + Sync {
    fn archive(&self, job: &RemoteJob) -> JobResult<Vec<u8>>;
}

/// 没有脚本需要传输时使用的空归档
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyScriptArchive;

impl ScriptArchiveProvider for EmptyScriptArchive {
    fn archive(&self, _job: &RemoteJob) -> JobResult<Vec<u8>> {
        Ok(Vec::new())
    }
}
