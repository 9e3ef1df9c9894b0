use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("作业 {name} 未在当前服务实例注册")]
    JobNotRegistered { name: String },
    #[error("作业 {name} 已在队列中等待执行")]
    JobAlreadyQueued { name: String },
    #[error("作业 {name} 已有运行中的实例")]
    JobAlreadyRunning { name: String },
    #[error("作业 {name} 无需执行")]
    JobExecutionNotNecessary { name: String },
    #[error("作业执行已被禁用{}", name.as_deref().map(|n| format!(": {n}")).unwrap_or_default())]
    JobExecutionDisabled { name: Option<String> },
    #[error("作业服务已停止，不再接受执行请求")]
    JobServiceNotActive,
    #[error("作业 {name} 不支持中止")]
    JobNotAbortable { name: String },
    #[error("作业记录未找到: {id}")]
    JobInfoNotFound { id: i64 },
    #[error("远程作业已在运行: {message}")]
    RemoteJobAlreadyRunning { message: String, job_uri: String },
    #[error("远程作业未在运行: {uri}")]
    RemoteJobNotRunning { uri: String },
    #[error("作业执行失败: {0}")]
    JobExecution(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("参数校验失败: {0}")]
    Validation(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl JobStoreError {
    /// 调度器准入失败属于预期内的业务结果，不作为系统故障上报
    pub fn is_admission_failure(&self) -> bool {
        matches!(
            self,
            JobStoreError::JobAlreadyQueued { .. }
                | JobStoreError::JobAlreadyRunning { .. }
                | JobStoreError::JobExecutionNotNecessary { .. }
                | JobStoreError::JobExecutionDisabled { .. }
        )
    }
}

pub type JobResult<T> = Result<T, JobStoreError>;
