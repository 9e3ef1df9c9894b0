use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use jobstore_errors::JobStoreError;

use crate::value_objects::PropertyBag;

/// 作业记录的运行状态。FINISHED 是一个状态族，结果码单独存放
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunningState {
    Running,
    Queued,
    Finished,
}

impl RunningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunningState::Running => "RUNNING",
            RunningState::Queued => "QUEUED",
            RunningState::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for RunningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunningState {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunningState::Running),
            "QUEUED" => Ok(RunningState::Queued),
            "FINISHED" => Ok(RunningState::Finished),
            other => Err(JobStoreError::Validation(format!(
                "未知的运行状态: {other}"
            ))),
        }
    }
}

/// 结果码，仅在 FINISHED 状态下出现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Successful,
    Failed,
    NotExecuted,
    TimedOut,
    Aborted,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Successful => "SUCCESSFUL",
            ResultCode::Failed => "FAILED",
            ResultCode::NotExecuted => "NOT_EXECUTED",
            ResultCode::TimedOut => "TIMED_OUT",
            ResultCode::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultCode {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESSFUL" => Ok(ResultCode::Successful),
            "FAILED" => Ok(ResultCode::Failed),
            "NOT_EXECUTED" => Ok(ResultCode::NotExecuted),
            "TIMED_OUT" => Ok(ResultCode::TimedOut),
            "ABORTED" => Ok(ResultCode::Aborted),
            other => Err(JobStoreError::Validation(format!("未知的结果码: {other}"))),
        }
    }
}

/// 执行优先级。FORCE_EXECUTION 可绕过前置条件类拒绝，并能挤掉低优先级的排队记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobExecutionPriority {
    CheckPreconditions,
    ForceExecution,
}

impl JobExecutionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobExecutionPriority::CheckPreconditions => "CHECK_PRECONDITIONS",
            JobExecutionPriority::ForceExecution => "FORCE_EXECUTION",
        }
    }

    pub fn is_lower_than(&self, other: JobExecutionPriority) -> bool {
        *self < other
    }

    pub fn is_equal_or_higher_than(&self, other: JobExecutionPriority) -> bool {
        *self >= other
    }
}

impl fmt::Display for JobExecutionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobExecutionPriority {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECK_PRECONDITIONS" => Ok(JobExecutionPriority::CheckPreconditions),
            "FORCE_EXECUTION" => Ok(JobExecutionPriority::ForceExecution),
            other => Err(JobStoreError::Validation(format!("未知的优先级: {other}"))),
        }
    }
}

/// 带时间戳的日志行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

impl LogLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            line: line.into(),
        }
    }
}

/// 一次作业执行的持久化记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: i64,
    pub name: String,
    /// 负责该记录的进程主机名，QUEUED 激活为 RUNNING 时会被重写
    pub host: String,
    pub thread: String,
    pub running_state: RunningState,
    pub execution_priority: JobExecutionPriority,
    pub result_code: Option<ResultCode>,
    pub result_message: Option<String>,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_modified_at: DateTime<Utc>,
    pub max_execution_ms: i64,
    pub max_idle_ms: i64,
    pub parameters: PropertyBag,
    pub additional_data: PropertyBag,
    pub log_lines: Vec<LogLine>,
    pub abort_requested: bool,
}

impl JobInfo {
    pub fn is_running(&self) -> bool {
        self.running_state == RunningState::Running
    }

    pub fn is_queued(&self) -> bool {
        self.running_state == RunningState::Queued
    }

    pub fn is_finished(&self) -> bool {
        self.running_state == RunningState::Finished
    }

    /// 自启动以来超过了最大执行时长
    pub fn is_execution_timed_out(&self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started) if self.is_running() => {
                now - started > Duration::milliseconds(self.max_execution_ms)
            }
            _ => false,
        }
    }

    /// 距最后一次写入超过了最大空闲时长
    pub fn is_idle_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.is_running() && now - self.last_modified_at > Duration::milliseconds(self.max_idle_ms)
    }

    pub fn remote_job_uri(&self) -> Option<&str> {
        self.additional_data.get(jobstore_common::REMOTE_JOB_URI_KEY)
    }

    /// 执行耗时（毫秒）
    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
            _ => None,
        }
    }
}

/// 注册作业时由 runnable 提供的静态元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub max_execution_ms: i64,
    pub max_idle_ms: i64,
    /// 远程作业两次状态轮询之间的最小间隔
    pub polling_interval_ms: i64,
    pub remote: bool,
    pub abortable: bool,
}

impl JobDefinition {
    /// 本地作业定义
    pub fn local(name: impl Into<String>, max_execution_ms: i64, max_idle_ms: i64) -> Self {
        Self {
            name: name.into(),
            max_execution_ms,
            max_idle_ms,
            polling_interval_ms: 0,
            remote: false,
            abortable: false,
        }
    }

    /// 远程作业定义
    pub fn remote(
        name: impl Into<String>,
        max_execution_ms: i64,
        max_idle_ms: i64,
        polling_interval_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            max_execution_ms,
            max_idle_ms,
            polling_interval_ms,
            remote: true,
            abortable: false,
        }
    }

    pub fn abortable(mut self) -> Self {
        self.abortable = true;
        self
    }
}

/// 按名称持久化的作业定义，disabled 与 last_not_executed_at 为动态字段，
/// 重新注册不会覆盖
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredJobDefinition {
    pub name: String,
    pub disabled: bool,
    pub last_not_executed_at: Option<DateTime<Utc>>,
    pub max_execution_ms: i64,
    pub max_idle_ms: i64,
    pub polling_interval_ms: i64,
    pub remote: bool,
    pub abortable: bool,
}

impl From<&JobDefinition> for StoredJobDefinition {
    fn from(definition: &JobDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            disabled: false,
            last_not_executed_at: None,
            max_execution_ms: definition.max_execution_ms,
            max_idle_ms: definition.max_idle_ms,
            polling_interval_ms: definition.polling_interval_ms,
            remote: definition.remote,
            abortable: definition.abortable,
        }
    }
}

/// 新纪录的插入参数，host/thread 由仓储在插入时打上
#[derive(Debug, Clone)]
pub struct NewJobInfo {
    pub name: String,
    pub max_execution_ms: i64,
    pub max_idle_ms: i64,
    pub running_state: RunningState,
    pub execution_priority: JobExecutionPriority,
    pub parameters: PropertyBag,
    pub additional_data: PropertyBag,
}

impl NewJobInfo {
    pub fn new(
        definition: &JobDefinition,
        running_state: RunningState,
        execution_priority: JobExecutionPriority,
        parameters: PropertyBag,
    ) -> Self {
        Self {
            name: definition.name.clone(),
            max_execution_ms: definition.max_execution_ms,
            max_idle_ms: definition.max_idle_ms,
            running_state,
            execution_priority,
            parameters,
            additional_data: PropertyBag::new(),
        }
    }
}

/// 提交给远程执行器的作业描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJob {
    pub name: String,
    pub id: i64,
    pub parameters: PropertyBag,
}

/// 远程执行器汇报的作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteJobState {
    Running,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobResult {
    pub ok: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    pub status: RemoteJobState,
    #[serde(default, rename = "log_lines")]
    pub log_lines: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<RemoteJobResult>,
    #[serde(default, rename = "finish_time")]
    pub finish_time: Option<String>,
}
