use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobstore_errors::JobResult;

use crate::entities::{
    JobInfo, LogLine, NewJobInfo, ResultCode, RunningState, StoredJobDefinition,
};

/// 作业记录仓储。
///
/// 这是跨进程互斥的唯一同步点：`create_unique` 与 `activate_queued_job`
/// 依赖 (name, running_state) 在非完成状态上的唯一索引，竞争失败以
/// `None` / `false` 返回而不是错误。除查询外的每个操作都会刷新
/// `last_modified_at`。
#[async_trait]
pub trait JobInfoRepository: Send + Sync {
    /// 条件插入：仅当该名称在目标状态下不存在记录时插入，返回新记录 id。
    /// 唯一索引拒绝时返回 `None`
    async fn create_unique(&self, new_job: &NewJobInfo) -> JobResult<Option<i64>>;

    async fn find_by_id(&self, id: i64) -> JobResult<Option<JobInfo>>;

    async fn find_by_name_and_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> JobResult<Option<JobInfo>>;

    /// 最近的记录排前
    async fn find_by_name(&self, name: &str, limit: i64) -> JobResult<Vec<JobInfo>>;

    async fn find_by_name_and_time_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        result_codes: Option<&[ResultCode]>,
    ) -> JobResult<Vec<JobInfo>>;

    /// 排队记录按创建时间升序
    async fn find_queued_sorted_asc_by_creation(&self) -> JobResult<Vec<JobInfo>>;

    async fn find_by_state(&self, state: RunningState) -> JobResult<Vec<JobInfo>>;

    async fn has_job(&self, name: &str, state: RunningState) -> JobResult<bool>;

    async fn remove(&self, id: i64) -> JobResult<()>;

    /// 将该名称唯一的 QUEUED 记录置为 FINISHED:NOT_EXECUTED，返回是否存在排队记录
    async fn mark_queued_as_not_executed(&self, name: &str) -> JobResult<bool>;

    /// 原子地把 QUEUED 记录翻转为 RUNNING 并写入 started_at；
    /// 记录已不在队列或已有 RUNNING 记录时返回 `false`
    async fn activate_queued_job(&self, name: &str) -> JobResult<bool>;

    /// RUNNING 记录的终结迁移，返回是否存在运行中的记录
    async fn mark_running_as_finished(
        &self,
        name: &str,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> JobResult<bool>;

    async fn mark_running_as_finished_successfully(&self, name: &str) -> JobResult<bool>;

    /// 把当前进程的 host/thread 打到 RUNNING 记录上
    async fn update_host_thread(&self, name: &str) -> JobResult<()>;

    async fn set_status_message(&self, name: &str, message: &str) -> JobResult<()>;

    async fn append_log_line(&self, name: &str, line: &str) -> JobResult<()>;

    async fn append_log_lines(&self, name: &str, lines: &[String]) -> JobResult<()>;

    /// 整体替换 RUNNING 记录的日志行
    async fn set_log_lines(&self, name: &str, lines: Vec<LogLine>) -> JobResult<()>;

    /// 键不存在时写入 additionalData，已存在则保持旧值
    async fn insert_additional_data(&self, name: &str, key: &str, value: &str) -> JobResult<()>;

    /// 写入或覆盖 additionalData
    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> JobResult<()>;

    /// 请求中止，返回记录是否存在
    async fn set_abort_requested(&self, id: i64, abort: bool) -> JobResult<bool>;

    /// 清理在给定时刻之前完成的记录，返回删除数量
    async fn clean_up_finished(&self, finished_before: DateTime<Utc>) -> JobResult<u64>;
}

/// 按名称持久化的作业定义仓储
#[async_trait]
pub trait JobDefinitionRepository: Send + Sync {
    async fn find(&self, name: &str) -> JobResult<Option<StoredJobDefinition>>;

    /// 按名称插入或更新非动态字段，disabled 与 last_not_executed_at 保持不变
    async fn add_or_update(&self, definition: &StoredJobDefinition) -> JobResult<()>;

    async fn set_job_execution_enabled(&self, name: &str, enabled: bool) -> JobResult<()>;

    async fn set_last_not_executed(&self, name: &str, at: DateTime<Utc>) -> JobResult<()>;
}
