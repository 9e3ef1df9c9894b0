use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

use jobstore_common::{host, DEFAULT_MAX_LOG_LINES};
use jobstore_domain::{
    JobInfo, JobInfoRepository, LogLine, NewJobInfo, PropertyBag, ResultCode, RunningState,
};
use jobstore_errors::JobResult;

/// job_infos 的查询列。JSON 列以文本取出，按原文解析以保留键序
const JOB_INFO_COLUMNS: &str = "id, name, host, thread, running_state, execution_priority, \
     result_code, result_message, status_message, created_at, started_at, finished_at, \
     last_modified_at, max_execution_ms, max_idle_ms, parameters::TEXT AS parameters, \
     additional_data::TEXT AS additional_data, log_lines::TEXT AS log_lines, abort_requested";

/// 基于 Postgres 的作业记录仓储。
///
/// 跨进程互斥全部落在 (name, running_state) 的部分唯一索引上：插入竞争
/// 通过 ON CONFLICT DO NOTHING 落空，激活竞争通过条件 UPDATE 落空，
/// 二者都以普通返回值暴露给调度器。
pub struct PostgresJobInfoRepository {
    pool: PgPool,
    max_log_lines: usize,
}

impl PostgresJobInfoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_log_lines: DEFAULT_MAX_LOG_LINES,
        }
    }

    /// 调整单条记录保留的日志行数上限
    pub fn with_max_log_lines(mut self, max_log_lines: usize) -> Self {
        self.max_log_lines = max_log_lines;
        self
    }

    fn row_to_job_info(row: &sqlx::postgres::PgRow) -> JobResult<JobInfo> {
        let running_state: String = row.try_get("running_state")?;
        let execution_priority: String = row.try_get("execution_priority")?;
        let result_code: Option<String> = row.try_get("result_code")?;
        let parameters: String = row.try_get("parameters")?;
        let additional_data: String = row.try_get("additional_data")?;
        let log_lines: String = row.try_get("log_lines")?;

        Ok(JobInfo {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            host: row.try_get("host")?,
            thread: row.try_get("thread")?,
            running_state: running_state.parse()?,
            execution_priority: execution_priority.parse()?,
            result_code: result_code.as_deref().map(str::parse).transpose()?,
            result_message: row.try_get("result_message")?,
            status_message: row.try_get("status_message")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            last_modified_at: row.try_get("last_modified_at")?,
            max_execution_ms: row.try_get("max_execution_ms")?,
            max_idle_ms: row.try_get("max_idle_ms")?,
            parameters: serde_json::from_str(&parameters)?,
            additional_data: serde_json::from_str(&additional_data)?,
            log_lines: serde_json::from_str(&log_lines)?,
            abort_requested: row.try_get("abort_requested")?,
        })
    }

    fn cap_log_lines(&self, lines: &mut Vec<LogLine>) {
        if lines.len() > self.max_log_lines {
            let overflow = lines.len() - self.max_log_lines;
            lines.drain(..overflow);
        }
    }

    /// 在行锁保护下改写 RUNNING 记录的日志行。没有运行中的记录时静默返回
    async fn mutate_log_lines<F>(&self, name: &str, mutate: F) -> JobResult<()>
    where
        F: FnOnce(&mut Vec<LogLine>),
    {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT log_lines::TEXT AS log_lines FROM job_infos \
             WHERE name = $1 AND running_state = 'RUNNING' FOR UPDATE",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            debug!("作业 {} 没有运行中的记录，忽略日志写入", name);
            return Ok(());
        };

        let raw: String = row.try_get("log_lines")?;
        let mut lines: Vec<LogLine> = serde_json::from_str(&raw)?;
        mutate(&mut lines);
        self.cap_log_lines(&mut lines);

        sqlx::query(
            "UPDATE job_infos SET log_lines = $2::JSON, last_modified_at = $3 \
             WHERE name = $1 AND running_state = 'RUNNING'",
        )
        .bind(name)
        .bind(serde_json::to_string(&lines)?)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// 在行锁保护下改写 RUNNING 记录的 additionalData
    async fn mutate_additional_data<F>(&self, name: &str, mutate: F) -> JobResult<()>
    where
        F: FnOnce(&mut PropertyBag),
    {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT additional_data::TEXT AS additional_data FROM job_infos \
             WHERE name = $1 AND running_state = 'RUNNING' FOR UPDATE",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            debug!("作业 {} 没有运行中的记录，忽略 additionalData 写入", name);
            return Ok(());
        };

        let raw: String = row.try_get("additional_data")?;
        let mut data: PropertyBag = serde_json::from_str(&raw)?;
        mutate(&mut data);

        sqlx::query(
            "UPDATE job_infos SET additional_data = $2::JSON, last_modified_at = $3 \
             WHERE name = $1 AND running_state = 'RUNNING'",
        )
        .bind(name)
        .bind(serde_json::to_string(&data)?)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl JobInfoRepository for PostgresJobInfoRepository {
    #[instrument(skip(self, new_job), fields(
        name = %new_job.name,
        state = %new_job.running_state,
        priority = %new_job.execution_priority,
    ))]
    async fn create_unique(&self, new_job: &NewJobInfo) -> JobResult<Option<i64>> {
        let now = Utc::now();
        let started_at = match new_job.running_state {
            RunningState::Running => Some(now),
            _ => None,
        };

        let row = sqlx::query(
            r#"
            INSERT INTO job_infos (
                name, host, thread, running_state, execution_priority,
                created_at, started_at, last_modified_at,
                max_execution_ms, max_idle_ms, parameters, additional_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $6, $8, $9, $10::JSON, $11::JSON)
            ON CONFLICT (name, running_state)
                WHERE running_state IN ('RUNNING', 'QUEUED')
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&new_job.name)
        .bind(host::host_name())
        .bind(host::thread_label())
        .bind(new_job.running_state.as_str())
        .bind(new_job.execution_priority.as_str())
        .bind(now)
        .bind(started_at)
        .bind(new_job.max_execution_ms)
        .bind(new_job.max_idle_ms)
        .bind(serde_json::to_string(&new_job.parameters)?)
        .bind(serde_json::to_string(&new_job.additional_data)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                debug!("插入作业记录成功: {} (id={})", new_job.name, id);
                Ok(Some(id))
            }
            None => {
                debug!(
                    "插入作业记录被唯一索引拒绝: {} ({})",
                    new_job.name, new_job.running_state
                );
                Ok(None)
            }
        }
    }

    async fn find_by_id(&self, id: i64) -> JobResult<Option<JobInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job_info).transpose()
    }

    async fn find_by_name_and_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> JobResult<Option<JobInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
             WHERE name = $1 AND running_state = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(name)
        .bind(state.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job_info).transpose()
    }

    async fn find_by_name(&self, name: &str, limit: i64) -> JobResult<Vec<JobInfo>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
             WHERE name = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job_info).collect()
    }

    async fn find_by_name_and_time_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        result_codes: Option<&[ResultCode]>,
    ) -> JobResult<Vec<JobInfo>> {
        let rows = match result_codes {
            Some(codes) if !codes.is_empty() => {
                let codes: Vec<String> = codes.iter().map(|c| c.as_str().to_string()).collect();
                sqlx::query(&format!(
                    "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
                     WHERE name = $1 AND created_at >= $2 AND created_at <= $3 \
                       AND result_code = ANY($4) \
                     ORDER BY created_at DESC"
                ))
                .bind(name)
                .bind(from)
                .bind(to)
                .bind(&codes)
                .fetch_all(&self.pool)
                .await?
            }
            _ => {
                sqlx::query(&format!(
                    "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
                     WHERE name = $1 AND created_at >= $2 AND created_at <= $3 \
                     ORDER BY created_at DESC"
                ))
                .bind(name)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_job_info).collect()
    }

    async fn find_queued_sorted_asc_by_creation(&self) -> JobResult<Vec<JobInfo>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
             WHERE running_state = 'QUEUED' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job_info).collect()
    }

    async fn find_by_state(&self, state: RunningState) -> JobResult<Vec<JobInfo>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
             WHERE running_state = $1 ORDER BY created_at ASC"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job_info).collect()
    }

    async fn has_job(&self, name: &str, state: RunningState) -> JobResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM job_infos WHERE name = $1 AND running_state = $2) AS found",
        )
        .bind(name)
        .bind(state.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("found")?)
    }

    async fn remove(&self, id: i64) -> JobResult<()> {
        sqlx::query("DELETE FROM job_infos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_queued_as_not_executed(&self, name: &str) -> JobResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE job_infos \
             SET running_state = 'FINISHED', result_code = 'NOT_EXECUTED', \
                 finished_at = $2, last_modified_at = $2 \
             WHERE name = $1 AND running_state = 'QUEUED'",
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn activate_queued_job(&self, name: &str) -> JobResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE job_infos \
             SET running_state = 'RUNNING', started_at = $2, last_modified_at = $2 \
             WHERE name = $1 AND running_state = 'QUEUED'",
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            // 同名 RUNNING 记录在激活瞬间出现，竞争失败不是错误
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                warn!("激活排队作业 {} 时已有运行中的记录", name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, message))]
    async fn mark_running_as_finished(
        &self,
        name: &str,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> JobResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE job_infos \
             SET running_state = 'FINISHED', result_code = $2, result_message = $3, \
                 finished_at = $4, last_modified_at = $4 \
             WHERE name = $1 AND running_state = 'RUNNING'",
        )
        .bind(name)
        .bind(result_code.as_str())
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_running_as_finished_successfully(&self, name: &str) -> JobResult<bool> {
        self.mark_running_as_finished(name, ResultCode::Successful, None)
            .await
    }

    async fn update_host_thread(&self, name: &str) -> JobResult<()> {
        sqlx::query(
            "UPDATE job_infos SET host = $2, thread = $3, last_modified_at = $4 \
             WHERE name = $1 AND running_state = 'RUNNING'",
        )
        .bind(name)
        .bind(host::host_name())
        .bind(host::thread_label())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status_message(&self, name: &str, message: &str) -> JobResult<()> {
        sqlx::query(
            "UPDATE job_infos SET status_message = $2, last_modified_at = $3 \
             WHERE name = $1 AND running_state = 'RUNNING'",
        )
        .bind(name)
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_log_line(&self, name: &str, line: &str) -> JobResult<()> {
        let line = line.to_string();
        self.mutate_log_lines(name, move |lines| lines.push(LogLine::new(line)))
            .await
    }

    async fn append_log_lines(&self, name: &str, new_lines: &[String]) -> JobResult<()> {
        if new_lines.is_empty() {
            return Ok(());
        }
        let new_lines = new_lines.to_vec();
        self.mutate_log_lines(name, move |lines| {
            lines.extend(new_lines.into_iter().map(LogLine::new));
        })
        .await
    }

    async fn set_log_lines(&self, name: &str, replacement: Vec<LogLine>) -> JobResult<()> {
        self.mutate_log_lines(name, move |lines| *lines = replacement)
            .await
    }

    async fn insert_additional_data(&self, name: &str, key: &str, value: &str) -> JobResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.mutate_additional_data(name, move |data| {
            data.insert(key, value);
        })
        .await
    }

    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> JobResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.mutate_additional_data(name, move |data| {
            data.put(key, value);
        })
        .await
    }

    async fn set_abort_requested(&self, id: i64, abort: bool) -> JobResult<bool> {
        let result = sqlx::query(
            "UPDATE job_infos SET abort_requested = $2, last_modified_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(abort)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn clean_up_finished(&self, finished_before: DateTime<Utc>) -> JobResult<u64> {
        let result = sqlx::query(
            "DELETE FROM job_infos WHERE running_state = 'FINISHED' AND finished_at < $1",
        )
        .bind(finished_before)
        .execute(&self.pool)
        .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!("清理过期作业记录 {} 条", deleted);
        }
        Ok(deleted)
    }
}
