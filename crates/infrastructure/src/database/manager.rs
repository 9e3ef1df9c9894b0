use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use jobstore_config::DatabaseConfig;
use jobstore_errors::JobResult;

/// 数据库连接池与表结构管理
pub struct DatabaseManager;

impl DatabaseManager {
    /// 按配置创建连接池。synchronous_commit 为写确认级别的开关：
    /// 关闭后提交不等待 WAL 刷盘
    pub async fn create_pool(config: &DatabaseConfig) -> JobResult<PgPool> {
        let synchronous_commit = if config.synchronous_commit { "on" } else { "off" };
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET synchronous_commit TO {synchronous_commit}").as_str())
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;
        Ok(pool)
    }

    /// 初始化表结构与索引。
    ///
    /// (name, running_state) 上限定于非完成状态的部分唯一索引是整个系统
    /// 跨进程互斥的根基：同名作业最多一条 RUNNING、一条 QUEUED
    pub async fn init_schema(pool: &PgPool) -> JobResult<()> {
        info!("初始化 jobstore 表结构");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_infos (
                id                  BIGSERIAL PRIMARY KEY,
                name                TEXT NOT NULL,
                host                TEXT NOT NULL,
                thread              TEXT NOT NULL,
                running_state       TEXT NOT NULL,
                execution_priority  TEXT NOT NULL,
                result_code         TEXT,
                result_message      TEXT,
                status_message      TEXT,
                created_at          TIMESTAMPTZ NOT NULL,
                started_at          TIMESTAMPTZ,
                finished_at         TIMESTAMPTZ,
                last_modified_at    TIMESTAMPTZ NOT NULL,
                max_execution_ms    BIGINT NOT NULL,
                max_idle_ms         BIGINT NOT NULL,
                parameters          JSON NOT NULL DEFAULT '{}',
                additional_data     JSON NOT NULL DEFAULT '{}',
                log_lines           JSON NOT NULL DEFAULT '[]',
                abort_requested     BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uq_job_infos_name_running_state
                ON job_infos (name, running_state)
                WHERE running_state IN ('RUNNING', 'QUEUED')
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_job_infos_name_created_at
                ON job_infos (name, created_at DESC)
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_definitions (
                name                 TEXT PRIMARY KEY,
                disabled             BOOLEAN NOT NULL DEFAULT FALSE,
                last_not_executed_at TIMESTAMPTZ,
                max_execution_ms     BIGINT NOT NULL,
                max_idle_ms          BIGINT NOT NULL,
                polling_interval_ms  BIGINT NOT NULL,
                remote               BOOLEAN NOT NULL,
                abortable            BOOLEAN NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        info!("jobstore 表结构初始化完成");
        Ok(())
    }
}
