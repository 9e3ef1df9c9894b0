use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use jobstore_domain::{JobDefinitionRepository, StoredJobDefinition};
use jobstore_errors::JobResult;

/// 基于 Postgres 的作业定义仓储，按名称 upsert
pub struct PostgresJobDefinitionRepository {
    pool: PgPool,
}

impl PostgresJobDefinitionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_definition(row: &sqlx::postgres::PgRow) -> JobResult<StoredJobDefinition> {
        Ok(StoredJobDefinition {
            name: row.try_get("name")?,
            disabled: row.try_get("disabled")?,
            last_not_executed_at: row.try_get("last_not_executed_at")?,
            max_execution_ms: row.try_get("max_execution_ms")?,
            max_idle_ms: row.try_get("max_idle_ms")?,
            polling_interval_ms: row.try_get("polling_interval_ms")?,
            remote: row.try_get("remote")?,
            abortable: row.try_get("abortable")?,
        })
    }
}

#[async_trait]
impl JobDefinitionRepository for PostgresJobDefinitionRepository {
    async fn find(&self, name: &str) -> JobResult<Option<StoredJobDefinition>> {
        let row = sqlx::query(
            "SELECT name, disabled, last_not_executed_at, max_execution_ms, max_idle_ms, \
                    polling_interval_ms, remote, abortable \
             FROM job_definitions WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_definition).transpose()
    }

    #[instrument(skip(self, definition), fields(name = %definition.name))]
    async fn add_or_update(&self, definition: &StoredJobDefinition) -> JobResult<()> {
        // 动态字段 disabled / last_not_executed_at 在冲突时保持原值
        sqlx::query(
            r#"
            INSERT INTO job_definitions (
                name, disabled, last_not_executed_at,
                max_execution_ms, max_idle_ms, polling_interval_ms, remote, abortable
            )
            VALUES ($1, FALSE, NULL, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE SET
                max_execution_ms = EXCLUDED.max_execution_ms,
                max_idle_ms = EXCLUDED.max_idle_ms,
                polling_interval_ms = EXCLUDED.polling_interval_ms,
                remote = EXCLUDED.remote,
                abortable = EXCLUDED.abortable
            "#,
        )
        .bind(&definition.name)
        .bind(definition.max_execution_ms)
        .bind(definition.max_idle_ms)
        .bind(definition.polling_interval_ms)
        .bind(definition.remote)
        .bind(definition.abortable)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_execution_enabled(&self, name: &str, enabled: bool) -> JobResult<()> {
        sqlx::query("UPDATE job_definitions SET disabled = $2 WHERE name = $1")
            .bind(name)
            .bind(!enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_last_not_executed(&self, name: &str, at: DateTime<Utc>) -> JobResult<()> {
        sqlx::query("UPDATE job_definitions SET last_not_executed_at = $2 WHERE name = $1")
            .bind(name)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
