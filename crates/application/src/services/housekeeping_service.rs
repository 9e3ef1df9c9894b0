use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use jobstore_domain::{JobInfoRepository, ResultCode, RunningState};
use jobstore_errors::JobResult;

use super::job_execution::JobExecutionTracker;

/// 周期性清扫：执行超时、空闲超时与过期记录清理。
///
/// 超时的本地作业会先取消其 worker 任务；远程作业仅靠存储记录判定，
/// 远端真正的停止由嵌入方通过 runnable 的 stop 完成。
pub struct HousekeepingService {
    job_info_repository: Arc<dyn JobInfoRepository>,
    tracker: JobExecutionTracker,
    retention: Duration,
}

impl HousekeepingService {
    pub fn new(
        job_info_repository: Arc<dyn JobInfoRepository>,
        tracker: JobExecutionTracker,
        retention_days: i64,
    ) -> Self {
        Self::with_retention(job_info_repository, tracker, Duration::days(retention_days))
    }

    pub fn with_retention(
        job_info_repository: Arc<dyn JobInfoRepository>,
        tracker: JobExecutionTracker,
        retention: Duration,
    ) -> Self {
        Self {
            job_info_repository,
            tracker,
            retention,
        }
    }

    pub async fn run_once(&self) -> JobResult<()> {
        self.timeout_jobs().await?;
        self.prune_finished_jobs().await?;
        Ok(())
    }

    async fn timeout_jobs(&self) -> JobResult<()> {
        let now = Utc::now();
        for job in self
            .job_info_repository
            .find_by_state(RunningState::Running)
            .await?
        {
            if job.is_execution_timed_out(now) {
                warn!(
                    "作业 {} 超过最大执行时长 {}ms，标记超时",
                    job.name, job.max_execution_ms
                );
                self.tracker.abort(&job.name);
                self.job_info_repository
                    .mark_running_as_finished(
                        &job.name,
                        ResultCode::TimedOut,
                        Some("maximum execution time exceeded"),
                    )
                    .await?;
            } else if job.is_idle_timed_out(now) {
                warn!(
                    "作业 {} 超过最大空闲时长 {}ms，标记超时",
                    job.name, job.max_idle_ms
                );
                self.job_info_repository
                    .mark_running_as_finished(
                        &job.name,
                        ResultCode::TimedOut,
                        Some("maximum idle time exceeded"),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn prune_finished_jobs(&self) -> JobResult<()> {
        let cutoff = Utc::now() - self.retention;
        let removed = self.job_info_repository.clean_up_finished(cutoff).await?;
        if removed > 0 {
            info!("清理过期作业记录 {} 条", removed);
        }
        Ok(())
    }
}
