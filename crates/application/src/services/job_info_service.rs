use std::sync::Arc;

use chrono::{DateTime, Utc};

use jobstore_domain::{JobInfo, JobInfoRepository, ResultCode, RunningState};
use jobstore_errors::JobResult;

/// 作业记录的读取服务，供 API 层查询执行历史
pub struct JobInfoService {
    repository: Arc<dyn JobInfoRepository>,
}

impl JobInfoService {
    pub fn new(repository: Arc<dyn JobInfoRepository>) -> Self {
        Self { repository }
    }

    pub async fn get_by_id(&self, id: i64) -> JobResult<Option<JobInfo>> {
        self.repository.find_by_id(id).await
    }

    /// 最近的 `limit` 条记录
    pub async fn get_by_name(&self, name: &str, limit: i64) -> JobResult<Vec<JobInfo>> {
        self.repository.find_by_name(name, limit).await
    }

    pub async fn get_by_name_and_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> JobResult<Option<JobInfo>> {
        self.repository.find_by_name_and_state(name, state).await
    }

    pub async fn get_by_name_and_time_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        result_codes: Option<&[ResultCode]>,
    ) -> JobResult<Vec<JobInfo>> {
        self.repository
            .find_by_name_and_time_range(name, from, to, result_codes)
            .await
    }
}
