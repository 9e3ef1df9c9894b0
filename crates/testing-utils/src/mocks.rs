//! Mock implementations of the repository and remote-executor ports.
//!
//! `MockJobInfoRepository` mirrors the Postgres semantics including the
//! partial uniqueness rule on (name, running_state) for non-finished
//! states, so scheduler behavior under insert races can be tested without
//! a database.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobstore_common::{host, DEFAULT_MAX_LOG_LINES};
use jobstore_domain::{
    JobDefinitionRepository, JobInfo, JobInfoRepository, LogLine, NewJobInfo, PropertyBag,
    RemoteJob, RemoteJobExecutor, RemoteJobStatus, ResultCode, RunningState, StoredJobDefinition,
};
use jobstore_errors::{JobResult, JobStoreError};

/// In-memory implementation of `JobInfoRepository`
#[derive(Clone)]
pub struct MockJobInfoRepository {
    jobs: Arc<Mutex<HashMap<i64, JobInfo>>>,
    next_id: Arc<Mutex<i64>>,
    max_log_lines: usize,
}

impl Default for MockJobInfoRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobInfoRepository {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            max_log_lines: DEFAULT_MAX_LOG_LINES,
        }
    }

    pub fn with_max_log_lines(mut self, max_log_lines: usize) -> Self {
        self.max_log_lines = max_log_lines;
        self
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn all_jobs(&self) -> Vec<JobInfo> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    fn find_locked<'a>(
        jobs: &'a mut HashMap<i64, JobInfo>,
        name: &str,
        state: RunningState,
    ) -> Option<&'a mut JobInfo> {
        jobs.values_mut()
            .find(|j| j.name == name && j.running_state == state)
    }

    fn cap(&self, lines: &mut Vec<LogLine>) {
        if lines.len() > self.max_log_lines {
            let overflow = lines.len() - self.max_log_lines;
            lines.drain(..overflow);
        }
    }
}

#[async_trait]
impl JobInfoRepository for MockJobInfoRepository {
    async fn create_unique(&self, new_job: &NewJobInfo) -> JobResult<Option<i64>> {
        let mut jobs = self.jobs.lock().unwrap();
        // 与部分唯一索引等价：同名同状态（非 FINISHED）已存在则拒绝
        if jobs
            .values()
            .any(|j| j.name == new_job.name && j.running_state == new_job.running_state)
        {
            return Ok(None);
        }

        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;

        let now = Utc::now();
        let job = JobInfo {
            id,
            name: new_job.name.clone(),
            host: host::host_name(),
            thread: host::thread_label(),
            running_state: new_job.running_state,
            execution_priority: new_job.execution_priority,
            result_code: None,
            result_message: None,
            status_message: None,
            created_at: now,
            started_at: (new_job.running_state == RunningState::Running).then_some(now),
            finished_at: None,
            last_modified_at: now,
            max_execution_ms: new_job.max_execution_ms,
            max_idle_ms: new_job.max_idle_ms,
            parameters: new_job.parameters.clone(),
            additional_data: new_job.additional_data.clone(),
            log_lines: Vec::new(),
            abort_requested: false,
        };
        jobs.insert(id, job);
        Ok(Some(id))
    }

    async fn find_by_id(&self, id: i64) -> JobResult<Option<JobInfo>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_name_and_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> JobResult<Option<JobInfo>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.name == name && j.running_state == state)
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn find_by_name(&self, name: &str, limit: i64) -> JobResult<Vec<JobInfo>> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<JobInfo> = jobs.values().filter(|j| j.name == name).cloned().collect();
        matching.sort_by_key(|j| std::cmp::Reverse((j.created_at, j.id)));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn find_by_name_and_time_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        result_codes: Option<&[ResultCode]>,
    ) -> JobResult<Vec<JobInfo>> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<JobInfo> = jobs
            .values()
            .filter(|j| j.name == name && j.created_at >= from && j.created_at <= to)
            .filter(|j| match result_codes {
                Some(codes) if !codes.is_empty() => {
                    j.result_code.map(|c| codes.contains(&c)).unwrap_or(false)
                }
                _ => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|j| std::cmp::Reverse((j.created_at, j.id)));
        Ok(matching)
    }

    async fn find_queued_sorted_asc_by_creation(&self) -> JobResult<Vec<JobInfo>> {
        let jobs = self.jobs.lock().unwrap();
        let mut queued: Vec<JobInfo> = jobs
            .values()
            .filter(|j| j.running_state == RunningState::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|j| (j.created_at, j.id));
        Ok(queued)
    }

    async fn find_by_state(&self, state: RunningState) -> JobResult<Vec<JobInfo>> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<JobInfo> = jobs
            .values()
            .filter(|j| j.running_state == state)
            .cloned()
            .collect();
        matching.sort_by_key(|j| (j.created_at, j.id));
        Ok(matching)
    }

    async fn has_job(&self, name: &str, state: RunningState) -> JobResult<bool> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .any(|j| j.name == name && j.running_state == state))
    }

    async fn remove(&self, id: i64) -> JobResult<()> {
        self.jobs.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn mark_queued_as_not_executed(&self, name: &str) -> JobResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match Self::find_locked(&mut jobs, name, RunningState::Queued) {
            Some(job) => {
                let now = Utc::now();
                job.running_state = RunningState::Finished;
                job.result_code = Some(ResultCode::NotExecuted);
                job.finished_at = Some(now);
                job.last_modified_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn activate_queued_job(&self, name: &str) -> JobResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs
            .values()
            .any(|j| j.name == name && j.running_state == RunningState::Running)
        {
            // 唯一索引会拒绝激活
            return Ok(false);
        }
        match Self::find_locked(&mut jobs, name, RunningState::Queued) {
            Some(job) => {
                let now = Utc::now();
                job.running_state = RunningState::Running;
                job.started_at = Some(now);
                job.last_modified_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_running_as_finished(
        &self,
        name: &str,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> JobResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match Self::find_locked(&mut jobs, name, RunningState::Running) {
            Some(job) => {
                let now = Utc::now();
                job.running_state = RunningState::Finished;
                job.result_code = Some(result_code);
                if let Some(message) = message {
                    job.result_message = Some(message.to_string());
                }
                job.finished_at = Some(now);
                job.last_modified_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_running_as_finished_successfully(&self, name: &str) -> JobResult<bool> {
        self.mark_running_as_finished(name, ResultCode::Successful, None)
            .await
    }

    async fn update_host_thread(&self, name: &str) -> JobResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = Self::find_locked(&mut jobs, name, RunningState::Running) {
            job.host = host::host_name();
            job.thread = host::thread_label();
            job.last_modified_at = Utc::now();
        }
        Ok(())
    }

    async fn set_status_message(&self, name: &str, message: &str) -> JobResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = Self::find_locked(&mut jobs, name, RunningState::Running) {
            job.status_message = Some(message.to_string());
            job.last_modified_at = Utc::now();
        }
        Ok(())
    }

    async fn append_log_line(&self, name: &str, line: &str) -> JobResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = Self::find_locked(&mut jobs, name, RunningState::Running) {
            job.log_lines.push(LogLine::new(line));
            let mut lines = std::mem::take(&mut job.log_lines);
            self.cap(&mut lines);
            job.log_lines = lines;
            job.last_modified_at = Utc::now();
        }
        Ok(())
    }

    async fn append_log_lines(&self, name: &str, new_lines: &[String]) -> JobResult<()> {
        if new_lines.is_empty() {
            return Ok(());
        }
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = Self::find_locked(&mut jobs, name, RunningState::Running) {
            job.log_lines
                .extend(new_lines.iter().map(|l| LogLine::new(l.clone())));
            let mut lines = std::mem::take(&mut job.log_lines);
            self.cap(&mut lines);
            job.log_lines = lines;
            job.last_modified_at = Utc::now();
        }
        Ok(())
    }

    async fn set_log_lines(&self, name: &str, replacement: Vec<LogLine>) -> JobResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = Self::find_locked(&mut jobs, name, RunningState::Running) {
            let mut lines = replacement;
            self.cap(&mut lines);
            job.log_lines = lines;
            job.last_modified_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_additional_data(&self, name: &str, key: &str, value: &str) -> JobResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = Self::find_locked(&mut jobs, name, RunningState::Running) {
            job.additional_data.insert(key, value);
            job.last_modified_at = Utc::now();
        }
        Ok(())
    }

    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> JobResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = Self::find_locked(&mut jobs, name, RunningState::Running) {
            job.additional_data.put(key, value);
            job.last_modified_at = Utc::now();
        }
        Ok(())
    }

    async fn set_abort_requested(&self, id: i64, abort: bool) -> JobResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) => {
                job.abort_requested = abort;
                job.last_modified_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clean_up_finished(&self, finished_before: DateTime<Utc>) -> JobResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| {
            !(j.running_state == RunningState::Finished
                && j.finished_at.map(|at| at < finished_before).unwrap_or(false))
        });
        Ok((before - jobs.len()) as u64)
    }
}

/// In-memory implementation of `JobDefinitionRepository`
#[derive(Clone, Default)]
pub struct MockJobDefinitionRepository {
    definitions: Arc<Mutex<HashMap<String, StoredJobDefinition>>>,
}

impl MockJobDefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobDefinitionRepository for MockJobDefinitionRepository {
    async fn find(&self, name: &str) -> JobResult<Option<StoredJobDefinition>> {
        Ok(self.definitions.lock().unwrap().get(name).cloned())
    }

    async fn add_or_update(&self, definition: &StoredJobDefinition) -> JobResult<()> {
        let mut definitions = self.definitions.lock().unwrap();
        match definitions.get_mut(&definition.name) {
            Some(existing) => {
                // 动态字段保持不变
                existing.max_execution_ms = definition.max_execution_ms;
                existing.max_idle_ms = definition.max_idle_ms;
                existing.polling_interval_ms = definition.polling_interval_ms;
                existing.remote = definition.remote;
                existing.abortable = definition.abortable;
            }
            None => {
                definitions.insert(definition.name.clone(), definition.clone());
            }
        }
        Ok(())
    }

    async fn set_job_execution_enabled(&self, name: &str, enabled: bool) -> JobResult<()> {
        if let Some(definition) = self.definitions.lock().unwrap().get_mut(name) {
            definition.disabled = !enabled;
        }
        Ok(())
    }

    async fn set_last_not_executed(&self, name: &str, at: DateTime<Utc>) -> JobResult<()> {
        if let Some(definition) = self.definitions.lock().unwrap().get_mut(name) {
            definition.last_not_executed_at = Some(at);
        }
        Ok(())
    }
}

/// Scripted remote executor double. Start and status answers are queued up
/// front; every call is recorded for assertions.
pub struct MockRemoteJobExecutor {
    executor_uri: String,
    start_results: Mutex<VecDeque<JobResult<String>>>,
    status_results: Mutex<VecDeque<JobResult<RemoteJobStatus>>>,
    pub started_jobs: Mutex<Vec<RemoteJob>>,
    pub stopped_uris: Mutex<Vec<String>>,
}

impl Default for MockRemoteJobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteJobExecutor {
    pub fn new() -> Self {
        Self {
            executor_uri: "http://remote-executor.test".to_string(),
            start_results: Mutex::new(VecDeque::new()),
            status_results: Mutex::new(VecDeque::new()),
            started_jobs: Mutex::new(Vec::new()),
            stopped_uris: Mutex::new(Vec::new()),
        }
    }

    pub fn push_start_result(&self, result: JobResult<String>) {
        self.start_results.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, result: JobResult<RemoteJobStatus>) {
        self.status_results.lock().unwrap().push_back(result);
    }

    pub fn started_count(&self) -> usize {
        self.started_jobs.lock().unwrap().len()
    }

    /// 尚未被消费的状态脚本条数
    pub fn remaining_status_count(&self) -> usize {
        self.status_results.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteJobExecutor for MockRemoteJobExecutor {
    fn executor_uri(&self) -> &str {
        &self.executor_uri
    }

    async fn start_job(&self, job: &RemoteJob) -> JobResult<String> {
        self.started_jobs.lock().unwrap().push(job.clone());
        self.start_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(JobStoreError::JobExecution(
                    "no scripted start result".to_string(),
                ))
            })
    }

    async fn status(&self, _job_uri: &str) -> JobResult<RemoteJobStatus> {
        self.status_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(JobStoreError::JobExecution(
                    "no scripted status result".to_string(),
                ))
            })
    }

    async fn stop_job(&self, job_uri: &str) -> JobResult<()> {
        self.stopped_uris.lock().unwrap().push(job_uri.to_string());
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        true
    }
}
