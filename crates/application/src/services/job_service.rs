use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use jobstore_common::{host, validation, DISPLACED_JOB_ID_KEY, EXIT_CODE_KEY};
use jobstore_domain::{
    JobDefinition, JobDefinitionRepository, JobExecutionContext, JobExecutionPriority, JobInfo,
    JobInfoRepository, JobRunnable, NewJobInfo, PropertyBag, RemoteJobState, RemoteJobStatus,
    ResultCode, RunningState, StoredJobDefinition,
};
use jobstore_errors::{JobResult, JobStoreError};

use super::job_execution::{dispatch_job, JobExecutionTracker, SimpleJobLogger};

/// 作业调度服务。
///
/// 一个进程内可以有多个实例，多实例共享同一个存储时依旧保证每个作业名
/// 至多一条 RUNNING、一条 QUEUED 记录：所有跨进程互斥都落在存储的条件
/// 原语上，本服务不持有任何应用级锁。
///
/// 作业必须先注册才能执行或排队。通过运行约束可以声明一组不允许同时
/// 运行的作业。
pub struct JobService {
    job_info_repository: Arc<dyn JobInfoRepository>,
    job_definition_repository: Arc<dyn JobDefinitionRepository>,
    runnables: RwLock<HashMap<String, Arc<dyn JobRunnable>>>,
    running_constraints: RwLock<Vec<HashSet<String>>>,
    execution_enabled: AtomicBool,
    active: AtomicBool,
    tracker: JobExecutionTracker,
}

impl JobService {
    pub fn new(
        job_info_repository: Arc<dyn JobInfoRepository>,
        job_definition_repository: Arc<dyn JobDefinitionRepository>,
    ) -> Self {
        Self {
            job_info_repository,
            job_definition_repository,
            runnables: RwLock::new(HashMap::new()),
            running_constraints: RwLock::new(Vec::new()),
            execution_enabled: AtomicBool::new(true),
            active: AtomicBool::new(true),
            tracker: JobExecutionTracker::new(),
        }
    }

    /// 后台清扫与停机清扫共用的任务句柄表
    pub fn execution_tracker(&self) -> JobExecutionTracker {
        self.tracker.clone()
    }

    pub fn is_execution_enabled(&self) -> bool {
        self.execution_enabled.load(Ordering::SeqCst)
    }

    /// 全局执行开关，默认开启
    pub fn set_execution_enabled(&self, enabled: bool) {
        self.execution_enabled.store(enabled, Ordering::SeqCst);
    }

    /// 注册作业并把定义元数据写入存储。重复注册返回 `false`
    pub async fn register_job(&self, runnable: Arc<dyn JobRunnable>) -> JobResult<bool> {
        let definition = runnable.definition().clone();
        validation::validate_job_name(&definition.name)?;

        {
            let mut runnables = self.runnables.write().unwrap();
            if runnables.contains_key(&definition.name) {
                return Ok(false);
            }
            runnables.insert(definition.name.clone(), runnable);
        }

        self.job_definition_repository
            .add_or_update(&StoredJobDefinition::from(&definition))
            .await?;
        info!("注册作业 {} (remote={})", definition.name, definition.remote);
        Ok(true)
    }

    /// 添加运行约束：约束中的作业不允许同时处于 RUNNING。
    /// 任一成员未注册时失败，重复添加返回 `false`
    pub fn add_running_constraint(&self, constraint: HashSet<String>) -> JobResult<bool> {
        for name in &constraint {
            self.check_job_registered(name)?;
        }
        let mut constraints = self.running_constraints.write().unwrap();
        if constraints.iter().any(|existing| *existing == constraint) {
            return Ok(false);
        }
        constraints.push(constraint);
        Ok(true)
    }

    /// 持久化单个作业的禁用标记
    pub async fn set_job_execution_enabled(&self, name: &str, enabled: bool) -> JobResult<()> {
        self.check_job_registered(name)?;
        self.job_definition_repository
            .set_job_execution_enabled(name, enabled)
            .await
    }

    /// 把排队中的作业移出队列并标记 NOT_EXECUTED，返回是否存在排队记录
    pub async fn remove_job_from_queue(&self, name: &str) -> JobResult<bool> {
        self.job_info_repository
            .mark_queued_as_not_executed(name)
            .await
    }

    pub async fn execute_job(&self, name: &str) -> JobResult<i64> {
        self.execute_job_with(name, JobExecutionPriority::CheckPreconditions, PropertyBag::new())
            .await
    }

    /// 准入决策：按当前队列与运行状态决定立即执行、排队或拒绝。
    ///
    /// 返回新纪录的 id。与其他实例的并发竞争通过存储的唯一索引裁决，
    /// 竞争失败表现为 `JobAlreadyQueued` / `JobAlreadyRunning`。
    #[instrument(skip(self, parameters), fields(priority = %priority))]
    pub async fn execute_job_with(
        &self,
        name: &str,
        priority: JobExecutionPriority,
        parameters: PropertyBag,
    ) -> JobResult<i64> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(JobStoreError::JobServiceNotActive);
        }
        let runnable = self.runnable(name)?;
        if !self.is_execution_enabled() {
            return Err(JobStoreError::JobExecutionDisabled { name: None });
        }
        if let Some(stored) = self.job_definition_repository.find(name).await? {
            if stored.disabled {
                return Err(JobStoreError::JobExecutionDisabled {
                    name: Some(name.to_string()),
                });
            }
        }

        let definition = runnable.definition().clone();
        let queued = self
            .job_info_repository
            .find_by_name_and_state(name, RunningState::Queued)
            .await?;

        if let Some(queued) = queued {
            if queued.execution_priority.is_lower_than(priority) {
                // 高优先级请求挤掉低优先级的排队记录，新记录携带审计信息
                self.job_info_repository.remove(queued.id).await?;
                let mut additional_data = PropertyBag::new();
                additional_data.put(DISPLACED_JOB_ID_KEY, queued.id.to_string());
                debug!("作业 {} 的排队记录 {} 被更高优先级挤掉", name, queued.id);
                return self
                    .queue_job(&definition, priority, parameters, additional_data)
                    .await;
            }
            return Err(JobStoreError::JobAlreadyQueued {
                name: name.to_string(),
            });
        }

        let running = self
            .job_info_repository
            .find_by_name_and_state(name, RunningState::Running)
            .await?;

        match running {
            None => {
                if self.violates_running_constraints(name).await? {
                    // 运行会违反互斥约束，转入队列等待排空环节放行
                    return self
                        .queue_job(&definition, priority, parameters, PropertyBag::new())
                        .await;
                }
                let id = self.run_job(&definition, priority, parameters).await?;
                debug!("开始执行作业 {}", name);
                dispatch_job(
                    runnable,
                    self.job_info_repository.clone(),
                    self.tracker.clone(),
                    id,
                    priority,
                );
                Ok(id)
            }
            Some(running) if running.execution_priority.is_equal_or_higher_than(priority) => {
                self.job_definition_repository
                    .set_last_not_executed(name, Utc::now())
                    .await?;
                Err(JobStoreError::JobExecutionNotNecessary {
                    name: name.to_string(),
                })
            }
            Some(_) => {
                self.queue_job(&definition, priority, parameters, PropertyBag::new())
                    .await
            }
        }
    }

    /// 按入队顺序排空队列。对每条排队记录检查同名运行与互斥约束，
    /// 允许时原子激活并派发 worker；激活竞争失败是无害的
    pub async fn execute_queued_jobs(&self) -> JobResult<()> {
        if !self.is_execution_enabled() {
            return Ok(());
        }
        debug!("开始排空作业队列");
        for job_info in self
            .job_info_repository
            .find_queued_sorted_asc_by_creation()
            .await?
        {
            if let Err(e) = self.execute_queued_job(&job_info).await {
                warn!("激活排队作业 {} 失败: {}", job_info.name, e);
            }
        }
        Ok(())
    }

    async fn execute_queued_job(&self, job_info: &JobInfo) -> JobResult<()> {
        let name = &job_info.name;
        let Some(runnable) = self.runnables.read().unwrap().get(name).cloned() else {
            // 其他实例排队的作业，本实例没有对应的 runnable
            debug!("作业 {} 未在本实例注册，跳过激活", name);
            return Ok(());
        };
        if self
            .job_info_repository
            .has_job(name, RunningState::Running)
            .await?
        {
            info!("作业 {} 已有运行中的实例，保持排队", name);
            return Ok(());
        }
        if self.violates_running_constraints(name).await? {
            info!("作业 {} 受运行约束阻塞，保持排队", name);
            return Ok(());
        }
        if self.job_info_repository.activate_queued_job(name).await? {
            self.job_info_repository.update_host_thread(name).await?;
            info!("激活排队作业 {} (id={})", name, job_info.id);
            dispatch_job(
                runnable,
                self.job_info_repository.clone(),
                self.tracker.clone(),
                job_info.id,
                job_info.execution_priority,
            );
        } else {
            warn!("作业 {} 已不在队列中 (id={})", name, job_info.id);
        }
        Ok(())
    }

    /// 轮询所有远程作业并按远端状态推进记录。
    ///
    /// 单个作业的远端错误视为瞬时故障，留给下一个周期；记录最终由
    /// 后台清扫的空闲超时兜底。
    pub async fn poll_remote_jobs(&self) -> JobResult<()> {
        if !self.is_execution_enabled() {
            return Ok(());
        }
        let remote_runnables: Vec<Arc<dyn JobRunnable>> = self
            .runnables
            .read()
            .unwrap()
            .values()
            .filter(|r| r.definition().remote)
            .cloned()
            .collect();

        for runnable in remote_runnables {
            let definition = runnable.definition().clone();
            let Some(running) = self
                .job_info_repository
                .find_by_name_and_state(&definition.name, RunningState::Running)
                .await?
            else {
                continue;
            };
            if !job_requires_update(
                running.last_modified_at,
                Utc::now(),
                definition.polling_interval_ms,
            ) {
                continue;
            }

            let logger = Arc::new(SimpleJobLogger::new(
                definition.name.clone(),
                self.job_info_repository.clone(),
            ));
            let context = JobExecutionContext::new(
                running.id,
                definition.name.clone(),
                running.execution_priority,
                logger,
                self.job_info_repository.clone(),
            );
            match runnable.remote_status(&context).await {
                Ok(Some(status)) => self.update_remote_job_status(&running, status).await?,
                Ok(None) => {}
                Err(e) => {
                    warn!("轮询远程作业 {} 失败，等待下个周期: {}", definition.name, e);
                }
            }
        }
        Ok(())
    }

    async fn update_remote_job_status(
        &self,
        job_info: &JobInfo,
        status: RemoteJobStatus,
    ) -> JobResult<()> {
        let name = &job_info.name;
        match status.status {
            RemoteJobState::Running => {
                self.job_info_repository
                    .append_log_lines(name, &status.log_lines)
                    .await?;
                if let Some(message) = &status.message {
                    self.job_info_repository
                        .set_status_message(name, message)
                        .await?;
                }
            }
            RemoteJobState::Finished => match status.result {
                Some(result) if result.ok => {
                    self.job_info_repository
                        .mark_running_as_finished_successfully(name)
                        .await?;
                    info!("远程作业 {} 成功完成", name);
                }
                Some(result) => {
                    self.job_info_repository
                        .add_additional_data(name, EXIT_CODE_KEY, &result.exit_code.to_string())
                        .await?;
                    self.job_info_repository
                        .mark_running_as_finished(
                            name,
                            ResultCode::Failed,
                            result.message.as_deref(),
                        )
                        .await?;
                    info!("远程作业 {} 失败 (exitCode={})", name, result.exit_code);
                }
                None => {
                    warn!("远程作业 {} 汇报 FINISHED 但缺少结果，等待下个周期", name);
                }
            },
        }
        Ok(())
    }

    /// 进程退出时的清扫：终止本主机上运行的本地作业并标记失败。
    /// 清扫后服务不再接受执行请求
    pub async fn shutdown_jobs(&self) -> JobResult<()> {
        if self.is_execution_enabled() {
            let local_runnables: Vec<String> = self
                .runnables
                .read()
                .unwrap()
                .values()
                .filter(|r| !r.definition().remote)
                .map(|r| r.definition().name.clone())
                .collect();

            for name in local_runnables {
                let Some(running) = self
                    .job_info_repository
                    .find_by_name_and_state(&name, RunningState::Running)
                    .await?
                else {
                    continue;
                };
                if running.host == host::host_name() {
                    info!("停机清扫作业 {}", name);
                    self.tracker.abort(&name);
                    self.job_info_repository
                        .mark_running_as_finished(
                            &name,
                            ResultCode::Failed,
                            Some("shutdownJobs called from executing host"),
                        )
                        .await?;
                }
            }
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// 请求中止一条记录。定义未声明可中止时拒绝；worker 观察到标记后
    /// 以 ABORTED 收尾
    pub async fn abort_job(&self, id: i64) -> JobResult<()> {
        let job_info = self
            .job_info_repository
            .find_by_id(id)
            .await?
            .ok_or(JobStoreError::JobInfoNotFound { id })?;
        let definition = self
            .job_definition(&job_info.name)
            .ok_or_else(|| JobStoreError::JobNotRegistered {
                name: job_info.name.clone(),
            })?;
        if !definition.abortable {
            return Err(JobStoreError::JobNotAbortable {
                name: job_info.name,
            });
        }
        self.job_info_repository.set_abort_requested(id, true).await?;
        info!("请求中止作业 {} (id={})", job_info.name, id);
        Ok(())
    }

    /// 清空本实例的注册表与约束
    pub fn clean(&self) {
        self.runnables.write().unwrap().clear();
        self.running_constraints.write().unwrap().clear();
    }

    pub fn list_job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runnables.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_running_constraints(&self) -> Vec<HashSet<String>> {
        self.running_constraints.read().unwrap().clone()
    }

    pub fn job_definition(&self, name: &str) -> Option<JobDefinition> {
        self.runnables
            .read()
            .unwrap()
            .get(name)
            .map(|r| r.definition().clone())
    }

    /// 本实例注册的本地作业是否有正在运行的记录，供状态接口使用
    pub async fn has_local_running_jobs(&self) -> JobResult<bool> {
        let local_names: Vec<String> = self
            .runnables
            .read()
            .unwrap()
            .values()
            .filter(|r| !r.definition().remote)
            .map(|r| r.definition().name.clone())
            .collect();
        for name in local_names {
            if self
                .job_info_repository
                .has_job(&name, RunningState::Running)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn runnable(&self, name: &str) -> JobResult<Arc<dyn JobRunnable>> {
        self.runnables
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| JobStoreError::JobNotRegistered {
                name: name.to_string(),
            })
    }

    fn check_job_registered(&self, name: &str) -> JobResult<()> {
        if self.runnables.read().unwrap().contains_key(name) {
            Ok(())
        } else {
            Err(JobStoreError::JobNotRegistered {
                name: name.to_string(),
            })
        }
    }

    async fn queue_job(
        &self,
        definition: &JobDefinition,
        priority: JobExecutionPriority,
        parameters: PropertyBag,
        additional_data: PropertyBag,
    ) -> JobResult<i64> {
        let mut new_job = NewJobInfo::new(definition, RunningState::Queued, priority, parameters);
        new_job.additional_data = additional_data;
        self.job_info_repository
            .create_unique(&new_job)
            .await?
            .ok_or_else(|| JobStoreError::JobAlreadyQueued {
                name: definition.name.clone(),
            })
    }

    async fn run_job(
        &self,
        definition: &JobDefinition,
        priority: JobExecutionPriority,
        parameters: PropertyBag,
    ) -> JobResult<i64> {
        let new_job = NewJobInfo::new(definition, RunningState::Running, priority, parameters);
        self.job_info_repository
            .create_unique(&new_job)
            .await?
            .ok_or_else(|| JobStoreError::JobAlreadyRunning {
                name: definition.name.clone(),
            })
    }

    /// 约束检查是自反的：组里任何成员（包括候选自身）在运行即阻塞
    async fn violates_running_constraints(&self, name: &str) -> JobResult<bool> {
        let constraints: Vec<HashSet<String>> = self
            .running_constraints
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.contains(name))
            .cloned()
            .collect();
        for constraint in constraints {
            for member in &constraint {
                if self
                    .job_info_repository
                    .has_job(member, RunningState::Running)
                    .await?
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn job_requires_update(
    last_modified: DateTime<Utc>,
    now: DateTime<Utc>,
    polling_interval_ms: i64,
) -> bool {
    now - Duration::milliseconds(polling_interval_ms) > last_modified
}
