//! Remote job supervision: trigger, poll, log-line handling, terminal
//! promotion

mod support;

use std::sync::Arc;

use jobstore_application::{JobService, RemoteJobRunnable, SimpleJobLogger};
use jobstore_common::{REMOTE_JOB_URI_KEY, RESUMED_ALREADY_RUNNING_JOB_KEY};
use jobstore_domain::{
    JobDefinition, JobInfoRepository, RemoteJobResult, RemoteJobState, RemoteJobStatus,
    ResultCode, RunningState,
};
use jobstore_errors::JobStoreError;
use jobstore_testing_utils::{
    remote_definition, MockJobDefinitionRepository, MockJobInfoRepository, MockRemoteJobExecutor,
};

use support::{wait_for_remote_uri, wait_for_state};

struct Fixture {
    repo: MockJobInfoRepository,
    service: JobService,
    executor: Arc<MockRemoteJobExecutor>,
}

async fn fixture_with(definition: JobDefinition) -> Fixture {
    let repo = MockJobInfoRepository::new();
    let service = JobService::new(
        Arc::new(repo.clone()),
        Arc::new(MockJobDefinitionRepository::new()),
    );
    let executor = Arc::new(MockRemoteJobExecutor::new());
    let runnable = RemoteJobRunnable::new(definition, executor.clone(), Arc::new(repo.clone()));
    service.register_job(Arc::new(runnable)).await.unwrap();
    Fixture {
        repo,
        service,
        executor,
    }
}

fn running_status(log_lines: &[&str], message: &str) -> RemoteJobStatus {
    RemoteJobStatus {
        status: RemoteJobState::Running,
        log_lines: log_lines.iter().map(|s| s.to_string()).collect(),
        message: Some(message.to_string()),
        result: None,
        finish_time: None,
    }
}

fn finished_status(ok: bool, exit_code: i32, message: Option<&str>) -> RemoteJobStatus {
    RemoteJobStatus {
        status: RemoteJobState::Finished,
        log_lines: Vec::new(),
        message: None,
        result: Some(RemoteJobResult {
            ok,
            exit_code,
            message: message.map(str::to_owned),
        }),
        finish_time: Some("2014-03-01T10:00:00Z".to_string()),
    }
}

#[tokio::test]
async fn test_remote_job_lifecycle() {
    let f = fixture_with(remote_definition("j3")).await;
    f.executor
        .push_start_result(Ok("http://remote-executor.test/jobs/abc".to_string()));

    let id = f.service.execute_job("j3").await.unwrap();
    wait_for_remote_uri(&f.repo, id).await;

    // 启动后记录保持 RUNNING，终结迁移属于远程监管
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
    assert_eq!(
        record.remote_job_uri(),
        Some("http://remote-executor.test/jobs/abc")
    );
    assert_eq!(f.executor.started_count(), 1);
    assert_eq!(f.executor.started_jobs.lock().unwrap()[0].name, "j3");

    // 第一轮：远端在运行，带回日志与状态消息
    f.executor.push_status(Ok(running_status(&["l1", "l2"], "bar")));
    f.service.poll_remote_jobs().await.unwrap();
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    let lines: Vec<&str> = record.log_lines.iter().map(|l| l.line.as_str()).collect();
    assert_eq!(lines, vec!["l1", "l2"]);
    assert_eq!(record.status_message.as_deref(), Some("bar"));
    assert_eq!(record.running_state, RunningState::Running);

    // 第二轮：远端完成
    f.executor.push_status(Ok(finished_status(true, 0, None)));
    f.service.poll_remote_jobs().await.unwrap();
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Finished);
    assert_eq!(record.result_code, Some(ResultCode::Successful));
}

#[tokio::test]
async fn test_remote_log_lines_are_trimmed_by_count() {
    let f = fixture_with(remote_definition("j3")).await;
    f.executor
        .push_start_result(Ok("http://remote-executor.test/jobs/abc".to_string()));
    let id = f.service.execute_job("j3").await.unwrap();
    wait_for_remote_uri(&f.repo, id).await;

    f.executor.push_status(Ok(running_status(&["l1", "l2"], "step 1")));
    f.service.poll_remote_jobs().await.unwrap();

    // 远端返回完整历史，已持久化的前两行按行数截掉，只追加 l3
    f.executor
        .push_status(Ok(running_status(&["l1", "l2", "l3"], "step 2")));
    f.service.poll_remote_jobs().await.unwrap();

    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    let lines: Vec<&str> = record.log_lines.iter().map(|l| l.line.as_str()).collect();
    assert_eq!(lines, vec!["l1", "l2", "l3"]);
}

#[tokio::test]
async fn test_remote_failure_records_exit_code() {
    let f = fixture_with(remote_definition("j3")).await;
    f.executor
        .push_start_result(Ok("http://remote-executor.test/jobs/abc".to_string()));
    let id = f.service.execute_job("j3").await.unwrap();
    wait_for_remote_uri(&f.repo, id).await;

    f.executor
        .push_status(Ok(finished_status(false, 3, Some("script failed"))));
    f.service.poll_remote_jobs().await.unwrap();

    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Finished);
    assert_eq!(record.result_code, Some(ResultCode::Failed));
    assert_eq!(record.result_message.as_deref(), Some("script failed"));
    assert_eq!(record.additional_data.get("exitCode"), Some("3"));
}

#[tokio::test]
async fn test_remote_already_running_resumes_existing_job() {
    let f = fixture_with(remote_definition("j3")).await;
    f.executor.push_start_result(Err(JobStoreError::RemoteJobAlreadyRunning {
        message: "already going".to_string(),
        job_uri: "http://remote-executor.test/jobs/old-7".to_string(),
    }));

    let id = f.service.execute_job("j3").await.unwrap();
    wait_for_remote_uri(&f.repo, id).await;

    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
    assert_eq!(
        record.remote_job_uri(),
        Some("http://remote-executor.test/jobs/old-7")
    );
    assert_eq!(
        record.additional_data.get(RESUMED_ALREADY_RUNNING_JOB_KEY),
        Some("http://remote-executor.test/jobs/old-7")
    );
}

#[tokio::test]
async fn test_remote_start_failure_fails_record() {
    let f = fixture_with(remote_definition("j3")).await;
    f.executor.push_start_result(Err(JobStoreError::JobExecution(
        "rc=500".to_string(),
    )));

    let id = f.service.execute_job("j3").await.unwrap();
    wait_for_state(&f.repo, id, RunningState::Finished).await;
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::Failed));
    assert!(record.additional_data.get(REMOTE_JOB_URI_KEY).is_none());
}

#[tokio::test]
async fn test_poll_respects_polling_interval() {
    // 一小时的轮询间隔：刚写过的记录不会被打扰
    let definition = JobDefinition::remote("j3", 600_000, 300_000, 3_600_000);
    let f = fixture_with(definition).await;
    f.executor
        .push_start_result(Ok("http://remote-executor.test/jobs/abc".to_string()));
    let id = f.service.execute_job("j3").await.unwrap();
    wait_for_remote_uri(&f.repo, id).await;

    f.executor.push_status(Ok(finished_status(true, 0, None)));
    f.service.poll_remote_jobs().await.unwrap();

    assert_eq!(f.executor.remaining_status_count(), 1, "status not consumed");
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
}

#[tokio::test]
async fn test_stop_uses_stored_job_uri() {
    let repo = MockJobInfoRepository::new();
    let service = JobService::new(
        Arc::new(repo.clone()),
        Arc::new(MockJobDefinitionRepository::new()),
    );
    let executor = Arc::new(MockRemoteJobExecutor::new());
    let runnable = Arc::new(RemoteJobRunnable::new(
        remote_definition("j3").abortable(),
        executor.clone(),
        Arc::new(repo.clone()),
    ));
    service.register_job(runnable.clone()).await.unwrap();

    executor.push_start_result(Ok("http://remote-executor.test/jobs/abc".to_string()));
    let id = service.execute_job("j3").await.unwrap();
    wait_for_remote_uri(&repo, id).await;

    let record = repo.find_by_id(id).await.unwrap().unwrap();
    let context = jobstore_domain::JobExecutionContext::new(
        id,
        "j3",
        record.execution_priority,
        Arc::new(SimpleJobLogger::new("j3", Arc::new(repo.clone()))),
        Arc::new(repo.clone()),
    );
    runnable.stop(&context).await.unwrap();
    assert_eq!(
        *executor.stopped_uris.lock().unwrap(),
        vec!["http://remote-executor.test/jobs/abc".to_string()]
    );
}

#[tokio::test]
async fn test_poll_swallows_transient_remote_errors() {
    let f = fixture_with(remote_definition("j3")).await;
    f.executor
        .push_start_result(Ok("http://remote-executor.test/jobs/abc".to_string()));
    let id = f.service.execute_job("j3").await.unwrap();
    wait_for_remote_uri(&f.repo, id).await;

    f.executor.push_status(Err(JobStoreError::JobExecution(
        "connection refused".to_string(),
    )));
    f.service.poll_remote_jobs().await.unwrap();

    // 记录保持 RUNNING，等下一个周期
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
}
