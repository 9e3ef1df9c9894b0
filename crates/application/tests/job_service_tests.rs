mod support;

use std::collections::HashSet;
use std::sync::Arc;

use jobstore_application::JobService;
use jobstore_common::DISPLACED_JOB_ID_KEY;
use jobstore_domain::{
    JobDefinitionRepository, JobExecutionPriority, JobInfoRepository, NewJobInfo, PropertyBag,
    ResultCode, RunningState,
};
use jobstore_errors::JobStoreError;
use jobstore_testing_utils::{
    local_definition, MockJobDefinitionRepository, MockJobInfoRepository,
};

use support::{wait_for_state, wait_until, TestRunnable};

struct Fixture {
    repo: MockJobInfoRepository,
    definitions: MockJobDefinitionRepository,
    service: JobService,
}

fn fixture() -> Fixture {
    let repo = MockJobInfoRepository::new();
    let definitions = MockJobDefinitionRepository::new();
    let service = JobService::new(Arc::new(repo.clone()), Arc::new(definitions.clone()));
    Fixture {
        repo,
        definitions,
        service,
    }
}

#[tokio::test]
async fn test_register_job_is_idempotent_by_name() {
    let f = fixture();
    let first = TestRunnable::new(local_definition("j1"));
    let second = TestRunnable::new(local_definition("j1"));
    assert!(f.service.register_job(Arc::new(first)).await.unwrap());
    assert!(!f.service.register_job(Arc::new(second)).await.unwrap());
    assert_eq!(f.service.list_job_names(), vec!["j1".to_string()]);

    // 注册会落一份定义
    let stored = f.definitions.find("j1").await.unwrap().unwrap();
    assert!(!stored.disabled);
    assert!(!stored.remote);
}

#[tokio::test]
async fn test_constraint_requires_registered_jobs() {
    let f = fixture();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j1"))))
        .await
        .unwrap();
    let constraint: HashSet<String> = ["j1".to_string(), "ghost".to_string()].into();
    let err = f.service.add_running_constraint(constraint).unwrap_err();
    assert!(matches!(err, JobStoreError::JobNotRegistered { name } if name == "ghost"));
}

#[tokio::test]
async fn test_execute_job_runs_and_finishes_successfully() {
    let f = fixture();
    let (runnable, gate) = TestRunnable::new(local_definition("j1")).gated();
    f.service.register_job(Arc::new(runnable)).await.unwrap();

    let id = f.service.execute_job("j1").await.unwrap();
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
    assert_eq!(
        record.execution_priority,
        JobExecutionPriority::CheckPreconditions
    );
    assert!(record.started_at.is_some());

    // 运行中再次请求：优先级相同，无需执行
    let err = f.service.execute_job("j1").await.unwrap_err();
    assert!(matches!(err, JobStoreError::JobExecutionNotNecessary { .. }));
    // 拒绝时在定义上盖了时间戳
    let stored = f.definitions.find("j1").await.unwrap().unwrap();
    assert!(stored.last_not_executed_at.is_some());

    gate.notify_one();
    wait_for_state(&f.repo, id, RunningState::Finished).await;
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::Successful));
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn test_unknown_job_is_rejected() {
    let f = fixture();
    let err = f.service.execute_job("nope").await.unwrap_err();
    assert!(matches!(err, JobStoreError::JobNotRegistered { .. }));
}

#[tokio::test]
async fn test_global_disable_rejects_and_silences_loops() {
    let f = fixture();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j1"))))
        .await
        .unwrap();
    f.service.set_execution_enabled(false);

    let err = f.service.execute_job("j1").await.unwrap_err();
    assert!(matches!(
        err,
        JobStoreError::JobExecutionDisabled { name: None }
    ));

    // 关闭状态下排空与轮询都是空操作
    let definition = local_definition("j1");
    f.repo
        .create_unique(&NewJobInfo::new(
            &definition,
            RunningState::Queued,
            JobExecutionPriority::CheckPreconditions,
            PropertyBag::new(),
        ))
        .await
        .unwrap();
    f.service.execute_queued_jobs().await.unwrap();
    assert!(f
        .repo
        .has_job("j1", RunningState::Queued)
        .await
        .unwrap());
    f.service.poll_remote_jobs().await.unwrap();
}

#[tokio::test]
async fn test_per_job_disable_is_persisted_and_honored() {
    let f = fixture();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j1"))))
        .await
        .unwrap();
    f.service
        .set_job_execution_enabled("j1", false)
        .await
        .unwrap();
    assert!(f.definitions.find("j1").await.unwrap().unwrap().disabled);

    let err = f.service.execute_job("j1").await.unwrap_err();
    assert!(matches!(
        err,
        JobStoreError::JobExecutionDisabled { name: Some(name) } if name == "j1"
    ));

    f.service
        .set_job_execution_enabled("j1", true)
        .await
        .unwrap();
    let id = f.service.execute_job("j1").await.unwrap();
    wait_for_state(&f.repo, id, RunningState::Finished).await;
}

#[tokio::test]
async fn test_constraint_queues_second_job_and_drain_promotes_it() {
    let f = fixture();
    let (j1, gate) = TestRunnable::new(local_definition("j1")).gated();
    let j2 = TestRunnable::new(local_definition("j2"));
    f.service.register_job(Arc::new(j1)).await.unwrap();
    f.service.register_job(Arc::new(j2)).await.unwrap();
    f.service
        .add_running_constraint(["j1".to_string(), "j2".to_string()].into())
        .unwrap();

    let id1 = f.service.execute_job("j1").await.unwrap();
    // j2 与 j1 互斥，落入队列
    let id2 = f.service.execute_job("j2").await.unwrap();
    let record = f.repo.find_by_id(id2).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Queued);

    // 约束未解除时排空不会放行
    f.service.execute_queued_jobs().await.unwrap();
    assert!(f.repo.has_job("j2", RunningState::Queued).await.unwrap());

    gate.notify_one();
    wait_for_state(&f.repo, id1, RunningState::Finished).await;

    f.service.execute_queued_jobs().await.unwrap();
    wait_for_state(&f.repo, id2, RunningState::Finished).await;
    let record = f.repo.find_by_id(id2).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::Successful));
    assert!(record.started_at.is_some());
}

#[tokio::test]
async fn test_queue_drain_keeps_insertion_order() {
    let f = fixture();
    let (j1, gate) = TestRunnable::new(local_definition("j1")).gated();
    f.service.register_job(Arc::new(j1)).await.unwrap();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j2"))))
        .await
        .unwrap();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j3"))))
        .await
        .unwrap();

    f.service.execute_job("j1").await.unwrap();
    // j2、j3 与 j1 互斥 → 先后排队
    f.service
        .add_running_constraint(["j1".to_string(), "j2".to_string(), "j3".to_string()].into())
        .unwrap();
    let id2 = f.service.execute_job("j2").await.unwrap();
    let id3 = f.service.execute_job("j3").await.unwrap();

    let queued = f.repo.find_queued_sorted_asc_by_creation().await.unwrap();
    let ids: Vec<i64> = queued.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![id2, id3]);
    gate.notify_one();
}

#[tokio::test]
async fn test_force_execution_displaces_lower_priority_queued_record() {
    let f = fixture();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j1"))))
        .await
        .unwrap();

    // 直接放一条低优先级排队记录
    let definition = local_definition("j1");
    let old_id = f
        .repo
        .create_unique(&NewJobInfo::new(
            &definition,
            RunningState::Queued,
            JobExecutionPriority::CheckPreconditions,
            PropertyBag::new(),
        ))
        .await
        .unwrap()
        .unwrap();

    let new_id = f
        .service
        .execute_job_with("j1", JobExecutionPriority::ForceExecution, PropertyBag::new())
        .await
        .unwrap();

    assert!(f.repo.find_by_id(old_id).await.unwrap().is_none());
    let record = f.repo.find_by_id(new_id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Queued);
    assert_eq!(
        record.execution_priority,
        JobExecutionPriority::ForceExecution
    );
    assert_eq!(
        record.additional_data.get(DISPLACED_JOB_ID_KEY),
        Some(old_id.to_string().as_str())
    );

    // 相同优先级不再挤占
    let err = f
        .service
        .execute_job_with("j1", JobExecutionPriority::ForceExecution, PropertyBag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, JobStoreError::JobAlreadyQueued { .. }));
}

#[tokio::test]
async fn test_running_job_with_lower_priority_queues_new_request() {
    let f = fixture();
    let (j1, gate) = TestRunnable::new(local_definition("j1")).gated();
    f.service.register_job(Arc::new(j1)).await.unwrap();

    let running_id = f.service.execute_job("j1").await.unwrap();
    let queued_id = f
        .service
        .execute_job_with("j1", JobExecutionPriority::ForceExecution, PropertyBag::new())
        .await
        .unwrap();
    assert_ne!(running_id, queued_id);
    let record = f.repo.find_by_id(queued_id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Queued);
    gate.notify_one();
}

#[tokio::test]
async fn test_remove_job_from_queue_marks_not_executed() {
    let f = fixture();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j1"))))
        .await
        .unwrap();
    let definition = local_definition("j1");
    let id = f
        .repo
        .create_unique(&NewJobInfo::new(
            &definition,
            RunningState::Queued,
            JobExecutionPriority::CheckPreconditions,
            PropertyBag::new(),
        ))
        .await
        .unwrap()
        .unwrap();

    assert!(f.service.remove_job_from_queue("j1").await.unwrap());
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Finished);
    assert_eq!(record.result_code, Some(ResultCode::NotExecuted));

    assert!(!f.service.remove_job_from_queue("j1").await.unwrap());
}

#[tokio::test]
async fn test_execute_job_parameters_preserve_order() {
    let f = fixture();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j1"))))
        .await
        .unwrap();

    let parameters = PropertyBag::from([("zzz", "1"), ("aaa", "2"), ("mmm", "3")]);
    let id = f
        .service
        .execute_job_with(
            "j1",
            JobExecutionPriority::CheckPreconditions,
            parameters.clone(),
        )
        .await
        .unwrap();
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    let keys: Vec<&str> = record.parameters.keys().collect();
    assert_eq!(keys, vec!["zzz", "aaa", "mmm"]);
    wait_for_state(&f.repo, id, RunningState::Finished).await;
}

#[tokio::test]
async fn test_shutdown_jobs_fails_local_running_jobs_and_deactivates() {
    let f = fixture();
    let (j1, _gate) = TestRunnable::new(local_definition("j1")).gated();
    f.service.register_job(Arc::new(j1)).await.unwrap();

    let id = f.service.execute_job("j1").await.unwrap();
    wait_until("worker to be tracked", || {
        f.service.execution_tracker().is_tracking("j1")
    })
    .await;

    f.service.shutdown_jobs().await.unwrap();
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Finished);
    assert_eq!(record.result_code, Some(ResultCode::Failed));
    assert_eq!(
        record.result_message.as_deref(),
        Some("shutdownJobs called from executing host")
    );

    let err = f.service.execute_job("j1").await.unwrap_err();
    assert!(matches!(err, JobStoreError::JobServiceNotActive));
}

#[tokio::test]
async fn test_concurrent_admits_yield_single_running_record() {
    let f = fixture();
    let (j1, gate) = TestRunnable::new(local_definition("j1")).gated();
    f.service.register_job(Arc::new(j1)).await.unwrap();

    let service = &f.service;
    let results = futures_join(
        service.execute_job("j1"),
        service.execute_job("j1"),
        service.execute_job("j1"),
    )
    .await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one admit may win");
    let running = f.repo.find_by_state(RunningState::Running).await.unwrap();
    assert_eq!(running.len(), 1);
    gate.notify_one();
}

async fn futures_join<F>(a: F, b: F, c: F) -> Vec<Result<i64, JobStoreError>>
where
    F: std::future::Future<Output = Result<i64, JobStoreError>>,
{
    let (ra, rb, rc) = tokio::join!(a, b, c);
    vec![ra, rb, rc]
}

#[tokio::test]
async fn test_clean_drops_registry_and_constraints() {
    let f = fixture();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j1"))))
        .await
        .unwrap();
    f.service
        .register_job(Arc::new(TestRunnable::new(local_definition("j2"))))
        .await
        .unwrap();
    f.service
        .add_running_constraint(["j1".to_string(), "j2".to_string()].into())
        .unwrap();

    f.service.clean();
    assert!(f.service.list_job_names().is_empty());
    assert!(f.service.list_running_constraints().is_empty());
}

#[tokio::test]
async fn test_abort_flow() {
    let f = fixture();
    let runnable = TestRunnable::new(local_definition("j1").abortable()).watching_abort();
    f.service.register_job(Arc::new(runnable)).await.unwrap();

    let id = f.service.execute_job("j1").await.unwrap();
    f.service.abort_job(id).await.unwrap();

    wait_for_state(&f.repo, id, RunningState::Finished).await;
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::Aborted));
    assert_eq!(record.additional_data.get("aborted"), Some("true"));
}

#[tokio::test]
async fn test_abort_rejected_for_non_abortable_job() {
    let f = fixture();
    let (j1, gate) = TestRunnable::new(local_definition("j1")).gated();
    f.service.register_job(Arc::new(j1)).await.unwrap();

    let id = f.service.execute_job("j1").await.unwrap();
    let err = f.service.abort_job(id).await.unwrap_err();
    assert!(matches!(err, JobStoreError::JobNotAbortable { .. }));
    let record = f.repo.find_by_id(id).await.unwrap().unwrap();
    assert!(!record.abort_requested);
    gate.notify_one();
}

#[tokio::test]
async fn test_abort_unknown_record() {
    let f = fixture();
    let err = f.service.abort_job(4711).await.unwrap_err();
    assert!(matches!(err, JobStoreError::JobInfoNotFound { id: 4711 }));
}
