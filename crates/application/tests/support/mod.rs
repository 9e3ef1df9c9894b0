//! Shared helpers for the service-level tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::sleep;

use jobstore_domain::{
    ExecutionPhase, JobDefinition, JobExecutionContext, JobInfoRepository, JobRunnable,
    OnExceptionOutcome, ResultCode, RunningState,
};
use jobstore_errors::{JobResult, JobStoreError};
use jobstore_testing_utils::MockJobInfoRepository;

const WAIT_ROUNDS: usize = 200;
const WAIT_STEP: Duration = Duration::from_millis(25);

/// Poll a synchronous condition until it holds or the test times out
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..WAIT_ROUNDS {
        if condition() {
            return;
        }
        sleep(WAIT_STEP).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_state(repo: &MockJobInfoRepository, id: i64, state: RunningState) {
    for _ in 0..WAIT_ROUNDS {
        let reached = repo
            .find_by_id(id)
            .await
            .unwrap()
            .map(|j| j.running_state == state)
            .unwrap_or(false);
        if reached {
            return;
        }
        sleep(WAIT_STEP).await;
    }
    panic!("timed out waiting for job {id} to reach {state}");
}

pub async fn wait_for_remote_uri(repo: &MockJobInfoRepository, id: i64) {
    for _ in 0..WAIT_ROUNDS {
        let stored = repo
            .find_by_id(id)
            .await
            .unwrap()
            .map(|j| j.remote_job_uri().is_some())
            .unwrap_or(false);
        if stored {
            return;
        }
        sleep(WAIT_STEP).await;
    }
    panic!("timed out waiting for remote job uri on record {id}");
}

#[derive(Default)]
pub struct CallLog {
    pub prepares: AtomicUsize,
    pub executes: AtomicUsize,
    pub after_executions: AtomicUsize,
}

/// A configurable runnable driving every worker path the scheduler knows
pub struct TestRunnable {
    definition: JobDefinition,
    pub calls: Arc<CallLog>,
    gate: Option<Arc<Notify>>,
    prepare_result: Result<bool, ()>,
    fail_execute: bool,
    recover_from_execute_failure: bool,
    result_code: Option<ResultCode>,
    watch_abort: bool,
}

impl TestRunnable {
    pub fn new(definition: JobDefinition) -> Self {
        Self {
            definition,
            calls: Arc::new(CallLog::default()),
            gate: None,
            prepare_result: Ok(true),
            fail_execute: false,
            recover_from_execute_failure: false,
            result_code: None,
            watch_abort: false,
        }
    }

    /// execute blocks until the returned Notify is triggered
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn failing_prepare(mut self) -> Self {
        self.prepare_result = Err(());
        self
    }

    pub fn skipping_prepare(mut self) -> Self {
        self.prepare_result = Ok(false);
        self
    }

    pub fn failing_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn recovering(mut self) -> Self {
        self.recover_from_execute_failure = true;
        self
    }

    pub fn with_result_code(mut self, code: ResultCode) -> Self {
        self.result_code = Some(code);
        self
    }

    /// execute spins until the abort flag shows up on the record
    pub fn watching_abort(mut self) -> Self {
        self.watch_abort = true;
        self
    }
}

#[async_trait]
impl JobRunnable for TestRunnable {
    fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    async fn prepare(&self, _context: &JobExecutionContext) -> JobResult<bool> {
        self.calls.prepares.fetch_add(1, Ordering::SeqCst);
        match self.prepare_result {
            Ok(value) => Ok(value),
            Err(()) => Err(JobStoreError::JobExecution("prepare exploded".to_string())),
        }
    }

    async fn execute(&self, context: &JobExecutionContext) -> JobResult<()> {
        self.calls.executes.fetch_add(1, Ordering::SeqCst);
        if self.watch_abort {
            for _ in 0..400 {
                if context.is_abort_requested().await? {
                    return Ok(());
                }
                sleep(Duration::from_millis(10)).await;
            }
            return Err(JobStoreError::JobExecution(
                "abort was never requested".to_string(),
            ));
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_execute {
            return Err(JobStoreError::JobExecution("execute exploded".to_string()));
        }
        if let Some(code) = self.result_code {
            context.set_result_code(code);
        }
        Ok(())
    }

    async fn after_execution(&self, _context: &JobExecutionContext) -> JobResult<()> {
        self.calls.after_executions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_exception(
        &self,
        _context: &JobExecutionContext,
        error: JobStoreError,
        phase: ExecutionPhase,
    ) -> OnExceptionOutcome {
        if phase == ExecutionPhase::Execute && self.recover_from_execute_failure {
            OnExceptionOutcome::Recovered
        } else {
            OnExceptionOutcome::Terminal(error)
        }
    }
}
