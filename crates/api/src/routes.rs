use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use jobstore_application::{JobInfoService, JobService};

use crate::handlers::jobs::{
    abort_job, disable_job, disable_job_execution, enable_job, enable_job_execution,
    execute_job, execution_status, get_job, jobs_by_name, jobs_history, list_jobs,
};

#[derive(Clone)]
pub struct AppState {
    pub job_service: Arc<JobService>,
    pub job_info_service: Arc<JobInfoService>,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/enable", post(enable_job_execution))
        .route("/jobs/disable", post(disable_job_execution))
        .route("/jobs/status", get(execution_status))
        .route("/jobs/history", get(jobs_history))
        .route("/jobs/{name}", get(jobs_by_name).post(execute_job))
        .route("/jobs/{name}/enable", post(enable_job))
        .route("/jobs/{name}/disable", post(disable_job))
        .route("/jobs/{name}/{id}", get(get_job))
        .route("/jobs/{name}/{id}/abort", post(abort_job))
        .with_state(state)
}
