use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use jobstore_domain::{JobExecutionPriority, PropertyBag, ResultCode};
use jobstore_errors::JobStoreError;

use crate::error::{ApiError, ApiResult};
use crate::representation::{
    FeedRepresentation, JobInfoRepresentation, JobNameEntry, MAX_LOG_LINES, OTTO_JOBS_JSON,
};
use crate::routes::AppState;

/// 以 application/vnd.otto.jobs+json 输出
fn jobs_json<T: serde::Serialize>(value: &T) -> ApiResult<Response> {
    let body = serde_json::to_string(value)
        .map_err(|e| ApiError::Job(JobStoreError::Serialization(e)))?;
    Response::builder()
        .header(header::CONTENT_TYPE, OTTO_JOBS_JSON)
        .body(Body::from(body))
        .map_err(|e| ApiError::Job(JobStoreError::Internal(e.to_string())))
}

async fn build_status(state: &AppState) -> ApiResult<Json<serde_json::Value>> {
    let enabled = state.job_service.is_execution_enabled();
    let local_running = state.job_service.has_local_running_jobs().await?;
    Ok(Json(json!({
        "status": if enabled { "enabled" } else { "disabled" },
        "localRunningJobs": local_running
    })))
}

/// GET /jobs：已注册作业名清单，每项链接到 /jobs/{name}
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Response> {
    let entries: Vec<JobNameEntry> = state
        .job_service
        .list_job_names()
        .into_iter()
        .map(|name| JobNameEntry {
            link: format!("/jobs/{name}"),
            name,
        })
        .collect();
    let feed = FeedRepresentation {
        title: "Job Names".to_string(),
        subtitle: "A list of the available distinct job names".to_string(),
        updated: Utc::now(),
        entries,
    };
    jobs_json(&feed)
}

/// POST /jobs/enable：打开全局执行开关
pub async fn enable_job_execution(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.job_service.set_execution_enabled(true);
    build_status(&state).await
}

/// POST /jobs/disable：关闭全局执行开关
pub async fn disable_job_execution(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.job_service.set_execution_enabled(false);
    build_status(&state).await
}

/// GET /jobs/status
pub async fn execution_status(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    build_status(&state).await
}

/// POST /jobs/{name}：以 FORCE_EXECUTION 触发执行。
/// 每个查询参数贡献一个作业参数；空值或重复键拒绝
pub async fn execute_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(raw_params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let parameters = extract_parameters(raw_params)?;
    let id = state
        .job_service
        .execute_job_with(&name, JobExecutionPriority::ForceExecution, parameters)
        .await?;
    let location = format!("/jobs/{name}/{id}");
    Ok((StatusCode::CREATED, [(header::LOCATION, location)]).into_response())
}

fn extract_parameters(raw: Vec<(String, String)>) -> ApiResult<PropertyBag> {
    let mut parameters = PropertyBag::new();
    for (key, value) in raw {
        if value.is_empty() {
            return Err(ApiError::BadRequest(format!("参数 {key} 没有值")));
        }
        if !parameters.insert(key.clone(), value) {
            return Err(ApiError::BadRequest(format!("参数 {key} 有多个值")));
        }
    }
    Ok(parameters)
}

#[derive(Debug, Deserialize)]
pub struct SizeQuery {
    size: Option<i64>,
}

/// GET /jobs/{name}?size=N：该名称最近 N 条记录，默认 10
pub async fn jobs_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SizeQuery>,
) -> ApiResult<Response> {
    let size = query.size.unwrap_or(10);
    let jobs = state.job_info_service.get_by_name(&name, size).await?;
    let entries: Vec<serde_json::Value> = jobs
        .iter()
        .map(|job| {
            json!({
                "link": format!("/jobs/{}/{}", name, job.id),
                "content": JobInfoRepresentation::from_job_info(job, MAX_LOG_LINES),
            })
        })
        .collect();
    let feed = FeedRepresentation {
        title: "JobInfo Objects".to_string(),
        subtitle: format!("A list of the {size} most recent jobInfo objects with name {name}"),
        updated: Utc::now(),
        entries,
    };
    jobs_json(&feed)
}

/// POST /jobs/{name}/enable
pub async fn enable_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.job_service.set_job_execution_enabled(&name, true).await?;
    Ok(Json(json!({ "status": "enabled" })))
}

/// POST /jobs/{name}/disable
pub async fn disable_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .job_service
        .set_job_execution_enabled(&name, false)
        .await?;
    Ok(Json(json!({ "status": "disabled" })))
}

/// GET /jobs/{name}/{id}：单条记录，名称不匹配视为不存在
pub async fn get_job(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id: i64 = id.parse().map_err(|_| ApiError::NotFound)?;
    let job = state
        .job_info_service
        .get_by_id(id)
        .await?
        .filter(|job| job.name == name)
        .ok_or(ApiError::NotFound)?;
    jobs_json(&JobInfoRepresentation::from_job_info(&job, MAX_LOG_LINES))
}

/// POST /jobs/{name}/{id}/abort
pub async fn abort_job(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let id: i64 = id.parse().map_err(|_| ApiError::NotFound)?;
    state
        .job_info_service
        .get_by_id(id)
        .await?
        .filter(|job| job.name == name)
        .ok_or(ApiError::NotFound)?;
    state.job_service.abort_job(id).await?;
    Ok(StatusCode::OK)
}

/// GET /jobs/history?hours=H&resultCode=…&jobName=…
/// 按名称分组的时间窗内记录。不带 jobName 时只返回空骨架
pub async fn jobs_history(
    State(state): State<AppState>,
    Query(raw_params): Query<Vec<(String, String)>>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut hours: i64 = 12;
    let mut result_codes: Vec<ResultCode> = Vec::new();
    let mut job_names: Vec<String> = Vec::new();
    for (key, value) in raw_params {
        match key.as_str() {
            "hours" => {
                hours = value
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("hours 不是数字: {value}")))?;
            }
            "resultCode" => result_codes.push(value.parse()?),
            "jobName" => job_names.push(value),
            _ => {}
        }
    }

    let to = Utc::now();
    let from = to - Duration::hours(hours);
    let codes = (!result_codes.is_empty()).then_some(result_codes.as_slice());

    let mut history = serde_json::Map::new();
    for name in state.job_service.list_job_names() {
        if job_names.is_empty() {
            // 第一次调用先拿名称骨架，值需要带 jobName 再查
            history.insert(name, json!([]));
        } else if job_names.contains(&name) {
            let records = state
                .job_info_service
                .get_by_name_and_time_range(&name, from, to, codes)
                .await?;
            let representations: Vec<JobInfoRepresentation> = records
                .iter()
                .map(|job| JobInfoRepresentation::from_job_info(job, MAX_LOG_LINES))
                .collect();
            let value = serde_json::to_value(representations)
                .map_err(|e| ApiError::Job(JobStoreError::Serialization(e)))?;
            history.insert(name, value);
        }
    }
    Ok(Json(serde_json::Value::Object(history)))
}
