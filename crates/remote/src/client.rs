use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONNECTION, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use tracing::{info, warn};

use jobstore_domain::{RemoteJob, RemoteJobExecutor, RemoteJobStatus, ScriptArchiveProvider};
use jobstore_errors::{JobResult, JobStoreError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);
const CLIENT_USER_AGENT: &str = "jobstore-remote-executor";

/// 基于 HTTP 的远程执行器客户端。
///
/// 启动请求是一个两段 multipart：`scripts` 段携带 tar.gz 归档
/// （文件名 scripts.tar.gz，application/octet-stream），`params` 段携带
/// `{name, id, parameters}` 的 JSON。`201 + Link` 表示启动成功；
/// `200/303 + Link` 表示远端已有同名作业在运行，调用方应复用返回的 URI。
pub struct HttpRemoteJobExecutor {
    executor_uri: String,
    client: reqwest::Client,
    archive_provider: Arc<dyn ScriptArchiveProvider>,
}

impl HttpRemoteJobExecutor {
    pub fn new(
        executor_uri: impl Into<String>,
        archive_provider: Arc<dyn ScriptArchiveProvider>,
    ) -> JobResult<Self> {
        Self::with_timeouts(
            executor_uri,
            archive_provider,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_READ_TIMEOUT,
        )
    }

    pub fn with_timeouts(
        executor_uri: impl Into<String>,
        archive_provider: Arc<dyn ScriptArchiveProvider>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> JobResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| JobStoreError::Internal(format!("构建 HTTP 客户端失败: {e}")))?;

        let executor_uri = executor_uri.into().trim_end_matches('/').to_string();
        Ok(Self {
            executor_uri,
            client,
            archive_provider,
        })
    }

    fn start_url(&self, job_name: &str) -> String {
        format!("{}/{}/start", self.executor_uri, job_name)
    }

    /// Link 头中的路径相对执行器基础地址解析
    fn resolve_job_uri(&self, link: &str) -> JobResult<String> {
        let base = Url::parse(&format!("{}/", self.executor_uri)).map_err(|e| {
            JobStoreError::JobExecution(format!("远程执行器地址非法: {} ({e})", self.executor_uri))
        })?;
        let resolved = base
            .join(link)
            .map_err(|e| JobStoreError::JobExecution(format!("无法解析作业 URI: {link} ({e})")))?;
        Ok(resolved.to_string())
    }

    fn extract_link(response: &reqwest::Response, url: &str) -> JobResult<String> {
        response
            .headers()
            .get("Link")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                JobStoreError::JobExecution(format!("远程执行器未返回 Link 头: url={url}"))
            })
    }
}

#[async_trait]
impl RemoteJobExecutor for HttpRemoteJobExecutor {
    fn executor_uri(&self) -> &str {
        &self.executor_uri
    }

    async fn start_job(&self, job: &RemoteJob) -> JobResult<String> {
        let start_url = self.start_url(&job.name);
        info!("启动远程作业: {} ...", start_url);

        let archive = self.archive_provider.archive(job)?;
        let params = serde_json::to_string(job)?;

        let scripts_part = Part::bytes(archive)
            .file_name("scripts.tar.gz")
            .mime_str("application/octet-stream")
            .map_err(|e| JobStoreError::Internal(format!("构建 scripts 段失败: {e}")))?;
        let params_part = Part::text(params)
            .mime_str("application/json; charset=UTF-8")
            .map_err(|e| JobStoreError::Internal(format!("构建 params 段失败: {e}")))?;
        let form = Form::new()
            .part("scripts", scripts_part)
            .part("params", params_part);

        let response = self
            .client
            .post(&start_url)
            .multipart(form)
            .header(CONNECTION, "close")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await
            .map_err(|e| JobStoreError::JobExecution(format!("启动远程作业失败: url={start_url} ({e})")))?;

        match response.status() {
            StatusCode::CREATED => {
                let link = Self::extract_link(&response, &start_url)?;
                self.resolve_job_uri(&link)
            }
            StatusCode::OK | StatusCode::SEE_OTHER => {
                let link = Self::extract_link(&response, &start_url)?;
                let job_uri = self.resolve_job_uri(&link)?;
                Err(JobStoreError::RemoteJobAlreadyRunning {
                    message: format!("远程作业已在运行: url={start_url}"),
                    job_uri,
                })
            }
            status => Err(JobStoreError::JobExecution(format!(
                "无法启动远程作业: url={start_url} rc={}",
                status.as_u16()
            ))),
        }
    }

    async fn status(&self, job_uri: &str) -> JobResult<RemoteJobStatus> {
        let response = self
            .client
            .get(job_uri)
            .header(CONNECTION, "close")
            .send()
            .await
            .map_err(|e| JobStoreError::JobExecution(format!("查询远程作业状态失败: url={job_uri} ({e})")))?;

        if !response.status().is_success() {
            return Err(JobStoreError::JobExecution(format!(
                "远程作业状态接口返回异常: url={job_uri} rc={}",
                response.status().as_u16()
            )));
        }

        response
            .json::<RemoteJobStatus>()
            .await
            .map_err(|e| JobStoreError::JobExecution(format!("远程作业状态解析失败: url={job_uri} ({e})")))
    }

    async fn stop_job(&self, job_uri: &str) -> JobResult<()> {
        let stop_url = format!("{}/stop", job_uri.trim_end_matches('/'));
        info!("停止远程作业: {} ...", stop_url);

        let response = self
            .client
            .post(&stop_url)
            .header(CONNECTION, "close")
            .send()
            .await
            .map_err(|e| JobStoreError::JobExecution(format!("停止远程作业失败: url={stop_url} ({e})")))?;

        match response.status() {
            StatusCode::FORBIDDEN => Err(JobStoreError::RemoteJobNotRunning {
                uri: stop_url,
            }),
            status if status.is_success() => Ok(()),
            status => Err(JobStoreError::JobExecution(format!(
                "停止远程作业返回异常: url={stop_url} rc={}",
                status.as_u16()
            ))),
        }
    }

    async fn is_alive(&self) -> bool {
        match self.client.get(&self.executor_uri).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("远程执行器存活检查失败: {} ({e})", self.executor_uri);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use jobstore_domain::{EmptyScriptArchive, PropertyBag, RemoteJobState};

    async fn start_handler(Path(name): Path<String>) -> impl IntoResponse {
        let mut headers = HeaderMap::new();
        match name.as_str() {
            "fresh-job" => {
                headers.insert("Link", "jobs/abc-1".parse().unwrap());
                (StatusCode::CREATED, headers)
            }
            "busy-job" => {
                headers.insert("Link", "jobs/busy-7".parse().unwrap());
                (StatusCode::SEE_OTHER, headers)
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, headers),
        }
    }

    async fn status_handler() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "status": "RUNNING",
            "log_lines": ["l1", "l2"],
            "message": "bar"
        }))
    }

    async fn stop_handler() -> StatusCode {
        StatusCode::FORBIDDEN
    }

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route("/{name}/start", post(start_handler))
            .route("/jobs/{id}", get(status_handler))
            .route("/jobs/{id}/stop", post(stop_handler))
            .route("/", get(|| async { StatusCode::OK }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn remote_job(name: &str) -> RemoteJob {
        RemoteJob {
            name: name.to_string(),
            id: 42,
            parameters: PropertyBag::from([("depth", "3")]),
        }
    }

    fn executor(base: &str) -> HttpRemoteJobExecutor {
        HttpRemoteJobExecutor::new(base, Arc::new(EmptyScriptArchive)).unwrap()
    }

    #[tokio::test]
    async fn test_start_job_returns_resolved_job_uri() {
        let base = spawn_stub().await;
        let uri = executor(&base).start_job(&remote_job("fresh-job")).await.unwrap();
        assert_eq!(uri, format!("{base}/jobs/abc-1"));
    }

    #[tokio::test]
    async fn test_start_job_already_running_carries_existing_uri() {
        let base = spawn_stub().await;
        let err = executor(&base)
            .start_job(&remote_job("busy-job"))
            .await
            .unwrap_err();
        match err {
            JobStoreError::RemoteJobAlreadyRunning { job_uri, .. } => {
                assert_eq!(job_uri, format!("{base}/jobs/busy-7"));
            }
            other => panic!("expected RemoteJobAlreadyRunning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_job_error_status_maps_to_execution_error() {
        let base = spawn_stub().await;
        let err = executor(&base)
            .start_job(&remote_job("broken-job"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::JobExecution(_)));
    }

    #[tokio::test]
    async fn test_status_parses_remote_payload() {
        let base = spawn_stub().await;
        let status = executor(&base)
            .status(&format!("{base}/jobs/abc-1"))
            .await
            .unwrap();
        assert_eq!(status.status, RemoteJobState::Running);
        assert_eq!(status.log_lines, vec!["l1".to_string(), "l2".to_string()]);
        assert_eq!(status.message.as_deref(), Some("bar"));
    }

    #[tokio::test]
    async fn test_stop_forbidden_maps_to_not_running() {
        let base = spawn_stub().await;
        let err = executor(&base)
            .stop_job(&format!("{base}/jobs/abc-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::RemoteJobNotRunning { .. }));
    }

    #[tokio::test]
    async fn test_is_alive() {
        let base = spawn_stub().await;
        assert!(executor(&base).is_alive().await);
        assert!(!executor("http://127.0.0.1:1").is_alive().await);
    }
}
