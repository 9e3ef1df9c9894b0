use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use jobstore_api::routes::AppState;
use jobstore_api::create_app;
use jobstore_application::{HousekeepingService, JobInfoService, JobService};
use jobstore_config::AppConfig;
use jobstore_domain::{EmptyScriptArchive, JobDefinitionRepository, JobInfoRepository, RemoteJobExecutor};
use jobstore_infrastructure::{
    DatabaseManager, PostgresJobDefinitionRepository, PostgresJobInfoRepository,
};
use jobstore_remote::HttpRemoteJobExecutor;

use crate::shutdown::ShutdownManager;

/// 组装完成的服务上下文。嵌入方在 `Application::init` 之后、
/// `Application::run` 之前向 `job_service` 注册各自的 runnable
pub struct AppContext {
    pub pool: PgPool,
    pub job_info_repository: Arc<dyn JobInfoRepository>,
    pub job_definition_repository: Arc<dyn JobDefinitionRepository>,
    pub job_service: Arc<JobService>,
    pub job_info_service: Arc<JobInfoService>,
    pub housekeeping_service: Arc<HousekeepingService>,
    /// 配置了远程执行器地址时可用
    pub remote_executor: Option<Arc<dyn RemoteJobExecutor>>,
}

/// 主应用：建池、装配服务、驱动周期循环与 API 服务
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn init(&self) -> Result<AppContext> {
        info!("初始化 jobstore 应用");
        let pool = DatabaseManager::create_pool(&self.config.database)
            .await
            .context("创建数据库连接池失败")?;
        DatabaseManager::init_schema(&pool)
            .await
            .context("初始化表结构失败")?;

        let job_info_repository: Arc<dyn JobInfoRepository> = Arc::new(
            PostgresJobInfoRepository::new(pool.clone())
                .with_max_log_lines(self.config.scheduler.max_log_lines),
        );
        let job_definition_repository: Arc<dyn JobDefinitionRepository> =
            Arc::new(PostgresJobDefinitionRepository::new(pool.clone()));

        let job_service = Arc::new(JobService::new(
            job_info_repository.clone(),
            job_definition_repository.clone(),
        ));
        let job_info_service = Arc::new(JobInfoService::new(job_info_repository.clone()));
        let housekeeping_service = Arc::new(HousekeepingService::new(
            job_info_repository.clone(),
            job_service.execution_tracker(),
            self.config.housekeeping.retention_days,
        ));

        let remote_executor: Option<Arc<dyn RemoteJobExecutor>> =
            if self.config.remote.base_url.is_empty() {
                None
            } else {
                let executor = HttpRemoteJobExecutor::with_timeouts(
                    self.config.remote.base_url.clone(),
                    Arc::new(EmptyScriptArchive),
                    Duration::from_millis(self.config.remote.connect_timeout_ms),
                    Duration::from_millis(self.config.remote.read_timeout_ms),
                )
                .map_err(|e| anyhow::anyhow!("构建远程执行器客户端失败: {e}"))?;
                Some(Arc::new(executor))
            };

        Ok(AppContext {
            pool,
            job_info_repository,
            job_definition_repository,
            job_service,
            job_info_service,
            housekeeping_service,
            remote_executor,
        })
    }

    /// 运行到收到关闭信号为止，退出前做停机清扫
    pub async fn run(&self, context: AppContext, shutdown: ShutdownManager) -> Result<()> {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let scheduler_config = &self.config.scheduler;
        handles.push(tokio::spawn(run_queue_drain_loop(
            context.job_service.clone(),
            scheduler_config.queue_drain_interval_seconds,
            shutdown.subscribe().await,
        )));
        handles.push(tokio::spawn(run_remote_poll_loop(
            context.job_service.clone(),
            scheduler_config.remote_poll_interval_seconds,
            shutdown.subscribe().await,
        )));
        handles.push(tokio::spawn(run_housekeeping_loop(
            context.housekeeping_service.clone(),
            scheduler_config.housekeeping_interval_seconds,
            shutdown.subscribe().await,
        )));

        if self.config.api.enabled {
            let state = AppState {
                job_service: context.job_service.clone(),
                job_info_service: context.job_info_service.clone(),
            };
            let app = create_app(state);
            let listener = TcpListener::bind(&self.config.api.bind_address)
                .await
                .with_context(|| format!("监听 {} 失败", self.config.api.bind_address))?;
            info!("API 服务监听 {}", self.config.api.bind_address);
            let mut shutdown_rx = shutdown.subscribe().await;
            handles.push(tokio::spawn(async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    error!("API 服务异常退出: {}", e);
                }
            }));
        }

        shutdown.wait_for_shutdown().await;
        info!("开始停机清扫");
        if let Err(e) = context.job_service.shutdown_jobs().await {
            error!("停机清扫失败: {}", e);
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("jobstore 应用已退出");
        Ok(())
    }
}

async fn run_queue_drain_loop(
    job_service: Arc<JobService>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = job_service.execute_queued_jobs().await {
                    error!("队列排空失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("队列排空循环退出");
                break;
            }
        }
    }
}

async fn run_remote_poll_loop(
    job_service: Arc<JobService>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = job_service.poll_remote_jobs().await {
                    error!("远程作业轮询失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("远程作业轮询循环退出");
                break;
            }
        }
    }
}

async fn run_housekeeping_loop(
    housekeeping_service: Arc<HousekeepingService>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = housekeeping_service.run_once().await {
                    error!("后台清扫失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("后台清扫循环退出");
                break;
            }
        }
    }
}
