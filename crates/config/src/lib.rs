pub mod models;

pub use models::{
    ApiConfig, AppConfig, DatabaseConfig, HousekeepingConfig, RemoteExecutorConfig,
    SchedulerConfig,
};
