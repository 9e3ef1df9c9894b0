pub mod housekeeping_service;
pub mod job_execution;
pub mod job_info_service;
pub mod job_service;
pub mod remote_runnable;

pub use housekeeping_service::HousekeepingService;
pub use job_execution::{JobExecutionTracker, SimpleJobLogger};
pub use job_info_service::JobInfoService;
pub use job_service::JobService;
pub use remote_runnable::RemoteJobRunnable;
