//! # jobstore-common
//!
//! 作业执行服务的共享常量与工具函数

pub mod constants;
pub mod utils;

pub use constants::*;
pub use utils::*;

pub use jobstore_errors::{JobResult, JobStoreError};
