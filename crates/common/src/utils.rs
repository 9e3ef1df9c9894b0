//! 通用工具函数

use jobstore_errors::{JobResult, JobStoreError};

/// 主机标识工具
pub mod host {
    /// 获取本机主机名，失败时退回 "unknown-host"
    pub fn host_name() -> String {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string())
    }

    /// 当前执行线程的标签，记录到作业记录的 thread 字段
    pub fn thread_label() -> String {
        std::thread::current()
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{:?}", std::thread::current().id()))
    }
}

/// 校验工具
pub mod validation {
    use super::*;

    /// 校验作业名称：非空、长度受限、仅允许字母数字与 `_` `-` `.`
    pub fn validate_job_name(name: &str) -> JobResult<()> {
        if name.is_empty() {
            return Err(JobStoreError::Validation("作业名称不能为空".to_string()));
        }
        if name.len() > crate::constants::MAX_JOB_NAME_LENGTH {
            return Err(JobStoreError::Validation(format!(
                "作业名称过长: {} > {}",
                name.len(),
                crate::constants::MAX_JOB_NAME_LENGTH
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(JobStoreError::Validation(format!(
                "作业名称包含非法字符: {name}"
            )));
        }
        Ok(())
    }
}
