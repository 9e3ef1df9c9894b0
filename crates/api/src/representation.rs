use chrono::{DateTime, Utc};
use serde::Serialize;

use jobstore_domain::{JobExecutionPriority, JobInfo, LogLine, PropertyBag, ResultCode, RunningState};

/// 自定义媒体类型
pub const OTTO_JOBS_JSON: &str = "application/vnd.otto.jobs+json";

/// 单条记录对外暴露的日志行上限
pub const MAX_LOG_LINES: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLineRepresentation {
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&LogLine> for LogLineRepresentation {
    fn from(log_line: &LogLine) -> Self {
        Self {
            line: log_line.line.clone(),
            timestamp: log_line.timestamp,
        }
    }
}

/// 作业记录的对外表示，日志行只保留最近的 `MAX_LOG_LINES` 条
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfoRepresentation {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub thread: String,
    pub running_state: RunningState,
    pub execution_priority: JobExecutionPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<ResultCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub last_modified_at: DateTime<Utc>,
    pub max_execution_ms: i64,
    pub max_idle_ms: i64,
    pub parameters: PropertyBag,
    pub additional_data: PropertyBag,
    pub log_lines: Vec<LogLineRepresentation>,
    pub abort_requested: bool,
}

impl JobInfoRepresentation {
    pub fn from_job_info(job_info: &JobInfo, max_log_lines: usize) -> Self {
        let skip = job_info.log_lines.len().saturating_sub(max_log_lines);
        Self {
            id: job_info.id,
            name: job_info.name.clone(),
            host: job_info.host.clone(),
            thread: job_info.thread.clone(),
            running_state: job_info.running_state,
            execution_priority: job_info.execution_priority,
            result_code: job_info.result_code,
            result_message: job_info.result_message.clone(),
            status_message: job_info.status_message.clone(),
            created_at: job_info.created_at,
            started_at: job_info.started_at,
            finished_at: job_info.finished_at,
            last_modified_at: job_info.last_modified_at,
            max_execution_ms: job_info.max_execution_ms,
            max_idle_ms: job_info.max_idle_ms,
            parameters: job_info.parameters.clone(),
            additional_data: job_info.additional_data.clone(),
            log_lines: job_info.log_lines[skip..].iter().map(Into::into).collect(),
            abort_requested: job_info.abort_requested,
        }
    }
}

/// 名称清单条目，带指向 /jobs/{name} 的链接
#[derive(Debug, Clone, Serialize)]
pub struct JobNameEntry {
    pub name: String,
    pub link: String,
}

/// 列表端点的 JSON 文档（Atom 封装属于外部协作方，这里输出等价的
/// JSON 结构）
#[derive(Debug, Clone, Serialize)]
pub struct FeedRepresentation<T: Serialize> {
    pub title: String,
    pub subtitle: String,
    pub updated: DateTime<Utc>,
    pub entries: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_domain::LogLine;

    fn job_with_lines(count: usize) -> JobInfo {
        JobInfo {
            id: 1,
            name: "j1".to_string(),
            host: "h".to_string(),
            thread: "t".to_string(),
            running_state: RunningState::Running,
            execution_priority: JobExecutionPriority::CheckPreconditions,
            result_code: None,
            result_message: None,
            status_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            last_modified_at: Utc::now(),
            max_execution_ms: 1,
            max_idle_ms: 1,
            parameters: PropertyBag::new(),
            additional_data: PropertyBag::new(),
            log_lines: (0..count).map(|i| LogLine::new(format!("line-{i}"))).collect(),
            abort_requested: false,
        }
    }

    #[test]
    fn test_log_lines_are_capped_to_most_recent() {
        let representation = JobInfoRepresentation::from_job_info(&job_with_lines(150), 100);
        assert_eq!(representation.log_lines.len(), 100);
        assert_eq!(representation.log_lines[0].line, "line-50");
        assert_eq!(representation.log_lines[99].line, "line-149");
    }

    #[test]
    fn test_small_log_list_is_kept() {
        let representation = JobInfoRepresentation::from_job_info(&job_with_lines(3), 100);
        assert_eq!(representation.log_lines.len(), 3);
    }

    #[test]
    fn test_serialization_uses_camel_case() {
        let representation = JobInfoRepresentation::from_job_info(&job_with_lines(0), 100);
        let json = serde_json::to_value(&representation).unwrap();
        assert!(json.get("runningState").is_some());
        assert!(json.get("executionPriority").is_some());
        assert!(json.get("abortRequested").is_some());
        assert_eq!(json["runningState"], "RUNNING");
    }
}
