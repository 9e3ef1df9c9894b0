//! 系统常量定义

/// additionalData 中远程作业 URI 的键名
pub const REMOTE_JOB_URI_KEY: &str = "remoteJobUri";

/// additionalData 中远程作业退出码的键名
pub const EXIT_CODE_KEY: &str = "exitCode";

/// additionalData 中复用已运行远程作业的审计键名
pub const RESUMED_ALREADY_RUNNING_JOB_KEY: &str = "resumedAlreadyRunningJob";

/// additionalData 中记录被高优先级请求挤掉的排队作业的审计键名
pub const DISPLACED_JOB_ID_KEY: &str = "displacedJobId";

/// additionalData 中中止标记的键名
pub const ABORTED_KEY: &str = "aborted";

/// 单条作业记录保留日志行数的默认上限，超出后丢弃最旧的行
pub const DEFAULT_MAX_LOG_LINES: usize = 100;

/// 作业名称的最大长度
pub const MAX_JOB_NAME_LENGTH: usize = 255;
