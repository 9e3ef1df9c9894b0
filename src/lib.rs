//! 嵌入式入口：应用装配与优雅关闭。
//!
//! 库的核心都在 `crates/` 下的工作区成员里；这里只负责把它们组装成
//! 可运行的服务进程。嵌入方通常 `Application::init` 拿到上下文、注册
//! 自己的 runnable，然后 `Application::run`。

pub mod app;
pub mod shutdown;

pub use app::{AppContext, Application};
pub use shutdown::ShutdownManager;
