//! 事件源子系统（event_source）
//!
//! 以组合而非继承的方式实现“可调用 → 可开关 → 阻塞查询”三层语义：
//! - `EventSource`：共享句柄、就绪状态与事件派发；
//! - `Fetch`：每轮调用的拉取函数；
//! - `BlockingPolicy`：错误退避、节流间隔与错误上限；
//! - `Configuration`：游标/缓存控制/间隔等逐轮推进的状态。
//!
pub mod backoff;
pub mod blocking;
pub mod configuration;
pub mod fetch;
mod runner;
pub mod source;
pub mod timer;

pub use backoff::{ErrorBackoff, is_retryable_status};
pub use blocking::{BlockingConfig, BlockingPolicy};
pub use configuration::{Configuration, CreateEvent};
pub use fetch::{Fetch, FetchFn, fetch_fn};
pub use source::{EventSource, ReadyState, WeakEventSource};
pub use timer::{Timer, TokioTimer};
