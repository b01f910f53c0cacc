//! 错误退避（ErrorBackoff）
//!
//! 将拉取错误分为两类：
//! - 瞬时错误（状态 `0` 或除 `500` 外的 `5xx`）：吞掉错误，延时后重试；
//! - 其余错误：原样返回，由运行循环作为 `error` 事件派发。
//!
use super::timer::{Timer, TokioTimer};
use crate::error::DataSourceError;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(3000);

/// 状态码是否属于可重试的瞬时错误
pub fn is_retryable_status(status: &str) -> bool {
    if status == "0" {
        return true;
    }
    status.len() == 3
        && status.starts_with('5')
        && status.bytes().all(|b| b.is_ascii_digit())
        && status != "500"
}

#[derive(Clone)]
pub struct ErrorBackoff {
    delay: Duration,
    timer: Arc<dyn Timer>,
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_BACKOFF)
    }
}

impl ErrorBackoff {
    pub fn new(delay: Duration) -> Self {
        Self::with_timer(delay, Arc::new(TokioTimer))
    }

    pub fn with_timer(delay: Duration, timer: Arc<dyn Timer>) -> Self {
        Self { delay, timer }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 瞬时错误返回一个在 `delay` 后产出原错误的 future（恰好调度一次计时器）；
    /// 其余错误立即以 `Err` 返回
    pub fn backoff(
        &self,
        err: DataSourceError,
    ) -> Result<BoxFuture<'static, DataSourceError>, DataSourceError> {
        let retryable = err.status().as_deref().is_some_and(is_retryable_status);
        if !retryable {
            return Err(err);
        }

        debug!(error = %err, delay_ms = self.delay.as_millis() as u64, "transient error, backing off");
        let sleep = self.timer.sleep(self.delay);
        Ok(Box::pin(async move {
            sleep.await;
            err
        }))
    }
}
