//! 阻塞查询策略（BlockingPolicy）
//!
//! 组合运行循环所需的策略：错误退避、派发后的节流间隔与可选的连续错误上限。
//!
use super::backoff::{DEFAULT_ERROR_BACKOFF, ErrorBackoff};
use super::configuration::Configuration;
use super::timer::{Timer, TokioTimer};
use std::sync::Arc;
use std::time::Duration;

/// 默认的派发间隔（服务端未给出 `interval` 时使用）
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

/// 阻塞查询配置
#[derive(Clone, Copy, Debug)]
pub struct BlockingConfig {
    /// 瞬时错误后的重试延时
    pub error_backoff: Duration,
    /// 两次拉取之间的默认间隔
    pub default_interval: Duration,
    /// 连续终态错误达到该次数后自行关闭；`None` 表示不设上限
    pub error_ceiling: Option<u32>,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            error_backoff: DEFAULT_ERROR_BACKOFF,
            default_interval: DEFAULT_INTERVAL,
            error_ceiling: None,
        }
    }
}

#[derive(Clone)]
pub struct BlockingPolicy {
    config: BlockingConfig,
    backoff: ErrorBackoff,
    timer: Arc<dyn Timer>,
}

impl Default for BlockingPolicy {
    fn default() -> Self {
        Self::new(BlockingConfig::default())
    }
}

impl BlockingPolicy {
    pub fn new(config: BlockingConfig) -> Self {
        Self::with_timer(config, Arc::new(TokioTimer))
    }

    pub fn with_timer(config: BlockingConfig, timer: Arc<dyn Timer>) -> Self {
        Self {
            config,
            backoff: ErrorBackoff::with_timer(config.error_backoff, timer.clone()),
            timer,
        }
    }

    pub fn config(&self) -> &BlockingConfig {
        &self.config
    }

    pub fn backoff(&self) -> &ErrorBackoff {
        &self.backoff
    }

    pub fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    /// 派发后到下一次拉取之间的间隔：优先采用服务端建议值
    pub fn pause(&self, configuration: &Configuration) -> Duration {
        configuration
            .interval()
            .unwrap_or(self.config.default_interval)
    }

    pub fn ceiling_reached(&self, consecutive_errors: u32) -> bool {
        self.config
            .error_ceiling
            .is_some_and(|ceiling| consecutive_errors >= ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Meta;

    #[test]
    fn pause_prefers_server_interval() {
        let policy = BlockingPolicy::default();
        assert_eq!(policy.pause(&Configuration::new()), DEFAULT_INTERVAL);

        let configured = Configuration::new()
            .apply_meta(&Meta::builder().interval(Duration::from_millis(250)).build());
        assert_eq!(policy.pause(&configured), Duration::from_millis(250));
    }

    #[test]
    fn ceiling_is_opt_in() {
        let unbounded = BlockingPolicy::default();
        assert!(!unbounded.ceiling_reached(u32::MAX));

        let bounded = BlockingPolicy::new(BlockingConfig {
            error_ceiling: Some(3),
            ..Default::default()
        });
        assert!(!bounded.ceiling_reached(2));
        assert!(bounded.ceiling_reached(3));
    }
}
