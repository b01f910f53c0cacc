//! 计时器（Timer）
//!
//! 退避与节流共用的延时抽象，默认由 tokio 驱动；测试中可替换为记录调用的实现。
//!
use futures_util::future::BoxFuture;
use std::time::Duration;

pub trait Timer: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
