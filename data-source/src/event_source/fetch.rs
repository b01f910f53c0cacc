//! 拉取函数（Fetch）
//!
//! 数据源运行循环每轮调用一次的异步函数。关闭数据源时正在执行的 future 会被直接丢弃，
//! 因此实现无需自行处理取消。
//!
use super::configuration::Configuration;
use super::source::EventSource;
use crate::error::DataSourceResult;
use crate::event::Fetched;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait Fetch: Send + Sync {
    /// `configuration` 为本轮快照；`source` 为所属数据源，可用于直接派发事件
    async fn fetch(
        &self,
        configuration: Configuration,
        source: EventSource,
    ) -> DataSourceResult<Fetched>;
}

/// 以闭包实现的拉取函数
pub struct FetchFn<F>(F);

#[async_trait]
impl<F, Fut> Fetch for FetchFn<F>
where
    F: Fn(Configuration, EventSource) -> Fut + Send + Sync,
    Fut: Future<Output = DataSourceResult<Fetched>> + Send + 'static,
{
    async fn fetch(
        &self,
        configuration: Configuration,
        source: EventSource,
    ) -> DataSourceResult<Fetched> {
        (self.0)(configuration, source).await
    }
}

pub fn fetch_fn<F, Fut>(f: F) -> Arc<dyn Fetch>
where
    F: Fn(Configuration, EventSource) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DataSourceResult<Fetched>> + Send + 'static,
{
    Arc::new(FetchFn(f))
}
