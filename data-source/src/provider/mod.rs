//! 数据源提供者（Provider）
//!
//! 按 URI 的 scheme 构造具体的 `EventSource`：
//! - `consul`：Consul 阻塞查询（HTTP，`consul-http` 特性）；
//! - `settings`：进程内设置存储；
//! - 任意自定义 scheme：以闭包提供拉取函数（`CallableProvider`）。
//!
use crate::error::DataSourceResult;
use crate::event_source::{BlockingPolicy, Configuration, EventSource, Fetch};
use crate::service::CacheEntry;
use crate::uri::SourceUri;
use std::collections::HashMap;
use std::sync::Arc;

pub mod callable;
#[cfg(feature = "consul-http")]
pub mod consul;
pub mod settings;

pub use callable::CallableProvider;
#[cfg(feature = "consul-http")]
pub use consul::{ConsulConfig, ConsulProvider};
pub use settings::{SettingsProvider, SettingsStore};

pub trait Provider: Send + Sync {
    /// 该提供者负责的 scheme（不含 `://`）
    fn scheme(&self) -> &str;

    /// 为 `uri` 构造一个尚未打开的数据源；`cached` 为该 URI 上一次关闭时留下的缓存
    fn source(&self, uri: &SourceUri, cached: Option<&CacheEntry>) -> DataSourceResult<EventSource>;
}

/// 以缓存条目为种子构造数据源：沿用上次的游标与最近事件
pub fn seeded_source(
    uri: &SourceUri,
    fetch: Arc<dyn Fetch>,
    configuration: Configuration,
    cached: Option<&CacheEntry>,
    policy: BlockingPolicy,
) -> EventSource {
    let (configuration, current_event) = match cached {
        Some(entry) => (
            configuration.with_cursor(Some(entry.cursor())),
            Some(entry.current_event().clone()),
        ),
        None => (configuration, None),
    };

    EventSource::builder()
        .uri(uri.to_string())
        .fetch(fetch)
        .configuration(configuration)
        .maybe_current_event(current_event)
        .policy(policy)
        .build()
}

#[derive(Clone, Default)]
pub(crate) struct ProviderRegistry {
    by_scheme: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub(crate) fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        let by_scheme = providers
            .into_iter()
            .map(|p| (p.scheme().to_string(), p))
            .collect();
        Self { by_scheme }
    }

    pub(crate) fn get(&self, scheme: &str) -> Option<&Arc<dyn Provider>> {
        self.by_scheme.get(scheme)
    }
}
