//! 闭包提供者（CallableProvider）
//!
//! 将任意 `Fn(&SourceUri) -> Arc<dyn Fetch>` 注册为某个 scheme 的提供者。
//!
use super::{Provider, seeded_source};
use crate::error::DataSourceResult;
use crate::event_source::{BlockingPolicy, Configuration, EventSource, Fetch};
use crate::service::CacheEntry;
use crate::uri::SourceUri;
use std::sync::Arc;

type FetchFactory = Arc<dyn Fn(&SourceUri) -> Arc<dyn Fetch> + Send + Sync>;

#[derive(Clone)]
pub struct CallableProvider {
    scheme: String,
    factory: FetchFactory,
    configuration: Configuration,
    policy: BlockingPolicy,
}

impl CallableProvider {
    pub fn new<F>(scheme: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&SourceUri) -> Arc<dyn Fetch> + Send + Sync + 'static,
    {
        Self {
            scheme: scheme.into(),
            factory: Arc::new(factory),
            configuration: Configuration::default(),
            policy: BlockingPolicy::default(),
        }
    }

    /// 每个新数据源的初始配置（如 `create_event` 钩子、自定义参数）
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_policy(mut self, policy: BlockingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Provider for CallableProvider {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn source(&self, uri: &SourceUri, cached: Option<&CacheEntry>) -> DataSourceResult<EventSource> {
        Ok(seeded_source(
            uri,
            (self.factory)(uri),
            self.configuration.clone(),
            cached,
            self.policy.clone(),
        ))
    }
}
