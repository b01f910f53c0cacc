//! Consul 阻塞查询提供者（consul://）
//!
//! `consul://<dc>/<endpoint...>` 映射为 `GET {address}/v1/<endpoint>?dc=<dc>`，
//! 携带游标时追加 `index` 与 `wait` 参数形成长轮询：
//! - 响应头 `X-Consul-Index` 作为下一轮游标；
//! - 响应头 `Cache-Control` 原样透传（`no-store` 时不缓存该次结果）；
//! - 无索引头的端点按 `poll_interval`（若配置）轮询。
//!
use super::{Provider, seeded_source};
use crate::error::{DataSourceError, DataSourceResult};
use crate::event::{Fetched, Meta, Response};
use crate::event_source::{BlockingPolicy, Configuration, EventSource, Fetch};
use crate::service::CacheEntry;
use crate::uri::SourceUri;
use async_trait::async_trait;
use bon::Builder;
use reqwest::header::{CACHE_CONTROL, HeaderMap};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const INDEX_HEADER: &str = "x-consul-index";
const TOKEN_HEADER: &str = "x-consul-token";

/// Consul 连接配置
#[derive(Builder, Clone, Debug)]
pub struct ConsulConfig {
    /// Agent 地址，如 `http://127.0.0.1:8500`
    #[builder(into, default = "http://127.0.0.1:8500".to_string())]
    address: String,
    /// ACL token
    #[builder(into)]
    token: Option<String>,
    /// 阻塞查询的最长等待时间
    #[builder(default = Duration::from_secs(300))]
    wait: Duration,
    /// 非阻塞端点的轮询间隔；未设置时使用策略默认间隔
    poll_interval: Option<Duration>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConsulConfig {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }
}

#[derive(Clone)]
pub struct ConsulProvider {
    client: reqwest::Client,
    config: Arc<ConsulConfig>,
    policy: BlockingPolicy,
}

impl ConsulProvider {
    pub const SCHEME: &'static str = "consul";

    pub fn new(config: ConsulConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: ConsulConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            policy: BlockingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BlockingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Provider for ConsulProvider {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    fn source(&self, uri: &SourceUri, cached: Option<&CacheEntry>) -> DataSourceResult<EventSource> {
        let (dc, endpoint) = split_path(uri.path())?;
        let fetch = Arc::new(ConsulFetch {
            client: self.client.clone(),
            config: self.config.clone(),
            dc,
            endpoint,
        });
        Ok(seeded_source(
            uri,
            fetch,
            Configuration::default(),
            cached,
            self.policy.clone(),
        ))
    }
}

fn split_path(path: &str) -> DataSourceResult<(String, String)> {
    match path.trim_matches('/').split_once('/') {
        Some((dc, endpoint)) if !dc.is_empty() && !endpoint.is_empty() => {
            Ok((dc.to_string(), endpoint.to_string()))
        }
        _ => Err(DataSourceError::InvalidUri {
            reason: format!("expected <dc>/<endpoint>, got {path:?}"),
        }),
    }
}

struct ConsulFetch {
    client: reqwest::Client,
    config: Arc<ConsulConfig>,
    dc: String,
    endpoint: String,
}

impl ConsulFetch {
    fn query(&self, configuration: &Configuration) -> Vec<(String, String)> {
        let mut query = vec![("dc".to_string(), self.dc.clone())];
        // 提供者自定义参数（如 ns、partition）按字符串透传
        for (key, value) in configuration.params() {
            match value {
                Value::String(s) => query.push((key.clone(), s.clone())),
                Value::Number(n) => query.push((key.clone(), n.to_string())),
                Value::Bool(b) => query.push((key.clone(), b.to_string())),
                _ => {}
            }
        }
        if let Some(cursor) = configuration.cursor() {
            query.push(("index".to_string(), cursor.to_string()));
            query.push(("wait".to_string(), format!("{}s", self.config.wait.as_secs())));
        }
        query
    }

    fn meta(&self, headers: &HeaderMap) -> Meta {
        let header = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let cursor = header(INDEX_HEADER);
        let interval = match cursor {
            Some(_) => None,
            None => self.config.poll_interval,
        };

        Meta::builder()
            .maybe_cursor(cursor.map(Value::String))
            .maybe_cache_control(header(CACHE_CONTROL.as_str()))
            .maybe_interval(interval)
            .build()
    }
}

#[async_trait]
impl Fetch for ConsulFetch {
    async fn fetch(
        &self,
        configuration: Configuration,
        _source: EventSource,
    ) -> DataSourceResult<Fetched> {
        let url = format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            self.endpoint
        );
        let mut request = self.client.get(&url).query(&self.query(&configuration));
        if let Some(token) = &self.config.token {
            request = request.header(TOKEN_HEADER, token);
        }

        debug!(url = %url, cursor = ?configuration.cursor(), "consul request");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(DataSourceError::http(status.as_u16(), reason));
        }

        let meta = self.meta(response.headers());
        let data: Value = response.json().await?;
        Ok(Response::new(data).with_meta(meta).into())
    }
}
