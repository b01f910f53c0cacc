//! 设置提供者（settings://）
//!
//! 基于进程内 `SettingsStore` 的数据源：首次拉取立即返回当前值，
//! 之后长轮询同一键的下一次写入。游标即写入版本号，全局单调递增。
//!
use super::{Provider, seeded_source};
use crate::cursor::MIN_CURSOR;
use crate::error::DataSourceResult;
use crate::event::{Fetched, Meta, Response};
use crate::event_source::{BlockingPolicy, Configuration, EventSource, Fetch};
use crate::service::CacheEntry;
use crate::uri::SourceUri;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// 进程内键值设置存储，写入时广播变更的键
pub struct SettingsStore {
    values: DashMap<String, (u64, Option<Value>)>,
    version: AtomicU64,
    tx: broadcast::Sender<String>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SettingsStore {
    /// `capacity` 为变更通知的广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            values: DashMap::new(),
            version: AtomicU64::new(MIN_CURSOR),
            tx,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).and_then(|entry| entry.1.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.write(key.into(), Some(value));
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let previous = self.get(key);
        if previous.is_some() {
            self.write(key.to_string(), None);
        }
        previous
    }

    /// 当前版本与值；从未写入的键版本为最小游标
    pub fn snapshot(&self, key: &str) -> (u64, Option<Value>) {
        self.values
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or((MIN_CURSOR, None))
    }

    /// 等待 `key` 出现比 `after` 更新的版本
    pub async fn changed(&self, key: &str, after: u64) -> (u64, Option<Value>) {
        // 先订阅再检查，避免错过两者之间的写入
        let mut changes = BroadcastStream::new(self.tx.subscribe());
        loop {
            let snapshot = self.snapshot(key);
            if snapshot.0 > after {
                return snapshot;
            }
            if changes.next().await.is_none() {
                return snapshot;
            }
        }
    }

    fn write(&self, key: String, value: Option<Value>) {
        {
            // 在分片锁内分配版本号，保证同一键的版本单调
            let mut entry = self.values.entry(key.clone()).or_insert((MIN_CURSOR, None));
            entry.0 = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            entry.1 = value;
        }
        debug!(key = %key, "setting changed");
        // 无订阅者时发送失败，视为非致命并忽略
        let _ = self.tx.send(key);
    }
}

struct SettingsFetch {
    store: Arc<SettingsStore>,
    key: String,
}

#[async_trait]
impl Fetch for SettingsFetch {
    async fn fetch(
        &self,
        configuration: Configuration,
        _source: EventSource,
    ) -> DataSourceResult<Fetched> {
        let (version, value) = match configuration.cursor() {
            None => self.store.snapshot(&self.key),
            Some(after) => self.store.changed(&self.key, after).await,
        };

        let meta = Meta::builder()
            .cursor(json!(version))
            .interval(Duration::ZERO)
            .build();
        Ok(Response::new(value.unwrap_or(Value::Null))
            .with_meta(meta)
            .into())
    }
}

#[derive(Clone)]
pub struct SettingsProvider {
    store: Arc<SettingsStore>,
    policy: BlockingPolicy,
}

impl SettingsProvider {
    pub const SCHEME: &'static str = "settings";

    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self {
            store,
            policy: BlockingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BlockingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }
}

impl Provider for SettingsProvider {
    fn scheme(&self) -> &str {
        Self::SCHEME
    }

    fn source(&self, uri: &SourceUri, cached: Option<&CacheEntry>) -> DataSourceResult<EventSource> {
        let fetch = Arc::new(SettingsFetch {
            store: self.store.clone(),
            key: uri.path().to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_increase_per_write() {
        let store = SettingsStore::default();
        assert_eq!(store.snapshot("token"), (MIN_CURSOR, None));

        store.set("token", json!("a"));
        let (first, value) = store.snapshot("token");
        assert!(first > MIN_CURSOR);
        assert_eq!(value, Some(json!("a")));

        store.set("other", json!(1));
        assert_eq!(store.remove("token"), Some(json!("a")));
        let (second, value) = store.snapshot("token");
        assert!(second > first);
        assert_eq!(value, None);
        assert_eq!(store.remove("token"), None);
    }

    #[tokio::test]
    async fn changed_waits_for_newer_write() {
        let store = Arc::new(SettingsStore::default());
        store.set("token", json!("a"));
        let (version, _) = store.snapshot("token");

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.changed("token", version).await })
        };
        tokio::task::yield_now().await;
        store.set("unrelated", json!(0));
        store.set("token", json!("b"));

        let (next, value) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("changed should resolve")
            .expect("task should not panic");
        assert!(next > version);
        assert_eq!(value, Some(json!("b")));
    }
}
