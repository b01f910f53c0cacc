//! 数据源复用服务（DataSourceService）
//!
//! 把逻辑 URI 映射为唯一的活跃 `EventSource`，在任意多个消费者之间共享：
//! - 按消费者引用计数（每个数据源一个引用集合，重复登记幂等）；
//! - 最后一个消费者离开时关闭物理连接；
//! - 关闭时缓存最近事件与游标，后续重新订阅可立即拿到旧数据，同时发起新一轮拉取；
//! - `reset_cache()` 在鉴权上下文变化时丢弃全部缓存。
//!
//! 所有簿记（sources / usage / cache）在同一把锁内同步完成，不跨越 `.await`。
//!
use crate::error::{DataSourceError, DataSourceResult};
use crate::event::{Event, EventType};
use crate::event_source::{EventSource, ReadyState};
use crate::provider::{Provider, ProviderRegistry};
use crate::uri::SourceUri;
use bon::Builder;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::data_source_service_builder::{IsUnset, SetRegistry, State as BuilderState};

/// 数据源关闭时留下的缓存：最近一次消息事件与对应游标
#[derive(Clone, Debug)]
pub struct CacheEntry {
    current_event: Event,
    cursor: u64,
}

impl CacheEntry {
    pub fn new(current_event: Event, cursor: u64) -> Self {
        Self {
            current_event,
            cursor,
        }
    }

    pub fn current_event(&self) -> &Event {
        &self.current_event
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}

/// 消费者身份；同一身份对同一数据源重复登记只计一次
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerRef(Uuid);

impl Default for ConsumerRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

/// `open` 的目标：逻辑 URI，或上层已解析好的数据源
#[derive(Clone, Debug)]
pub enum OpenTarget {
    Uri(String),
    Source(EventSource),
}

impl From<&str> for OpenTarget {
    fn from(uri: &str) -> Self {
        Self::Uri(uri.to_string())
    }
}

impl From<String> for OpenTarget {
    fn from(uri: String) -> Self {
        Self::Uri(uri)
    }
}

impl From<&String> for OpenTarget {
    fn from(uri: &String) -> Self {
        Self::Uri(uri.clone())
    }
}

impl From<EventSource> for OpenTarget {
    fn from(source: EventSource) -> Self {
        Self::Source(source)
    }
}

impl From<&EventSource> for OpenTarget {
    fn from(source: &EventSource) -> Self {
        Self::Source(source.clone())
    }
}

/// 消费者组件依赖的最小能力：按引用打开/释放数据源
pub trait SourceRegistry: Send + Sync {
    fn open(
        &self,
        target: OpenTarget,
        consumer: &ConsumerRef,
        force_open: bool,
    ) -> DataSourceResult<EventSource>;

    /// 与 `open` 相同，但在数据源启动前调用 `attach` 挂载监听器，首个事件不会错过。
    /// 默认实现退化为 `open` 之后再挂载。
    fn subscribe(
        &self,
        target: OpenTarget,
        consumer: &ConsumerRef,
        force_open: bool,
        attach: &mut dyn FnMut(&EventSource),
    ) -> DataSourceResult<EventSource> {
        let source = self.open(target, consumer, force_open)?;
        attach(&source);
        Ok(source)
    }

    fn close(&self, source: &EventSource, consumer: &ConsumerRef);
}

struct Live {
    source: EventSource,
    /// 最近使用序号，越大越新
    touched: u64,
}

#[derive(Default)]
struct ServiceState {
    sources: HashMap<String, Live>,
    tick: u64,
    usage: HashMap<Uuid, HashSet<ConsumerRef>>,
    cache: HashMap<String, CacheEntry>,
    shut_down: bool,
}

impl ServiceState {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn in_use(&self, source: &EventSource) -> bool {
        self.usage
            .get(&source.id())
            .is_some_and(|refs| !refs.is_empty())
    }

    /// 仅当 `uri` 下登记的仍是同一个实例时才移除
    fn forget(&mut self, uri: &str, source: &EventSource) -> bool {
        let same = self
            .sources
            .get(uri)
            .is_some_and(|live| live.source.ptr_eq(source));
        if same {
            self.sources.remove(uri);
            self.usage.remove(&source.id());
        }
        same
    }
}

#[derive(Builder)]
pub struct DataSourceService {
    #[builder(setters(vis = "pub(crate)"))]
    registry: ProviderRegistry,
    #[builder(skip)]
    state: Arc<Mutex<ServiceState>>,
}

impl<S: BuilderState> DataSourceServiceBuilder<S> {
    pub fn providers(
        self,
        providers: Vec<Arc<dyn Provider>>,
    ) -> DataSourceServiceBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(ProviderRegistry::new(providers))
    }
}

impl DataSourceService {
    /// 打开（或复用）`target` 对应的数据源，并为 `consumer` 登记一次引用。
    ///
    /// 以下任一条件成立时才启动物理连接：当前无人使用、已处于关闭流程、或 `force_open`。
    /// 已打开且仍被使用的数据源不会被重复打开。
    pub fn open(
        &self,
        target: impl Into<OpenTarget>,
        consumer: &ConsumerRef,
        force_open: bool,
    ) -> DataSourceResult<EventSource> {
        self.open_with(target, consumer, force_open, |_| {})
    }

    /// 同 `open`；`attach` 在数据源确定之后、启动之前调用（持有服务锁，不可回调服务）
    pub fn open_with<F>(
        &self,
        target: impl Into<OpenTarget>,
        consumer: &ConsumerRef,
        force_open: bool,
        attach: F,
    ) -> DataSourceResult<EventSource>
    where
        F: FnOnce(&EventSource),
    {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(DataSourceError::ServiceShutdown);
        }

        let raw = match target.into() {
            OpenTarget::Source(source) => {
                attach(&source);
                state
                    .usage
                    .entry(source.id())
                    .or_default()
                    .insert(*consumer);
                return Ok(source);
            }
            OpenTarget::Uri(raw) => raw,
        };
        let uri = SourceUri::parse(&raw)?;
        let key = uri.to_string();

        let tick = state.touch();
        let existing = state.sources.get_mut(&key).map(|live| {
            live.touched = tick;
            live.source.clone()
        });
        let source = match existing {
            Some(source) => source,
            None => {
                let provider = self.registry.get(uri.scheme()).ok_or_else(|| {
                    DataSourceError::ProviderNotFound {
                        scheme: uri.scheme().to_string(),
                    }
                })?;
                let source = provider.source(&uri, state.cache.get(&key))?;
                self.watch_close(&source, key.clone());
                debug!(uri = %key, cached = state.cache.contains_key(&key), "source created");
                state.sources.insert(
                    key.clone(),
                    Live {
                        source: source.clone(),
                        touched: tick,
                    },
                );
                source
            }
        };

        attach(&source);
        if !state.in_use(&source) || source.ready_state() > ReadyState::Open || force_open {
            source.open();
        }
        state
            .usage
            .entry(source.id())
            .or_default()
            .insert(*consumer);
        Ok(source)
    }

    /// 释放 `consumer` 对 `source` 的引用；最后一个引用释放时关闭数据源
    pub fn close(&self, source: &EventSource, consumer: &ConsumerRef) {
        let mut state = self.state.lock();
        let unused = match state.usage.get_mut(&source.id()) {
            Some(refs) => {
                refs.remove(consumer);
                refs.is_empty()
            }
            None => true,
        };
        if !unused {
            return;
        }

        state.usage.remove(&source.id());
        source.close();
        // 尚未启动或已自行结束的数据源不会再派发 close 事件，直接移除
        if source.ready_state() == ReadyState::Closed && state.forget(source.uri(), source) {
            debug!(uri = %source.uri(), "source released");
        }
    }

    /// 丢弃全部跨生命周期缓存
    pub fn reset_cache(&self) {
        let mut state = self.state.lock();
        let dropped = state.cache.len();
        state.cache.clear();
        info!(dropped, "data source cache reset");
    }

    /// 处于关闭流程（`Closing`）或已关闭的数据源 URI
    pub fn closed(&self) -> Vec<String> {
        self.state
            .lock()
            .sources
            .iter()
            .filter(|(_, live)| live.source.ready_state() > ReadyState::Open)
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    /// 活跃数据源，按最近使用排序（最近使用的在末尾）
    pub fn sources(&self) -> Vec<EventSource> {
        let state = self.state.lock();
        let mut live: Vec<&Live> = state.sources.values().collect();
        live.sort_by_key(|live| live.touched);
        live.into_iter().map(|live| live.source.clone()).collect()
    }

    /// `source` 当前登记的消费者数
    pub fn usage(&self, source: &EventSource) -> usize {
        self.state
            .lock()
            .usage
            .get(&source.id())
            .map_or(0, HashSet::len)
    }

    pub fn cached(&self, uri: &str) -> Option<CacheEntry> {
        let key = SourceUri::parse(uri).ok()?.to_string();
        self.state.lock().cache.get(&key).cloned()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// 关闭全部活跃数据源并清空簿记；之后 `open` 返回 `ServiceShutdown`
    pub fn shutdown(&self) {
        let sources: Vec<EventSource> = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.usage.clear();
            state.cache.clear();
            state.sources.drain().map(|(_, live)| live.source).collect()
        };

        info!(sources = sources.len(), "data source service shutting down");
        for source in sources {
            source.close();
        }
    }

    /// 数据源自身的 close 事件：写入缓存；确认无人使用时从活跃表移除
    fn watch_close(&self, source: &EventSource, uri: String) {
        let state: Weak<Mutex<ServiceState>> = Arc::downgrade(&self.state);
        let weak = source.downgrade();

        source.add_event_listener(EventType::Close, move |_| {
            let (Some(state), Some(source)) = (state.upgrade(), weak.upgrade()) else {
                return;
            };
            let mut state = state.lock();
            if state.shut_down {
                return;
            }

            if let (Some(event), Some(cursor)) = (source.current_event(), source.cursor()) {
                debug!(uri = %uri, cursor, "caching last event");
                state.cache.insert(uri.clone(), CacheEntry::new(event, cursor));
            }
            if !state.in_use(&source) && state.forget(&uri, &source) {
                debug!(uri = %uri, "source released");
            }
        });
    }
}

impl SourceRegistry for DataSourceService {
    fn open(
        &self,
        target: OpenTarget,
        consumer: &ConsumerRef,
        force_open: bool,
    ) -> DataSourceResult<EventSource> {
        DataSourceService::open(self, target, consumer, force_open)
    }

    fn subscribe(
        &self,
        target: OpenTarget,
        consumer: &ConsumerRef,
        force_open: bool,
        attach: &mut dyn FnMut(&EventSource),
    ) -> DataSourceResult<EventSource> {
        self.open_with(target, consumer, force_open, |source| attach(source))
    }

    fn close(&self, source: &EventSource, consumer: &ConsumerRef) {
        DataSourceService::close(self, source, consumer)
    }
}

impl Drop for DataSourceService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
