//! 实时数据源层（data-source）
//!
//! 把大量逻辑订阅复用到少量长连接（长轮询/流式）上：
//! - 事件源（`event_source`）：拉取 → 派发的运行循环，含游标推进、错误退避与节流；
//! - 事件目标（`event_target`）：按事件类型登记监听器，派发时逐个隔离；
//! - 复用服务（`service`）：URI → 唯一数据源，按消费者引用计数，关闭时缓存最近事件；
//! - 提供者（`provider`）：按 scheme 构造数据源（Consul 阻塞查询、进程内设置、自定义闭包）；
//! - 监听器登记（`listeners`）：作用域化的监听器获取与一次性释放。
//!
//! 典型用法：
//! 1. 以若干 `Provider` 构建 `DataSourceService`；
//! 2. 消费者以自身的 `ConsumerRef` 调用 `open(uri, ..)` 拿到共享的 `EventSource`；
//! 3. 在数据源上登记 `message`/`error` 监听器；
//! 4. 离开时 `close(source, ..)` 释放引用，最后一个引用释放时物理连接关闭。
//!
pub mod cursor;
pub mod error;
pub mod event;
pub mod event_source;
pub mod event_target;
pub mod listeners;
pub mod provider;
pub mod service;
pub mod uri;

pub use error::{DataSourceError, DataSourceResult};
pub use event::{ErrorEvent, Event, EventType, Fetched, MessageEvent, Meta, Response};
pub use event_source::{
    BlockingConfig, BlockingPolicy, Configuration, EventSource, Fetch, ReadyState, fetch_fn,
};
pub use event_target::{EventTarget, Listener, ListenerId};
pub use listeners::{Listeners, Remover};
pub use service::{CacheEntry, ConsumerRef, DataSourceService, OpenTarget, SourceRegistry};
pub use uri::SourceUri;
