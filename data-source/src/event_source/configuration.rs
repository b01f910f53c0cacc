//! 数据源配置（Configuration）
//!
//! 每个数据源一份的状态：游标、缓存控制、轮询间隔、提供者自定义参数与
//! `create_event` 钩子。运行循环每轮读取一份快照，并以 `apply_meta`
//! 计算出下一轮配置，而不是在异步边界上原地修改。
//!
use crate::cursor::validate_cursor;
use crate::event::{Event, Meta, MessageEvent, Response};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 将原始结果转为事件的钩子
pub type CreateEvent = Arc<dyn Fn(Response, &Configuration) -> Event + Send + Sync>;

/// 默认的事件构造：包装为 `message` 事件
pub fn default_create_event(response: Response, _configuration: &Configuration) -> Event {
    Event::Message(MessageEvent::new(response.data, response.meta))
}

#[derive(Clone, Default)]
pub struct Configuration {
    cursor: Option<u64>,
    cache_control: Option<String>,
    interval: Option<Duration>,
    params: Map<String, Value>,
    create_event: Option<CreateEvent>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("cursor", &self.cursor)
            .field("cache_control", &self.cache_control)
            .field("interval", &self.interval)
            .field("params", &self.params)
            .field("create_event", &self.create_event.is_some())
            .finish()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(mut self, cursor: Option<u64>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_create_event(mut self, create_event: CreateEvent) -> Self {
        self.create_event = Some(create_event);
        self
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// 最近一次响应是否要求不缓存（`no-store`）
    pub fn is_no_store(&self) -> bool {
        self.cache_control
            .as_deref()
            .is_some_and(|c| c.contains("no-store"))
    }

    pub fn create_event(&self, response: Response) -> Event {
        match &self.create_event {
            Some(create) => create(response, self),
            None => default_create_event(response, self),
        }
    }

    /// 依据响应元信息计算下一轮配置：
    /// - 携带游标时按上一个游标校验后写入；
    /// - 缓存控制与间隔只对应本次响应，未携带即清空。
    pub fn apply_meta(&self, meta: &Meta) -> Configuration {
        let mut next = self.clone();
        if let Some(cursor) = meta.cursor() {
            next.cursor = validate_cursor(cursor, self.cursor);
        }
        next.cache_control = meta.cache_control().map(str::to_string);
        next.interval = meta.interval();
        next
    }
}
