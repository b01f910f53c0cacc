//! 事件模型（Event）
//!
//! 数据源对外派发的事件：`open`、`message`、`error`、`close`，
//! 以及拉取函数返回值（`Fetched`/`Response`）与响应元信息（`Meta`）。
//!
use crate::error::DataSourceError;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 事件类型，用作监听器注册的键
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Open,
    Message,
    Error,
    Close,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Open => "open",
            EventType::Message => "message",
            EventType::Error => "error",
            EventType::Close => "close",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 响应元信息：游标、缓存控制与服务端建议的轮询间隔
#[derive(Builder, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    cursor: Option<Value>,
    #[builder(into)]
    cache_control: Option<String>,
    interval: Option<Duration>,
}

impl Meta {
    pub fn cursor(&self) -> Option<&Value> {
        self.cursor.as_ref()
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }
}

/// 拉取函数的原始结果
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub data: Value,
    pub meta: Meta,
}

impl Response {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            meta: Meta::default(),
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }
}

/// 拉取函数的返回值：原始结果经 `create_event` 转为事件；已是事件的原样派发
#[derive(Clone, Debug)]
pub enum Fetched {
    Response(Response),
    Event(Event),
}

impl From<Response> for Fetched {
    fn from(response: Response) -> Self {
        Fetched::Response(response)
    }
}

impl From<Event> for Fetched {
    fn from(event: Event) -> Self {
        Fetched::Event(event)
    }
}

#[derive(Clone, Debug)]
pub struct MessageEvent {
    id: Uuid,
    data: Value,
    meta: Meta,
    received_at: DateTime<Utc>,
}

impl MessageEvent {
    pub fn new(data: Value, meta: Meta) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            meta,
            received_at: Utc::now(),
        }
    }

    /// 消息唯一标识，同一事件被重放时保持不变
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn received_at(&self) -> &DateTime<Utc> {
        &self.received_at
    }
}

#[derive(Clone, Debug)]
pub struct ErrorEvent {
    error: Arc<DataSourceError>,
}

impl ErrorEvent {
    pub fn new(error: DataSourceError) -> Self {
        Self {
            error: Arc::new(error),
        }
    }

    pub fn error(&self) -> &DataSourceError {
        &self.error
    }
}

#[derive(Clone, Debug)]
pub enum Event {
    Open,
    Message(MessageEvent),
    Error(ErrorEvent),
    Close,
}

impl Event {
    pub fn message(data: Value) -> Self {
        Event::Message(MessageEvent::new(data, Meta::default()))
    }

    pub fn error(error: DataSourceError) -> Self {
        Event::Error(ErrorEvent::new(error))
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Event::Open => EventType::Open,
            Event::Message(_) => EventType::Message,
            Event::Error(_) => EventType::Error,
            Event::Close => EventType::Close,
        }
    }

    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Event::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            Event::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        self.as_message().map(MessageEvent::data)
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.as_message().map(MessageEvent::meta)
    }
}
