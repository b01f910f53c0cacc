//! 事件源（EventSource）
//!
//! 一个可共享（`Clone` 即共享同一实例）的订阅句柄，把拉取函数包装为可重启的事件流：
//! - `open()`：启动运行循环（幂等）；构造后未调用 `open()` 前不会拉取；
//! - `close()`：停止运行循环（幂等），正在进行的拉取被丢弃；
//! - `ready_state()`：`Connecting → Open → Closing → Closed`；
//! - 记忆最近一次（及上一次）派发的消息事件，供新订阅者立即获得旧数据。
//!
use super::blocking::BlockingPolicy;
use super::configuration::Configuration;
use super::fetch::Fetch;
use super::runner;
use crate::event::{Event, EventType};
use crate::event_target::{DispatchOutcome, EventTarget, Listener, ListenerId};
use bon::bon;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
    Closing = 3,
}

#[derive(Clone)]
pub struct EventSource {
    inner: Arc<Inner>,
}

/// 不持有所有权的事件源句柄，供监听器回调引用自身所属的数据源
#[derive(Clone)]
pub struct WeakEventSource {
    inner: Weak<Inner>,
}

impl WeakEventSource {
    pub fn upgrade(&self) -> Option<EventSource> {
        self.inner.upgrade().map(|inner| EventSource { inner })
    }
}

struct Inner {
    id: Uuid,
    uri: String,
    target: EventTarget,
    fetch: Arc<dyn Fetch>,
    policy: BlockingPolicy,
    state: Mutex<State>,
}

pub(super) struct State {
    pub(super) ready_state: ReadyState,
    pub(super) configuration: Configuration,
    pub(super) current_event: Option<Event>,
    pub(super) previous_event: Option<Event>,
    /// 运行代数：每次启动自增，过期的运行循环据此静默退出
    pub(super) run: u64,
    pub(super) cancel: Option<CancellationToken>,
    pub(super) consecutive_errors: u32,
}

#[bon]
impl EventSource {
    #[builder]
    pub fn new(
        #[builder(into)] uri: String,
        fetch: Arc<dyn Fetch>,
        #[builder(default)] configuration: Configuration,
        current_event: Option<Event>,
        #[builder(default)] policy: BlockingPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                uri,
                target: EventTarget::new(),
                fetch,
                policy,
                state: Mutex::new(State {
                    ready_state: ReadyState::Connecting,
                    configuration,
                    current_event,
                    previous_event: None,
                    run: 0,
                    cancel: None,
                    consecutive_errors: 0,
                }),
            }),
        }
    }
}

impl EventSource {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state
    }

    pub fn configuration(&self) -> Configuration {
        self.inner.state.lock().configuration.clone()
    }

    pub fn cursor(&self) -> Option<u64> {
        self.inner.state.lock().configuration.cursor()
    }

    pub fn current_event(&self) -> Option<Event> {
        self.inner.state.lock().current_event.clone()
    }

    pub fn previous_event(&self) -> Option<Event> {
        self.inner.state.lock().previous_event.clone()
    }

    pub fn downgrade(&self) -> WeakEventSource {
        WeakEventSource {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &EventSource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn add_event_listener<F>(&self, event_type: EventType, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.target.add_event_listener(event_type, listener)
    }

    pub fn add_listener(&self, event_type: EventType, listener: Listener) -> ListenerId {
        self.inner.target.add_listener(event_type, listener)
    }

    pub fn remove_event_listener(&self, event_type: EventType, id: ListenerId) -> bool {
        self.inner.target.remove_event_listener(event_type, id)
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.inner.target.listener_count(event_type)
    }

    pub fn dispatch_event(&self, event: &Event) -> DispatchOutcome {
        self.inner.target.dispatch_event(event)
    }

    /// 启动运行循环；已打开或正在启动时为空操作。需在 tokio 运行时内调用。
    pub fn open(&self) -> &Self {
        let mut state = self.inner.state.lock();
        match state.ready_state {
            ReadyState::Open => {}
            ReadyState::Connecting if state.cancel.is_some() => {}
            ReadyState::Connecting | ReadyState::Closed | ReadyState::Closing => {
                self.start(&mut state);
            }
        }
        self
    }

    /// 停止运行循环；未启动的数据源直接进入 `Closed`，不派发 `close` 事件
    pub fn close(&self) -> &Self {
        let mut state = self.inner.state.lock();
        match state.ready_state {
            ReadyState::Connecting => {
                state.ready_state = ReadyState::Closed;
                state.run += 1;
                if let Some(token) = state.cancel.take() {
                    token.cancel();
                }
            }
            ReadyState::Open => {
                state.ready_state = ReadyState::Closing;
                if let Some(token) = &state.cancel {
                    token.cancel();
                }
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
        self
    }

    fn start(&self, state: &mut State) {
        // 旧的运行循环（若仍在收尾）会因代数不匹配而静默退出
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.run += 1;
        state.ready_state = ReadyState::Connecting;
        state.consecutive_errors = 0;
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());

        debug!(uri = %self.inner.uri, run = state.run, "opening source");
        tokio::spawn(runner::run(self.clone(), state.run, token));
    }

    pub(super) fn fetcher(&self) -> &Arc<dyn Fetch> {
        &self.inner.fetch
    }

    pub(super) fn policy(&self) -> &BlockingPolicy {
        &self.inner.policy
    }

    pub(super) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.inner.state.lock())
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("id", &self.inner.id)
            .field("uri", &self.inner.uri)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}
