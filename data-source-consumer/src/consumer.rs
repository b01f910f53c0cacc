//! 数据源消费者（DataSource）
//!
//! 以一个 `ConsumerRef` 身份持有至多一个共享数据源：
//! - `set_src`：切换订阅（先释放旧的，再打开新的）；
//! - `set_enabled`：不可见时释放，重新可见时按当前 src 重新订阅；
//! - `close` / `Drop`：移除监听器并释放引用。
//!
//! 监听器只持有消费者内部状态的弱引用，消费者销毁后迟到的事件被直接忽略。
//!
use crate::error::ConsumerResult;
use bon::bon;
use data_source::event::{Event, EventType};
use data_source::event_source::{EventSource, WeakEventSource};
use data_source::event_target::Listener;
use data_source::listeners::Listeners;
use data_source::service::{ConsumerRef, DataSourceService, OpenTarget, SourceRegistry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// 事件回调
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

pub struct DataSource<R: SourceRegistry + 'static = DataSourceService> {
    inner: Arc<Shared<R>>,
}

struct Shared<R: SourceRegistry + 'static> {
    registry: Arc<R>,
    consumer: ConsumerRef,
    on_change: Option<Handler>,
    on_error: Option<Handler>,
    state: Mutex<ConsumerState>,
}

struct ConsumerState {
    src: Option<String>,
    enabled: bool,
    force_open: bool,
    source: Option<EventSource>,
    /// 因 error 事件已释放引用的数据源；销毁或重新订阅时再补一次 close
    failed: Option<EventSource>,
    listeners: Listeners,
    /// 当前这一次订阅是否有效；释放时置否，迟到的事件随之被忽略
    live: Arc<AtomicBool>,
    /// 最近一次交付给 `on_change` 的消息 id，避免缓存回放重复交付
    delivered: Option<Uuid>,
}

#[bon]
impl<R: SourceRegistry + 'static> DataSource<R> {
    /// 构建消费者；设置了 `src` 且处于启用状态时立即订阅
    #[builder]
    pub fn new(
        registry: Arc<R>,
        #[builder(into)] src: Option<String>,
        on_change: Option<Handler>,
        on_error: Option<Handler>,
        #[builder(default = true)] enabled: bool,
        #[builder(default)] force_open: bool,
    ) -> ConsumerResult<Self> {
        let this = Self {
            inner: Arc::new(Shared {
                registry,
                consumer: ConsumerRef::new(),
                on_change,
                on_error,
                state: Mutex::new(ConsumerState {
                    src,
                    enabled,
                    force_open,
                    source: None,
                    failed: None,
                    listeners: Listeners::new(),
                    live: Arc::new(AtomicBool::new(false)),
                    delivered: None,
                }),
            }),
        };
        this.connect()?;
        Ok(this)
    }
}

impl<R: SourceRegistry + 'static> DataSource<R> {
    pub fn consumer(&self) -> ConsumerRef {
        self.inner.consumer
    }

    pub fn src(&self) -> Option<String> {
        self.inner.state.lock().src.clone()
    }

    /// 当前持有的数据源；出错释放或被禁用后为 `None`
    pub fn source(&self) -> Option<EventSource> {
        self.inner.state.lock().source.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// 切换订阅的 URI；与当前相同时为空操作
    pub fn set_src(&self, src: impl Into<String>) -> ConsumerResult<()> {
        let src = src.into();
        {
            let mut state = self.inner.state.lock();
            if state.src.as_deref() == Some(src.as_str()) {
                return Ok(());
            }
            state.src = Some(src);
        }
        self.connect()
    }

    pub fn set_enabled(&self, enabled: bool) -> ConsumerResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.enabled == enabled {
                return Ok(());
            }
            state.enabled = enabled;
        }
        if enabled {
            self.connect()
        } else {
            self.close();
            Ok(())
        }
    }

    /// 移除监听器并释放对当前数据源的引用；可重复调用
    pub fn close(&self) {
        self.inner.release();
    }

    fn connect(&self) -> ConsumerResult<()> {
        let (src, force_open) = {
            let state = self.inner.state.lock();
            match (&state.src, state.enabled) {
                (Some(src), true) => (src.clone(), state.force_open),
                _ => return Ok(()),
            }
        };

        self.inner.release();
        let inner = &self.inner;
        let (listeners, live) = {
            let mut state = inner.state.lock();
            state.live = Arc::new(AtomicBool::new(true));
            (state.listeners.clone(), state.live.clone())
        };

        // 监听器在数据源启动之前挂上，启动后的第一个事件也能收到
        let weak = Arc::downgrade(inner);
        let subscribed = inner.registry.subscribe(
            OpenTarget::Uri(src.clone()),
            &inner.consumer,
            force_open,
            &mut |source: &EventSource| {
                // 逐条的 Remover 不保留，统一由 Listeners::remove 释放
                let _remover = listeners.add_all(source, Shared::handlers(&weak, &live, source));
            },
        );
        let source = match subscribed {
            Ok(source) => source,
            Err(err) => {
                live.store(false, Ordering::Release);
                listeners.remove();
                return Err(err.into());
            }
        };
        debug!(src = %src, uri = %source.uri(), "consumer subscribed");

        {
            let mut state = inner.state.lock();
            // 启动期间已收到 error 并释放
            if !live.load(Ordering::Acquire) {
                return Ok(());
            }
            state.source = Some(source.clone());
        }

        // 已有旧数据时立即交付，无需等待新一轮拉取
        if let Some(current) = source.current_event() {
            inner.deliver(&live, &current);
        }
        Ok(())
    }
}

impl<R: SourceRegistry + 'static> Shared<R> {
    fn handlers(
        weak: &Weak<Self>,
        live: &Arc<AtomicBool>,
        source: &EventSource,
    ) -> [(EventType, Listener); 2] {
        let on_message: Listener = {
            let (weak, live) = (weak.clone(), live.clone());
            Arc::new(move |event: &Event| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(&live, event);
                }
            })
        };
        let on_error: Listener = {
            let (weak, live) = (weak.clone(), live.clone());
            let source = source.downgrade();
            Arc::new(move |event: &Event| {
                if let Some(inner) = weak.upgrade() {
                    inner.fail(&live, &source, event);
                }
            })
        };
        [(EventType::Message, on_message), (EventType::Error, on_error)]
    }

    fn deliver(&self, live: &AtomicBool, event: &Event) {
        let Some(message) = event.as_message() else {
            return;
        };
        {
            let mut state = self.state.lock();
            if !live.load(Ordering::Acquire) || state.delivered == Some(message.id()) {
                return;
            }
            state.delivered = Some(message.id());
        }
        if let Some(on_change) = &self.on_change {
            on_change(event);
        }
    }

    /// 出错即结束本次订阅：移除监听器、释放引用，再通知 `on_error`
    fn fail(&self, live: &AtomicBool, source: &WeakEventSource, event: &Event) {
        let Some(source) = source.upgrade() else {
            return;
        };
        let listeners = {
            let mut state = self.state.lock();
            if !live.swap(false, Ordering::AcqRel) {
                return;
            }
            if state.source.as_ref().is_some_and(|s| s.ptr_eq(&source)) {
                state.source = None;
            }
            state.delivered = None;
            state.failed = Some(source.clone());
            state.listeners.clone()
        };
        listeners.remove();

        if let Some(error) = event.as_error() {
            warn!(uri = %source.uri(), error = %error.error(), "consumer received error");
        }
        self.registry.close(&source, &self.consumer);
        if let Some(on_error) = &self.on_error {
            on_error(event);
        }
    }

    fn release(&self) {
        let (source, failed, listeners) = {
            let mut state = self.state.lock();
            state.live.store(false, Ordering::Release);
            state.delivered = None;
            (
                state.source.take(),
                state.failed.take(),
                state.listeners.clone(),
            )
        };
        listeners.remove();
        if let Some(source) = source {
            debug!(uri = %source.uri(), "consumer released");
            self.registry.close(&source, &self.consumer);
        }
        // 引用已在出错时释放，这里的 close 只是幂等的收尾
        if let Some(source) = failed {
            self.registry.close(&source, &self.consumer);
        }
    }
}

impl<R: SourceRegistry + 'static> Drop for DataSource<R> {
    fn drop(&mut self) {
        self.inner.release();
    }
}
