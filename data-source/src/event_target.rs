//! 事件目标（EventTarget）
//!
//! 最小化的多监听器事件派发器：按事件类型注册/移除监听器，并同步派发。
//! 单个监听器 panic 会被捕获并记录，不影响同一次派发中的其它监听器。
//!
use crate::event::{Event, EventType};
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// 监听器回调
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// 监听器注册标识；同一回调注册两次会得到两个不同的标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// 一次派发的结果统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventTarget {
    listeners: DashMap<EventType, Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_listener<F>(&self, event_type: EventType, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add_listener(event_type, Arc::new(listener))
    }

    pub fn add_listener(&self, event_type: EventType, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(event_type)
            .or_default()
            .push((id, listener));
        id
    }

    /// 移除指定注册；返回是否确实移除了监听器
    pub fn remove_event_listener(&self, event_type: EventType, id: ListenerId) -> bool {
        let Some(mut list) = self.listeners.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(registered, _)| *registered != id);
        before != list.len()
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners
            .get(&event_type)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// 按注册顺序同步调用监听器
    pub fn dispatch_event(&self, event: &Event) -> DispatchOutcome {
        // 先复制一份快照再调用，允许监听器在回调中增删监听器
        let snapshot: Vec<Listener> = match self.listeners.get(&event.event_type()) {
            Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
            None => return DispatchOutcome::default(),
        };

        let mut outcome = DispatchOutcome::default();
        for listener in snapshot {
            outcome.invoked += 1;
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if let Err(panic) = result {
                outcome.failed += 1;
                let reason = if let Some(s) = panic.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                warn!(event_type = %event.event_type(), %reason, "listener panicked");
            }
        }
        outcome
    }
}
