//! 监听器登记（Listeners）
//!
//! 作用域化的监听器获取与释放：每次 `add` 返回一个只移除自身的 `Remover`，
//! `remove()` 一次性释放并清空所有尚未释放的登记。消费者在销毁（包括异常销毁）时
//! 调用 `remove()`，保证每个监听器恰好被移除一次。
//!
use crate::event::{Event, EventType};
use crate::event_source::EventSource;
use crate::event_target::{Listener, ListenerId};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// 可挂载监听器的目标
pub trait ListenerTarget: Clone + Send + Sync + 'static {
    fn add_listener(&self, event_type: EventType, listener: Listener) -> ListenerId;
    fn remove_listener(&self, event_type: EventType, id: ListenerId) -> bool;
}

impl ListenerTarget for EventSource {
    fn add_listener(&self, event_type: EventType, listener: Listener) -> ListenerId {
        EventSource::add_listener(self, event_type, listener)
    }

    fn remove_listener(&self, event_type: EventType, id: ListenerId) -> bool {
        self.remove_event_listener(event_type, id)
    }
}

type Remove = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Registry {
    next: u64,
    removers: Vec<(u64, Remove)>,
}

#[derive(Clone, Default)]
pub struct Listeners {
    registry: Arc<Mutex<Registry>>,
}

/// 单条登记的释放句柄
#[must_use = "dropping a Remover keeps the listener registered until Listeners::remove"]
pub struct Remover {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl Remover {
    /// 释放该条登记；已被 `Listeners::remove` 释放过时返回 `false`
    pub fn remove(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let remove = {
            let mut registry = registry.lock();
            let Some(pos) = registry.removers.iter().position(|(id, _)| *id == self.id) else {
                return false;
            };
            registry.removers.remove(pos).1
        };
        remove();
        true
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T, F>(&self, target: &T, event_type: EventType, handler: F) -> Remover
    where
        T: ListenerTarget,
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add_all(target, [(event_type, Arc::new(handler) as Listener)])
    }

    /// 以一组（事件类型, 回调）登记，返回统一的释放句柄
    pub fn add_all<T, I>(&self, target: &T, handlers: I) -> Remover
    where
        T: ListenerTarget,
        I: IntoIterator<Item = (EventType, Listener)>,
    {
        let registered: Vec<(EventType, ListenerId)> = handlers
            .into_iter()
            .map(|(event_type, handler)| (event_type, target.add_listener(event_type, handler)))
            .collect();
        let target = target.clone();

        self.add_fn(move || {
            for (event_type, id) in registered {
                target.remove_listener(event_type, id);
            }
        })
    }

    /// 登记任意释放函数
    pub fn add_fn<F>(&self, remove: F) -> Remover
    where
        F: FnOnce() + Send + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next;
        registry.next += 1;
        registry.removers.push((id, Box::new(remove)));

        Remover {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// 嵌套登记：释放时一并释放 `other` 中的全部登记
    pub fn add_listeners(&self, other: &Listeners) -> Remover {
        let other = other.clone();
        self.add_fn(move || {
            other.remove();
        })
    }

    /// 释放并清空全部登记，返回释放的条数
    pub fn remove(&self) -> usize {
        let removers = std::mem::take(&mut self.registry.lock().removers);
        let count = removers.len();
        for (_, remove) in removers {
            remove();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.registry.lock().removers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::fetch_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn idle_source() -> EventSource {
        EventSource::builder()
            .uri("test://idle")
            .fetch(fetch_fn(|_, _| std::future::pending::<_>()))
            .build()
    }

    #[test]
    fn remove_detaches_every_listener_once() {
        let source = idle_source();
        let listeners = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = |hits: &Arc<AtomicUsize>| {
            let hits = hits.clone();
            Arc::new(move |_: &Event| {
                hits.fetch_add(1, Ordering::Relaxed);
            }) as Listener
        };
        let _first = listeners.add_all(
            &source,
            [
                (EventType::Message, counter(&hits)),
                (EventType::Error, counter(&hits)),
            ],
        );
        let _second = listeners.add(&source, EventType::Message, |_| {});
        assert_eq!(source.listener_count(EventType::Message), 2);

        assert_eq!(listeners.remove(), 2);
        assert_eq!(source.listener_count(EventType::Message), 0);
        assert_eq!(source.listener_count(EventType::Error), 0);
        assert!(listeners.is_empty());
        assert_eq!(listeners.remove(), 0);

        source.dispatch_event(&Event::message(serde_json::json!(1)));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn remover_only_releases_its_own_entry() {
        let source = idle_source();
        let listeners = Listeners::new();

        let first = listeners.add(&source, EventType::Open, |_| {});
        let _second = listeners.add(&source, EventType::Open, |_| {});

        assert!(first.remove());
        assert_eq!(source.listener_count(EventType::Open), 1);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn nested_and_function_entries_are_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let outer = Listeners::new();
        let inner = Listeners::new();

        {
            let released = released.clone();
            let _ = inner.add_fn(move || {
                released.fetch_add(1, Ordering::Relaxed);
            });
        }
        let _ = outer.add_listeners(&inner);
        {
            let released = released.clone();
            let _ = outer.add_fn(move || {
                released.fetch_add(10, Ordering::Relaxed);
            });
        }

        assert_eq!(outer.remove(), 2);
        assert_eq!(released.load(Ordering::Relaxed), 11);
        assert!(inner.is_empty());
    }

    #[test]
    fn remover_after_bulk_remove_is_a_no_op() {
        let listeners = Listeners::new();
        let remover = listeners.add_fn(|| {});
        listeners.remove();
        assert!(!remover.remove());
    }
}
