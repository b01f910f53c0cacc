//! 数据源消费者组件（data-source-consumer）
//!
//! UI 侧订阅一个逻辑 URI 的最小组件：
//! - `set_src` 切换订阅时先释放旧数据源，再打开新数据源；
//! - 订阅后若数据源已有最近事件，立即以其回调 `on_change`；
//! - 收到 `error` 事件时回调 `on_error` 并释放引用；
//! - 销毁（`Drop`）时释放监听器与引用，重复释放无副作用。
//!
pub mod consumer;
pub mod error;

pub use consumer::{DataSource, Handler};
pub use error::{ConsumerError, ConsumerResult};
