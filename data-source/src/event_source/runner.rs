//! 运行循环
//!
//! 每次 `open()` 启动一个 tokio 任务，严格串行地执行：
//! 拉取 → （瞬时错误退避重试 | 派发 message/error）→ 节流等待 → 下一轮。
//! 每个挂起点都与取消令牌竞争；被关闭或被新一轮运行取代后，不再派发任何结果。
//!
use super::configuration::Configuration;
use super::source::{EventSource, ReadyState};
use crate::error::DataSourceError;
use crate::event::{Event, Fetched};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(super) async fn run(source: EventSource, run: u64, token: CancellationToken) {
    let started = source.with_state(|state| {
        if state.run != run || state.ready_state != ReadyState::Connecting {
            return false;
        }
        state.ready_state = ReadyState::Open;
        true
    });
    if !started {
        return;
    }

    source.dispatch_event(&Event::Open);
    // 以缓存的最近事件立即回放，订阅者无需等待首次拉取
    if let Some(current) = source.current_event() {
        source.dispatch_event(&current);
    }

    loop {
        let Some(configuration) = snapshot(&source, run) else {
            break;
        };

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            fetched = source.fetcher().fetch(configuration.clone(), source.clone()) => fetched,
        };

        let pause = match fetched {
            Ok(fetched) => settle_message(&source, run, &configuration, fetched),
            Err(err) => match source.policy().backoff().backoff(err) {
                Ok(wait) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = wait => continue,
                    }
                }
                Err(err) => settle_error(&source, run, err),
            },
        };
        let Some(pause) = pause else {
            break;
        };

        let throttle = source.policy().timer().sleep(pause);
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = throttle => {}
        }
    }

    finish(&source, run);
}

fn snapshot(source: &EventSource, run: u64) -> Option<Configuration> {
    source.with_state(|state| {
        (state.run == run && state.ready_state == ReadyState::Open)
            .then(|| state.configuration.clone())
    })
}

/// 处理一次成功拉取，返回节流间隔；运行已失效时返回 `None`
fn settle_message(
    source: &EventSource,
    run: u64,
    configuration: &Configuration,
    fetched: Fetched,
) -> Option<Duration> {
    let event = match fetched {
        Fetched::Event(event) => event,
        Fetched::Response(response) => configuration.create_event(response),
    };

    let next = match event.meta() {
        Some(meta) => configuration.apply_meta(meta),
        None => configuration.clone(),
    };
    let pause = source.policy().pause(&next);

    let live = source.with_state(|state| {
        if state.run != run || state.ready_state != ReadyState::Open {
            return false;
        }
        if matches!(event, Event::Message(_)) && !next.is_no_store() {
            state.previous_event = state.current_event.replace(event.clone());
        }
        state.configuration = next;
        state.consecutive_errors = 0;
        true
    });
    if !live {
        return None;
    }

    source.dispatch_event(&event);
    Some(pause)
}

/// 处理终态错误：派发 `error` 事件，运行循环继续；达到错误上限时自行关闭
fn settle_error(source: &EventSource, run: u64, err: DataSourceError) -> Option<Duration> {
    let policy = source.policy();
    let outcome = source.with_state(|state| {
        if state.run != run || state.ready_state != ReadyState::Open {
            return None;
        }
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        Some((
            state.consecutive_errors,
            policy.pause(&state.configuration),
        ))
    });
    let (consecutive, pause) = outcome?;

    warn!(uri = %source.uri(), error = %err, consecutive, "fetch failed");
    source.dispatch_event(&Event::error(err));

    if policy.ceiling_reached(consecutive) {
        warn!(uri = %source.uri(), consecutive, "error ceiling reached, closing source");
        source.close();
        return None;
    }
    Some(pause)
}

fn finish(source: &EventSource, run: u64) {
    let current = source.with_state(|state| {
        if state.run != run {
            return false;
        }
        state.ready_state = ReadyState::Closed;
        state.cancel = None;
        true
    });
    if current {
        debug!(uri = %source.uri(), run, "source closed");
        source.dispatch_event(&Event::Close);
    }
}
