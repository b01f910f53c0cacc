use data_source::event_source::{BlockingConfig, BlockingPolicy, Configuration, fetch_fn};
use data_source::provider::CallableProvider;
use data_source::{
    ConsumerRef, DataSourceError, DataSourceService, EventSource, EventType, Fetched, Meta,
    ReadyState, Response, SourceUri,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 记录提供者构造次数与每次拉取携带的游标
#[derive(Default)]
struct Spy {
    created: AtomicUsize,
    cursors: Mutex<Vec<Option<u64>>>,
}

impl Spy {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn fetches(&self) -> usize {
        self.cursors.lock().len()
    }

    fn last_cursor(&self) -> Option<Option<u64>> {
        self.cursors.lock().last().copied()
    }
}

fn fast_policy() -> BlockingPolicy {
    BlockingPolicy::new(BlockingConfig {
        default_interval: Duration::from_millis(10),
        ..Default::default()
    })
}

/// 首次拉取返回 `{path}` 及游标 5，携带游标的长轮询永不返回
fn provider(spy: Arc<Spy>, cache_control: Option<&'static str>) -> CallableProvider {
    CallableProvider::new("test", move |uri: &SourceUri| {
        spy.created.fetch_add(1, Ordering::SeqCst);
        let spy = spy.clone();
        let path = uri.path().to_string();
        fetch_fn(move |configuration: Configuration, _source: EventSource| {
            let spy = spy.clone();
            let path = path.clone();
            async move {
                spy.cursors.lock().push(configuration.cursor());
                if configuration.cursor().is_some() {
                    std::future::pending::<()>().await;
                }
                let meta = Meta::builder()
                    .cursor(json!(5))
                    .maybe_cache_control(cache_control)
                    .build();
                let response = Response::new(json!({ "path": path })).with_meta(meta);
                Ok::<Fetched, DataSourceError>(response.into())
            }
        })
    })
    .with_policy(fast_policy())
}

fn service_with(spy: &Arc<Spy>, cache_control: Option<&'static str>) -> DataSourceService {
    DataSourceService::builder()
        .providers(vec![Arc::new(provider(spy.clone(), cache_control))])
        .build()
}

fn service(spy: &Arc<Spy>) -> DataSourceService {
    service_with(spy, None)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

fn count(source: &EventSource, event_type: EventType) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    source.add_event_listener(event_type, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    hits
}

/// 打开、等待首条消息、释放，直到关闭事件写入缓存
async fn warm_cache(service: &DataSourceService, uri: &str) -> anyhow::Result<EventSource> {
    let consumer = ConsumerRef::new();
    let source = service.open(uri, &consumer, false)?;
    anyhow::ensure!(wait_until(|| source.current_event().is_some()).await);
    service.close(&source, &consumer);
    anyhow::ensure!(wait_until(|| source.ready_state() == ReadyState::Closed).await);
    // 缓存写入与移除在同一次 close 回调内完成
    anyhow::ensure!(wait_until(|| service.sources().is_empty()).await);
    Ok(source)
}

#[tokio::test(flavor = "multi_thread")]
async fn consumers_share_one_physical_source() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service(&spy);
    let (a, b) = (ConsumerRef::new(), ConsumerRef::new());

    let first = service.open("test://x", &a, false)?;
    let closes = count(&first, EventType::Close);
    let second = service.open("test://x", &b, false)?;

    assert!(first.ptr_eq(&second));
    assert_eq!(spy.created(), 1);
    assert_eq!(service.usage(&first), 2);
    assert!(wait_until(|| first.current_event().is_some()).await);

    service.close(&first, &a);
    assert_eq!(first.ready_state(), ReadyState::Open);
    assert_eq!(service.usage(&first), 1);

    service.close(&second, &b);
    assert!(wait_until(|| first.ready_state() == ReadyState::Closed).await);
    assert!(wait_until(|| service.sources().is_empty()).await);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn listeners_attach_before_the_source_starts() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service_with(&spy, Some("no-store"));
    let consumer = ConsumerRef::new();

    let states = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    let source = service.open_with("test://x", &consumer, false, |source| {
        states.lock().push(source.ready_state());
        let hits = hits.clone();
        source.add_event_listener(EventType::Message, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    })?;

    assert_eq!(*states.lock(), vec![ReadyState::Connecting]);
    // no-store 消息不会保留为 current_event，只能靠事先挂好的监听器收到
    assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1).await);
    assert!(source.current_event().is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reopening_an_open_source_does_not_restart_it() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service(&spy);
    let (a, b) = (ConsumerRef::new(), ConsumerRef::new());

    let source = service.open("test://x", &a, false)?;
    // 首次拉取 + 挂起中的长轮询
    assert!(wait_until(|| spy.fetches() == 2).await);

    let again = service.open("test://x", &b, false)?;
    let forced = service.open("test://x", &b, true)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(again.ptr_eq(&source));
    assert!(forced.ptr_eq(&source));
    assert_eq!(spy.created(), 1);
    assert_eq!(spy.fetches(), 2);
    assert_eq!(source.ready_state(), ReadyState::Open);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn same_consumer_registers_once() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service(&spy);
    let consumer = ConsumerRef::new();

    let source = service.open("test://x", &consumer, false)?;
    service.open("test://x", &consumer, false)?;
    assert_eq!(service.usage(&source), 1);

    service.close(&source, &consumer);
    assert_eq!(service.usage(&source), 0);
    assert!(wait_until(|| source.ready_state() == ReadyState::Closed).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_source_is_cached_and_replayed() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service(&spy);

    let old = warm_cache(&service, "test://x").await?;
    let cached = service.cached("test://x").expect("cache entry after close");
    assert_eq!(cached.cursor(), 5);
    assert_eq!(cached.current_event().data(), Some(&json!({ "path": "x" })));

    let consumer = ConsumerRef::new();
    let fresh = service.open("test://x", &consumer, false)?;
    assert!(!fresh.ptr_eq(&old));
    assert_eq!(spy.created(), 2);
    // 新数据源立即持有旧数据，并从缓存的游标继续长轮询
    assert_eq!(
        fresh.current_event().and_then(|e| e.data().cloned()),
        Some(json!({ "path": "x" }))
    );
    assert_eq!(fresh.cursor(), Some(5));
    assert!(wait_until(|| spy.last_cursor() == Some(Some(5)) && spy.fetches() == 3).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn no_store_responses_are_not_cached() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service_with(&spy, Some("no-store"));
    let consumer = ConsumerRef::new();

    let source = service.open("test://secret", &consumer, false)?;
    // 游标照常推进，但消息不被保留
    assert!(wait_until(|| source.cursor() == Some(5)).await);
    assert!(source.current_event().is_none());

    service.close(&source, &consumer);
    assert!(wait_until(|| service.sources().is_empty()).await);
    assert!(service.cached("test://secret").is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_cache_forgets_previous_data() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service(&spy);

    warm_cache(&service, "test://x").await?;
    assert!(service.cached("test://x").is_some());

    service.reset_cache();
    assert!(service.cached("test://x").is_none());

    service.open("test://x", &ConsumerRef::new(), false)?;
    assert_eq!(spy.created(), 2);
    // 无缓存种子：新数据源从头拉取
    assert!(wait_until(|| spy.fetches() >= 3).await);
    assert_eq!(spy.cursors.lock()[2], None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn sources_are_listed_most_recent_last() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service(&spy);
    let consumer = ConsumerRef::new();

    service.open("test://a", &consumer, false)?;
    service.open("test://b", &consumer, false)?;
    service.open("test://a", &consumer, false)?;

    let order: Vec<String> = service
        .sources()
        .iter()
        .map(|s| s.uri().to_string())
        .collect();
    assert_eq!(order, vec!["test://b", "test://a"]);
    assert!(service.closed().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn self_closed_source_in_use_is_reopened() -> anyhow::Result<()> {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let provider = CallableProvider::new("test", move |_: &SourceUri| {
        let counter = counter.clone();
        fetch_fn(move |_: Configuration, _: EventSource| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Fetched, _>(DataSourceError::http(404, "not found")) }
        })
    })
    .with_policy(BlockingPolicy::new(BlockingConfig {
        default_interval: Duration::from_millis(10),
        error_ceiling: Some(1),
        ..Default::default()
    }));
    let service = DataSourceService::builder()
        .providers(vec![Arc::new(provider)])
        .build();
    let (a, b) = (ConsumerRef::new(), ConsumerRef::new());

    let source = service.open("test://missing", &a, false)?;
    assert!(wait_until(|| source.ready_state() == ReadyState::Closed).await);
    // 仍被使用：保留在活跃表中，并出现在 closed() 中
    assert_eq!(service.closed(), vec!["test://missing".to_string()]);

    let again = service.open("test://missing", &b, false)?;
    assert!(again.ptr_eq(&source));
    assert!(wait_until(|| attempts.load(Ordering::SeqCst) == 2).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn releasing_a_self_closed_source_forgets_it_at_once() -> anyhow::Result<()> {
    let provider = CallableProvider::new("test", |_: &SourceUri| {
        fetch_fn(|_: Configuration, _: EventSource| async {
            Err::<Fetched, _>(DataSourceError::http(404, "not found"))
        })
    })
    .with_policy(BlockingPolicy::new(BlockingConfig {
        default_interval: Duration::from_millis(10),
        error_ceiling: Some(1),
        ..Default::default()
    }));
    let service = DataSourceService::builder()
        .providers(vec![Arc::new(provider)])
        .build();
    let consumer = ConsumerRef::new();

    let source = service.open("test://missing", &consumer, false)?;
    assert!(wait_until(|| source.ready_state() == ReadyState::Closed).await);
    assert_eq!(service.sources().len(), 1);

    // 已完全关闭：最后一个引用释放时同步移除，不等待 close 事件
    service.close(&source, &consumer);
    assert!(service.sources().is_empty());
    assert!(service.closed().is_empty());
    assert_eq!(service.usage(&source), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_everything() -> anyhow::Result<()> {
    let spy = Arc::new(Spy::default());
    let service = service(&spy);
    let consumer = ConsumerRef::new();

    let source = service.open("test://x", &consumer, false)?;
    assert!(wait_until(|| source.ready_state() == ReadyState::Open).await);

    service.shutdown();
    assert!(service.is_shut_down());
    assert!(service.sources().is_empty());
    assert!(wait_until(|| source.ready_state() == ReadyState::Closed).await);
    assert!(matches!(
        service.open("test://x", &consumer, false),
        Err(DataSourceError::ServiceShutdown)
    ));
    Ok(())
}
