use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::stub_transport::StubTransport;
use super::{LOCAL_ONLY, X, catalog, init_tracing};
use crate::refresher::RefreshError;
use crate::storage::Generic;
use crate::test::manual_clock::ManualClock;
use crate::{DEFAULT_CACHE_TTL, FlagStore, Resolution};

async fn store(
    transport: StubTransport,
    clock: ManualClock,
) -> FlagStore<Generic, StubTransport, ManualClock> {
    FlagStore::new(
        catalog(),
        Arc::new(Generic::default()),
        transport,
        clock,
        DEFAULT_CACHE_TTL,
    )
    .await
}

fn completion_flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
    let called = Arc::new(AtomicBool::new(false));
    let setter = called.clone();
    (called, move || setter.store(true, Ordering::SeqCst))
}

#[tokio::test]
async fn expired_cache_is_refreshed_without_forcing() {
    init_tracing();

    let transport = StubTransport::new(Duration::ZERO);
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), ManualClock::default()).await;

    assert!(store.cache().has_expired());

    let (called, then) = completion_flag();
    store
        .update_if_needed_then(false, then)
        .expect("an empty cache has expired")
        .wait()
        .await
        .unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert!(store.resolve(&X));
    assert!(!store.cache().has_expired());
    assert_eq!(transport.requests().await.len(), 1);
}

#[tokio::test]
async fn valid_cache_skips_the_fetch_and_the_completion() {
    init_tracing();

    let transport = StubTransport::new(Duration::ZERO);
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), ManualClock::default()).await;

    store.update_if_needed(true).unwrap().wait().await.unwrap();
    assert_eq!(transport.requests().await.len(), 1);

    let (called, then) = completion_flag();
    assert!(store.update_if_needed_then(false, then).is_none());

    tokio::task::yield_now().await;
    assert_eq!(transport.requests().await.len(), 1);
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn forced_refresh_always_fetches() {
    init_tracing();

    let transport = StubTransport::new(Duration::ZERO);
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), ManualClock::default()).await;

    store.update_if_needed(true).unwrap().wait().await.unwrap();
    assert!(!store.cache().has_expired());

    transport.set_flags(&[("x_flag", false)]).await;
    store.update_if_needed(true).unwrap().wait().await.unwrap();

    assert_eq!(transport.requests().await.len(), 2);
    assert!(!store.resolve(&X));
}

#[tokio::test]
async fn refreshes_again_once_the_ttl_lapses() {
    init_tracing();

    let clock = ManualClock::default();
    let transport = StubTransport::new(Duration::ZERO);
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), clock.clone()).await;

    store.update_if_needed(false).unwrap().wait().await.unwrap();

    clock.advance(Duration::from_secs(43_200));
    assert!(store.update_if_needed(false).is_none());

    clock.advance(Duration::from_secs(1));
    store.update_if_needed(false).unwrap().wait().await.unwrap();

    assert_eq!(transport.requests().await.len(), 2);
}

#[tokio::test]
async fn failed_fetch_keeps_the_stale_values() {
    init_tracing();

    let clock = ManualClock::default();
    let transport = StubTransport::new(Duration::ZERO);
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), clock.clone()).await;

    store.update_if_needed(true).unwrap().wait().await.unwrap();
    let refreshed_at = store.cache().last_refresh();

    clock.advance(Duration::from_secs(50_000));
    transport.fail().await;

    let (called, then) = completion_flag();
    let result = store.update_if_needed_then(false, then).unwrap().wait().await;

    assert!(matches!(result, Err(RefreshError::Fetch(_))));
    assert!(!called.load(Ordering::SeqCst));
    assert!(store.resolve(&X));
    assert_eq!(store.cache().last_refresh(), refreshed_at);
    assert!(store.cache().has_expired());
}

#[tokio::test]
async fn fetches_with_the_stable_device_id() {
    init_tracing();

    let transport = StubTransport::new(Duration::ZERO);
    transport.set_flags(&[]).await;
    let store = store(transport.clone(), ManualClock::default()).await;

    store.update_if_needed(true).unwrap().wait().await.unwrap();
    store.update_if_needed(true).unwrap().wait().await.unwrap();

    let device_id = store.device_id().await;
    assert_eq!(transport.requests().await, vec![device_id.clone(), device_id]);
}

#[tokio::test]
async fn subscribers_hear_about_successful_refreshes() {
    init_tracing();

    let transport = StubTransport::new(Duration::from_millis(10));
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), ManualClock::default()).await;

    let mut changes = store.subscribe_to_flag_changes();

    // Fire and forget: the refresh keeps running after the handle is dropped.
    drop(store.update_if_needed(true));

    tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(store.resolve(&X));
}

#[tokio::test]
async fn overlapping_refreshes_leave_the_last_landed_values() {
    init_tracing();

    let transport = StubTransport::new(Duration::from_millis(10));
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), ManualClock::default()).await;

    let first = store.update_if_needed(true).unwrap();
    let second = store.update_if_needed(true).unwrap();

    first.wait().await.unwrap();
    second.wait().await.unwrap();

    assert_eq!(transport.requests().await.len(), 2);
    assert!(store.resolve(&X));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_can_be_requested_from_a_plain_thread() {
    init_tracing();

    let transport = StubTransport::new(Duration::ZERO);
    transport.set_flags(&[("x_flag", true)]).await;
    let store = store(transport.clone(), ManualClock::default()).await;

    let (called, then) = completion_flag();
    let requester = store.clone();
    let pending = std::thread::spawn(move || requester.update_if_needed_then(true, then))
        .join()
        .unwrap()
        .expect("a forced refresh always fetches");

    pending.wait().await.unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert!(store.resolve(&X));
    assert_eq!(transport.requests().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_threads_resolve_and_override_while_refreshes_land() {
    init_tracing();

    let transport = StubTransport::new(Duration::ZERO);
    let store = store(transport.clone(), ManualClock::default()).await;
    let runtime = tokio::runtime::Handle::current();
    let done = Arc::new(AtomicBool::new(false));

    let threads = (0..4)
        .map(|i| {
            let store = store.clone();
            let runtime = runtime.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    match store.resolution(&X) {
                        Resolution::Default(value) => assert!(!value),
                        Resolution::Remote(_) => (),
                        other => panic!("unexpected resolution {other:?}"),
                    }

                    if i == 0 {
                        runtime.block_on(store.set_override(Some(false), &LOCAL_ONLY));
                        assert!(!store.resolve(&LOCAL_ONLY));
                        runtime.block_on(store.set_override(None, &LOCAL_ONLY));
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    for round in 0..50 {
        transport.set_flags(&[("x_flag", round % 2 == 0)]).await;
        store.update_if_needed(true).unwrap().wait().await.unwrap();
        assert_eq!(store.resolution(&X), Resolution::Remote(round % 2 == 0));
    }

    done.store(true, Ordering::SeqCst);
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(store.resolution(&LOCAL_ONLY), Resolution::Default(true));
    assert_eq!(transport.requests().await.len(), 50);
}
