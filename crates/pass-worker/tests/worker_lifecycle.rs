// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boot, cache and session lifecycle of the worker against the in-memory
//! collaborators.

mod common;

use async_trait::async_trait;
use common::{eventually, port, prefs, start, start_with, wait_status, wakeup};
use pass_app_core::ports::{ApiError, CacheEntry, CacheError, CachePort};
use pass_app_core::prefs::{PollingPrefs, WorkerPrefs};
use pass_session_proto::{Endpoint, Message, Response, WorkerMessage, WorkerState, WorkerStatus};
use pass_store::selectors::{select_items_by_share, select_shares};
use pass_store::{Action, Envelope};
use pass_worker::memory::{MemoryApi, MemoryCache, Op, PlainCrypto, SessionMode};
use pass_worker::{Collaborators, WorkerContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache whose writes stall inside `set`.
#[derive(Default)]
struct SlowCache {
    inner: MemoryCache,
    started: AtomicUsize,
}

#[async_trait]
impl CachePort for SlowCache {
    async fn get(&self) -> Result<Option<CacheEntry>, CacheError> {
        self.inner.get().await
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.inner.set(entry).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }
}

async fn start_on(api: MemoryApi, cache: Arc<dyn CachePort>, prefs: WorkerPrefs) -> Arc<WorkerContext> {
    WorkerContext::start(
        Collaborators {
            api: Arc::new(api),
            crypto: Arc::new(PlainCrypto::default()),
            cache,
        },
        prefs,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn concurrent_wakeups_share_one_boot() {
    let h = start(MemoryApi::demo().with_latency(Duration::from_millis(20))).await;

    let (popup, page) = tokio::join!(
        wakeup(&h.ctx, Endpoint::Popup),
        wakeup(&h.ctx, Endpoint::Page)
    );

    assert_eq!(popup.0.status, WorkerStatus::Ready);
    assert_eq!(page.0.status, WorkerStatus::Ready);
    assert_eq!(h.api.calls(Op::ResumeSession), 1);
    assert_eq!(h.api.calls(Op::FetchUser), 1);
    assert_eq!(popup.0.uid.as_deref(), Some("demo"));

    let shares = h.ctx.store().read(|s| select_shares(s).len()).await;
    assert_eq!(shares, 1);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn ready_worker_does_not_boot_again() {
    let h = start(MemoryApi::demo()).await;
    wakeup(&h.ctx, Endpoint::Popup).await;
    let (state, _) = wakeup(&h.ctx, Endpoint::Popup).await;
    assert_eq!(state.status, WorkerStatus::Ready);
    assert_eq!(h.api.calls(Op::ResumeSession), 1);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn second_worker_hydrates_from_cache() {
    let first = start(MemoryApi::demo()).await;
    wakeup(&first.ctx, Endpoint::Popup).await;
    assert!(eventually(|| first.cache.writes() > 0).await);
    first.ctx.shutdown().await;

    let crypto = Arc::new(PlainCrypto::default());
    let second = start_with(Arc::clone(&first.api), Arc::clone(&crypto), Arc::clone(&first.cache)).await;
    let (state, _) = wakeup(&second.ctx, Endpoint::Popup).await;

    assert_eq!(state.status, WorkerStatus::Ready);
    assert_eq!(crypto.hydrations(), 1);
    // Hydrated boots skip the user fetch.
    assert_eq!(second.api.calls(Op::FetchUser), 1);
    let items = second
        .ctx
        .store()
        .read(|s| {
            select_shares(s)
                .iter()
                .map(|share| select_items_by_share(s, &share.share_id).len())
                .sum::<usize>()
        })
        .await;
    assert_eq!(items, 1);
    second.ctx.shutdown().await;
}

#[tokio::test]
async fn unreadable_cache_is_wiped_and_boot_fails() {
    let first = start(MemoryApi::demo()).await;
    wakeup(&first.ctx, Endpoint::Popup).await;
    assert!(eventually(|| first.cache.writes() > 0).await);
    first.ctx.shutdown().await;

    let crypto = Arc::new(PlainCrypto::default());
    crypto.break_session();
    let second = start_with(Arc::clone(&first.api), Arc::clone(&crypto), Arc::clone(&first.cache)).await;
    let (state, _) = wakeup(&second.ctx, Endpoint::Popup).await;

    assert_eq!(state.status, WorkerStatus::Error);
    assert!(second.cache.entry().is_none());
    assert!(crypto.clears() >= 1);
    second.ctx.shutdown().await;
}

#[tokio::test]
async fn network_failure_after_hydration_keeps_cached_state() {
    let first = start(MemoryApi::demo()).await;
    wakeup(&first.ctx, Endpoint::Popup).await;
    assert!(eventually(|| first.cache.writes() > 0).await);
    first.ctx.shutdown().await;

    first
        .api
        .fail_next(Op::FetchShares, ApiError::Network("offline".into()));
    let second = start_with(
        Arc::clone(&first.api),
        Arc::new(PlainCrypto::default()),
        Arc::clone(&first.cache),
    )
    .await;
    let (state, _) = wakeup(&second.ctx, Endpoint::Popup).await;

    assert_eq!(state.status, WorkerStatus::Ready);
    assert!(second.cache.entry().is_some());
    let shares = second.ctx.store().read(|s| select_shares(s).len()).await;
    assert_eq!(shares, 1);
    second.ctx.shutdown().await;
}

#[tokio::test]
async fn failed_network_boot_errors_then_retries_on_next_wakeup() {
    let h = start(MemoryApi::demo()).await;
    h.api
        .fail_next(Op::FetchUser, ApiError::Network("offline".into()));

    let (state, _) = wakeup(&h.ctx, Endpoint::Popup).await;
    assert_eq!(state.status, WorkerStatus::Error);
    assert!(h.cache.entry().is_none());

    let (state, _) = wakeup(&h.ctx, Endpoint::Popup).await;
    assert_eq!(state.status, WorkerStatus::Ready);
    assert_eq!(h.api.calls(Op::FetchUser), 2);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn missing_session_is_unauthorized_without_fetching() {
    let api = MemoryApi::demo();
    api.set_session(SessionMode::Unauthorized);
    let h = start(api).await;

    let (state, _) = wakeup(&h.ctx, Endpoint::Popup).await;
    assert_eq!(state, WorkerState::unauthorized());
    assert_eq!(h.api.calls(Op::FetchUser), 0);
    assert!(h.ctx.channel_scopes().await.is_empty());
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn locked_session_boots_after_unlock() {
    let api = MemoryApi::demo();
    api.set_session(SessionMode::Locked);
    let h = start(api).await;

    let (state, _) = wakeup(&h.ctx, Endpoint::Popup).await;
    assert_eq!(state.status, WorkerStatus::Locked);
    assert!(state.logged_in);

    let unlock = |pin: &str| {
        WorkerMessage::new(
            Endpoint::Popup,
            Message::Unlock {
                pin: pin.to_string(),
            },
        )
    };
    assert!(matches!(h.ctx.handle(unlock("9999")).await, Response::Error { .. }));
    assert_eq!(h.ctx.status().await, WorkerStatus::Locked);

    assert_eq!(h.ctx.handle(unlock("0000")).await, Response::ack());
    assert_eq!(h.ctx.status().await, WorkerStatus::Ready);
    assert_eq!(h.api.calls(Op::ResumeSession), 1);

    // Unlocking an unlocked worker is refused.
    assert!(matches!(h.ctx.handle(unlock("0000")).await, Response::Error { .. }));
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn ready_worker_runs_user_and_share_channels() {
    let h = start(MemoryApi::demo()).await;
    wakeup(&h.ctx, Endpoint::Popup).await;
    let scopes = h.ctx.channel_scopes().await;
    assert_eq!(scopes.len(), 2);
    h.ctx.shutdown().await;
    assert!(h.ctx.channel_scopes().await.is_empty());
}

#[tokio::test]
async fn signout_during_a_cache_write_leaves_no_cache_behind() {
    let cache = Arc::new(SlowCache::default());
    let ctx = start_on(MemoryApi::demo(), cache.clone(), prefs()).await;
    let (state, _) = wakeup(&ctx, Endpoint::Popup).await;
    assert_eq!(state.status, WorkerStatus::Ready);
    assert!(eventually(|| cache.started.load(Ordering::SeqCst) > 0).await);

    let signout = Envelope::new(Action::Signout { soft: false });
    ctx.handle(WorkerMessage::new(Endpoint::Popup, Message::store_action(signout)))
        .await;
    assert!(wait_status(&ctx, WorkerStatus::Unauthorized).await);

    // Give any stalled write time to land.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.inner.entry().is_none());
    ctx.shutdown().await;
}

#[tokio::test]
async fn zero_polling_intervals_keep_channels_alive() {
    let prefs = WorkerPrefs {
        polling: PollingPrefs {
            user_interval_ms: 0,
            share_interval_ms: 0,
        },
        ..WorkerPrefs::default()
    };
    let api = MemoryApi::demo();
    let ctx = start_on(api, Arc::new(MemoryCache::default()), prefs).await;
    let (state, _) = wakeup(&ctx, Endpoint::Popup).await;
    assert_eq!(state.status, WorkerStatus::Ready);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctx.channel_scopes().await.len(), 2);
    ctx.shutdown().await;
}

#[tokio::test]
async fn wakeups_racing_the_end_of_boot_never_boot_twice() {
    let h = start(MemoryApi::demo().with_latency(Duration::from_millis(2))).await;
    let mut observer = port(&h.ctx, Endpoint::Background).await;

    let mut wakeups = Vec::new();
    for n in 0..40u64 {
        let ctx = Arc::clone(&h.ctx);
        wakeups.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(n)).await;
            wakeup(&ctx, Endpoint::Popup).await.0.status
        }));
    }
    for task in wakeups {
        assert_eq!(task.await.unwrap(), WorkerStatus::Ready);
    }
    assert_eq!(h.api.calls(Op::ResumeSession), 1);

    let mut statuses = Vec::new();
    while let Ok(message) = observer.try_recv() {
        if let Message::WorkerStatus { state } = message {
            statuses.push(state.status);
        }
    }
    let ready_at = statuses
        .iter()
        .position(|status| *status == WorkerStatus::Ready)
        .unwrap();
    assert!(!statuses[ready_at..].contains(&WorkerStatus::Authorizing));
    h.ctx.shutdown().await;
}
