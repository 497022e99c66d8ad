// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Two replicas against a real worker hub over a Unix socket.

use pass_app_core::prefs::{PollingPrefs, WorkerPrefs};
use pass_session_client::{ReplicaStore, SessionClient};
use pass_session_proto::{Endpoint, Message, WorkerStatus};
use pass_store::action::item_creation_intent;
use pass_store::selectors::{select_item, select_item_id_by_optimistic_id, select_shares};
use pass_store::{ItemData, NotificationKind, State};
use pass_worker::memory::{MemoryApi, MemoryCache, PlainCrypto};
use pass_worker::{server, Collaborators, WorkerContext};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

static NEXT_SOCKET: AtomicUsize = AtomicUsize::new(0);

fn socket_path() -> PathBuf {
    let n = NEXT_SOCKET.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("pass-hub-{}-{n}.sock", std::process::id()))
}

async fn hub() -> (Arc<WorkerContext>, PathBuf) {
    let ctx = WorkerContext::start(
        Collaborators {
            api: Arc::new(MemoryApi::demo()),
            crypto: Arc::new(PlainCrypto::default()),
            cache: Arc::new(MemoryCache::default()),
        },
        WorkerPrefs {
            polling: PollingPrefs {
                user_interval_ms: 50,
                share_interval_ms: 50,
            },
            ..WorkerPrefs::default()
        },
    )
    .await
    .unwrap();
    let path = socket_path();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(server::serve(Arc::clone(&ctx), listener));
    (ctx, path)
}

async fn replica(path: &Path, endpoint: Endpoint) -> (ReplicaStore, mpsc::UnboundedReceiver<Message>) {
    let (client, pushes) = SessionClient::connect(path).await.unwrap();
    let store = ReplicaStore::new(endpoint, None, Arc::new(client)).unwrap();
    (store, pushes)
}

/// Applies pushes until `check` holds or three seconds pass.
async fn pump_until(
    store: &mut ReplicaStore,
    pushes: &mut mpsc::UnboundedReceiver<Message>,
    check: impl Fn(&ReplicaStore) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !check(store) {
        match tokio::time::timeout_at(deadline, pushes.recv()).await {
            Ok(Some(message)) => store.receive(message),
            Ok(None) | Err(_) => return false,
        }
    }
    true
}

fn has_item(state: &State, optimistic_id: &str) -> bool {
    let Some(item_id) = select_item_id_by_optimistic_id(state, optimistic_id) else {
        return false;
    };
    select_shares(state)
        .iter()
        .any(|share| select_item(state, &share.share_id, item_id).is_some())
}

#[tokio::test]
async fn wakeup_over_the_socket_syncs_the_whole_state() {
    let (ctx, path) = hub().await;
    let (mut popup, mut pushes) = replica(&path, Endpoint::Popup).await;

    let state = popup.wakeup().await.unwrap();
    assert_eq!(state.status, WorkerStatus::Ready);
    assert!(!popup.is_stale());
    assert!(pump_until(&mut popup, &mut pushes, |r| select_shares(r.state()).len() == 1).await);

    ctx.shutdown().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn mutation_from_one_replica_reaches_the_other() {
    let (ctx, path) = hub().await;
    let (mut popup, mut popup_pushes) = replica(&path, Endpoint::Popup).await;
    let (mut page, mut page_pushes) = replica(&path, Endpoint::Page).await;
    popup.wakeup().await.unwrap();
    page.wakeup().await.unwrap();
    assert!(pump_until(&mut popup, &mut popup_pushes, |r| !select_shares(r.state()).is_empty()).await);
    assert!(pump_until(&mut page, &mut page_pushes, |r| !select_shares(r.state()).is_empty()).await);

    let share_id = select_shares(popup.state())[0].share_id.clone();
    let data = ItemData {
        name: "shared login".into(),
        ..ItemData::default()
    };
    popup
        .dispatch(item_creation_intent("opt-1", share_id.clone(), data, 0))
        .await;
    // Applied locally before the worker answers.
    assert!(select_item(popup.state(), &share_id, "opt-1").is_some());

    assert!(
        pump_until(&mut popup, &mut popup_pushes, |r| has_item(r.state(), "opt-1")
            && r.state().is_settled()
            && !r.toasts().visible(Instant::now()).is_empty())
        .await
    );
    let toast = &popup.toasts().visible(Instant::now())[0].notification;
    assert_eq!(toast.kind, NotificationKind::Success);

    assert!(pump_until(&mut page, &mut page_pushes, |r| has_item(r.state(), "opt-1")).await);
    assert!(page.toasts().visible(Instant::now()).is_empty());

    ctx.shutdown().await;
    let _ = std::fs::remove_file(&path);
}
