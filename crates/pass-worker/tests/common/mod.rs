// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]
//! Worker fixtures shared by the integration tests.

use pass_app_core::prefs::{PollingPrefs, WorkerPrefs};
use pass_session_proto::{
    ConnectionKey, Endpoint, Message, Response, ResponsePayload, WorkerMessage, WorkerState,
    WorkerStatus,
};
use pass_store::State;
use pass_worker::channel::EventScope;
use pass_worker::memory::{MemoryApi, MemoryCache, PlainCrypto};
use pass_worker::{Collaborators, WorkerContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct Harness {
    pub api: Arc<MemoryApi>,
    pub crypto: Arc<PlainCrypto>,
    pub cache: Arc<MemoryCache>,
    pub ctx: Arc<WorkerContext>,
}

pub fn prefs() -> WorkerPrefs {
    WorkerPrefs {
        polling: PollingPrefs {
            user_interval_ms: 20,
            share_interval_ms: 20,
        },
        ..WorkerPrefs::default()
    }
}

pub async fn start_with(
    api: Arc<MemoryApi>,
    crypto: Arc<PlainCrypto>,
    cache: Arc<MemoryCache>,
) -> Harness {
    let ctx = WorkerContext::start(
        Collaborators {
            api: api.clone(),
            crypto: crypto.clone(),
            cache: cache.clone(),
        },
        prefs(),
    )
    .await
    .unwrap();
    Harness {
        api,
        crypto,
        cache,
        ctx,
    }
}

pub async fn start(api: MemoryApi) -> Harness {
    start_with(
        Arc::new(api),
        Arc::new(PlainCrypto::default()),
        Arc::new(MemoryCache::default()),
    )
    .await
}

pub async fn wakeup(ctx: &WorkerContext, endpoint: Endpoint) -> (WorkerState, Vec<Message>) {
    let message = WorkerMessage::new(endpoint, Message::WorkerWakeup { tab_id: None });
    match ctx.handle(message).await {
        Response::Success {
            payload: ResponsePayload::Wakeup { state, buffered },
        } => (state, buffered),
        other => panic!("unexpected wakeup response: {other:?}"),
    }
}

/// Connects a port for `endpoint` and returns its inbox.
pub async fn port(ctx: &WorkerContext, endpoint: Endpoint) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.broker().connect(ConnectionKey::new(endpoint), tx).await;
    rx
}

/// Waits for the first message matching `pred`, dropping the others.
pub async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    pred: impl Fn(&Message) -> bool,
) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(message) = rx.recv().await {
            if pred(&message) {
                return Some(message);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Polls a synchronous condition for up to three seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Polls the worker store for up to three seconds.
pub async fn wait_state(ctx: &WorkerContext, check: impl Fn(&State) -> bool) -> bool {
    for _ in 0..300 {
        if ctx.store().read(|s| check(s)).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Polls the worker status for up to three seconds.
pub async fn wait_status(ctx: &WorkerContext, status: WorkerStatus) -> bool {
    for _ in 0..300 {
        if ctx.status().await == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Waits until no channel runs for `scope`.
pub async fn wait_channel_stopped(ctx: &WorkerContext, scope: &EventScope) -> bool {
    for _ in 0..300 {
        if !ctx.channel_scopes().await.contains(scope) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
