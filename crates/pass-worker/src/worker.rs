// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker context: lifecycle status, single-flight boot, message handlers
//! and the channel tree, owned in one place and torn down by
//! [`WorkerContext::shutdown`].

use crate::broker::{Broker, BrokerError};
use crate::cache::{self, HydrateError};
use crate::channel::{self, CancelToken, ChannelRegistry, EventScope};
use crate::saga::{self, EffectError};
use crate::store::Store;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use pass_app_core::ports::{ApiError, ApiPort, CachePort, CryptoPort, SessionResume};
use pass_app_core::prefs::WorkerPrefs;
use pass_session_proto::{
    ConnectionKey, Message, MessageType, Response, ResponsePayload, WorkerMessage, WorkerState,
    WorkerStatus,
};
use pass_store::{request_id, Action, Envelope, RequestStatus, StoreError};
use std::future::Future;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

type BootFuture = Shared<BoxFuture<'static, WorkerStatus>>;

/// Worker construction errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Reducer pipeline could not be built.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Message handlers could not be registered.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// External collaborators of the worker.
#[derive(Clone)]
pub struct Collaborators {
    /// REST transport.
    pub api: Arc<dyn ApiPort>,
    /// Item, vault and cache crypto.
    pub crypto: Arc<dyn CryptoPort>,
    /// Encrypted local cache.
    pub cache: Arc<dyn CachePort>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootMode {
    /// Resume the persisted session first.
    Fresh,
    /// The session was just unlocked with the PIN.
    Unlocked,
}

/// Everything the worker owns.
pub struct WorkerContext {
    pub(crate) store: Store,
    pub(crate) broker: Arc<Broker>,
    pub(crate) api: Arc<dyn ApiPort>,
    pub(crate) crypto: Arc<dyn CryptoPort>,
    pub(crate) cache: Arc<dyn CachePort>,
    pub(crate) prefs: WorkerPrefs,
    /// Serializes cache writes against wipes and teardown status changes.
    pub(crate) cache_gate: Mutex<()>,
    state: Mutex<WorkerState>,
    boot: Mutex<Option<BootFuture>>,
    channels: Mutex<ChannelRegistry>,
    cancel: CancelToken,
}

impl WorkerContext {
    /// Builds the worker, registers its message handlers and starts the
    /// effect loop. Nothing boots until the first wakeup.
    pub async fn start(ports: Collaborators, prefs: WorkerPrefs) -> Result<Arc<Self>, WorkerError> {
        let broker = Arc::new(Broker::new(prefs.buffer_limit));
        let (store, effects) = Store::new(Arc::clone(&broker))?;
        let ctx = Arc::new(Self {
            store,
            broker,
            api: ports.api,
            crypto: ports.crypto,
            cache: ports.cache,
            prefs,
            cache_gate: Mutex::new(()),
            state: Mutex::new(WorkerState::default()),
            boot: Mutex::new(None),
            channels: Mutex::new(ChannelRegistry::default()),
            cancel: CancelToken::new(),
        });

        ctx.broker
            .register_message(MessageType::WorkerWakeup, route(&ctx, Self::on_wakeup))
            .await?;
        ctx.broker
            .register_message(MessageType::StoreAction, route(&ctx, Self::on_store_action))
            .await?;
        ctx.broker
            .register_message(MessageType::Unlock, route(&ctx, Self::on_unlock))
            .await?;

        tokio::spawn(saga::run(Arc::clone(&ctx), effects, ctx.cancel.clone()));
        Ok(ctx)
    }

    /// Stops the effect loop and every channel and drops handlers and ports.
    pub async fn shutdown(&self) {
        info!("worker shutting down");
        self.cancel.cancel();
        self.channels.lock().await.stop_all();
        *self.boot.lock().await = None;
        self.broker.shutdown().await;
    }

    /// Message broker.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Authoritative store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Routes a replica message to its handler.
    pub async fn handle(&self, message: WorkerMessage) -> Response {
        self.broker.handle(message).await
    }

    /// Status snapshot.
    pub async fn worker_state(&self) -> WorkerState {
        self.state.lock().await.clone()
    }

    /// Current status.
    pub async fn status(&self) -> WorkerStatus {
        self.state.lock().await.status
    }

    /// Scopes with a running event channel.
    pub async fn channel_scopes(&self) -> Vec<EventScope> {
        self.channels.lock().await.scopes()
    }

    async fn set_state(&self, next: WorkerState) -> WorkerStatus {
        let status = next.status;
        {
            let mut state = self.state.lock().await;
            if *state == next {
                return status;
            }
            info!(from = %state.status, to = %status, "worker status");
            *state = next.clone();
        }
        self.broker
            .broadcast(Message::WorkerStatus { state: next })
            .await;
        status
    }

    async fn set_status(&self, status: WorkerStatus) -> WorkerStatus {
        let mut next = self.worker_state().await;
        next.status = status;
        self.set_state(next).await
    }

    /// Boots unless a boot is already running, in which case the caller
    /// awaits that one. Resolves to the status the boot ended in.
    pub async fn ensure_boot(self: &Arc<Self>) -> WorkerStatus {
        self.single_flight(BootMode::Fresh, |_| true).await
    }

    /// Joins the running boot or, when none runs and `start_when` accepts
    /// the current status, starts one. Both checks happen under the slot
    /// lock, which a finishing boot takes to clear itself.
    async fn single_flight(
        self: &Arc<Self>,
        mode: BootMode,
        start_when: fn(WorkerStatus) -> bool,
    ) -> WorkerStatus {
        let boot = {
            let mut slot = self.boot.lock().await;
            if let Some(running) = slot.as_ref() {
                running.clone()
            } else {
                let status = self.status().await;
                if !start_when(status) {
                    return status;
                }
                // Spawned so the boot keeps going when every waiter is dropped.
                let ctx = Arc::clone(self);
                let task = tokio::spawn(async move {
                    let status = ctx.boot(mode).await;
                    *ctx.boot.lock().await = None;
                    status
                });
                let boot = async move { task.await.unwrap_or(WorkerStatus::Error) }
                    .boxed()
                    .shared();
                *slot = Some(boot.clone());
                boot
            }
        };
        boot.await
    }

    #[instrument(skip(self))]
    async fn boot(self: &Arc<Self>, mode: BootMode) -> WorkerStatus {
        let uid = match mode {
            BootMode::Fresh => {
                self.set_state(WorkerState {
                    logged_in: false,
                    status: WorkerStatus::Authorizing,
                    uid: None,
                })
                .await;
                match self.api.resume_session().await {
                    Ok(SessionResume::Ready { uid }) => uid,
                    Ok(SessionResume::Locked { uid }) => {
                        return self
                            .set_state(WorkerState {
                                logged_in: true,
                                status: WorkerStatus::Locked,
                                uid: Some(uid),
                            })
                            .await;
                    }
                    Ok(SessionResume::Unauthorized) | Err(ApiError::SessionInvalid) => {
                        return self.set_state(WorkerState::unauthorized()).await;
                    }
                    Err(err) => {
                        warn!(?err, "session resume failed");
                        return self.set_status(WorkerStatus::ResumingFailed).await;
                    }
                }
            }
            BootMode::Unlocked => self.worker_state().await.uid.unwrap_or_default(),
        };

        let loading = match mode {
            BootMode::Fresh => WorkerStatus::Booting,
            BootMode::Unlocked => WorkerStatus::Resuming,
        };
        self.set_state(WorkerState {
            logged_in: true,
            status: loading,
            uid: Some(uid),
        })
        .await;
        self.store
            .dispatch(Envelope::new(Action::Boot).with_request(request_id::boot(), RequestStatus::Start))
            .await;

        match self.load().await {
            Ok(()) => {}
            Err(BootError::Hydrate(err)) => {
                warn!(?err, "cache hydration failed, wiping cache");
                cache::wipe(self).await;
                self.crypto.clear().await;
                self.fail_boot(err.to_string()).await;
                return self.set_status(WorkerStatus::Error).await;
            }
            Err(BootError::Effect(err)) if err.is_session_invalid() => {
                self.store
                    .dispatch(Envelope::new(Action::Signout { soft: false }))
                    .await;
                return self.set_state(WorkerState::unauthorized()).await;
            }
            Err(BootError::Effect(err)) => {
                warn!(?err, "boot failed");
                self.fail_boot(err.to_string()).await;
                return self
                    .set_status(match mode {
                        BootMode::Fresh => WorkerStatus::Error,
                        BootMode::Unlocked => WorkerStatus::ResumingFailed,
                    })
                    .await;
            }
        }

        let status = self.set_status(WorkerStatus::Ready).await;
        cache::spawn_write(Arc::clone(self));
        self.reconcile_channels().await;
        status
    }

    /// Hydrates from the cache when possible, from the network otherwise.
    async fn load(&self) -> Result<(), BootError> {
        if let Some(state) = cache::hydrate(self).await? {
            self.store
                .dispatch(
                    Envelope::new(Action::BootSuccess {
                        state: Some(Box::new(state)),
                    })
                    .with_request(request_id::boot(), RequestStatus::Success),
                )
                .await;
            match self.sync().await {
                Ok(()) => {}
                Err(err) if err.is_session_invalid() => return Err(err.into()),
                Err(err) => warn!(?err, "sync after hydration failed, serving cached state"),
            }
            return Ok(());
        }

        let user = self.api.fetch_user().await.map_err(EffectError::from)?;
        self.store
            .dispatch(Envelope::new(Action::UserLoaded {
                user: user.user,
                addresses: user.addresses,
                event_id: user.event_id,
            }))
            .await;
        self.sync().await?;
        self.store
            .dispatch(
                Envelope::new(Action::BootSuccess { state: None })
                    .with_request(request_id::boot(), RequestStatus::Success),
            )
            .await;
        Ok(())
    }

    async fn fail_boot(&self, error: String) {
        self.store
            .dispatch(
                Envelope::new(Action::BootFailure { error })
                    .with_request(request_id::boot(), RequestStatus::Failure),
            )
            .await;
    }

    /// Reconciles shares and items against the server lists. Shares that
    /// vanish between the two calls are skipped.
    pub(crate) async fn sync(&self) -> Result<(), EffectError> {
        let sealed = self.api.fetch_shares().await?;
        let mut shares = Vec::with_capacity(sealed.len());
        let mut items = Vec::new();
        for share in &sealed {
            let listed = match self.api.fetch_items(&share.share_id).await {
                Ok(listed) => listed,
                Err(err) if err.is_share_gone() => continue,
                Err(err) => return Err(err.into()),
            };
            shares.push(self.crypto.open_share(share).await?);
            for item in &listed {
                items.push(self.crypto.open_item(item).await?);
            }
        }
        self.store
            .dispatch(Envelope::new(Action::SyncSuccess { shares, items }))
            .await;
        Ok(())
    }

    /// Runs one channel for the user feed and one per committed share, and
    /// nothing else.
    pub(crate) async fn reconcile_channels(self: &Arc<Self>) {
        let shares: Vec<EventScope> = self
            .store
            .read(|state| {
                state
                    .shares
                    .as_if_not_optimistic()
                    .by_id
                    .keys()
                    .cloned()
                    .map(EventScope::Share)
                    .collect()
            })
            .await;
        let stale: Vec<EventScope> = self
            .channels
            .lock()
            .await
            .scopes()
            .into_iter()
            .filter(|scope| matches!(scope, EventScope::Share(_)) && !shares.contains(scope))
            .collect();
        for scope in &stale {
            self.stop_channel(scope).await;
        }
        self.start_channel(EventScope::User).await;
        for scope in shares {
            self.start_channel(scope).await;
        }
    }

    /// Starts the channel for `scope` unless it runs already. Boxed because
    /// channels reconcile other channels.
    pub(crate) fn start_channel(self: &Arc<Self>, scope: EventScope) -> BoxFuture<'static, ()> {
        let ctx = Arc::clone(self);
        async move {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let runner = Arc::clone(&ctx);
            ctx.channels
                .lock()
                .await
                .start(scope.clone(), move |cancel| channel::run(runner, scope, cancel));
        }
        .boxed()
    }

    pub(crate) async fn stop_channel(&self, scope: &EventScope) {
        self.channels.lock().await.stop(scope);
    }

    async fn teardown(&self, next: WorkerState, wipe_cache: bool) {
        self.channels.lock().await.stop_all();
        *self.boot.lock().await = None;
        let _gate = self.cache_gate.lock().await;
        if wipe_cache {
            cache::clear(self).await;
        }
        self.crypto.clear().await;
        self.set_state(next).await;
    }

    pub(crate) async fn on_signout(&self, soft: bool) {
        info!(soft, "signing out");
        if let Err(err) = self.api.signout().await {
            warn!(?err, "server side signout failed");
        }
        self.teardown(WorkerState::unauthorized(), true).await;
    }

    pub(crate) async fn on_lock(&self) {
        let uid = self.worker_state().await.uid;
        self.teardown(
            WorkerState {
                logged_in: true,
                status: WorkerStatus::Locked,
                uid,
            },
            false,
        )
        .await;
    }

    async fn on_wakeup(self: Arc<Self>, message: WorkerMessage) -> Response {
        let Message::WorkerWakeup { tab_id } = message.message else {
            return Response::error("expected WORKER_WAKEUP");
        };
        let key = ConnectionKey {
            endpoint: message.sender,
            tab_id,
        };
        self.single_flight(BootMode::Fresh, WorkerStatus::needs_boot).await;
        let state = self.worker_state().await;
        if state.status == WorkerStatus::Ready {
            self.store.unicast_state(&key).await;
        }
        Response::Success {
            payload: ResponsePayload::Wakeup {
                state,
                buffered: self.broker.flush().await,
            },
        }
    }

    async fn on_store_action(self: Arc<Self>, message: WorkerMessage) -> Response {
        let Message::StoreAction { action } = message.message else {
            return Response::error("expected STORE_ACTION");
        };
        self.store.dispatch(action.with_sender(message.sender)).await;
        Response::ack()
    }

    async fn on_unlock(self: Arc<Self>, message: WorkerMessage) -> Response {
        let Message::Unlock { pin } = message.message else {
            return Response::error("expected UNLOCK");
        };
        if self.status().await != WorkerStatus::Locked {
            return Response::error("session is not locked");
        }
        let uid = match self.api.unlock(&pin).await {
            Ok(uid) => uid,
            Err(ApiError::SessionInvalid) => {
                self.store
                    .dispatch(Envelope::new(Action::Signout { soft: false }))
                    .await;
                return Response::error("session expired");
            }
            Err(err) => return Response::error(err.to_string()),
        };
        self.set_state(WorkerState {
            logged_in: true,
            status: WorkerStatus::Resuming,
            uid: Some(uid),
        })
        .await;
        match self.single_flight(BootMode::Unlocked, |_| true).await {
            WorkerStatus::Ready => Response::ack(),
            status => Response::error(format!("unlock ended in {status}")),
        }
    }
}

#[derive(Debug, Error)]
enum BootError {
    #[error(transparent)]
    Hydrate(#[from] HydrateError),
    #[error(transparent)]
    Effect(#[from] EffectError),
}

/// Adapts a context method into a registry handler. The handler holds the
/// context weakly so the registry never keeps a stopped worker alive.
fn route<F, Fut>(
    ctx: &Arc<WorkerContext>,
    method: F,
) -> impl Fn(WorkerMessage) -> BoxFuture<'static, Response> + Send + Sync + 'static
where
    F: Fn(Arc<WorkerContext>, WorkerMessage) -> Fut + Copy + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let weak: Weak<WorkerContext> = Arc::downgrade(ctx);
    move |message| {
        let weak = weak.clone();
        async move {
            match weak.upgrade() {
                Some(ctx) => method(ctx, message).await,
                None => Response::error("worker stopped"),
            }
        }
        .boxed()
    }
}
