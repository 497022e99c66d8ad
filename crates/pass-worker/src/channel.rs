// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server event channels: one polling task per scope (the user feed and one
//! feed per share), each with its own cancellation token.

use crate::worker::WorkerContext;
use pass_app_core::ports::ApiError;
use pass_session_proto::{Message, ShareEventKind, ShareServerEvent};
use pass_store::{Action, Envelope, ShareId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Cloneable cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }
}

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`CancelToken::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so `wait_for` cannot observe a closed
        // channel while we are borrowed.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventScope {
    /// User-scope feed (user, addresses, share list changes).
    User,
    /// Share-scope feed (item deltas).
    Share(ShareId),
}

struct Running {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

/// Live channels keyed by scope.
#[derive(Default)]
pub struct ChannelRegistry {
    running: HashMap<EventScope, Running>,
}

impl ChannelRegistry {
    /// Starts a channel unless one is already running for `scope`.
    /// Returns whether a task was spawned.
    pub fn start<F, Fut>(&mut self, scope: EventScope, spawn: F) -> bool
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running(&scope) {
            return false;
        }
        let cancel = CancelToken::new();
        let task = tokio::spawn(spawn(cancel.clone()));
        self.running.insert(scope, Running { cancel, task });
        true
    }

    /// Cancels the channel for `scope`, if any.
    pub fn stop(&mut self, scope: &EventScope) {
        if let Some(running) = self.running.remove(scope) {
            running.cancel.cancel();
        }
    }

    /// Cancels every channel.
    pub fn stop_all(&mut self) {
        for (_, running) in self.running.drain() {
            running.cancel.cancel();
        }
    }

    /// Whether a live task serves `scope`. Finished tasks do not count.
    pub fn is_running(&self, scope: &EventScope) -> bool {
        self.running
            .get(scope)
            .is_some_and(|r| !r.task.is_finished() && !r.cancel.is_cancelled())
    }

    /// Scopes with a live task.
    pub fn scopes(&self) -> Vec<EventScope> {
        self.running
            .keys()
            .filter(|scope| self.is_running(scope))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Poll {
    /// Caught up; wait for the next tick.
    Idle,
    /// The server has more events right away.
    More,
    /// The channel must end.
    Stop,
}

/// Polls `scope` until cancelled or until the feed ends by itself.
#[instrument(skip(ctx, cancel))]
pub(crate) async fn run(ctx: Arc<WorkerContext>, scope: EventScope, cancel: CancelToken) {
    let period = match scope {
        EventScope::User => ctx.prefs.polling.user_interval(),
        EventScope::Share(_) => ctx.prefs.polling.share_interval(),
    };
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("event channel started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let step = match &scope {
                EventScope::User => poll_user(&ctx).await,
                EventScope::Share(share_id) => poll_share(&ctx, share_id).await,
            };
            match step {
                Poll::Idle => break,
                Poll::More => continue,
                Poll::Stop => {
                    info!("event channel ended by server");
                    return;
                }
            }
        }
    }
    debug!("event channel cancelled");
}

async fn poll_share(ctx: &Arc<WorkerContext>, share_id: &str) -> Poll {
    let since = ctx
        .store
        .read(|state| {
            state
                .shares
                .as_if_not_optimistic()
                .get(share_id)
                .map(|share| share.event_id)
        })
        .await;
    let Some(since) = since else {
        // Share left the committed state (deleted or disabled elsewhere).
        return Poll::Stop;
    };

    match ctx.api.share_events(share_id, since).await {
        Ok(page) => {
            let mut updated = Vec::with_capacity(page.updated.len());
            for sealed in &page.updated {
                match ctx.crypto.open_item(sealed).await {
                    Ok(item) => updated.push(item),
                    Err(err) => warn!(?err, item_id = %sealed.item_id, "skipping unreadable item"),
                }
            }
            if page.event_id != since || !updated.is_empty() || !page.deleted.is_empty() {
                ctx.store
                    .dispatch(Envelope::new(Action::ShareEvent {
                        share_id: share_id.to_string(),
                        event_id: page.event_id,
                        updated,
                        deleted: page.deleted.clone(),
                    }))
                    .await;
            }
            if !page.deleted.is_empty() {
                ctx.broker
                    .publish(Message::ShareServerEvent(ShareServerEvent {
                        kind: ShareEventKind::ItemsDeleted,
                        share_id: share_id.to_string(),
                        item_ids: page.deleted,
                    }))
                    .await;
            }
            if page.more {
                Poll::More
            } else {
                Poll::Idle
            }
        }
        Err(err) if err.is_share_gone() => {
            info!(?err, "share no longer accessible");
            ctx.store
                .dispatch(Envelope::new(Action::ShareDisabled {
                    share_id: share_id.to_string(),
                }))
                .await;
            ctx.broker
                .publish(Message::ShareServerEvent(ShareServerEvent {
                    kind: ShareEventKind::ShareDisabled,
                    share_id: share_id.to_string(),
                    item_ids: Vec::new(),
                }))
                .await;
            Poll::Stop
        }
        Err(ApiError::SessionInvalid) => {
            ctx.store
                .dispatch(Envelope::new(Action::Signout { soft: false }))
                .await;
            Poll::Stop
        }
        Err(err) => {
            warn!(?err, "share events poll failed");
            Poll::Idle
        }
    }
}

async fn poll_user(ctx: &Arc<WorkerContext>) -> Poll {
    let since = ctx.store.read(|state| state.user.event_id).await;
    match ctx.api.user_events(since).await {
        Ok(page) => {
            if page.event_id != since || page.user.is_some() || !page.addresses.is_empty() {
                ctx.store
                    .dispatch(Envelope::new(Action::UserEvent {
                        event_id: page.event_id,
                        user: page.user,
                        addresses: page.addresses,
                    }))
                    .await;
            }
            if page.shares_changed {
                match ctx.sync().await {
                    Ok(()) => ctx.reconcile_channels().await,
                    Err(err) => warn!(?err, "share list refresh failed"),
                }
            }
            if page.more {
                Poll::More
            } else {
                Poll::Idle
            }
        }
        Err(ApiError::SessionInvalid) => {
            ctx.store
                .dispatch(Envelope::new(Action::Signout { soft: false }))
                .await;
            Poll::Stop
        }
        Err(err) => {
            warn!(?err, "user events poll failed");
            Poll::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_reaches_every_clone() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(time::timeout(Duration::from_secs(1), task).await.is_ok());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn registry_runs_one_task_per_scope() {
        let mut registry = ChannelRegistry::default();
        let scope = EventScope::Share("s1".into());
        let spawn = |cancel: CancelToken| async move { cancel.cancelled().await };
        assert!(registry.start(scope.clone(), spawn));
        assert!(!registry.start(scope.clone(), spawn));
        assert!(registry.start(EventScope::User, spawn));
        assert_eq!(registry.scopes().len(), 2);

        registry.stop(&scope);
        assert!(!registry.is_running(&scope));
        assert!(registry.start(scope.clone(), spawn));

        registry.stop_all();
        assert!(registry.scopes().is_empty());
    }
}
