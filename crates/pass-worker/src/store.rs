// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Authoritative store. Reduction, broadcast and effect hand-off happen
//! under one lock, so the broadcast order is the canonical action order.

use crate::broker::Broker;
use pass_session_proto::{ConnectionKey, Message};
use pass_store::{Action, Envelope, RootReducer, State, StoreError};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

struct Inner {
    state: State,
    reducer: RootReducer,
}

/// Host store.
pub struct Store {
    inner: Mutex<Inner>,
    broker: Arc<Broker>,
    effects: mpsc::UnboundedSender<Envelope>,
}

impl Store {
    /// Builds the store; the receiver yields every dispatched envelope, in
    /// dispatch order, for the effect loop.
    pub fn new(broker: Arc<Broker>) -> Result<(Self, mpsc::UnboundedReceiver<Envelope>), StoreError> {
        let (effects, rx) = mpsc::unbounded_channel();
        let store = Self {
            inner: Mutex::new(Inner {
                state: State::default(),
                reducer: RootReducer::new()?,
            }),
            broker,
            effects,
        };
        Ok((store, rx))
    }

    /// Reduces `envelope`, broadcasts it to every replica, routes its
    /// notification and hands it to the effect loop.
    pub async fn dispatch(&self, envelope: Envelope) {
        let mut inner = self.inner.lock().await;
        let Inner { state, reducer } = &mut *inner;
        reducer.reduce(state, &envelope);

        let mut wire = envelope.clone();
        wire.meta.callback = None;
        let delivered = self.broker.broadcast(Message::store_action(wire)).await;
        debug!(action = envelope.action.name(), delivered, "dispatched");

        if let Some(notification) = &envelope.meta.notification {
            self.broker.notify(notification.clone()).await;
        }
        if self.effects.send(envelope).is_err() {
            debug!("effect loop stopped");
        }
    }

    /// Runs `f` against the current state.
    pub async fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.inner.lock().await.state)
    }

    /// Clone of the current state.
    pub async fn snapshot(&self) -> State {
        self.read(State::clone).await
    }

    /// Sends the whole state to one replica as a `StateSync` action.
    pub async fn unicast_state(&self, key: &ConnectionKey) -> bool {
        let inner = self.inner.lock().await;
        let sync = Envelope::new(Action::StateSync {
            state: Box::new(inner.state.clone()),
        });
        self.broker.send(key, Message::store_action(sync)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pass_session_proto::Endpoint;
    use pass_store::action::vault_creation_intent;
    use pass_store::{Callback, Notification, VaultContent};

    #[tokio::test]
    async fn dispatch_broadcasts_in_order_and_feeds_effects() {
        let broker = Arc::new(Broker::new(8));
        let (tx, mut port) = mpsc::unbounded_channel();
        broker.connect(ConnectionKey::new(Endpoint::Popup), tx).await;
        let (store, mut effects) = Store::new(broker.clone()).unwrap();

        let intent = vault_creation_intent("v-tmp", VaultContent::default())
            .with_callback(Callback::new(|_| {}));
        store.dispatch(intent).await;
        store.dispatch(Envelope::new(Action::Lock)).await;

        match port.try_recv().unwrap() {
            Message::StoreAction { action } => {
                assert!(matches!(action.action, Action::VaultCreationIntent { .. }));
                assert!(action.meta.callback.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            port.try_recv().unwrap(),
            Message::StoreAction { action } if action.action == Action::Lock
        ));

        let first = effects.try_recv().unwrap();
        assert!(first.meta.callback.is_some());
        assert_eq!(effects.try_recv().unwrap().action, Action::Lock);
        assert!(store.read(|s| s.shares.view().get("v-tmp").is_some()).await);
    }

    #[tokio::test]
    async fn notifications_without_listener_are_buffered() {
        let broker = Arc::new(Broker::new(8));
        let (store, _effects) = Store::new(broker.clone()).unwrap();
        store
            .dispatch(Envelope::new(Action::Lock).with_notification(Notification::success("Locked")))
            .await;
        assert_eq!(broker.flush().await.len(), 1);
    }

    #[tokio::test]
    async fn state_sync_reaches_only_the_requester() {
        let broker = Arc::new(Broker::new(8));
        let (popup_tx, mut popup) = mpsc::unbounded_channel();
        let (page_tx, mut page) = mpsc::unbounded_channel();
        let popup_key = ConnectionKey::new(Endpoint::Popup);
        broker.connect(popup_key, popup_tx).await;
        broker.connect(ConnectionKey::new(Endpoint::Page), page_tx).await;
        let (store, _effects) = Store::new(broker).unwrap();

        assert!(store.unicast_state(&popup_key).await);
        assert!(matches!(
            popup.try_recv().unwrap(),
            Message::StoreAction { action } if matches!(action.action, Action::StateSync { .. })
        ));
        assert!(page.try_recv().is_err());
    }
}
