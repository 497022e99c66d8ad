// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Root state and the reducer pipeline shared by the host and every replica.

use crate::action::{Action, Envelope};
use crate::model::Settings;
use crate::optimistic::{OptimisticError, OptimisticReducer, OptimisticState};
use crate::reducers::{
    item_matchers, reduce_settings, share_matchers, ItemsState, SharesState, UiState, UserState,
};
use crate::request::RequestState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Store construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The items collection matchers are inconsistent.
    #[error("items reducer: {0}")]
    Items(OptimisticError),
    /// The shares collection matchers are inconsistent.
    #[error("shares reducer: {0}")]
    Shares(OptimisticError),
}

/// Whole reducer state of one context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Items with their pending mutations.
    pub items: OptimisticState<ItemsState, Envelope>,
    /// Shares with their pending mutations.
    pub shares: OptimisticState<SharesState, Envelope>,
    /// User and addresses.
    pub user: UserState,
    /// User settings.
    pub settings: Settings,
    /// Request tracker.
    pub request: RequestState,
    /// Local selection.
    pub ui: UiState,
}

impl State {
    /// Snapshot with every pending mutation dropped. This is what gets
    /// cached; optimistic noise never reaches disk.
    pub fn as_if_not_optimistic(&self) -> State {
        State {
            items: self.items.settled(),
            shares: self.shares.settled(),
            user: self.user.clone(),
            settings: self.settings.clone(),
            request: RequestState::default(),
            ui: self.ui.clone(),
        }
    }

    /// Whether no collection holds a pending mutation.
    pub fn is_settled(&self) -> bool {
        self.items.is_settled() && self.shares.is_settled()
    }
}

/// Reducer pipeline: optimistic collections, user, settings, request
/// tracker and selection, applied in that order.
pub struct RootReducer {
    items: OptimisticReducer<Envelope>,
    shares: OptimisticReducer<Envelope>,
}

impl RootReducer {
    /// Builds the pipeline, validating every collection's matchers.
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self {
            items: OptimisticReducer::new(item_matchers()).map_err(StoreError::Items)?,
            shares: OptimisticReducer::new(share_matchers()).map_err(StoreError::Shares)?,
        })
    }

    /// Applies one envelope.
    pub fn reduce(&self, state: &mut State, envelope: &Envelope) {
        trace!(action = envelope.action.name(), "reduce");
        match &envelope.action {
            Action::Signout { .. } => {
                *state = State::default();
                return;
            }
            Action::StateSync { state: next } => {
                *state = (**next).clone();
                return;
            }
            Action::BootSuccess { state: Some(hydrated) } => {
                // Hydrated state never carries request rows, keep the boot
                // request tracked across the replacement.
                let request = std::mem::take(&mut state.request);
                *state = (**hydrated).clone();
                state.request = request;
            }
            _ => {}
        }
        self.items.reduce(&mut state.items, envelope);
        self.shares.reduce(&mut state.shares, envelope);
        state.user.reduce(&envelope.action);
        reduce_settings(&mut state.settings, &envelope.action);
        state.request.reduce(envelope);
        state.ui.reduce(&envelope.action);
    }
}
