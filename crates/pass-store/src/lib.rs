// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pass store: the synchronous reducer pipeline run by the worker and by
//! every UI replica.
//!
//! Nothing in here suspends or performs I/O. The worker crate drives it from
//! its effect loop; replicas drive it from incoming broadcasts.

pub mod action;
pub mod endpoint;
pub mod model;
pub mod notification;
pub mod optimistic;
pub mod reducers;
pub mod request;
pub mod selectors;
pub mod state;

pub use action::{Action, ActionMeta, Callback, Envelope};
pub use endpoint::Endpoint;
pub use model::{
    item_key, Address, EntityKey, EventId, ItemData, ItemId, ItemKind, ItemRef, ItemRevision,
    ItemState, OptimisticId, Settings, Share, ShareId, User, VaultContent,
};
pub use notification::{Notification, NotificationKind};
pub use optimistic::{OptimisticError, OptimisticReducer, OptimisticState};
pub use request::{request_id, RequestMeta, RequestState, RequestStatus};
pub use state::{RootReducer, State, StoreError};
