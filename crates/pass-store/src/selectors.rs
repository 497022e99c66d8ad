// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-side accessors over [`State`]. Collections are read from their
//! optimistic view unless the name says otherwise.

use crate::model::{item_key, ItemId, ItemRef, ItemRevision, Share};
use crate::request::RequestEntry;
use crate::state::State;

/// Item by location.
pub fn select_item<'a>(state: &'a State, share_id: &str, item_id: &str) -> Option<&'a ItemRevision> {
    state.items.view().get(share_id, item_id)
}

/// Items of a share, ordered by item id.
pub fn select_items_by_share<'a>(state: &'a State, share_id: &str) -> Vec<&'a ItemRevision> {
    state
        .items
        .view()
        .by_share
        .get(share_id)
        .map(|items| items.values().collect())
        .unwrap_or_default()
}

/// Server item id assigned to a confirmed optimistic creation.
pub fn select_item_id_by_optimistic_id<'a>(
    state: &'a State,
    optimistic_id: &str,
) -> Option<&'a ItemId> {
    select_item_ref_by_optimistic_id(state, optimistic_id).map(|r| &r.item_id)
}

/// Server location assigned to a confirmed optimistic creation.
pub fn select_item_ref_by_optimistic_id<'a>(
    state: &'a State,
    optimistic_id: &str,
) -> Option<&'a ItemRef> {
    state.items.view().by_optimistic_id.get(optimistic_id)
}

/// Share by id.
pub fn select_share<'a>(state: &'a State, share_id: &str) -> Option<&'a Share> {
    state.shares.view().get(share_id)
}

/// All shares, ordered by id.
pub fn select_shares(state: &State) -> Vec<&Share> {
    state.shares.view().by_id.values().collect()
}

/// Whether the item has a failed mutation waiting to be dismissed.
pub fn select_item_failed(state: &State, share_id: &str, item_id: &str) -> bool {
    state.items.is_failed(&item_key(share_id, item_id))
}

/// Whether the item has an unresolved mutation.
pub fn select_item_pending(state: &State, share_id: &str, item_id: &str) -> bool {
    state.items.is_pending(&item_key(share_id, item_id))
}

/// Whether a vault has an unresolved mutation.
pub fn select_share_pending(state: &State, share_id: &str) -> bool {
    state.shares.is_pending(share_id)
}

/// Request row.
pub fn select_request<'a>(state: &'a State, request_id: &str) -> Option<&'a RequestEntry> {
    state.request.get(request_id)
}

/// True iff the request was started and has no outcome yet.
pub fn select_request_in_flight(state: &State, request_id: &str) -> bool {
    state.request.in_flight(request_id)
}

/// Active share selection, dropped once the share is gone from the view.
pub fn select_selected_share(state: &State) -> Option<&Share> {
    state
        .ui
        .selected_share
        .as_deref()
        .and_then(|share_id| select_share(state, share_id))
}
