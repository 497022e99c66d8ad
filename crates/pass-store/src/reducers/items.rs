// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Items collection, keyed by `share::item`.

use crate::action::{Action, Envelope};
use crate::model::{item_key, ItemId, ItemRef, ItemRevision, ItemState, OptimisticId, ShareId};
use crate::optimistic::{KeyedCollection, Matcher, MutationKind, MutationRef, Reduce};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Items grouped by share, plus the optimistic-id to server-id mapping of
/// confirmed creations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsState {
    /// Items per share.
    pub by_share: BTreeMap<ShareId, BTreeMap<ItemId, ItemRevision>>,
    /// Confirmed creations: optimistic id to server location.
    pub by_optimistic_id: BTreeMap<OptimisticId, ItemRef>,
}

impl ItemsState {
    /// Looks up an item.
    pub fn get(&self, share_id: &str, item_id: &str) -> Option<&ItemRevision> {
        self.by_share.get(share_id)?.get(item_id)
    }

    fn get_mut(&mut self, share_id: &str, item_id: &str) -> Option<&mut ItemRevision> {
        self.by_share.get_mut(share_id)?.get_mut(item_id)
    }

    fn remove(&mut self, share_id: &str, item_id: &str) {
        if let Some(items) = self.by_share.get_mut(share_id) {
            items.remove(item_id);
        }
    }

    fn put(&mut self, item: ItemRevision) {
        self.by_share
            .entry(item.share_id.clone())
            .or_default()
            .insert(item.item_id.clone(), item);
    }

    /// Upserts a server revision unless a newer one is already stored, so
    /// replayed deltas are harmless.
    fn merge(&mut self, item: &ItemRevision) {
        let stale = self
            .get(&item.share_id, &item.item_id)
            .is_some_and(|current| current.revision > item.revision);
        if !stale {
            self.put(item.clone());
        }
    }

    fn set_state(&mut self, share_id: &str, item_id: &str, state: ItemState) {
        if let Some(item) = self.get_mut(share_id, item_id) {
            item.state = state;
        }
    }

    fn drop_share(&mut self, share_id: &str) {
        self.by_share.remove(share_id);
        self.by_optimistic_id.retain(|_, r| r.share_id != share_id);
    }
}

impl Reduce<Envelope> for ItemsState {
    fn reduce(&mut self, envelope: &Envelope) {
        match &envelope.action {
            Action::ItemCreationIntent {
                optimistic_id,
                share_id,
                data,
                create_time,
            } => self.put(ItemRevision {
                share_id: share_id.clone(),
                item_id: optimistic_id.clone(),
                revision: 0,
                state: ItemState::Active,
                data: data.clone(),
                create_time: *create_time,
                modify_time: *create_time,
            }),
            Action::ItemCreationSuccess {
                optimistic_id,
                share_id,
                item,
            } => {
                self.remove(share_id, optimistic_id);
                self.by_optimistic_id.insert(
                    optimistic_id.clone(),
                    ItemRef {
                        share_id: item.share_id.clone(),
                        item_id: item.item_id.clone(),
                    },
                );
                self.put(item.clone());
            }
            Action::ItemEditIntent {
                share_id,
                item_id,
                data,
                ..
            } => {
                if let Some(item) = self.get_mut(share_id, item_id) {
                    item.data = data.clone();
                }
            }
            Action::ItemEditSuccess { item, .. } => self.put(item.clone()),
            Action::ItemTrashIntent { share_id, item_id }
            | Action::ItemTrashSuccess { share_id, item_id } => {
                self.set_state(share_id, item_id, ItemState::Trashed);
            }
            Action::ItemRestoreIntent { share_id, item_id }
            | Action::ItemRestoreSuccess { share_id, item_id } => {
                self.set_state(share_id, item_id, ItemState::Active);
            }
            Action::ItemDeleteIntent { share_id, item_id }
            | Action::ItemDeleteSuccess { share_id, item_id } => self.remove(share_id, item_id),
            Action::ItemsEdited { items } => {
                for item in items {
                    self.merge(item);
                }
            }
            Action::ItemsDeleted { share_id, item_ids } => {
                for item_id in item_ids {
                    self.remove(share_id, item_id);
                }
            }
            Action::ShareEvent {
                share_id,
                updated,
                deleted,
                ..
            } => {
                for item in updated.iter().filter(|i| &i.share_id == share_id) {
                    self.merge(item);
                }
                for item_id in deleted {
                    self.remove(share_id, item_id);
                }
            }
            Action::VaultCreationSuccess { share, .. } => {
                self.by_share.entry(share.share_id.clone()).or_default();
            }
            Action::ShareDisabled { share_id } | Action::VaultDeleteSuccess { share_id } => {
                self.drop_share(share_id);
            }
            Action::SyncSuccess { shares, items } => {
                self.by_share
                    .retain(|share_id, _| shares.iter().any(|s| &s.share_id == share_id));
                for share in shares {
                    self.by_share.insert(share.share_id.clone(), BTreeMap::new());
                }
                for item in items {
                    self.put(item.clone());
                }
            }
            _ => {}
        }
    }
}

impl KeyedCollection for ItemsState {
    fn contains_key(&self, key: &str) -> bool {
        key.split_once("::")
            .is_some_and(|(share_id, item_id)| self.get(share_id, item_id).is_some())
    }
}

/// Correlation id of an item mutation; falls back to the entity key when the
/// envelope carries none.
fn correlation(envelope: &Envelope, share_id: &str, item_id: &str) -> OptimisticId {
    envelope
        .meta
        .optimistic_id
        .clone()
        .unwrap_or_else(|| item_key(share_id, item_id))
}

fn creation_initiate(e: &Envelope) -> Option<MutationRef> {
    match &e.action {
        Action::ItemCreationIntent {
            optimistic_id,
            share_id,
            ..
        } => Some(MutationRef {
            id: optimistic_id.clone(),
            key: item_key(share_id, optimistic_id),
        }),
        _ => None,
    }
}

fn creation_commit(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemCreationSuccess { optimistic_id, .. } => Some(optimistic_id.clone()),
        _ => None,
    }
}

fn creation_fail(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemCreationFailure { optimistic_id, .. } => Some(optimistic_id.clone()),
        _ => None,
    }
}

fn creation_revert(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemCreationDismiss { optimistic_id, .. } => Some(optimistic_id.clone()),
        _ => None,
    }
}

fn edit_initiate(e: &Envelope) -> Option<MutationRef> {
    match &e.action {
        Action::ItemEditIntent {
            share_id, item_id, ..
        } => Some(MutationRef {
            id: correlation(e, share_id, item_id),
            key: item_key(share_id, item_id),
        }),
        _ => None,
    }
}

fn edit_commit(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemEditSuccess {
            share_id, item_id, ..
        } => Some(correlation(e, share_id, item_id)),
        _ => None,
    }
}

fn edit_fail(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemEditFailure {
            share_id, item_id, ..
        } => Some(correlation(e, share_id, item_id)),
        _ => None,
    }
}

fn edit_revert(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemEditDismiss { share_id, item_id } => Some(correlation(e, share_id, item_id)),
        _ => None,
    }
}

fn trash_initiate(e: &Envelope) -> Option<MutationRef> {
    match &e.action {
        Action::ItemTrashIntent { share_id, item_id }
        | Action::ItemRestoreIntent { share_id, item_id } => Some(MutationRef {
            id: correlation(e, share_id, item_id),
            key: item_key(share_id, item_id),
        }),
        _ => None,
    }
}

fn trash_commit(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemTrashSuccess { share_id, item_id }
        | Action::ItemRestoreSuccess { share_id, item_id } => {
            Some(correlation(e, share_id, item_id))
        }
        _ => None,
    }
}

fn trash_revert(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemTrashFailure {
            share_id, item_id, ..
        }
        | Action::ItemRestoreFailure {
            share_id, item_id, ..
        } => Some(correlation(e, share_id, item_id)),
        _ => None,
    }
}

fn delete_initiate(e: &Envelope) -> Option<MutationRef> {
    match &e.action {
        Action::ItemDeleteIntent { share_id, item_id } => Some(MutationRef {
            id: correlation(e, share_id, item_id),
            key: item_key(share_id, item_id),
        }),
        _ => None,
    }
}

fn delete_commit(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemDeleteSuccess { share_id, item_id } => Some(correlation(e, share_id, item_id)),
        _ => None,
    }
}

fn delete_revert(e: &Envelope) -> Option<OptimisticId> {
    match &e.action {
        Action::ItemDeleteFailure {
            share_id, item_id, ..
        } => Some(correlation(e, share_id, item_id)),
        _ => None,
    }
}

/// Optimistic capabilities of the items collection. Creations and edits
/// fail visibly and wait for a dismissal; trash, restore and delete roll
/// back as soon as they fail.
pub fn item_matchers() -> Vec<Matcher<Envelope>> {
    vec![
        Matcher::new(MutationKind::Create, creation_initiate)
            .commit(creation_commit)
            .fail(creation_fail)
            .revert(creation_revert),
        Matcher::new(MutationKind::Update, edit_initiate)
            .commit(edit_commit)
            .fail(edit_fail)
            .revert(edit_revert),
        Matcher::new(MutationKind::Update, trash_initiate)
            .commit(trash_commit)
            .revert(trash_revert),
        Matcher::new(MutationKind::Delete, delete_initiate)
            .commit(delete_commit)
            .revert(delete_revert),
    ]
}
