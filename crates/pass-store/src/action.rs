// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Action envelope: the closed set of domain actions plus the metadata that
//! travels with them between contexts.
//!
//! Reducers, sagas and the proxy classifier all `match` on [`Action`]
//! exhaustively, so adding a variant forces every layer to decide what to do
//! with it.

use crate::endpoint::Endpoint;
use crate::model::{
    Address, EventId, ItemData, ItemId, ItemRevision, OptimisticId, Settings, Share, ShareId,
    User, VaultContent,
};
use crate::notification::Notification;
use crate::request::{request_id, RequestMeta, RequestStatus};
use crate::state::State;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Domain action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    /// Worker boot started.
    Boot,
    /// Worker boot finished. Carries the cache-hydrated state when booting
    /// from the local cache.
    BootSuccess {
        /// Hydrated state, if any.
        state: Option<Box<State>>,
    },
    /// Worker boot failed.
    BootFailure {
        /// Reason.
        error: String,
    },
    /// Partial sync reconciliation against the server's share and item lists.
    SyncSuccess {
        /// Every share the server reports.
        shares: Vec<Share>,
        /// Every item of those shares.
        items: Vec<ItemRevision>,
    },
    /// Replaces a replica's whole state with the host's.
    StateSync {
        /// Host state.
        state: Box<State>,
    },
    /// Session locked, PIN required.
    Lock,
    /// Global sign-out. Every context drops its state.
    Signout {
        /// Soft sign-outs keep the account selected on the login screen.
        soft: bool,
    },

    /// User and addresses fetched from the network.
    UserLoaded {
        /// User.
        user: User,
        /// Addresses.
        addresses: Vec<Address>,
        /// Latest user event id at fetch time.
        event_id: EventId,
    },
    /// User-scope server event.
    UserEvent {
        /// New cursor.
        event_id: EventId,
        /// Updated user, if changed.
        user: Option<User>,
        /// Updated addresses, if any.
        addresses: Vec<Address>,
    },

    /// Settings update requested.
    SettingsEditIntent {
        /// New settings.
        settings: Settings,
    },
    /// Settings update persisted.
    SettingsEditSuccess {
        /// Persisted settings.
        settings: Settings,
    },
    /// Settings update rejected.
    SettingsEditFailure {
        /// Reason.
        error: String,
    },

    /// Item creation requested.
    ItemCreationIntent {
        /// Client side id of the new item.
        optimistic_id: OptimisticId,
        /// Target share.
        share_id: ShareId,
        /// Content.
        data: ItemData,
        /// Creation time (unix seconds).
        create_time: i64,
    },
    /// Item created by the server.
    ItemCreationSuccess {
        /// Client side id of the new item.
        optimistic_id: OptimisticId,
        /// Target share.
        share_id: ShareId,
        /// Server item.
        item: ItemRevision,
    },
    /// Item creation rejected.
    ItemCreationFailure {
        /// Client side id of the new item.
        optimistic_id: OptimisticId,
        /// Target share.
        share_id: ShareId,
        /// Reason.
        error: String,
    },
    /// Failed item creation dismissed by the user.
    ItemCreationDismiss {
        /// Client side id of the new item.
        optimistic_id: OptimisticId,
        /// Target share.
        share_id: ShareId,
    },

    /// Item edit requested.
    ItemEditIntent {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
        /// Revision the edit is based on.
        revision: u64,
        /// New content.
        data: ItemData,
    },
    /// Item edit confirmed.
    ItemEditSuccess {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
        /// Server item.
        item: ItemRevision,
    },
    /// Item edit rejected.
    ItemEditFailure {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
        /// Reason.
        error: String,
    },
    /// Failed item edit dismissed by the user.
    ItemEditDismiss {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
    },

    /// Move to trash requested.
    ItemTrashIntent {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
    },
    /// Moved to trash.
    ItemTrashSuccess {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
    },
    /// Trash rejected.
    ItemTrashFailure {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
        /// Reason.
        error: String,
    },
    /// Restore from trash requested.
    ItemRestoreIntent {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
    },
    /// Restored.
    ItemRestoreSuccess {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
    },
    /// Restore rejected.
    ItemRestoreFailure {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
        /// Reason.
        error: String,
    },
    /// Permanent deletion requested.
    ItemDeleteIntent {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
    },
    /// Deleted.
    ItemDeleteSuccess {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
    },
    /// Deletion rejected.
    ItemDeleteFailure {
        /// Share.
        share_id: ShareId,
        /// Item.
        item_id: ItemId,
        /// Reason.
        error: String,
    },
    /// Items updated elsewhere (committed directly).
    ItemsEdited {
        /// New revisions.
        items: Vec<ItemRevision>,
    },
    /// Items deleted elsewhere (committed directly).
    ItemsDeleted {
        /// Share.
        share_id: ShareId,
        /// Deleted items.
        item_ids: Vec<ItemId>,
    },

    /// Vault creation requested.
    VaultCreationIntent {
        /// Client side id of the new share.
        optimistic_id: OptimisticId,
        /// Vault content.
        content: VaultContent,
    },
    /// Vault created.
    VaultCreationSuccess {
        /// Client side id of the new share.
        optimistic_id: OptimisticId,
        /// Server share.
        share: Share,
    },
    /// Vault creation rejected.
    VaultCreationFailure {
        /// Client side id of the new share.
        optimistic_id: OptimisticId,
        /// Reason.
        error: String,
    },
    /// Vault edit requested.
    VaultEditIntent {
        /// Share.
        share_id: ShareId,
        /// New content.
        content: VaultContent,
    },
    /// Vault edit confirmed.
    VaultEditSuccess {
        /// Share.
        share_id: ShareId,
        /// Server share.
        share: Share,
    },
    /// Vault edit rejected.
    VaultEditFailure {
        /// Share.
        share_id: ShareId,
        /// Reason.
        error: String,
    },
    /// Vault deletion requested.
    VaultDeleteIntent {
        /// Share.
        share_id: ShareId,
    },
    /// Vault deleted.
    VaultDeleteSuccess {
        /// Share.
        share_id: ShareId,
    },
    /// Vault deletion rejected.
    VaultDeleteFailure {
        /// Share.
        share_id: ShareId,
        /// Reason.
        error: String,
    },
    /// Share-scope server event: cursor advance plus item deltas, applied
    /// as one committed mutation.
    ShareEvent {
        /// Share.
        share_id: ShareId,
        /// New cursor.
        event_id: EventId,
        /// Updated items.
        updated: Vec<ItemRevision>,
        /// Deleted items.
        deleted: Vec<ItemId>,
    },
    /// Access to a share was revoked or the share was deleted remotely.
    ShareDisabled {
        /// Share.
        share_id: ShareId,
    },
    /// Replica-local active share selection.
    ShareSelect {
        /// Selected share, none for "all vaults".
        share_id: Option<ShareId>,
    },

    /// Replica started its wakeup handshake (replica-local).
    WakeupIntent {
        /// Waking context.
        endpoint: Endpoint,
        /// Tab of the waking context.
        tab_id: Option<u32>,
    },
    /// Replica finished its wakeup handshake (replica-local).
    WakeupSuccess {
        /// Waking context.
        endpoint: Endpoint,
        /// Tab of the waking context.
        tab_id: Option<u32>,
    },

    /// Drops a terminal request row so its id can be reused.
    Acknowledge {
        /// Request id.
        request_id: String,
    },
}

impl Action {
    /// Whether the action can be applied on a replica immediately, without
    /// waiting for the host. Synchronous actions are deterministic given the
    /// replica's own state; everything else is a result only the host can
    /// produce.
    pub fn is_synchronous(&self) -> bool {
        match self {
            Action::ItemCreationIntent { .. }
            | Action::ItemCreationDismiss { .. }
            | Action::ItemEditIntent { .. }
            | Action::ItemEditDismiss { .. }
            | Action::ItemTrashIntent { .. }
            | Action::ItemRestoreIntent { .. }
            | Action::ItemDeleteIntent { .. }
            | Action::VaultCreationIntent { .. }
            | Action::VaultEditIntent { .. }
            | Action::VaultDeleteIntent { .. }
            | Action::ShareSelect { .. }
            | Action::WakeupIntent { .. }
            | Action::WakeupSuccess { .. }
            | Action::Acknowledge { .. } => true,
            Action::Boot
            | Action::BootSuccess { .. }
            | Action::BootFailure { .. }
            | Action::SyncSuccess { .. }
            | Action::StateSync { .. }
            | Action::Lock
            | Action::Signout { .. }
            | Action::UserLoaded { .. }
            | Action::UserEvent { .. }
            | Action::SettingsEditIntent { .. }
            | Action::SettingsEditSuccess { .. }
            | Action::SettingsEditFailure { .. }
            | Action::ItemCreationSuccess { .. }
            | Action::ItemCreationFailure { .. }
            | Action::ItemEditSuccess { .. }
            | Action::ItemEditFailure { .. }
            | Action::ItemTrashSuccess { .. }
            | Action::ItemTrashFailure { .. }
            | Action::ItemRestoreSuccess { .. }
            | Action::ItemRestoreFailure { .. }
            | Action::ItemDeleteSuccess { .. }
            | Action::ItemDeleteFailure { .. }
            | Action::ItemsEdited { .. }
            | Action::ItemsDeleted { .. }
            | Action::VaultCreationSuccess { .. }
            | Action::VaultCreationFailure { .. }
            | Action::VaultEditSuccess { .. }
            | Action::VaultEditFailure { .. }
            | Action::VaultDeleteSuccess { .. }
            | Action::VaultDeleteFailure { .. }
            | Action::ShareEvent { .. }
            | Action::ShareDisabled { .. } => false,
        }
    }

    /// Whether a successful outcome of this action should refresh the
    /// encrypted local cache.
    pub fn triggers_cache_write(&self) -> bool {
        matches!(
            self,
            Action::SyncSuccess { .. }
                | Action::UserEvent { .. }
                | Action::SettingsEditSuccess { .. }
                | Action::ItemCreationSuccess { .. }
                | Action::ItemEditSuccess { .. }
                | Action::ItemTrashSuccess { .. }
                | Action::ItemRestoreSuccess { .. }
                | Action::ItemDeleteSuccess { .. }
                | Action::ItemsEdited { .. }
                | Action::ItemsDeleted { .. }
                | Action::VaultCreationSuccess { .. }
                | Action::VaultEditSuccess { .. }
                | Action::VaultDeleteSuccess { .. }
                | Action::ShareEvent { .. }
                | Action::ShareDisabled { .. }
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Boot => "boot",
            Action::BootSuccess { .. } => "boot-success",
            Action::BootFailure { .. } => "boot-failure",
            Action::SyncSuccess { .. } => "sync-success",
            Action::StateSync { .. } => "state-sync",
            Action::Lock => "lock",
            Action::Signout { .. } => "signout",
            Action::UserLoaded { .. } => "user-loaded",
            Action::UserEvent { .. } => "user-event",
            Action::SettingsEditIntent { .. } => "settings-edit-intent",
            Action::SettingsEditSuccess { .. } => "settings-edit-success",
            Action::SettingsEditFailure { .. } => "settings-edit-failure",
            Action::ItemCreationIntent { .. } => "item-creation-intent",
            Action::ItemCreationSuccess { .. } => "item-creation-success",
            Action::ItemCreationFailure { .. } => "item-creation-failure",
            Action::ItemCreationDismiss { .. } => "item-creation-dismiss",
            Action::ItemEditIntent { .. } => "item-edit-intent",
            Action::ItemEditSuccess { .. } => "item-edit-success",
            Action::ItemEditFailure { .. } => "item-edit-failure",
            Action::ItemEditDismiss { .. } => "item-edit-dismiss",
            Action::ItemTrashIntent { .. } => "item-trash-intent",
            Action::ItemTrashSuccess { .. } => "item-trash-success",
            Action::ItemTrashFailure { .. } => "item-trash-failure",
            Action::ItemRestoreIntent { .. } => "item-restore-intent",
            Action::ItemRestoreSuccess { .. } => "item-restore-success",
            Action::ItemRestoreFailure { .. } => "item-restore-failure",
            Action::ItemDeleteIntent { .. } => "item-delete-intent",
            Action::ItemDeleteSuccess { .. } => "item-delete-success",
            Action::ItemDeleteFailure { .. } => "item-delete-failure",
            Action::ItemsEdited { .. } => "items-edited",
            Action::ItemsDeleted { .. } => "items-deleted",
            Action::VaultCreationIntent { .. } => "vault-creation-intent",
            Action::VaultCreationSuccess { .. } => "vault-creation-success",
            Action::VaultCreationFailure { .. } => "vault-creation-failure",
            Action::VaultEditIntent { .. } => "vault-edit-intent",
            Action::VaultEditSuccess { .. } => "vault-edit-success",
            Action::VaultEditFailure { .. } => "vault-edit-failure",
            Action::VaultDeleteIntent { .. } => "vault-delete-intent",
            Action::VaultDeleteSuccess { .. } => "vault-delete-success",
            Action::VaultDeleteFailure { .. } => "vault-delete-failure",
            Action::ShareEvent { .. } => "share-event",
            Action::ShareDisabled { .. } => "share-disabled",
            Action::ShareSelect { .. } => "share-select",
            Action::WakeupIntent { .. } => "wakeup-intent",
            Action::WakeupSuccess { .. } => "wakeup-success",
            Action::Acknowledge { .. } => "acknowledge",
        }
    }
}

/// Host-local completion hook. Never crosses a context boundary.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(&Action) + Send + Sync>);

impl Callback {
    /// Wraps a closure.
    pub fn new(f: impl Fn(&Action) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invokes the hook with the outcome action.
    pub fn call(&self, action: &Action) {
        (self.0)(action);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Optional metadata decorating an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    /// Request tracker update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestMeta>,
    /// Notification to surface once the action is processed by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    /// Correlation id of the optimistic mutation this action starts or ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_id: Option<OptimisticId>,
    /// Completion hook (host only).
    #[serde(skip)]
    pub callback: Option<Callback>,
    /// Endpoint that dispatched the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Endpoint>,
}

/// Dispatched unit: action plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Domain action.
    pub action: Action,
    /// Metadata.
    #[serde(default)]
    pub meta: ActionMeta,
}

impl Envelope {
    /// Wraps an action with empty metadata.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            meta: ActionMeta::default(),
        }
    }

    /// Attaches a request tracker update.
    pub fn with_request(mut self, id: impl Into<String>, status: RequestStatus) -> Self {
        self.meta.request = Some(RequestMeta {
            id: id.into(),
            status,
        });
        self
    }

    /// Attaches a notification.
    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.meta.notification = Some(notification);
        self
    }

    /// Marks the envelope as part of an optimistic mutation.
    pub fn with_optimistic(mut self, id: impl Into<OptimisticId>) -> Self {
        self.meta.optimistic_id = Some(id.into());
        self
    }

    /// Attaches a completion hook.
    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.meta.callback = Some(callback);
        self
    }

    /// Stamps the dispatching endpoint.
    pub fn with_sender(mut self, sender: Endpoint) -> Self {
        self.meta.sender = Some(sender);
        self
    }

    /// Builds the outcome envelope of `self`: same correlation id, same
    /// sender and callback, request moved to `status` when tracked.
    pub fn follow_up(&self, action: Action, status: RequestStatus) -> Envelope {
        Envelope {
            action,
            meta: ActionMeta {
                request: self.meta.request.as_ref().map(|r| RequestMeta {
                    id: r.id.clone(),
                    status,
                }),
                notification: None,
                optimistic_id: self.meta.optimistic_id.clone(),
                callback: self.meta.callback.clone(),
                sender: self.meta.sender,
            },
        }
    }

    /// Correlation id, if any.
    pub fn optimistic_id(&self) -> Option<&str> {
        self.meta.optimistic_id.as_deref()
    }
}

impl From<Action> for Envelope {
    fn from(action: Action) -> Self {
        Envelope::new(action)
    }
}

/// Creates an item in `share_id`. The optimistic id doubles as the
/// provisional item id.
pub fn item_creation_intent(
    optimistic_id: impl Into<OptimisticId>,
    share_id: impl Into<ShareId>,
    data: ItemData,
    create_time: i64,
) -> Envelope {
    let optimistic_id = optimistic_id.into();
    Envelope::new(Action::ItemCreationIntent {
        optimistic_id: optimistic_id.clone(),
        share_id: share_id.into(),
        data,
        create_time,
    })
    .with_optimistic(optimistic_id)
}

/// Edits an item. `mutation_id` must be fresh for every attempt.
pub fn item_edit_intent(
    mutation_id: impl Into<OptimisticId>,
    share_id: impl Into<ShareId>,
    item_id: impl Into<ItemId>,
    revision: u64,
    data: ItemData,
) -> Envelope {
    Envelope::new(Action::ItemEditIntent {
        share_id: share_id.into(),
        item_id: item_id.into(),
        revision,
        data,
    })
    .with_optimistic(mutation_id)
}

/// Moves an item to trash.
pub fn item_trash_intent(
    mutation_id: impl Into<OptimisticId>,
    share_id: impl Into<ShareId>,
    item_id: impl Into<ItemId>,
) -> Envelope {
    Envelope::new(Action::ItemTrashIntent {
        share_id: share_id.into(),
        item_id: item_id.into(),
    })
    .with_optimistic(mutation_id)
}

/// Restores an item from trash.
pub fn item_restore_intent(
    mutation_id: impl Into<OptimisticId>,
    share_id: impl Into<ShareId>,
    item_id: impl Into<ItemId>,
) -> Envelope {
    Envelope::new(Action::ItemRestoreIntent {
        share_id: share_id.into(),
        item_id: item_id.into(),
    })
    .with_optimistic(mutation_id)
}

/// Permanently deletes an item.
pub fn item_delete_intent(
    mutation_id: impl Into<OptimisticId>,
    share_id: impl Into<ShareId>,
    item_id: impl Into<ItemId>,
) -> Envelope {
    Envelope::new(Action::ItemDeleteIntent {
        share_id: share_id.into(),
        item_id: item_id.into(),
    })
    .with_optimistic(mutation_id)
}

/// Creates a vault, tracked under its optimistic id.
pub fn vault_creation_intent(
    optimistic_id: impl Into<OptimisticId>,
    content: VaultContent,
) -> Envelope {
    let optimistic_id = optimistic_id.into();
    let request = request_id::vault_create(&optimistic_id);
    Envelope::new(Action::VaultCreationIntent {
        optimistic_id: optimistic_id.clone(),
        content,
    })
    .with_optimistic(optimistic_id)
    .with_request(request, RequestStatus::Start)
}

/// Edits a vault. Concurrent edits of the same vault share the request id
/// but must use distinct mutation ids.
pub fn vault_edit_intent(
    mutation_id: impl Into<OptimisticId>,
    share_id: impl Into<ShareId>,
    content: VaultContent,
) -> Envelope {
    let share_id = share_id.into();
    let request = request_id::vault_edit(&share_id);
    Envelope::new(Action::VaultEditIntent { share_id, content })
        .with_optimistic(mutation_id)
        .with_request(request, RequestStatus::Start)
}

/// Deletes a vault.
pub fn vault_delete_intent(
    mutation_id: impl Into<OptimisticId>,
    share_id: impl Into<ShareId>,
) -> Envelope {
    let share_id = share_id.into();
    let request = request_id::vault_delete(&share_id);
    Envelope::new(Action::VaultDeleteIntent { share_id })
        .with_optimistic(mutation_id)
        .with_request(request, RequestStatus::Start)
}

/// Updates settings.
pub fn settings_edit_intent(settings: Settings) -> Envelope {
    Envelope::new(Action::SettingsEditIntent { settings })
        .with_request(request_id::settings_edit(), RequestStatus::Start)
}

/// Starts tracking a replica wakeup.
pub fn wakeup_intent(endpoint: Endpoint, tab_id: Option<u32>) -> Envelope {
    Envelope::new(Action::WakeupIntent { endpoint, tab_id })
        .with_request(request_id::wakeup(endpoint.as_str(), tab_id), RequestStatus::Start)
}

/// Marks a replica wakeup as done.
pub fn wakeup_success(endpoint: Endpoint, tab_id: Option<u32>) -> Envelope {
    Envelope::new(Action::WakeupSuccess { endpoint, tab_id })
        .with_request(request_id::wakeup(endpoint.as_str(), tab_id), RequestStatus::Success)
}

/// Drops a terminal request row.
pub fn acknowledge(request_id: impl Into<String>) -> Envelope {
    Envelope::new(Action::Acknowledge {
        request_id: request_id.into(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn intents_are_synchronous_results_are_not() {
        let intent = item_creation_intent("x", "s1", ItemData::default(), 0);
        assert!(intent.action.is_synchronous());
        let failure = Action::ItemCreationFailure {
            optimistic_id: "x".into(),
            share_id: "s1".into(),
            error: "nope".into(),
        };
        assert!(!failure.is_synchronous());
        assert!(!Action::Signout { soft: false }.is_synchronous());
    }

    #[test]
    fn follow_up_keeps_correlation_and_moves_request() {
        let intent = vault_edit_intent("m1", "v1", VaultContent::default())
            .with_sender(Endpoint::Popup);
        let done = intent.follow_up(
            Action::VaultEditFailure {
                share_id: "v1".into(),
                error: "offline".into(),
            },
            RequestStatus::Failure,
        );
        assert_eq!(done.optimistic_id(), Some("m1"));
        assert_eq!(done.meta.sender, Some(Endpoint::Popup));
        assert_eq!(
            done.meta.request,
            Some(RequestMeta {
                id: request_id::vault_edit("v1"),
                status: RequestStatus::Failure
            })
        );
    }

    #[test]
    fn callback_is_not_serialized() {
        let env = acknowledge("r").with_callback(Callback::new(|_| {}));
        let json = serde_json::to_string(&env).unwrap_or_default();
        assert!(!json.contains("callback"));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert!(back.meta.callback.is_none());
        assert_eq!(back.action, env.action);
    }
}
