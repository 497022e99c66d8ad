// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Vault, item and user records as the store holds them.
//!
//! Item data arrives already opened by the crypto port. Reducers move it
//! around by key and revision but never look inside it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server identifier of a share (one per vault the user can access).
pub type ShareId = String;
/// Server identifier of an item, unique within its share.
pub type ItemId = String;
/// Client generated identifier of a not-yet-confirmed entity or mutation.
pub type OptimisticId = String;
/// Key under which the optimistic layer queues mutations.
pub type EntityKey = String;

/// Builds the entity key of an item (`<share>::<item>`).
pub fn item_key(share_id: &str, item_id: &str) -> EntityKey {
    format!("{share_id}::{item_id}")
}

/// Monotonic per-scope server event cursor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventId(pub u64);

impl EventId {
    /// Returns the later of the two cursors. Event ids only move forward.
    pub fn advance(self, next: EventId) -> EventId {
        self.max(next)
    }
}

/// Lifecycle state of an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
    /// Visible in its vault.
    #[default]
    Active,
    /// Moved to trash, restorable.
    Trashed,
}

/// Kind of secret an item holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    /// Username/password pair with urls.
    #[default]
    Login,
    /// Free-form secure note.
    Note,
    /// Email alias.
    Alias,
    /// Payment card.
    CreditCard,
}

/// Opened item content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemData {
    /// Item kind.
    pub kind: ItemKind,
    /// Display name.
    pub name: String,
    /// Free-form note.
    pub note: String,
    /// Kind specific fields (username, urls, card number...).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// One revision of an item, as last seen from the server or as fabricated
/// by an optimistic intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRevision {
    /// Owning share.
    pub share_id: ShareId,
    /// Item id (an optimistic id until the server confirms creation).
    pub item_id: ItemId,
    /// Server revision counter. Zero for optimistic items.
    pub revision: u64,
    /// Active or trashed.
    pub state: ItemState,
    /// Opened content.
    pub data: ItemData,
    /// Creation time (unix seconds).
    pub create_time: i64,
    /// Last modification time (unix seconds).
    pub modify_time: i64,
}

/// Location of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    /// Owning share.
    pub share_id: ShareId,
    /// Item id.
    pub item_id: ItemId,
}

/// Opened vault metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultContent {
    /// Vault name.
    pub name: String,
    /// Vault description.
    pub description: String,
}

/// A share the user has access to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Share id.
    pub share_id: ShareId,
    /// Underlying vault id.
    pub vault_id: String,
    /// Opened vault content.
    pub content: VaultContent,
    /// Last consumed event id for this share's event feed.
    pub event_id: EventId,
    /// Whether this is the user's primary vault.
    pub primary: bool,
    /// Whether the user owns the vault.
    pub owner: bool,
}

/// Authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: String,
    /// Account name.
    pub name: String,
    /// Primary email.
    pub email: String,
}

/// Email address attached to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Address id.
    pub id: String,
    /// Email.
    pub email: String,
    /// Whether the address can receive mail.
    pub active: bool,
}

/// User settings mirrored in every context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Autofill suggestions in login forms.
    pub autofill: bool,
    /// Offer to save submitted credentials.
    pub autosave: bool,
    /// Auto-lock after this many seconds of inactivity.
    pub lock_ttl_secs: Option<u32>,
    /// UI locale override.
    pub locale: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autofill: true,
            autosave: true,
            lock_ttl_secs: None,
            locale: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_never_moves_backwards() {
        assert_eq!(EventId(7).advance(EventId(3)), EventId(7));
        assert_eq!(EventId(7).advance(EventId(9)), EventId(9));
    }

    #[test]
    fn item_key_is_scoped_by_share() {
        assert_ne!(item_key("s1", "a"), item_key("s2", "a"));
        assert_eq!(item_key("s1", "a"), "s1::a");
    }
}
