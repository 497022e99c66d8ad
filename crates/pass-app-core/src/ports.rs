// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! External collaborators of the worker: REST API, crypto and the encrypted
//! local cache.
//!
//! The worker consumes these as black boxes. Item and vault content crosses
//! the API boundary sealed; only the crypto port opens or seals it.

use async_trait::async_trait;
use pass_store::{
    Address, EventId, ItemData, ItemId, ItemRevision, ItemState, Settings, Share, ShareId, User,
    VaultContent,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server error code for a share the user lost access to.
pub const ACCESS_REVOKED_CODE: u32 = 300004;
/// Server error code for an expired or revoked session.
pub const SESSION_INVALID_CODE: u32 = 10013;

/// REST failures, as far as the worker cares.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Transport failure; retrying later may succeed.
    #[error("network: {0}")]
    Network(String),
    /// Session invalidated server side.
    #[error("session invalid")]
    SessionInvalid,
    /// Access to the share was revoked.
    #[error("access revoked")]
    AccessRevoked,
    /// Entity does not exist (anymore).
    #[error("not found")]
    NotFound,
    /// Any other rejection.
    #[error("rejected ({code}): {message}")]
    Rejected {
        /// Server code.
        code: u32,
        /// Server message.
        message: String,
    },
}

impl ApiError {
    /// Maps a server error code.
    pub fn from_code(code: u32, message: impl Into<String>) -> Self {
        match code {
            ACCESS_REVOKED_CODE => ApiError::AccessRevoked,
            SESSION_INVALID_CODE => ApiError::SessionInvalid,
            _ => ApiError::Rejected {
                code,
                message: message.into(),
            },
        }
    }

    /// Whether the failure ends the session for every context.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, ApiError::SessionInvalid)
    }

    /// Whether the failure means the share is gone for this user.
    pub fn is_share_gone(&self) -> bool {
        matches!(self, ApiError::AccessRevoked | ApiError::NotFound)
    }
}

/// Crypto failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Sealed content could not be opened.
    #[error("open: {0}")]
    Open(String),
    /// Content could not be sealed.
    #[error("seal: {0}")]
    Seal(String),
    /// Session snapshot could not be restored.
    #[error("hydrate: {0}")]
    Hydrate(String),
}

/// Cache storage failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed cache file.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all.
    #[error("other: {0}")]
    Other(String),
}

/// Item as the API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedItem {
    /// Owning share.
    pub share_id: ShareId,
    /// Item id.
    pub item_id: ItemId,
    /// Server revision.
    pub revision: u64,
    /// Active or trashed.
    pub state: ItemState,
    /// Encrypted content.
    pub content: Vec<u8>,
    /// Creation time.
    pub create_time: i64,
    /// Modification time.
    pub modify_time: i64,
}

/// Share as the API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedShare {
    /// Share id.
    pub share_id: ShareId,
    /// Vault id.
    pub vault_id: String,
    /// Encrypted vault content.
    pub content: Vec<u8>,
    /// Latest share event id at fetch time.
    pub event_id: EventId,
    /// Primary vault flag.
    pub primary: bool,
    /// Ownership flag.
    pub owner: bool,
}

/// Outcome of resuming a persisted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResume {
    /// Session usable.
    Ready {
        /// Session uid.
        uid: String,
    },
    /// Session exists but the PIN is needed.
    Locked {
        /// Session uid.
        uid: String,
    },
    /// No usable session.
    Unauthorized,
}

/// User-scope data fetched at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    /// User.
    pub user: User,
    /// Addresses.
    pub addresses: Vec<Address>,
    /// Latest user event id.
    pub event_id: EventId,
}

/// Page of user-scope events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEvents {
    /// Cursor after this page.
    pub event_id: EventId,
    /// Updated user, if changed.
    pub user: Option<User>,
    /// Updated addresses.
    pub addresses: Vec<Address>,
    /// Shares were added or removed; the share list must be re-synced.
    pub shares_changed: bool,
    /// More events are available right away.
    pub more: bool,
}

/// Page of share-scope events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareEvents {
    /// Cursor after this page.
    pub event_id: EventId,
    /// Created or updated items.
    pub updated: Vec<SealedItem>,
    /// Deleted items.
    pub deleted: Vec<ItemId>,
    /// More events are available right away.
    pub more: bool,
}

/// REST transport.
#[async_trait]
pub trait ApiPort: Send + Sync {
    /// Resumes the persisted session.
    async fn resume_session(&self) -> Result<SessionResume, ApiError>;
    /// Unlocks a locked session; returns the uid.
    async fn unlock(&self, pin: &str) -> Result<String, ApiError>;
    /// Ends the session server side.
    async fn signout(&self) -> Result<(), ApiError>;

    /// Fetches user, addresses and the user event cursor.
    async fn fetch_user(&self) -> Result<UserSnapshot, ApiError>;
    /// Fetches every accessible share.
    async fn fetch_shares(&self) -> Result<Vec<SealedShare>, ApiError>;
    /// Fetches every item of a share.
    async fn fetch_items(&self, share_id: &str) -> Result<Vec<SealedItem>, ApiError>;

    /// Creates an item.
    async fn create_item(&self, share_id: &str, content: Vec<u8>) -> Result<SealedItem, ApiError>;
    /// Updates an item based on `revision`.
    async fn update_item(
        &self,
        share_id: &str,
        item_id: &str,
        revision: u64,
        content: Vec<u8>,
    ) -> Result<SealedItem, ApiError>;
    /// Moves an item to trash.
    async fn trash_item(&self, share_id: &str, item_id: &str) -> Result<(), ApiError>;
    /// Restores an item from trash.
    async fn restore_item(&self, share_id: &str, item_id: &str) -> Result<(), ApiError>;
    /// Permanently deletes an item.
    async fn delete_item(&self, share_id: &str, item_id: &str) -> Result<(), ApiError>;

    /// Creates a vault.
    async fn create_vault(&self, content: Vec<u8>) -> Result<SealedShare, ApiError>;
    /// Updates a vault.
    async fn update_vault(&self, share_id: &str, content: Vec<u8>)
        -> Result<SealedShare, ApiError>;
    /// Deletes a vault.
    async fn delete_vault(&self, share_id: &str) -> Result<(), ApiError>;

    /// Persists settings.
    async fn update_settings(&self, settings: &Settings) -> Result<Settings, ApiError>;

    /// User-scope events since `since`.
    async fn user_events(&self, since: EventId) -> Result<UserEvents, ApiError>;
    /// Share-scope events since `since`.
    async fn share_events(&self, share_id: &str, since: EventId)
        -> Result<ShareEvents, ApiError>;
}

/// Opaque crypto session snapshot, persisted next to the cached state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoSnapshot(pub Vec<u8>);

/// Cache blob sealed by the crypto port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    /// Locally generated salt the sealing key is derived with.
    pub salt: String,
    /// Ciphertext.
    pub data: Vec<u8>,
}

/// Item and vault crypto.
#[async_trait]
pub trait CryptoPort: Send + Sync {
    /// Opens an API item.
    async fn open_item(&self, item: &SealedItem) -> Result<ItemRevision, CryptoError>;
    /// Seals item content for `share_id`.
    async fn seal_item(&self, share_id: &str, data: &ItemData) -> Result<Vec<u8>, CryptoError>;
    /// Opens an API share.
    async fn open_share(&self, share: &SealedShare) -> Result<Share, CryptoError>;
    /// Seals vault content.
    async fn seal_vault(&self, content: &VaultContent) -> Result<Vec<u8>, CryptoError>;

    /// Current session snapshot.
    async fn snapshot(&self) -> Result<CryptoSnapshot, CryptoError>;
    /// Restores a session snapshot read from the cache.
    async fn hydrate(&self, snapshot: &CryptoSnapshot) -> Result<(), CryptoError>;
    /// Seals a serialized state for the cache.
    async fn seal_cache(&self, plain: &[u8]) -> Result<SealedBlob, CryptoError>;
    /// Opens a cached state.
    async fn open_cache(&self, blob: &SealedBlob) -> Result<Vec<u8>, CryptoError>;
    /// Drops session keys.
    async fn clear(&self);
}

/// Encrypted local cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Sealed non-optimistic state.
    pub state: SealedBlob,
    /// Crypto session snapshot.
    pub snapshot: CryptoSnapshot,
}

/// Encrypted local cache.
#[async_trait]
pub trait CachePort: Send + Sync {
    /// Reads the cache, `None` when empty.
    async fn get(&self) -> Result<Option<CacheEntry>, CacheError>;
    /// Replaces the cache.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;
    /// Wipes the cache.
    async fn clear(&self) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_codes_map_to_typed_errors() {
        assert_eq!(
            ApiError::from_code(ACCESS_REVOKED_CODE, "revoked"),
            ApiError::AccessRevoked
        );
        assert!(ApiError::from_code(SESSION_INVALID_CODE, "").is_session_invalid());
        assert!(ApiError::NotFound.is_share_gone());
        assert_eq!(
            ApiError::from_code(2001, "bad revision"),
            ApiError::Rejected {
                code: 2001,
                message: "bad revision".into()
            }
        );
    }
}
