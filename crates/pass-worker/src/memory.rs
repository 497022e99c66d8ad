// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory collaborators: a scriptable API backend, a reversible crypto
//! stand-in and a cache cell. The binary runs on them and the integration
//! tests drive failure paths through them.
//!
//! [`PlainCrypto`] "seals" content as JSON, and [`MemoryApi`] stores sealed
//! content verbatim, so the two only work together.

use async_trait::async_trait;
use pass_app_core::ports::{
    ApiError, ApiPort, CacheEntry, CacheError, CachePort, CryptoError, CryptoPort, CryptoSnapshot,
    SealedBlob, SealedItem, SealedShare, SessionResume, ShareEvents, UserEvents, UserSnapshot,
};
use pass_store::{
    Address, EventId, ItemData, ItemId, ItemKind, ItemRevision, ItemState, Settings, Share,
    ShareId, User, VaultContent,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// API operations, for scripted failures and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// [`ApiPort::resume_session`].
    ResumeSession,
    /// [`ApiPort::unlock`].
    Unlock,
    /// [`ApiPort::signout`].
    Signout,
    /// [`ApiPort::fetch_user`].
    FetchUser,
    /// [`ApiPort::fetch_shares`].
    FetchShares,
    /// [`ApiPort::fetch_items`].
    FetchItems,
    /// [`ApiPort::create_item`].
    CreateItem,
    /// [`ApiPort::update_item`].
    UpdateItem,
    /// [`ApiPort::trash_item`].
    TrashItem,
    /// [`ApiPort::restore_item`].
    RestoreItem,
    /// [`ApiPort::delete_item`].
    DeleteItem,
    /// [`ApiPort::create_vault`].
    CreateVault,
    /// [`ApiPort::update_vault`].
    UpdateVault,
    /// [`ApiPort::delete_vault`].
    DeleteVault,
    /// [`ApiPort::update_settings`].
    UpdateSettings,
    /// [`ApiPort::user_events`].
    UserEvents,
    /// [`ApiPort::share_events`].
    ShareEvents,
}

/// Session state of the fake account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Session usable.
    Ready,
    /// PIN needed.
    Locked,
    /// No session.
    Unauthorized,
}

#[derive(Debug, Clone)]
enum ShareChange {
    Updated(SealedItem),
    Deleted(ItemId),
}

#[derive(Debug, Default)]
struct ShareRecord {
    share: Option<SealedShare>,
    items: BTreeMap<ItemId, SealedItem>,
    log: Vec<(EventId, ShareChange)>,
    revoked: bool,
}

#[derive(Debug, Clone, Default)]
struct UserChange {
    user: Option<User>,
    addresses: Vec<Address>,
    shares_changed: bool,
}

#[derive(Debug)]
struct Backend {
    session: SessionMode,
    uid: String,
    pin: String,
    user: User,
    addresses: Vec<Address>,
    settings: Settings,
    shares: BTreeMap<ShareId, ShareRecord>,
    user_log: Vec<(EventId, UserChange)>,
    next_event: u64,
    next_id: u64,
    now: i64,
    page_size: usize,
    failures: HashMap<Op, VecDeque<ApiError>>,
    calls: HashMap<Op, usize>,
}

impl Backend {
    fn event(&mut self) -> EventId {
        self.next_event += 1;
        EventId(self.next_event)
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn tick(&mut self) -> i64 {
        self.now += 1;
        self.now
    }

    fn enter(&mut self, op: Op) -> Result<(), ApiError> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(err) = self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        match (op, self.session) {
            (Op::ResumeSession | Op::Unlock | Op::Signout, _) | (_, SessionMode::Ready) => Ok(()),
            _ => Err(ApiError::SessionInvalid),
        }
    }

    fn record(&mut self, share_id: &str) -> Result<&mut ShareRecord, ApiError> {
        match self.shares.get_mut(share_id) {
            Some(record) if record.revoked => Err(ApiError::AccessRevoked),
            Some(record) if record.share.is_some() => Ok(record),
            _ => Err(ApiError::NotFound),
        }
    }

    fn log_item(&mut self, share_id: &str, change: ShareChange) -> Result<(), ApiError> {
        let event = self.event();
        let record = self.record(share_id)?;
        record.log.push((event, change));
        if let Some(share) = record.share.as_mut() {
            share.event_id = event;
        }
        Ok(())
    }

    fn log_user(&mut self, change: UserChange) {
        let event = self.event();
        self.user_log.push((event, change));
    }

    fn item(&mut self, share_id: &str, item_id: &str) -> Result<&mut SealedItem, ApiError> {
        self.record(share_id)?
            .items
            .get_mut(item_id)
            .ok_or(ApiError::NotFound)
    }

    fn set_item_state(&mut self, share_id: &str, item_id: &str, state: ItemState) -> Result<(), ApiError> {
        let now = self.tick();
        let item = self.item(share_id, item_id)?;
        item.state = state;
        item.revision += 1;
        item.modify_time = now;
        let item = item.clone();
        self.log_item(share_id, ShareChange::Updated(item))
    }

    fn insert_share(&mut self, content: Vec<u8>, primary: bool) -> SealedShare {
        let share_id = self.id("share");
        let share = SealedShare {
            share_id: share_id.clone(),
            vault_id: self.id("vault"),
            content,
            event_id: EventId::default(),
            primary,
            owner: true,
        };
        self.shares.insert(
            share_id,
            ShareRecord {
                share: Some(share.clone()),
                ..ShareRecord::default()
            },
        );
        share
    }

    fn insert_item(&mut self, share_id: &str, content: Vec<u8>) -> Result<SealedItem, ApiError> {
        let now = self.tick();
        let item = SealedItem {
            share_id: share_id.to_string(),
            item_id: self.id("item"),
            revision: 1,
            state: ItemState::Active,
            content,
            create_time: now,
            modify_time: now,
        };
        self.record(share_id)?
            .items
            .insert(item.item_id.clone(), item.clone());
        self.log_item(share_id, ShareChange::Updated(item.clone()))?;
        Ok(item)
    }
}

/// Scriptable in-memory API.
#[derive(Debug)]
pub struct MemoryApi {
    backend: Mutex<Backend>,
    latency: Option<Duration>,
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new("user-1", "1234")
    }
}

impl MemoryApi {
    /// Empty account with a ready session.
    pub fn new(uid: impl Into<String>, pin: impl Into<String>) -> Self {
        let uid = uid.into();
        Self {
            backend: Mutex::new(Backend {
                session: SessionMode::Ready,
                user: User {
                    id: uid.clone(),
                    ..User::default()
                },
                uid,
                pin: pin.into(),
                addresses: Vec::new(),
                settings: Settings::default(),
                shares: BTreeMap::new(),
                user_log: Vec::new(),
                next_event: 0,
                next_id: 0,
                now: 1_700_000_000,
                page_size: 50,
                failures: HashMap::new(),
                calls: HashMap::new(),
            }),
            latency: None,
        }
    }

    /// Account with one primary vault holding one login.
    pub fn demo() -> Self {
        let api = Self::new("demo", "0000");
        let share_id = api.seed_vault("Personal", true);
        api.seed_item(
            &share_id,
            &ItemData {
                kind: ItemKind::Login,
                name: "example.com".into(),
                note: String::new(),
                fields: BTreeMap::from([("username".to_string(), "demo@example.com".to_string())]),
            },
        );
        api
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn backend(&self) -> std::sync::MutexGuard<'_, Backend> {
        self.backend
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn call<T>(&self, op: Op, f: impl FnOnce(&mut Backend) -> Result<T, ApiError>) -> Result<T, ApiError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut backend = self.backend();
        backend.enter(op)?;
        f(&mut backend)
    }

    /// Creates a vault server side; returns its share id.
    pub fn seed_vault(&self, name: &str, primary: bool) -> ShareId {
        let content = seal(&VaultContent {
            name: name.into(),
            description: String::new(),
        });
        let mut backend = self.backend();
        let share = backend.insert_share(content, primary);
        backend.log_user(UserChange {
            shares_changed: true,
            ..UserChange::default()
        });
        share.share_id
    }

    /// Creates an item server side, as another device would; returns its id.
    pub fn seed_item(&self, share_id: &str, data: &ItemData) -> ItemId {
        self.backend()
            .insert_item(share_id, seal(data))
            .map(|item| item.item_id)
            .unwrap_or_default()
    }

    /// Deletes an item server side, as another device would.
    pub fn remote_delete_item(&self, share_id: &str, item_id: &str) {
        let mut backend = self.backend();
        let removed = backend
            .record(share_id)
            .map(|record| record.items.remove(item_id).is_some())
            .unwrap_or(false);
        if removed {
            let _ = backend.log_item(share_id, ShareChange::Deleted(item_id.to_string()));
        }
    }

    /// Revokes the user's access to a share.
    pub fn revoke_share(&self, share_id: &str) {
        let mut backend = self.backend();
        if let Some(record) = backend.shares.get_mut(share_id) {
            record.revoked = true;
        }
    }

    /// Makes the next call of `op` fail with `err`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: Op, err: ApiError) {
        self.backend().failures.entry(op).or_default().push_back(err);
    }

    /// Number of calls of `op` so far, failed ones included.
    pub fn calls(&self, op: Op) -> usize {
        self.backend().calls.get(&op).copied().unwrap_or_default()
    }

    /// Changes the session state.
    pub fn set_session(&self, mode: SessionMode) {
        self.backend().session = mode;
    }

    /// Limits event pages to `size` entries.
    pub fn set_page_size(&self, size: usize) {
        self.backend().page_size = size.max(1);
    }
}

fn seal<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

#[async_trait]
impl ApiPort for MemoryApi {
    async fn resume_session(&self) -> Result<SessionResume, ApiError> {
        self.call(Op::ResumeSession, |b| {
            Ok(match b.session {
                SessionMode::Ready => SessionResume::Ready { uid: b.uid.clone() },
                SessionMode::Locked => SessionResume::Locked { uid: b.uid.clone() },
                SessionMode::Unauthorized => SessionResume::Unauthorized,
            })
        })
        .await
    }

    async fn unlock(&self, pin: &str) -> Result<String, ApiError> {
        self.call(Op::Unlock, |b| match b.session {
            SessionMode::Unauthorized => Err(ApiError::SessionInvalid),
            _ if b.pin != pin => Err(ApiError::Rejected {
                code: 2011,
                message: "wrong PIN".into(),
            }),
            _ => {
                b.session = SessionMode::Ready;
                Ok(b.uid.clone())
            }
        })
        .await
    }

    async fn signout(&self) -> Result<(), ApiError> {
        self.call(Op::Signout, |b| {
            b.session = SessionMode::Unauthorized;
            Ok(())
        })
        .await
    }

    async fn fetch_user(&self) -> Result<UserSnapshot, ApiError> {
        self.call(Op::FetchUser, |b| {
            Ok(UserSnapshot {
                user: b.user.clone(),
                addresses: b.addresses.clone(),
                event_id: EventId(b.next_event),
            })
        })
        .await
    }

    async fn fetch_shares(&self) -> Result<Vec<SealedShare>, ApiError> {
        self.call(Op::FetchShares, |b| {
            Ok(b.shares
                .values()
                .filter(|r| !r.revoked)
                .filter_map(|r| r.share.clone())
                .collect())
        })
        .await
    }

    async fn fetch_items(&self, share_id: &str) -> Result<Vec<SealedItem>, ApiError> {
        self.call(Op::FetchItems, |b| {
            Ok(b.record(share_id)?.items.values().cloned().collect())
        })
        .await
    }

    async fn create_item(&self, share_id: &str, content: Vec<u8>) -> Result<SealedItem, ApiError> {
        self.call(Op::CreateItem, |b| b.insert_item(share_id, content))
            .await
    }

    async fn update_item(
        &self,
        share_id: &str,
        item_id: &str,
        revision: u64,
        content: Vec<u8>,
    ) -> Result<SealedItem, ApiError> {
        self.call(Op::UpdateItem, |b| {
            let now = b.tick();
            let item = b.item(share_id, item_id)?;
            if item.revision != revision {
                return Err(ApiError::Rejected {
                    code: 2001,
                    message: format!("revision {revision} is stale"),
                });
            }
            item.revision += 1;
            item.content = content;
            item.modify_time = now;
            let item = item.clone();
            b.log_item(share_id, ShareChange::Updated(item.clone()))?;
            Ok(item)
        })
        .await
    }

    async fn trash_item(&self, share_id: &str, item_id: &str) -> Result<(), ApiError> {
        self.call(Op::TrashItem, |b| {
            b.set_item_state(share_id, item_id, ItemState::Trashed)
        })
        .await
    }

    async fn restore_item(&self, share_id: &str, item_id: &str) -> Result<(), ApiError> {
        self.call(Op::RestoreItem, |b| {
            b.set_item_state(share_id, item_id, ItemState::Active)
        })
        .await
    }

    async fn delete_item(&self, share_id: &str, item_id: &str) -> Result<(), ApiError> {
        self.call(Op::DeleteItem, |b| {
            b.record(share_id)?
                .items
                .remove(item_id)
                .ok_or(ApiError::NotFound)?;
            b.log_item(share_id, ShareChange::Deleted(item_id.to_string()))
        })
        .await
    }

    async fn create_vault(&self, content: Vec<u8>) -> Result<SealedShare, ApiError> {
        self.call(Op::CreateVault, |b| {
            let share = b.insert_share(content, false);
            b.log_user(UserChange {
                shares_changed: true,
                ..UserChange::default()
            });
            Ok(share)
        })
        .await
    }

    async fn update_vault(&self, share_id: &str, content: Vec<u8>) -> Result<SealedShare, ApiError> {
        self.call(Op::UpdateVault, |b| {
            let record = b.record(share_id)?;
            let share = record.share.as_mut().ok_or(ApiError::NotFound)?;
            share.content = content;
            Ok(share.clone())
        })
        .await
    }

    async fn delete_vault(&self, share_id: &str) -> Result<(), ApiError> {
        self.call(Op::DeleteVault, |b| {
            b.record(share_id)?;
            b.shares.remove(share_id);
            b.log_user(UserChange {
                shares_changed: true,
                ..UserChange::default()
            });
            Ok(())
        })
        .await
    }

    async fn update_settings(&self, settings: &Settings) -> Result<Settings, ApiError> {
        self.call(Op::UpdateSettings, |b| {
            b.settings = settings.clone();
            Ok(b.settings.clone())
        })
        .await
    }

    async fn user_events(&self, since: EventId) -> Result<UserEvents, ApiError> {
        self.call(Op::UserEvents, |b| {
            let pending: Vec<_> = b.user_log.iter().filter(|(id, _)| *id > since).collect();
            let more = pending.len() > b.page_size;
            let mut page = UserEvents {
                event_id: since,
                more,
                ..UserEvents::default()
            };
            for (id, change) in pending.into_iter().take(b.page_size) {
                page.event_id = page.event_id.advance(*id);
                if change.user.is_some() {
                    page.user.clone_from(&change.user);
                }
                page.addresses.extend(change.addresses.iter().cloned());
                page.shares_changed |= change.shares_changed;
            }
            Ok(page)
        })
        .await
    }

    async fn share_events(&self, share_id: &str, since: EventId) -> Result<ShareEvents, ApiError> {
        self.call(Op::ShareEvents, |b| {
            let page_size = b.page_size;
            let record = b.record(share_id)?;
            let pending: Vec<_> = record.log.iter().filter(|(id, _)| *id > since).collect();
            let more = pending.len() > page_size;
            let mut page = ShareEvents {
                event_id: since,
                more,
                ..ShareEvents::default()
            };
            for (id, change) in pending.into_iter().take(page_size) {
                page.event_id = page.event_id.advance(*id);
                match change {
                    ShareChange::Updated(item) => {
                        page.deleted.retain(|deleted| deleted != &item.item_id);
                        page.updated.retain(|u| u.item_id != item.item_id);
                        page.updated.push(item.clone());
                    }
                    ShareChange::Deleted(item_id) => {
                        page.updated.retain(|u| &u.item_id != item_id);
                        page.deleted.push(item_id.clone());
                    }
                }
            }
            Ok(page)
        })
        .await
    }
}

/// Reversible crypto stand-in: sealing is JSON encoding.
#[derive(Debug, Default)]
pub struct PlainCrypto {
    hydrations: AtomicUsize,
    clears: AtomicUsize,
    broken: AtomicBool,
}

impl PlainCrypto {
    /// Makes every later cache open and session hydration fail.
    pub fn break_session(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Number of [`CryptoPort::hydrate`] calls.
    pub fn hydrations(&self) -> usize {
        self.hydrations.load(Ordering::SeqCst)
    }

    /// Number of [`CryptoPort::clear`] calls.
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

fn open<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CryptoError> {
    serde_json::from_slice(bytes).map_err(|err| CryptoError::Open(err.to_string()))
}

fn seal_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CryptoError> {
    serde_json::to_vec(value).map_err(|err| CryptoError::Seal(err.to_string()))
}

#[async_trait]
impl CryptoPort for PlainCrypto {
    async fn open_item(&self, item: &SealedItem) -> Result<ItemRevision, CryptoError> {
        Ok(ItemRevision {
            share_id: item.share_id.clone(),
            item_id: item.item_id.clone(),
            revision: item.revision,
            state: item.state,
            data: open(&item.content)?,
            create_time: item.create_time,
            modify_time: item.modify_time,
        })
    }

    async fn seal_item(&self, _share_id: &str, data: &ItemData) -> Result<Vec<u8>, CryptoError> {
        seal_json(data)
    }

    async fn open_share(&self, share: &SealedShare) -> Result<Share, CryptoError> {
        Ok(Share {
            share_id: share.share_id.clone(),
            vault_id: share.vault_id.clone(),
            content: open(&share.content)?,
            event_id: share.event_id,
            primary: share.primary,
            owner: share.owner,
        })
    }

    async fn seal_vault(&self, content: &VaultContent) -> Result<Vec<u8>, CryptoError> {
        seal_json(content)
    }

    async fn snapshot(&self) -> Result<CryptoSnapshot, CryptoError> {
        Ok(CryptoSnapshot(b"plain-session".to_vec()))
    }

    async fn hydrate(&self, _snapshot: &CryptoSnapshot) -> Result<(), CryptoError> {
        self.hydrations.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(CryptoError::Hydrate("session key mismatch".into()));
        }
        Ok(())
    }

    async fn seal_cache(&self, plain: &[u8]) -> Result<SealedBlob, CryptoError> {
        Ok(SealedBlob {
            salt: "plain".into(),
            data: plain.to_vec(),
        })
    }

    async fn open_cache(&self, blob: &SealedBlob) -> Result<Vec<u8>, CryptoError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(CryptoError::Open("cache key mismatch".into()));
        }
        Ok(blob.data.clone())
    }

    async fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cache cell.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entry: Mutex<Option<CacheEntry>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    /// Current entry.
    pub fn entry(&self) -> Option<CacheEntry> {
        self.cell().clone()
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn cell(&self) -> std::sync::MutexGuard<'_, Option<CacheEntry>> {
        self.entry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl CachePort for MemoryCache {
    async fn get(&self) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.cell().clone())
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        *self.cell() = Some(entry);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        *self.cell() = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn share_feed_reports_remote_changes_once() {
        let api = MemoryApi::default();
        let share_id = api.seed_vault("Work", false);
        let item_id = api.seed_item(&share_id, &ItemData::default());
        let first = api.share_events(&share_id, EventId::default()).await.unwrap();
        assert_eq!(first.updated.len(), 1);

        api.remote_delete_item(&share_id, &item_id);
        let second = api.share_events(&share_id, first.event_id).await.unwrap();
        assert!(second.updated.is_empty());
        assert_eq!(second.deleted, vec![item_id]);

        let third = api.share_events(&share_id, second.event_id).await.unwrap();
        assert_eq!(third.event_id, second.event_id);
        assert!(third.deleted.is_empty());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let api = MemoryApi::default();
        api.fail_next(Op::FetchShares, ApiError::Network("offline".into()));
        assert!(api.fetch_shares().await.is_err());
        assert!(api.fetch_shares().await.is_ok());
        assert_eq!(api.calls(Op::FetchShares), 2);
    }

    #[tokio::test]
    async fn revoked_share_answers_access_revoked() {
        let api = MemoryApi::default();
        let share_id = api.seed_vault("Shared", false);
        api.revoke_share(&share_id);
        assert_eq!(
            api.share_events(&share_id, EventId::default()).await,
            Err(ApiError::AccessRevoked)
        );
        assert!(api.fetch_shares().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let api = MemoryApi::default();
        let share_id = api.seed_vault("Personal", true);
        let item_id = api.seed_item(&share_id, &ItemData::default());
        assert!(api.update_item(&share_id, &item_id, 1, vec![]).await.is_ok());
        assert!(matches!(
            api.update_item(&share_id, &item_id, 1, vec![]).await,
            Err(ApiError::Rejected { code: 2001, .. })
        ));
    }
}
