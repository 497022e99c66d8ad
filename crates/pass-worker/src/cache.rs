// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Encrypted local cache: best-effort writes of the settled state and
//! hydration at boot.

use crate::worker::WorkerContext;
use pass_app_core::ports::{CacheEntry, CacheError, CryptoError};
use pass_session_proto::WorkerStatus;
use pass_store::{Action, State};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cache hydration failures.
#[derive(Debug, Error)]
pub enum HydrateError {
    /// The cache could not be decrypted or the session restored.
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    /// The decrypted cache is not a state.
    #[error("corrupt cache: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
enum WriteError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Refreshes the cache after `action` when the worker is ready and the
/// action changed persistent data.
pub(crate) async fn after_action(ctx: &Arc<WorkerContext>, action: &Action) {
    if action.triggers_cache_write() && ctx.status().await == WorkerStatus::Ready {
        spawn_write(Arc::clone(ctx));
    }
}

/// Writes the settled state in the background. Failures are logged only.
pub(crate) fn spawn_write(ctx: Arc<WorkerContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match write(&ctx).await {
            Ok(true) => debug!("cache written"),
            Ok(false) => debug!("cache write skipped"),
            Err(err) => warn!(?err, "cache write failed"),
        }
    })
}

async fn write(ctx: &WorkerContext) -> Result<bool, WriteError> {
    let settled = ctx.store.read(State::as_if_not_optimistic).await;
    let plain = serde_json::to_vec(&settled)?;
    let sealed = ctx.crypto.seal_cache(&plain).await?;
    let snapshot = ctx.crypto.snapshot().await?;
    // Teardown flips the status under the same gate, so a write that gets
    // past this check finishes before any wipe runs.
    let _gate = ctx.cache_gate.lock().await;
    if ctx.status().await != WorkerStatus::Ready {
        return Ok(false);
    }
    ctx.cache
        .set(CacheEntry {
            state: sealed,
            snapshot,
        })
        .await?;
    Ok(true)
}

/// Restores the crypto session and the cached state. `Ok(None)` when the
/// cache is empty or unreadable.
pub(crate) async fn hydrate(ctx: &WorkerContext) -> Result<Option<State>, HydrateError> {
    let entry = match ctx.cache.get().await {
        Ok(Some(entry)) => entry,
        Ok(None) => return Ok(None),
        Err(err) => {
            warn!(?err, "cache unreadable, booting from network");
            return Ok(None);
        }
    };
    ctx.crypto.hydrate(&entry.snapshot).await?;
    let plain = ctx.crypto.open_cache(&entry.state).await?;
    let state: State = serde_json::from_slice(&plain)?;
    info!(
        shares = state.shares.view().by_id.len(),
        "state hydrated from cache"
    );
    Ok(Some(state))
}

/// Wipes the cache once no write is in flight.
pub(crate) async fn wipe(ctx: &WorkerContext) {
    let _gate = ctx.cache_gate.lock().await;
    clear(ctx).await;
}

/// Wipes the cache, logging failures. The caller holds the cache gate.
pub(crate) async fn clear(ctx: &WorkerContext) {
    if let Err(err) = ctx.cache.clear().await {
        warn!(?err, "cache wipe failed");
    }
}
