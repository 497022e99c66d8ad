// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Effect loop. Consumes dispatched envelopes in order and runs their side
//! effects, each effect in its own task.
//!
//! Every effect resolves to exactly one outcome action dispatched back into
//! the store: the success action, or the typed failure action carrying an
//! error notification for the context that asked. An invalid session turns
//! into a global sign-out instead.

use crate::cache;
use crate::channel::{CancelToken, EventScope};
use crate::worker::WorkerContext;
use pass_app_core::ports::{ApiError, CryptoError};
use pass_store::{Action, Envelope, Notification, RequestStatus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Failure of one effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EffectError {
    /// REST call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Sealing or opening content failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl EffectError {
    /// Whether the failure invalidates the session.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, EffectError::Api(err) if err.is_session_invalid())
    }
}

/// Runs until `cancel` fires or the store goes away.
pub(crate) async fn run(
    ctx: Arc<WorkerContext>,
    mut effects: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancelToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = effects.recv() => match next {
                Some(envelope) => react(&ctx, envelope).await,
                None => break,
            },
        }
    }
    debug!("effect loop stopped");
}

async fn react(ctx: &Arc<WorkerContext>, envelope: Envelope) {
    cache::after_action(ctx, &envelope.action).await;

    match &envelope.action {
        Action::ItemCreationIntent { .. }
        | Action::ItemEditIntent { .. }
        | Action::ItemTrashIntent { .. }
        | Action::ItemRestoreIntent { .. }
        | Action::ItemDeleteIntent { .. }
        | Action::VaultCreationIntent { .. }
        | Action::VaultEditIntent { .. }
        | Action::VaultDeleteIntent { .. }
        | Action::SettingsEditIntent { .. } => {
            tokio::spawn(effect(Arc::clone(ctx), envelope.clone()));
        }
        Action::Signout { soft } => {
            let ctx = Arc::clone(ctx);
            let soft = *soft;
            tokio::spawn(async move { ctx.on_signout(soft).await });
        }
        Action::Lock => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move { ctx.on_lock().await });
        }
        Action::VaultCreationSuccess { share, .. } => {
            ctx.start_channel(EventScope::Share(share.share_id.clone()))
                .await;
        }
        Action::VaultDeleteSuccess { share_id } | Action::ShareDisabled { share_id } => {
            ctx.stop_channel(&EventScope::Share(share_id.clone())).await;
        }
        Action::Boot
        | Action::BootSuccess { .. }
        | Action::BootFailure { .. }
        | Action::SyncSuccess { .. }
        | Action::StateSync { .. }
        | Action::UserLoaded { .. }
        | Action::UserEvent { .. }
        | Action::SettingsEditSuccess { .. }
        | Action::SettingsEditFailure { .. }
        | Action::ItemCreationSuccess { .. }
        | Action::ItemCreationFailure { .. }
        | Action::ItemCreationDismiss { .. }
        | Action::ItemEditSuccess { .. }
        | Action::ItemEditFailure { .. }
        | Action::ItemEditDismiss { .. }
        | Action::ItemTrashSuccess { .. }
        | Action::ItemTrashFailure { .. }
        | Action::ItemRestoreSuccess { .. }
        | Action::ItemRestoreFailure { .. }
        | Action::ItemDeleteSuccess { .. }
        | Action::ItemDeleteFailure { .. }
        | Action::ItemsEdited { .. }
        | Action::ItemsDeleted { .. }
        | Action::VaultCreationFailure { .. }
        | Action::VaultEditSuccess { .. }
        | Action::VaultEditFailure { .. }
        | Action::VaultDeleteFailure { .. }
        | Action::ShareEvent { .. }
        | Action::ShareSelect { .. }
        | Action::WakeupIntent { .. }
        | Action::WakeupSuccess { .. }
        | Action::Acknowledge { .. } => {}
    }
}

async fn effect(ctx: Arc<WorkerContext>, intent: Envelope) {
    let outcome = match perform(&ctx, &intent.action).await {
        Ok(Some(action)) => {
            let mut outcome = intent.follow_up(action, RequestStatus::Success);
            if let Some(text) = success_text(&outcome.action) {
                outcome = outcome.with_notification(targeted(Notification::success(text), &intent));
            }
            outcome
        }
        Ok(None) => return,
        Err(err) if err.is_session_invalid() => {
            info!(action = intent.action.name(), "session invalidated, signing out");
            ctx.store
                .dispatch(Envelope::new(Action::Signout { soft: false }))
                .await;
            return;
        }
        Err(err) => {
            warn!(?err, action = intent.action.name(), "effect failed");
            let Some((action, text)) = failure(&intent.action, &err) else {
                return;
            };
            intent
                .follow_up(action, RequestStatus::Failure)
                .with_notification(targeted(Notification::error(text), &intent))
        }
    };
    let callback = outcome.meta.callback.clone();
    let action = outcome.action.clone();
    ctx.store.dispatch(outcome).await;
    if let Some(callback) = callback {
        callback.call(&action);
    }
}

fn targeted(notification: Notification, intent: &Envelope) -> Notification {
    match intent.meta.sender {
        Some(sender) => notification.for_endpoint(sender),
        None => notification,
    }
}

async fn perform(ctx: &WorkerContext, action: &Action) -> Result<Option<Action>, EffectError> {
    let outcome = match action {
        Action::ItemCreationIntent {
            optimistic_id,
            share_id,
            data,
            ..
        } => {
            let content = ctx.crypto.seal_item(share_id, data).await?;
            let sealed = ctx.api.create_item(share_id, content).await?;
            Action::ItemCreationSuccess {
                optimistic_id: optimistic_id.clone(),
                share_id: share_id.clone(),
                item: ctx.crypto.open_item(&sealed).await?,
            }
        }
        Action::ItemEditIntent {
            share_id,
            item_id,
            revision,
            data,
        } => {
            let content = ctx.crypto.seal_item(share_id, data).await?;
            let sealed = ctx
                .api
                .update_item(share_id, item_id, *revision, content)
                .await?;
            Action::ItemEditSuccess {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
                item: ctx.crypto.open_item(&sealed).await?,
            }
        }
        Action::ItemTrashIntent { share_id, item_id } => {
            ctx.api.trash_item(share_id, item_id).await?;
            Action::ItemTrashSuccess {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
            }
        }
        Action::ItemRestoreIntent { share_id, item_id } => {
            ctx.api.restore_item(share_id, item_id).await?;
            Action::ItemRestoreSuccess {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
            }
        }
        Action::ItemDeleteIntent { share_id, item_id } => {
            ctx.api.delete_item(share_id, item_id).await?;
            Action::ItemDeleteSuccess {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
            }
        }
        Action::VaultCreationIntent {
            optimistic_id,
            content,
        } => {
            let sealed = ctx.crypto.seal_vault(content).await?;
            let share = ctx.api.create_vault(sealed).await?;
            Action::VaultCreationSuccess {
                optimistic_id: optimistic_id.clone(),
                share: ctx.crypto.open_share(&share).await?,
            }
        }
        Action::VaultEditIntent { share_id, content } => {
            let sealed = ctx.crypto.seal_vault(content).await?;
            let share = ctx.api.update_vault(share_id, sealed).await?;
            Action::VaultEditSuccess {
                share_id: share_id.clone(),
                share: ctx.crypto.open_share(&share).await?,
            }
        }
        Action::VaultDeleteIntent { share_id } => {
            ctx.api.delete_vault(share_id).await?;
            Action::VaultDeleteSuccess {
                share_id: share_id.clone(),
            }
        }
        Action::SettingsEditIntent { settings } => Action::SettingsEditSuccess {
            settings: ctx.api.update_settings(settings).await?,
        },
        _ => return Ok(None),
    };
    Ok(Some(outcome))
}

fn success_text(action: &Action) -> Option<&'static str> {
    match action {
        Action::ItemCreationSuccess { .. } => Some("Item created"),
        Action::ItemEditSuccess { .. } => Some("Item updated"),
        Action::ItemTrashSuccess { .. } => Some("Item moved to trash"),
        Action::ItemRestoreSuccess { .. } => Some("Item restored"),
        Action::ItemDeleteSuccess { .. } => Some("Item permanently deleted"),
        Action::VaultCreationSuccess { .. } => Some("Vault created"),
        Action::VaultEditSuccess { .. } => Some("Vault updated"),
        Action::VaultDeleteSuccess { .. } => Some("Vault deleted"),
        Action::SettingsEditSuccess { .. } => Some("Settings saved"),
        _ => None,
    }
}

/// Failure action and notification text for a failed intent.
fn failure(intent: &Action, err: &EffectError) -> Option<(Action, &'static str)> {
    let error = err.to_string();
    let failed = match intent {
        Action::ItemCreationIntent {
            optimistic_id,
            share_id,
            ..
        } => (
            Action::ItemCreationFailure {
                optimistic_id: optimistic_id.clone(),
                share_id: share_id.clone(),
                error,
            },
            "Item creation failed",
        ),
        Action::ItemEditIntent {
            share_id, item_id, ..
        } => (
            Action::ItemEditFailure {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
                error,
            },
            "Item update failed",
        ),
        Action::ItemTrashIntent { share_id, item_id } => (
            Action::ItemTrashFailure {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
                error,
            },
            "Moving item to trash failed",
        ),
        Action::ItemRestoreIntent { share_id, item_id } => (
            Action::ItemRestoreFailure {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
                error,
            },
            "Restoring item failed",
        ),
        Action::ItemDeleteIntent { share_id, item_id } => (
            Action::ItemDeleteFailure {
                share_id: share_id.clone(),
                item_id: item_id.clone(),
                error,
            },
            "Deleting item failed",
        ),
        Action::VaultCreationIntent { optimistic_id, .. } => (
            Action::VaultCreationFailure {
                optimistic_id: optimistic_id.clone(),
                error,
            },
            "Vault creation failed",
        ),
        Action::VaultEditIntent { share_id, .. } => (
            Action::VaultEditFailure {
                share_id: share_id.clone(),
                error,
            },
            "Vault update failed",
        ),
        Action::VaultDeleteIntent { share_id } => (
            Action::VaultDeleteFailure {
                share_id: share_id.clone(),
                error,
            },
            "Vault deletion failed",
        ),
        Action::SettingsEditIntent { .. } => (
            Action::SettingsEditFailure { error },
            "Saving settings failed",
        ),
        _ => return None,
    };
    Some(failed)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use pass_store::{ItemData, VaultContent};

    #[test]
    fn every_intent_with_an_effect_has_a_failure() {
        let err = EffectError::Api(ApiError::Network("offline".into()));
        let intents = [
            Action::ItemCreationIntent {
                optimistic_id: "x".into(),
                share_id: "s".into(),
                data: ItemData::default(),
                create_time: 0,
            },
            Action::ItemEditIntent {
                share_id: "s".into(),
                item_id: "i".into(),
                revision: 1,
                data: ItemData::default(),
            },
            Action::ItemTrashIntent {
                share_id: "s".into(),
                item_id: "i".into(),
            },
            Action::ItemRestoreIntent {
                share_id: "s".into(),
                item_id: "i".into(),
            },
            Action::ItemDeleteIntent {
                share_id: "s".into(),
                item_id: "i".into(),
            },
            Action::VaultCreationIntent {
                optimistic_id: "v".into(),
                content: VaultContent::default(),
            },
            Action::VaultEditIntent {
                share_id: "s".into(),
                content: VaultContent::default(),
            },
            Action::VaultDeleteIntent {
                share_id: "s".into(),
            },
            Action::SettingsEditIntent {
                settings: pass_store::Settings::default(),
            },
        ];
        for intent in &intents {
            let (action, _) = failure(intent, &err).unwrap_or_else(|| panic!("{}", intent.name()));
            assert!(!action.is_synchronous());
            assert!(action.name().ends_with("-failure"));
        }
        assert!(failure(&Action::Lock, &err).is_none());
    }

    #[test]
    fn session_invalid_is_detected_through_effect_errors() {
        assert!(EffectError::Api(ApiError::SessionInvalid).is_session_invalid());
        assert!(!EffectError::Crypto(CryptoError::Seal("k".into())).is_session_invalid());
    }
}
