// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Effects of proxied intents and server event channels, observed through
//! broker ports.

mod common;

use common::{
    eventually, next_matching, port, start, wait_channel_stopped, wait_state, wait_status, wakeup,
    Harness,
};
use pass_app_core::ports::ApiError;
use pass_session_proto::{Endpoint, Message, Response, ShareEventKind, WorkerMessage, WorkerStatus};
use pass_store::action::{item_creation_intent, vault_delete_intent};
use pass_store::selectors::{
    select_item, select_item_failed, select_item_id_by_optimistic_id, select_items_by_share,
    select_share, select_shares,
};
use pass_store::{Action, Envelope, ItemData, NotificationKind};
use pass_worker::channel::EventScope;
use pass_worker::memory::{MemoryApi, Op};

async fn ready() -> (Harness, String) {
    let h = start(MemoryApi::demo()).await;
    let (state, _) = wakeup(&h.ctx, Endpoint::Background).await;
    assert_eq!(state.status, WorkerStatus::Ready);
    let share_id = h
        .ctx
        .store()
        .read(|s| select_shares(s)[0].share_id.clone())
        .await;
    (h, share_id)
}

async fn send(h: &Harness, sender: Endpoint, envelope: Envelope) -> Response {
    h.ctx
        .handle(WorkerMessage::new(sender, Message::store_action(envelope)))
        .await
}

fn login(name: &str) -> ItemData {
    ItemData {
        name: name.into(),
        ..ItemData::default()
    }
}

fn is_notification(message: &Message) -> bool {
    matches!(message, Message::Notification(_))
}

#[tokio::test]
async fn item_creation_commits_and_notifies_the_sender_only() {
    let (h, share_id) = ready().await;
    let mut popup = port(&h.ctx, Endpoint::Popup).await;
    let mut page = port(&h.ctx, Endpoint::Page).await;

    let response = send(&h, Endpoint::Popup, item_creation_intent("opt-1", &share_id, login("new"), 0)).await;
    assert_eq!(response, Response::ack());

    let Some(Message::Notification(toast)) = next_matching(&mut popup, is_notification).await else {
        panic!("popup got no notification");
    };
    assert_eq!(toast.kind, NotificationKind::Success);
    assert_eq!(toast.target, Some(Endpoint::Popup));

    // The page saw the intent and its outcome but no toast.
    let outcome = next_matching(&mut page, |m| {
        matches!(m, Message::StoreAction { action } if matches!(action.action, Action::ItemCreationSuccess { .. }))
    })
    .await;
    assert!(outcome.is_some());
    while let Ok(message) = page.try_recv() {
        assert!(!is_notification(&message));
    }

    let committed = h
        .ctx
        .store()
        .read(|s| {
            let item_id = select_item_id_by_optimistic_id(s, "opt-1")?.clone();
            select_item(s, &share_id, &item_id).map(|item| item.data.name.clone())
        })
        .await;
    assert_eq!(committed.as_deref(), Some("new"));
    assert!(h.ctx.store().read(pass_store::State::is_settled).await);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn failed_creation_keeps_the_item_marked_failed() {
    let (h, share_id) = ready().await;
    let mut popup = port(&h.ctx, Endpoint::Popup).await;
    h.api.fail_next(
        Op::CreateItem,
        ApiError::Rejected {
            code: 2500,
            message: "quota".into(),
        },
    );

    send(&h, Endpoint::Popup, item_creation_intent("opt-2", &share_id, login("x"), 0)).await;

    let Some(Message::Notification(toast)) = next_matching(&mut popup, is_notification).await else {
        panic!("popup got no notification");
    };
    assert_eq!(toast.kind, NotificationKind::Error);
    assert!(
        h.ctx
            .store()
            .read(|s| select_item_failed(s, &share_id, "opt-2") && select_item(s, &share_id, "opt-2").is_some())
            .await
    );
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn notifications_for_absent_contexts_are_buffered_until_wakeup() {
    let (h, share_id) = ready().await;
    send(&h, Endpoint::Popup, item_creation_intent("opt-3", &share_id, login("later"), 0)).await;
    assert!(
        wait_state(&h.ctx, |s| select_item_id_by_optimistic_id(s, "opt-3").is_some()).await
    );
    // Outcome dispatch and notification land under the same lock.
    let (_, buffered) = wakeup(&h.ctx, Endpoint::Popup).await;
    assert!(buffered.iter().any(is_notification));

    let (_, again) = wakeup(&h.ctx, Endpoint::Popup).await;
    assert!(!again.iter().any(is_notification));
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn invalid_session_signs_everyone_out() {
    let (h, share_id) = ready().await;
    assert!(eventually(|| h.cache.writes() > 0).await);
    let mut popup = port(&h.ctx, Endpoint::Popup).await;
    h.api.fail_next(Op::CreateItem, ApiError::SessionInvalid);

    send(&h, Endpoint::Popup, item_creation_intent("opt-4", &share_id, login("x"), 0)).await;

    assert!(wait_status(&h.ctx, WorkerStatus::Unauthorized).await);
    let signout = next_matching(&mut popup, |m| {
        matches!(m, Message::StoreAction { action } if matches!(action.action, Action::Signout { .. }))
    })
    .await;
    assert!(signout.is_some());
    assert!(h.cache.entry().is_none());
    assert!(h.ctx.store().read(|s| select_shares(s).is_empty()).await);
    assert!(h.ctx.channel_scopes().await.is_empty());
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn revoked_share_is_disabled_and_announced() {
    let (h, share_id) = ready().await;
    let mut page = port(&h.ctx, Endpoint::Page).await;
    h.api.revoke_share(&share_id);

    let event = next_matching(&mut page, |m| matches!(m, Message::ShareServerEvent(_))).await;
    let Some(Message::ShareServerEvent(event)) = event else {
        panic!("no share event");
    };
    assert_eq!(event.kind, ShareEventKind::ShareDisabled);
    assert_eq!(event.share_id, share_id);

    assert!(wait_state(&h.ctx, |s| select_share(s, &share_id).is_none()).await);
    assert!(wait_channel_stopped(&h.ctx, &EventScope::Share(share_id.clone())).await);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn remote_deletions_reach_the_store_and_replicas() {
    let (h, share_id) = ready().await;
    let mut page = port(&h.ctx, Endpoint::Page).await;
    let item_id = h
        .ctx
        .store()
        .read(|s| select_items_by_share(s, &share_id)[0].item_id.clone())
        .await;

    h.api.remote_delete_item(&share_id, &item_id);

    let Some(Message::ShareServerEvent(event)) =
        next_matching(&mut page, |m| matches!(m, Message::ShareServerEvent(_))).await
    else {
        panic!("no share event");
    };
    assert_eq!(event.kind, ShareEventKind::ItemsDeleted);
    assert_eq!(event.item_ids, vec![item_id.clone()]);
    assert!(wait_state(&h.ctx, |s| select_item(s, &share_id, &item_id).is_none()).await);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn remote_creations_are_picked_up_by_the_share_channel() {
    let (h, share_id) = ready().await;
    let item_id = h.api.seed_item(&share_id, &login("from another device"));
    assert!(wait_state(&h.ctx, |s| select_item(s, &share_id, &item_id).is_some()).await);
    h.ctx.shutdown().await;
}

#[tokio::test]
async fn vault_deletion_stops_its_channel() {
    let (h, share_id) = ready().await;
    let mut popup = port(&h.ctx, Endpoint::Popup).await;
    send(&h, Endpoint::Popup, vault_delete_intent("m-1", share_id.clone())).await;

    assert!(next_matching(&mut popup, is_notification).await.is_some());
    assert!(wait_state(&h.ctx, |s| select_share(s, &share_id).is_none()).await);
    assert!(wait_channel_stopped(&h.ctx, &EventScope::Share(share_id)).await);
    h.ctx.shutdown().await;
}
