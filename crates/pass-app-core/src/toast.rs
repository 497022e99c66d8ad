// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replica-side notification queue with TTL and dedupe.
//!
//! Notifications reach a replica either live or through the wakeup buffer,
//! so the same toast can arrive twice within a short window. Identical
//! entries inside the dedupe window are merged.

use pass_store::{Notification, NotificationKind};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Identifier for a queued notification.
pub type ToastId = u64;

/// Queued notification.
#[derive(Debug, Clone)]
pub struct Toast {
    /// Stable identifier.
    pub id: ToastId,
    /// Payload.
    pub notification: Notification,
    /// Time-to-live.
    pub ttl: Duration,
    /// Creation (or last refresh) time.
    pub created: Instant,
}

impl Toast {
    /// 1.0 when just created, 0.0 when expired.
    pub fn progress(&self, now: Instant) -> f32 {
        let elapsed = now.duration_since(self.created).as_secs_f32();
        (1.0 - elapsed / self.ttl.as_secs_f32()).clamp(0.0, 1.0)
    }

    fn alive(&self, now: Instant) -> bool {
        now.duration_since(self.created) < self.ttl
    }
}

/// Bounded queue of user-facing notifications.
pub struct ToastService {
    queue: VecDeque<Toast>,
    max: usize,
    dedupe_window: Duration,
    next_id: ToastId,
}

impl ToastService {
    /// Create a queue holding at most `max` entries.
    pub fn new(max: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max,
            dedupe_window: Duration::from_millis(500),
            next_id: 1,
        }
    }

    /// Default lifetime for a severity. Errors stay up longer.
    pub fn ttl_for(kind: NotificationKind) -> Duration {
        match kind {
            NotificationKind::Error | NotificationKind::Warning => Duration::from_secs(8),
            NotificationKind::Info | NotificationKind::Success => Duration::from_secs(4),
        }
    }

    /// Push a notification, merging it with an identical recent entry.
    pub fn push(&mut self, notification: Notification, now: Instant) -> ToastId {
        let ttl = Self::ttl_for(notification.kind);
        if let Some(existing) = self.queue.iter_mut().find(|t| {
            t.notification == notification && now.duration_since(t.created) <= self.dedupe_window
        }) {
            existing.created = now;
            existing.ttl = ttl;
            return existing.id;
        }

        let id = self.next_id;
        self.next_id += 1;
        if self.max > 0 && self.queue.len() == self.max {
            self.queue.pop_front();
        }
        self.queue.push_back(Toast {
            id,
            notification,
            ttl,
            created: now,
        });
        id
    }

    /// Drop a notification before it expires.
    pub fn dismiss(&mut self, id: ToastId) {
        self.queue.retain(|t| t.id != id);
    }

    /// Drop expired entries.
    pub fn retain_visible(&mut self, now: Instant) {
        self.queue.retain(|t| t.alive(now));
    }

    /// Live entries, oldest first.
    pub fn visible(&self, now: Instant) -> Vec<&Toast> {
        self.queue.iter().filter(|t| t.alive(now)).collect()
    }
}
