// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! User-facing notification payload attached to envelopes.

use crate::endpoint::Endpoint;
use serde::{Deserialize, Serialize};

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Informational note.
    Info,
    /// Successful user action.
    Success,
    /// Something needs attention.
    Warning,
    /// A user action failed.
    Error,
}

/// Toast payload. `target` restricts delivery to one endpoint kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Severity.
    pub kind: NotificationKind,
    /// Message text.
    pub text: String,
    /// Endpoint that should display it, every endpoint when `None`.
    pub target: Option<Endpoint>,
}

impl Notification {
    /// Builds an untargeted notification.
    pub fn new(kind: NotificationKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            target: None,
        }
    }

    /// Success notification.
    pub fn success(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, text)
    }

    /// Error notification.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, text)
    }

    /// Restricts the notification to one endpoint.
    pub fn for_endpoint(mut self, target: Endpoint) -> Self {
        self.target = Some(target);
        self
    }
}
