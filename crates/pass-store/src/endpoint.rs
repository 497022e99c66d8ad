// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Execution contexts that can hold a store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extension context kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    /// Long-lived worker owning the authoritative store.
    Background,
    /// Toolbar popup.
    Popup,
    /// Settings page.
    Page,
    /// Content script injected in a tab.
    ContentScript,
    /// Autofill dropdown iframe.
    Dropdown,
    /// Autosave notification iframe.
    Notification,
}

impl Endpoint {
    /// Stable name used in connection keys and request ids.
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Background => "background",
            Endpoint::Popup => "popup",
            Endpoint::Page => "page",
            Endpoint::ContentScript => "content-script",
            Endpoint::Dropdown => "dropdown",
            Endpoint::Notification => "notification",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
