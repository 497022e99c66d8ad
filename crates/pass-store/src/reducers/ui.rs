// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replica-local UI state that still has to follow remote share changes.

use crate::action::Action;
use crate::model::ShareId;
use serde::{Deserialize, Serialize};

/// Active selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    /// Selected share, `None` for "all vaults".
    pub selected_share: Option<ShareId>,
}

impl UiState {
    /// Applies selection changes and evicts shares that went away.
    pub fn reduce(&mut self, action: &Action) {
        match action {
            Action::ShareSelect { share_id } => self.selected_share.clone_from(share_id),
            Action::ShareDisabled { share_id } | Action::VaultDeleteSuccess { share_id } => {
                if self.selected_share.as_ref() == Some(share_id) {
                    self.selected_share = None;
                }
            }
            Action::VaultCreationSuccess {
                optimistic_id,
                share,
            } => {
                if self.selected_share.as_ref() == Some(optimistic_id) {
                    self.selected_share = Some(share.share_id.clone());
                }
            }
            _ => {}
        }
    }
}
