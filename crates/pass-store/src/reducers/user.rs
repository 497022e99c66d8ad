// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! User, addresses and settings.

use crate::action::Action;
use crate::model::{Address, EventId, Settings, User};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Authenticated user state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    /// User, once loaded.
    pub user: Option<User>,
    /// Addresses by id.
    pub addresses: BTreeMap<String, Address>,
    /// Last consumed user-scope event id.
    pub event_id: EventId,
}

impl UserState {
    /// Applies user actions. Events older than the stored cursor are ignored.
    pub fn reduce(&mut self, action: &Action) {
        match action {
            Action::UserLoaded {
                user,
                addresses,
                event_id,
            } => {
                self.user = Some(user.clone());
                self.addresses = addresses
                    .iter()
                    .map(|a| (a.id.clone(), a.clone()))
                    .collect();
                self.event_id = self.event_id.advance(*event_id);
            }
            Action::UserEvent {
                event_id,
                user,
                addresses,
            } => {
                if *event_id < self.event_id {
                    return;
                }
                self.event_id = *event_id;
                if let Some(user) = user {
                    self.user = Some(user.clone());
                }
                for address in addresses {
                    self.addresses.insert(address.id.clone(), address.clone());
                }
            }
            _ => {}
        }
    }
}

/// Applies settings actions. Only confirmed edits change settings.
pub fn reduce_settings(settings: &mut Settings, action: &Action) {
    if let Action::SettingsEditSuccess { settings: next } = action {
        *settings = next.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_user_event_is_ignored() {
        let mut state = UserState::default();
        state.reduce(&Action::UserEvent {
            event_id: EventId(5),
            user: Some(User {
                name: "new".into(),
                ..User::default()
            }),
            addresses: vec![],
        });
        state.reduce(&Action::UserEvent {
            event_id: EventId(3),
            user: Some(User {
                name: "old".into(),
                ..User::default()
            }),
            addresses: vec![],
        });
        assert_eq!(state.event_id, EventId(5));
        assert_eq!(state.user.map(|u| u.name), Some("new".to_string()));
    }

    #[test]
    fn settings_change_only_on_success() {
        let mut settings = Settings::default();
        let next = Settings {
            autofill: false,
            ..Settings::default()
        };
        reduce_settings(
            &mut settings,
            &Action::SettingsEditIntent {
                settings: next.clone(),
            },
        );
        assert!(settings.autofill);
        reduce_settings(&mut settings, &Action::SettingsEditSuccess { settings: next });
        assert!(!settings.autofill);
    }
}
