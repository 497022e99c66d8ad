// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-slice reducers.

pub mod items;
pub mod shares;
pub mod ui;
pub mod user;

pub use items::{item_matchers, ItemsState};
pub use shares::{share_matchers, SharesState};
pub use ui::UiState;
pub use user::{reduce_settings, UserState};
