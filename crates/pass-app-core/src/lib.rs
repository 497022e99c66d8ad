// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared services for the Pass worker and replicas (config, prefs, toasts)
//! plus the ports of the worker's external collaborators.

pub mod config;
pub mod ports;
pub mod prefs;
pub mod toast;
