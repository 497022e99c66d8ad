// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Optimistic reducer wrapper.
//!
//! Turns a plain reducer over a keyed collection into one that layers
//! pending mutations on top of the last committed state:
//!
//! * `committed` only ever changes through confirmed results and
//!   non-optimistic actions;
//! * `view` is `committed` reduced over the pending queue, in application
//!   order;
//! * records for the same entity key leave the queue strictly FIFO, records
//!   for different keys are independent.
//!
//! The wrapper never retries. It only exposes commit, fail and revert.

use crate::model::{EntityKey, OptimisticId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Base reducer over a collection.
pub trait Reduce<A> {
    /// Applies `action` in place. Must be total: unknown keys are no-ops.
    fn reduce(&mut self, action: &A);
}

/// Collection addressable by entity key.
pub trait KeyedCollection {
    /// Whether the committed collection holds `key`.
    fn contains_key(&self, key: &str) -> bool;
}

/// Kind of tracked mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// Creates a new entity.
    Create,
    /// Updates an existing entity.
    Update,
    /// Removes an existing entity.
    Delete,
}

/// Identity of a mutation started by an `initiate` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRef {
    /// Correlation id shared by the intent and its outcome actions.
    pub id: OptimisticId,
    /// Entity the mutation applies to.
    pub key: EntityKey,
}

/// Extracts the mutation started by an action.
pub type InitiateFn<A> = fn(&A) -> Option<MutationRef>;
/// Extracts the correlation id resolved by an action.
pub type ResolveFn<A> = fn(&A) -> Option<OptimisticId>;

/// Capability descriptor for one family of optimistic actions.
pub struct Matcher<A> {
    kind: MutationKind,
    initiate: InitiateFn<A>,
    commit: Option<ResolveFn<A>>,
    fail: Option<ResolveFn<A>>,
    revert: Option<ResolveFn<A>>,
}

impl<A> Matcher<A> {
    /// Starts a descriptor for mutations of `kind` begun by `initiate`.
    pub fn new(kind: MutationKind, initiate: InitiateFn<A>) -> Self {
        Self {
            kind,
            initiate,
            commit: None,
            fail: None,
            revert: None,
        }
    }

    /// Actions that confirm the mutation with the server's value.
    pub fn commit(mut self, commit: ResolveFn<A>) -> Self {
        self.commit = Some(commit);
        self
    }

    /// Actions that mark the mutation failed but keep it visible.
    pub fn fail(mut self, fail: ResolveFn<A>) -> Self {
        self.fail = Some(fail);
        self
    }

    /// Actions that discard the mutation.
    pub fn revert(mut self, revert: ResolveFn<A>) -> Self {
        self.revert = Some(revert);
        self
    }
}

/// Construction-time validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptimisticError {
    /// No matcher supplied.
    #[error("optimistic reducer needs at least one matcher")]
    NoMatchers,
    /// A matcher has neither commit nor revert: its records would never leave
    /// the queue.
    #[error("matcher #{0} has neither commit nor revert")]
    Unresolvable(usize),
}

/// Pending mutation layered over the committed collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord<A> {
    /// Correlation id.
    pub id: OptimisticId,
    /// Mutation kind.
    pub kind: MutationKind,
    /// Entity key.
    pub key: EntityKey,
    /// Confirmed by the server, waiting for earlier records on the same key.
    pub committed: bool,
    /// Rejected by the server, waiting for a revert.
    pub failed: bool,
    /// Intent action, replaced by the confirming action on commit.
    pub action: A,
}

/// Collection state with its pending queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticState<S, A> {
    committed: S,
    view: S,
    queue: Vec<MutationRecord<A>>,
}

impl<S: Default, A> Default for OptimisticState<S, A> {
    fn default() -> Self {
        Self {
            committed: S::default(),
            view: S::default(),
            queue: Vec::new(),
        }
    }
}

impl<S: Clone, A> OptimisticState<S, A> {
    /// State with `committed` as base and nothing pending.
    pub fn with_committed(committed: S) -> Self {
        Self {
            view: committed.clone(),
            committed,
            queue: Vec::new(),
        }
    }

    /// Collection as if every pending mutation had already succeeded.
    pub fn view(&self) -> &S {
        &self.view
    }

    /// Committed values only. Pure: repeated calls return the same value.
    pub fn as_if_not_optimistic(&self) -> &S {
        &self.committed
    }

    /// Collection as if failed-but-not-reverted mutations never happened.
    pub fn as_if_not_failed(&self) -> S
    where
        S: Reduce<A>,
    {
        let mut view = self.committed.clone();
        for record in self.queue.iter().filter(|r| !r.failed) {
            view.reduce(&record.action);
        }
        view
    }

    /// Pending records in application order.
    pub fn queue(&self) -> &[MutationRecord<A>] {
        &self.queue
    }

    /// Whether nothing is pending.
    pub fn is_settled(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether `key` has an unresolved mutation.
    pub fn is_pending(&self, key: &str) -> bool {
        self.queue
            .iter()
            .any(|r| r.key == key && !r.committed && !r.failed)
    }

    /// Whether `key` has a failed mutation awaiting dismissal.
    pub fn is_failed(&self, key: &str) -> bool {
        self.queue.iter().any(|r| r.key == key && r.failed)
    }

    /// Records queued for `key`, oldest first.
    pub fn pending_for<'a>(
        &'a self,
        key: &'a str,
    ) -> impl Iterator<Item = &'a MutationRecord<A>> + 'a {
        self.queue.iter().filter(move |r| r.key == key)
    }

    /// Correlation id of the oldest failed mutation on `key`.
    pub fn failed_id(&self, key: &str) -> Option<&str> {
        self.queue
            .iter()
            .find(|r| r.key == key && r.failed)
            .map(|r| r.id.as_str())
    }

    /// Drops every pending record. Used on global sign-out.
    pub fn discard(&mut self) {
        self.queue.clear();
        self.view = self.committed.clone();
    }

    /// Copy with the queue dropped.
    pub fn settled(&self) -> Self
    where
        A: Clone,
    {
        Self::with_committed(self.committed.clone())
    }
}

enum Step {
    Initiate(MutationKind, MutationRef),
    Commit(OptimisticId),
    Fail(OptimisticId),
    Revert(OptimisticId),
}

/// Reducer wrapper parameterised by its matcher list.
pub struct OptimisticReducer<A> {
    matchers: Vec<Matcher<A>>,
}

impl<A: Clone> OptimisticReducer<A> {
    /// Validates the matcher list.
    pub fn new(matchers: Vec<Matcher<A>>) -> Result<Self, OptimisticError> {
        if matchers.is_empty() {
            return Err(OptimisticError::NoMatchers);
        }
        if let Some(idx) = matchers
            .iter()
            .position(|m| m.commit.is_none() && m.revert.is_none())
        {
            return Err(OptimisticError::Unresolvable(idx));
        }
        Ok(Self { matchers })
    }

    fn classify(&self, action: &A) -> Option<Step> {
        self.matchers.iter().find_map(|m| {
            if let Some(r) = (m.initiate)(action) {
                return Some(Step::Initiate(m.kind, r));
            }
            if let Some(id) = m.commit.and_then(|f| f(action)) {
                return Some(Step::Commit(id));
            }
            if let Some(id) = m.fail.and_then(|f| f(action)) {
                return Some(Step::Fail(id));
            }
            m.revert.and_then(|f| f(action)).map(Step::Revert)
        })
    }

    /// Applies `action` to the wrapped state.
    pub fn reduce<S>(&self, state: &mut OptimisticState<S, A>, action: &A)
    where
        S: Reduce<A> + KeyedCollection + Clone,
    {
        match self.classify(action) {
            Some(Step::Initiate(kind, mutation)) => {
                state.queue.push(MutationRecord {
                    id: mutation.id,
                    kind,
                    key: mutation.key,
                    committed: false,
                    failed: false,
                    action: action.clone(),
                });
                // The new record is last in the queue, so extending the view
                // is equivalent to replaying it.
                state.view.reduce(action);
            }
            Some(Step::Commit(id)) => {
                if let Some(record) = state.queue.iter_mut().find(|r| r.id == id) {
                    record.action = action.clone();
                    record.committed = true;
                    record.failed = false;
                    Self::fold(state);
                } else {
                    // Outcome of a mutation this context never saw.
                    state.committed.reduce(action);
                    Self::prune(state);
                }
                Self::rebuild(state);
            }
            Some(Step::Fail(id)) => {
                if let Some(record) = state.queue.iter_mut().find(|r| r.id == id) {
                    record.failed = true;
                }
            }
            Some(Step::Revert(id)) => {
                let before = state.queue.len();
                state.queue.retain(|r| r.id != id);
                if state.queue.len() != before {
                    Self::fold(state);
                    Self::rebuild(state);
                }
            }
            None => {
                state.committed.reduce(action);
                Self::prune(state);
                Self::rebuild(state);
            }
        }
    }

    /// Moves committed records into the base, in order, as long as no
    /// unresolved record for the same key precedes them.
    fn fold<S: Reduce<A>>(state: &mut OptimisticState<S, A>) {
        let mut blocked: HashSet<EntityKey> = HashSet::new();
        let mut remaining = Vec::with_capacity(state.queue.len());
        for record in state.queue.drain(..) {
            if record.committed && !blocked.contains(&record.key) {
                state.committed.reduce(&record.action);
            } else {
                blocked.insert(record.key.clone());
                remaining.push(record);
            }
        }
        state.queue = remaining;
    }

    /// Drops update/delete records whose entity left the committed base.
    fn prune<S: KeyedCollection>(state: &mut OptimisticState<S, A>) {
        let committed = &state.committed;
        state.queue.retain(|r| {
            let keep = r.kind == MutationKind::Create || committed.contains_key(&r.key);
            if !keep {
                debug!(id = %r.id, key = %r.key, "dropping mutation on removed entity");
            }
            keep
        });
    }

    fn rebuild<S: Reduce<A> + Clone>(state: &mut OptimisticState<S, A>) {
        let mut view = state.committed.clone();
        for record in &state.queue {
            view.reduce(&record.action);
        }
        state.view = view;
    }
}
