//! # Pending Query Store
//!
//! Tracks in-flight queries keyed by `(channel, sequence)`.
//!
//! Every mutation of one entry happens under that entry's shard lock, so the
//! submit path, the result path and the sweeper never observe a torn entry,
//! while different ids proceed in parallel. Terminal entries move to the
//! finalized table (lock order: pending, then finalized) and are removed
//! from the pending table.

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tracing::{debug, error};

use crate::domain::{
    ChannelId, InterchainQueryError, PendingEntry, QueryId, QueryRecord, QueryResult, QueryState,
};

/// Concurrent store of pending and finalized queries.
#[derive(Debug, Default)]
pub struct PendingQueryStore {
    /// In-flight entries.
    pending: DashMap<QueryId, PendingEntry>,
    /// Terminal records, kept for idempotence and lookups.
    finalized: DashMap<QueryId, QueryRecord>,
}

impl PendingQueryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly dispatched entry.
    pub fn put(&self, entry: PendingEntry) -> Result<PendingEntry, InterchainQueryError> {
        let id = entry.id().clone();
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => Err(InterchainQueryError::DuplicateRequest(id)),
            Entry::Vacant(slot) => {
                // Finalized ids are checked under the slot lock so a
                // concurrent finalization cannot slip between the two checks.
                if self.finalized.contains_key(&id) {
                    return Err(InterchainQueryError::DuplicateRequest(id));
                }
                debug!(query_id = %id, deadline_ms = entry.deadline_ms, "Pending entry stored");
                Ok(slot.insert(entry).value().clone())
            }
        }
    }

    /// Snapshot of an in-flight entry.
    pub fn get(&self, id: &QueryId) -> Option<PendingEntry> {
        self.pending
            .get(id)
            .filter(|entry| !entry.state.is_terminal())
            .map(|entry| entry.value().clone())
    }

    /// Is the id known, in flight or finalized?
    pub fn contains(&self, id: &QueryId) -> bool {
        self.pending.contains_key(id) || self.finalized.contains_key(id)
    }

    /// Move an entry to a new state.
    pub fn transition(
        &self,
        id: &QueryId,
        to: QueryState,
    ) -> Result<PendingEntry, InterchainQueryError> {
        self.apply(id, to, None, |_| {})
    }

    /// Mark an entry verified, recording its result.
    pub fn verify(
        &self,
        id: &QueryId,
        result: QueryResult,
    ) -> Result<PendingEntry, InterchainQueryError> {
        self.apply(id, QueryState::Verified, Some(result), |_| {})
    }

    /// Mark an entry failed with a reason.
    pub fn fail(
        &self,
        id: &QueryId,
        reason: InterchainQueryError,
    ) -> Result<PendingEntry, InterchainQueryError> {
        self.apply(id, QueryState::Failed, None, |entry| {
            entry.last_error = Some(reason);
        })
    }

    /// Count a failed send. Returns retries consumed so far.
    pub fn record_retry(
        &self,
        id: &QueryId,
        reason: InterchainQueryError,
    ) -> Result<u32, InterchainQueryError> {
        self.count_retry(id, reason, |entry| entry.retries)
    }

    /// Count a rejected result. Returns rejections so far.
    pub fn record_rejection(
        &self,
        id: &QueryId,
        reason: InterchainQueryError,
    ) -> Result<u32, InterchainQueryError> {
        self.count_retry(id, reason, |entry| {
            entry.proof_retries += 1;
            entry.proof_retries
        })
    }

    fn count_retry(
        &self,
        id: &QueryId,
        reason: InterchainQueryError,
        bump: impl FnOnce(&mut PendingEntry) -> u32,
    ) -> Result<u32, InterchainQueryError> {
        let mut entry = self
            .pending
            .get_mut(id)
            .filter(|entry| !entry.state.is_terminal())
            .ok_or_else(|| InterchainQueryError::UnknownRequest(id.clone()))?;
        entry.retries += 1;
        entry.last_error = Some(reason);
        Ok(bump(entry.value_mut()))
    }

    /// Expire and remove every in-flight entry whose deadline passed.
    pub fn sweep_expired(&self, now_ms: u64) -> Vec<PendingEntry> {
        let overdue: Vec<QueryId> = self
            .pending
            .iter()
            .filter(|entry| entry.is_expired(now_ms))
            .map(|entry| entry.key().clone())
            .collect();

        overdue
            .into_iter()
            .filter_map(|id| self.expire(&id, now_ms))
            .collect()
    }

    /// Expire one entry if its deadline passed, re-checked under its lock.
    pub fn expire(&self, id: &QueryId, now_ms: u64) -> Option<PendingEntry> {
        let entry = self.pending.get_mut(id)?;
        if !entry.is_expired(now_ms) {
            return None;
        }
        Some(self.finish(id, entry, QueryState::Expired, None))
    }

    /// Fail every in-flight entry of a channel.
    pub fn drain_channel(
        &self,
        channel: &ChannelId,
        reason: &InterchainQueryError,
    ) -> Vec<PendingEntry> {
        let ids: Vec<QueryId> = self
            .pending
            .iter()
            .filter(|entry| &entry.key().channel == channel)
            .map(|entry| entry.key().clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.fail(&id, reason.clone()).ok())
            .collect()
    }

    /// Terminal record of a query.
    pub fn finalized(&self, id: &QueryId) -> Option<QueryRecord> {
        self.finalized.get(id).map(|record| record.value().clone())
    }

    /// Terminal record, or a snapshot of the entry while still in flight.
    pub fn record(&self, id: &QueryId) -> Option<QueryRecord> {
        if let Some(entry) = self.get(id) {
            return Some(QueryRecord {
                request: entry.request,
                state: entry.state,
                retries: entry.retries,
                proof_retries: entry.proof_retries,
                result: None,
            });
        }
        self.finalized(id)
    }

    /// In-flight entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// No entries in flight?
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Finalized records.
    pub fn finalized_len(&self) -> usize {
        self.finalized.len()
    }

    fn apply(
        &self,
        id: &QueryId,
        to: QueryState,
        result: Option<QueryResult>,
        update: impl FnOnce(&mut PendingEntry),
    ) -> Result<PendingEntry, InterchainQueryError> {
        let Some(mut entry) = self.pending.get_mut(id) else {
            return Err(self.missing(id, to));
        };
        let from = entry.state;
        if !from.can_transition_to(to) {
            return Err(InterchainQueryError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            });
        }
        update(entry.value_mut());

        if to.is_terminal() {
            return Ok(self.finish(id, entry, to, result));
        }
        entry.state = to;
        debug!(query_id = %id, ?from, ?to, "Pending entry transitioned");
        Ok(entry.value().clone())
    }

    /// Record a terminal state, then drop the entry from the pending table.
    fn finish(
        &self,
        id: &QueryId,
        mut entry: RefMut<'_, QueryId, PendingEntry>,
        to: QueryState,
        result: Option<QueryResult>,
    ) -> PendingEntry {
        entry.state = to;
        let snapshot = entry.value().clone();
        self.finalized.insert(
            id.clone(),
            QueryRecord {
                request: snapshot.request.clone(),
                state: to,
                retries: snapshot.retries,
                proof_retries: snapshot.proof_retries,
                result,
            },
        );
        drop(entry);

        if self
            .pending
            .remove_if(id, |_, entry| entry.state.is_terminal())
            .is_none()
        {
            error!(query_id = %id, "Finalized entry vanished from pending table");
        }
        debug!(query_id = %id, state = ?to, "Pending entry finalized");
        snapshot
    }

    fn missing(&self, id: &QueryId, to: QueryState) -> InterchainQueryError {
        match self.finalized.get(id) {
            Some(record) => InterchainQueryError::InvalidTransition {
                id: id.clone(),
                from: record.state,
                to,
            },
            None => InterchainQueryError::UnknownRequest(id.clone()),
        }
    }
}
