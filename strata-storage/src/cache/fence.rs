//! Invalidation tracking for fills that await a source.
//!
//! A fill (a read-through fetch or a background refresh) takes a
//! [`FillTicket`] before it awaits its source. Deletes and clears that run
//! while any ticket is outstanding are recorded with a sequence number. When
//! the fill comes back, [`InvalidationLog::is_current`] says whether its key
//! was invalidated after the ticket was taken; if so the fetched value
//! predates a write and must not be cached.
//!
//! Records are only kept while tickets are outstanding, and are pruned as
//! the oldest ticket settles.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LogState {
    sequence: u64,
    /// Ticket sequence -> number of tickets holding it
    outstanding: BTreeMap<u64, usize>,
    keys: HashMap<String, u64>,
    prefixes: Vec<(String, u64)>,
}

impl LogState {
    fn invalidated_after(&self, key: &str, ticket: u64) -> bool {
        if self.keys.get(key).is_some_and(|&seq| seq > ticket) {
            return true;
        }
        self.prefixes
            .iter()
            .any(|(prefix, seq)| *seq > ticket && key.starts_with(prefix.as_str()))
    }

    fn prune(&mut self) {
        match self.outstanding.keys().next().copied() {
            None => {
                self.keys.clear();
                self.prefixes.clear();
            }
            Some(oldest) => {
                self.keys.retain(|_, seq| *seq > oldest);
                self.prefixes.retain(|(_, seq)| *seq > oldest);
            }
        }
    }
}

/// Shared record of invalidations that overlap in-flight fills.
#[derive(Debug, Clone, Default)]
pub struct InvalidationLog {
    state: Arc<Mutex<LogState>>,
}

/// Held by a fill from before it awaits its source until it has stored (or
/// dropped) the result.
#[derive(Debug)]
pub struct FillTicket {
    log: InvalidationLog,
    sequence: u64,
}

impl FillTicket {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for FillTicket {
    fn drop(&mut self) {
        let mut state = self.log.lock();
        if let Some(count) = state.outstanding.get_mut(&self.sequence) {
            *count -= 1;
            if *count == 0 {
                state.outstanding.remove(&self.sequence);
            }
        }
        state.prune();
    }
}

impl InvalidationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> FillTicket {
        let mut state = self.lock();
        let sequence = state.sequence;
        *state.outstanding.entry(sequence).or_insert(0) += 1;
        FillTicket {
            log: self.clone(),
            sequence,
        }
    }

    /// Record that `key` was invalidated. A no-op while no fill is in flight.
    pub fn invalidate_key(&self, key: &str) {
        let mut state = self.lock();
        if state.outstanding.is_empty() {
            return;
        }
        state.sequence += 1;
        let sequence = state.sequence;
        state.keys.insert(key.to_string(), sequence);
    }

    /// Record that every key starting with `prefix` was invalidated.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut state = self.lock();
        if state.outstanding.is_empty() {
            return;
        }
        state.sequence += 1;
        let sequence = state.sequence;
        state.prefixes.retain(|(existing, _)| existing != prefix);
        state.prefixes.push((prefix.to_string(), sequence));
    }

    /// Whether `key` has not been invalidated since `ticket` was taken.
    pub fn is_current(&self, key: &str, ticket: &FillTicket) -> bool {
        !self.lock().invalidated_after(key, ticket.sequence)
    }

    /// Run `store` only if `key` is still current for `ticket`, holding the
    /// log locked so no invalidation can interleave. Returns whether it ran.
    pub fn store_if_current<R>(
        &self,
        key: &str,
        ticket: &FillTicket,
        store: impl FnOnce() -> R,
    ) -> Option<R> {
        let state = self.lock();
        if state.invalidated_after(key, ticket.sequence) {
            return None;
        }
        let out = store();
        drop(state);
        Some(out)
    }

    /// Tickets currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.values().sum()
    }

    /// Invalidation records currently held.
    pub fn recorded(&self) -> usize {
        let state = self.lock();
        state.keys.len() + state.prefixes.len()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
