use super::id::SessionId;
use std::collections::HashMap;

/// Per-session lifecycle, shared by every stage (spec §4.10).
///
/// `CREATED -> RECEIVING` on first frame for the session,
/// `RECEIVING -> FLUSHING` when `eof_count == prev_controllers_amount`,
/// `FLUSHING -> DROPPED` after the flush callback returns and downstream
/// EOFs are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Receiving,
    Flushing,
    Dropped,
}

/// One stage's state for one session: its lifecycle phase, its EOF tally, and
/// whatever stage-specific payload it carries (reducer accumulator, sorter
/// heaps, joiner base table...).
#[derive(Debug)]
pub struct SessionEntry<T> {
    pub phase: SessionPhase,
    pub eof_count: usize,
    pub payload: T,
}

impl<T: Default> SessionEntry<T> {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Created,
            eof_count: 0,
            payload: T::default(),
        }
    }
}

/// Session state created lazily on first reference, destroyed exactly once
/// when the session's terminal EOF has been forwarded (spec §3 invariants).
#[derive(Debug, Default)]
pub struct SessionTable<T> {
    entries: HashMap<SessionId, SessionEntry<T>>,
}

impl<T: Default> SessionTable<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Get the session's entry, creating it (phase `Created` -> `Receiving`)
    /// if this is the first frame seen for it.
    pub fn entry_mut(&mut self, session_id: SessionId) -> &mut SessionEntry<T> {
        let entry = self.entries.entry(session_id).or_insert_with(SessionEntry::new);
        if entry.phase == SessionPhase::Created {
            entry.phase = SessionPhase::Receiving;
        }
        entry
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SessionEntry<T>> {
        self.entries.get(session_id)
    }

    /// Record one EOF from an upstream worker. Returns `true` exactly once,
    /// the moment the barrier fires (`eof_count == prev_controllers_amount`),
    /// transitioning the session to `Flushing`.
    pub fn record_eof(&mut self, session_id: SessionId, prev_controllers_amount: usize) -> bool {
        let entry = self.entry_mut(session_id);
        entry.eof_count += 1;
        if entry.eof_count == prev_controllers_amount {
            entry.phase = SessionPhase::Flushing;
            true
        } else {
            false
        }
    }

    /// Drop a session's state. Call after the flush callback has emitted any
    /// terminal data and downstream EOFs have been broadcast.
    pub fn remove(&mut self, session_id: &SessionId) -> Option<SessionEntry<T>> {
        self.entries.remove(session_id).map(|mut e| {
            e.phase = SessionPhase::Dropped;
            e
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
