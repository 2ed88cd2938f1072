//! Per-(session, producer_id, message_id) dedup set, consulted by stateful
//! stages (reducer, sorter) before folding a batch into their accumulator.
//!
//! The wire protocol stamps every emitted batch with a fresh message id but
//! nothing on the receiving side ever inspected it, so a broker redelivery
//! after a worker crash double-counts in reducers and duplicates sorter
//! output (spec §9, "Delivery semantics ambiguity"). This closes that gap.

use crate::session::{ControllerId, MessageId, SessionId};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DedupSet {
    seen: HashSet<(SessionId, ControllerId, MessageId)>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (session, producer, message) triple. Returns `true` the
    /// first time it is seen, `false` on every redelivery.
    pub fn check(
        &mut self,
        session_id: SessionId,
        producer_id: ControllerId,
        message_id: MessageId,
    ) -> bool {
        self.seen.insert((session_id, producer_id, message_id))
    }

    /// Drop every entry for a session once its terminal flush has run.
    pub fn clear_session(&mut self, session_id: SessionId) {
        self.seen.retain(|(s, _, _)| *s != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_passes_redelivery_is_rejected() {
        let mut dedup = DedupSet::new();
        let sid = SessionId::new();
        let mid = MessageId::new();
        assert!(dedup.check(sid, 0, mid));
        assert!(!dedup.check(sid, 0, mid));
    }

    #[test]
    fn clear_session_forgets_its_entries_only() {
        let mut dedup = DedupSet::new();
        let s1 = SessionId::new();
        let s2 = SessionId::new();
        let mid = MessageId::new();
        dedup.check(s1, 0, mid);
        dedup.check(s2, 0, mid);
        dedup.clear_session(s1);
        assert!(dedup.check(s1, 0, mid));
        assert!(!dedup.check(s2, 0, mid));
    }
}
