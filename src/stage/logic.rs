//! `StageLogic`: the hook trait every concrete stage (cleaner, filter,
//! mapper, reducer, sorter) implements; `StageRuntime` is the generic
//! shell that drives it (spec §4.4).

use crate::protocol::Record;
use crate::session::{ControllerId, MessageId, SessionId};
use async_trait::async_trait;

/// Identifies one inbound batch for dedup purposes: every internal batch is
/// stamped with a producer id and a fresh message id at the point it was
/// emitted (spec §3, §9).
#[derive(Debug, Clone, Copy)]
pub struct BatchOrigin {
    pub producer_id: ControllerId,
    pub message_id: MessageId,
}

#[async_trait]
pub trait StageLogic: Send + Sync {
    /// Kind tag stamped on every batch this stage emits.
    fn output_kind(&self) -> &str;

    /// Transform one inbound batch's records for one session. An empty
    /// return means "drop this batch" — the runtime never emits an empty
    /// outbound batch (spec §4.5, Filter). `origin` is `None` only for
    /// frames that reached the wire without full metadata arity, which
    /// does not happen once a batch has passed the session router.
    async fn handle_batch(
        &self,
        session_id: SessionId,
        origin: Option<BatchOrigin>,
        records: Vec<Record>,
    ) -> Vec<Record>;

    /// Called once, synchronously, the moment the EOF barrier fires for a
    /// session (`eof_count == prev_controllers_amount`), before the
    /// runtime broadcasts downstream EOFs and drops the session. Returns
    /// zero or more terminal batches (already chunked to the stage's own
    /// `batch_max_size`) to emit first.
    async fn on_session_flush(&self, session_id: SessionId) -> Vec<Vec<Record>>;
}
