//! Reducer stage: per-session hash aggregation keyed on a tuple of
//! grouping columns, flushing on the EOF barrier (spec §4.6), generalizing
//! the original's per-query reducer subclasses
//! (`purchases_qty_by_store_id_and_user_id_reducer` and siblings) into one
//! configuration-driven stage.

use crate::dedup::DedupSet;
use crate::protocol::Record;
use crate::session::{SessionId, SessionTable};
use crate::stage::{BatchOrigin, StageLogic};
use async_trait::async_trait;
use std::sync::Mutex;

/// `(current_accumulator, record) -> new_accumulator`.
pub type ReduceFn = Box<dyn Fn(f64, &Record) -> f64 + Send + Sync>;

pub struct ReducerConfig {
    pub grouping_columns: Vec<String>,
    pub accumulator_column: String,
    pub batch_max_size: usize,
    pub reduce: ReduceFn,
}

#[derive(Default)]
struct Accumulator {
    /// Keyed on the grouping tuple (joined values, empty string per missing
    /// column) -> (grouping values, running accumulator). Records whose key
    /// columns are all empty still aggregate into the empty-tuple bucket
    /// (spec §4.6).
    by_key: indexmap::IndexMap<Vec<String>, f64>,
    dedup: DedupSet,
}

pub struct Reducer {
    output_kind: String,
    config: ReducerConfig,
    sessions: Mutex<SessionTable<Accumulator>>,
}

impl Reducer {
    pub fn new(output_kind: impl Into<String>, config: ReducerConfig) -> Self {
        Self {
            output_kind: output_kind.into(),
            config,
            sessions: Mutex::new(SessionTable::new()),
        }
    }
}

#[async_trait]
impl StageLogic for Reducer {
    fn output_kind(&self) -> &str {
        &self.output_kind
    }

    async fn handle_batch(
        &self,
        session_id: SessionId,
        origin: Option<BatchOrigin>,
        records: Vec<Record>,
    ) -> Vec<Record> {
        let mut sessions = self.sessions.lock().expect("reducer session lock poisoned");
        let entry = sessions.entry_mut(session_id);

        if let Some(origin) = origin {
            if !entry
                .payload
                .dedup
                .check(session_id, origin.producer_id, origin.message_id)
            {
                return Vec::new();
            }
        }

        for record in &records {
            let key: Vec<String> = self
                .config
                .grouping_columns
                .iter()
                .map(|col| record.get(col).unwrap_or("").to_string())
                .collect();
            let current = entry.payload.by_key.entry(key).or_insert(0.0);
            *current = (self.config.reduce)(*current, record);
        }
        Vec::new()
    }

    async fn on_session_flush(&self, session_id: SessionId) -> Vec<Vec<Record>> {
        let mut sessions = self.sessions.lock().expect("reducer session lock poisoned");
        let Some(entry) = sessions.remove(&session_id) else {
            return Vec::new();
        };

        let mut records = Vec::with_capacity(entry.payload.by_key.len());
        for (key, value) in entry.payload.by_key {
            let mut record = Record::new();
            for (col, val) in self.config.grouping_columns.iter().zip(key) {
                record.set(col.clone(), val);
            }
            record.set(self.config.accumulator_column.clone(), value.to_string());
            records.push(record);
        }

        records
            .chunks(self.config.batch_max_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }
}
