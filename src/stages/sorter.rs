//! Sorter stage: within each session, partitions records into groups and
//! keeps the top `amount_per_group` under `(primary DESC, secondary DESC)`
//! per group, flushing on the EOF barrier (spec §4.7). Grounded in
//! `original_source`'s `controllers/sorters/shared/sorter.py`
//! (`_add_batch_item_keeping_sort_desc`, `_take_next_batch`).

use crate::dedup::DedupSet;
use crate::protocol::Record;
use crate::session::{SessionId, SessionTable};
use crate::stage::{BatchOrigin, StageLogic};
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;

pub struct SorterConfig {
    pub grouping_column: String,
    pub primary_key: String,
    pub secondary_key: String,
    pub amount_per_group: usize,
    pub batch_max_size: usize,
}

/// Compares two field values: as floating-point when both parse as
/// numbers, otherwise lexicographically (spec §4.7).
fn field_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[derive(Clone)]
struct HeapItem {
    record: Record,
    primary: String,
    secondary: String,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    /// Larger means "ranks higher" under `(primary DESC, secondary DESC)`.
    fn cmp(&self, other: &Self) -> Ordering {
        field_cmp(&self.primary, &other.primary)
            .then_with(|| field_cmp(&self.secondary, &other.secondary))
    }
}

/// Bounded top-K heap for one group: eviction pops the element that ranks
/// lowest, giving O(log K) per insertion (spec §4.7).
struct GroupHeap {
    heap: BinaryHeap<Reverse<HeapItem>>,
    capacity: usize,
}

impl GroupHeap {
    fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
        }
    }

    fn insert(&mut self, item: HeapItem) {
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(item));
            return;
        }
        if let Some(Reverse(worst)) = self.heap.peek() {
            if item.cmp(worst) == Ordering::Greater {
                self.heap.pop();
                self.heap.push(Reverse(item));
            }
        }
    }

    fn into_sorted_desc(self) -> Vec<Record> {
        let mut items: Vec<HeapItem> = self.heap.into_iter().map(|Reverse(i)| i).collect();
        items.sort_by(|a, b| b.cmp(a));
        items.into_iter().map(|i| i.record).collect()
    }
}

#[derive(Default)]
struct SorterState {
    groups: HashMap<String, GroupHeap>,
    dedup: DedupSet,
}

pub struct Sorter {
    output_kind: String,
    config: SorterConfig,
    sessions: Mutex<SessionTable<SorterState>>,
}

impl Sorter {
    pub fn new(output_kind: impl Into<String>, config: SorterConfig) -> Self {
        Self {
            output_kind: output_kind.into(),
            config,
            sessions: Mutex::new(SessionTable::new()),
        }
    }
}

#[async_trait]
impl StageLogic for Sorter {
    fn output_kind(&self) -> &str {
        &self.output_kind
    }

    async fn handle_batch(
        &self,
        session_id: SessionId,
        origin: Option<BatchOrigin>,
        records: Vec<Record>,
    ) -> Vec<Record> {
        let mut sessions = self.sessions.lock().expect("sorter session lock poisoned");
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

        for record in records {
            let group_value = record.get(&self.config.grouping_column).unwrap_or("").to_string();
            let primary = record.get(&self.config.primary_key).unwrap_or("").to_string();
            let secondary = record.get(&self.config.secondary_key).unwrap_or("").to_string();
            let heap = entry
                .payload
                .groups
                .entry(group_value)
                .or_insert_with(|| GroupHeap::new(self.config.amount_per_group));
            heap.insert(HeapItem {
                record,
                primary,
                secondary,
            });
        }
        Vec::new()
    }

    async fn on_session_flush(&self, session_id: SessionId) -> Vec<Vec<Record>> {
        let mut sessions = self.sessions.lock().expect("sorter session lock poisoned");
        let Some(entry) = sessions.remove(&session_id) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for (_group, heap) in entry.payload.groups {
            records.extend(heap.into_sorted_desc());
        }

        records
            .chunks(self.config.batch_max_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(store: &str, qty: &str) -> Record {
        let mut r = Record::new();
        r.set("store_id", store);
        r.set("qty", qty);
        r
    }

    #[tokio::test]
    async fn top_k_per_group_s3() {
        let sorter = Sorter::new(
            "Q3X",
            SorterConfig {
                grouping_column: "store_id".into(),
                primary_key: "qty".into(),
                secondary_key: "qty".into(),
                amount_per_group: 2,
                batch_max_size: 100,
            },
        );
        let session_id = SessionId::new();
        sorter
            .handle_batch(
                session_id,
                None,
                vec![row("A", "3"), row("A", "9"), row("A", "1"), row("B", "4")],
            )
            .await;

        let flushed = sorter.on_session_flush(session_id).await;
        let records: Vec<&Record> = flushed.iter().flatten().collect();
        let a_values: Vec<&str> = records
            .iter()
            .filter(|r| r.get("store_id") == Some("A"))
            .map(|r| r.get("qty").unwrap())
            .collect();
        assert_eq!(a_values, vec!["9", "3"]);
        let b_values: Vec<&str> = records
            .iter()
            .filter(|r| r.get("store_id") == Some("B"))
            .map(|r| r.get("qty").unwrap())
            .collect();
        assert_eq!(b_values, vec!["4"]);
    }

    #[tokio::test]
    async fn fewer_than_k_emits_all_in_order() {
        let sorter = Sorter::new(
            "Q3X",
            SorterConfig {
                grouping_column: "store_id".into(),
                primary_key: "qty".into(),
                secondary_key: "qty".into(),
                amount_per_group: 5,
                batch_max_size: 100,
            },
        );
        let session_id = SessionId::new();
        sorter
            .handle_batch(session_id, None, vec![row("A", "1"), row("A", "2")])
            .await;
        let flushed = sorter.on_session_flush(session_id).await;
        let records: Vec<&Record> = flushed.iter().flatten().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("qty"), Some("2"));
    }
}
