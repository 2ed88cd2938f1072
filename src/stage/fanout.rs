//! Fan-out policies a stage picks among for its producer endpoints
//! (spec §4.4), plus the deterministic sharding functions they rely on.

use crate::protocol::Record;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub enum FanoutPolicy {
    RoundRobin,
    KeySharded { column: String },
    Broadcast,
}

/// One addressable downstream group: a flat list of broker endpoint names
/// plus the policy used to spread records across them. A stage with
/// heterogeneous producer groups (spec §4.4) holds several of these, one
/// per downstream subgraph, and emits every outbound batch to each group
/// independently.
pub struct ProducerGroup {
    pub endpoints: Vec<String>,
    pub policy: FanoutPolicy,
    round_robin_cursor: AtomicUsize,
}

impl ProducerGroup {
    pub fn new(endpoints: Vec<String>, policy: FanoutPolicy) -> Self {
        Self {
            endpoints,
            policy,
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    /// Split `records` across this group's endpoints per its policy.
    /// Returns `(endpoint, records)` pairs; buckets that end up empty under
    /// key-sharding are omitted so no empty batch is ever sent.
    pub fn route(&self, records: Vec<Record>) -> Vec<(String, Vec<Record>)> {
        if self.endpoints.is_empty() || records.is_empty() {
            return Vec::new();
        }
        match &self.policy {
            FanoutPolicy::Broadcast => self
                .endpoints
                .iter()
                .map(|e| (e.clone(), records.clone()))
                .collect(),
            FanoutPolicy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed)
                    % self.endpoints.len();
                vec![(self.endpoints[idx].clone(), records)]
            }
            FanoutPolicy::KeySharded { column } => {
                let n = self.endpoints.len();
                let mut buckets: Vec<Vec<Record>> = (0..n).map(|_| Vec::new()).collect();
                for record in records {
                    let value = record.get(column).unwrap_or("");
                    let bucket = shard_bucket(value, n);
                    buckets[bucket].push(record);
                }
                buckets
                    .into_iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(i, v)| (self.endpoints[i].clone(), v))
                    .collect()
            }
        }
    }
}

/// Deterministic polynomial hash over a text value: `h := 0; h := h*31 + ord(c)`.
pub fn text_hash_bucket(value: &str, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut h: u64 = 0;
    for c in value.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as u64);
    }
    (h % n as u64) as usize
}

/// Shard a value into `[0, n)` per spec §4.4: empty value -> bucket 0;
/// integer-valued columns use `value mod n`; everything else uses the
/// text polynomial hash.
pub fn shard_bucket(value: &str, n: usize) -> usize {
    if n == 0 || value.is_empty() {
        return 0;
    }
    if let Ok(i) = value.parse::<i64>() {
        return i.rem_euclid(n as i64) as usize;
    }
    text_hash_bucket(value, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_routes_to_bucket_zero() {
        assert_eq!(shard_bucket("", 4), 0);
    }

    #[test]
    fn integer_column_uses_value_mod_n() {
        assert_eq!(shard_bucket("7", 4), 3);
        assert_eq!(shard_bucket("8", 4), 0);
    }

    #[test]
    fn text_sharding_is_deterministic_across_calls() {
        let a = shard_bucket("2024-07", 4);
        let b = shard_bucket("2024-07", 4);
        assert_eq!(a, b);
    }

    #[test]
    fn key_sharded_routing_never_emits_an_empty_bucket() {
        let group = ProducerGroup::new(
            vec!["q.0".into(), "q.1".into(), "q.2".into()],
            FanoutPolicy::KeySharded {
                column: "store_id".into(),
            },
        );
        let mut r1 = Record::new();
        r1.set("store_id", "1");
        let routed = group.route(vec![r1]);
        assert_eq!(routed.len(), 1);
    }

    #[test]
    fn round_robin_advances_across_calls() {
        let group = ProducerGroup::new(
            vec!["q.0".into(), "q.1".into()],
            FanoutPolicy::RoundRobin,
        );
        let mut r = Record::new();
        r.set("a", "1");
        let (first, _) = group.route(vec![r.clone()]).remove(0);
        let (second, _) = group.route(vec![r]).remove(0);
        assert_ne!(first, second);
    }
}
