//! Filter stage: drops records failing a predicate, emits only survivors.
//! An empty outbound batch is never emitted (spec §4.5).
//!
//! Predicates are grounded in `original_source`'s
//! `filter_transactions_by_year` / `_by_hour` / `_by_final_amount`,
//! generalized into configuration-driven variants rather than one struct
//! per query.

use crate::protocol::Record;
use crate::session::SessionId;
use crate::stage::StageLogic;
use async_trait::async_trait;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub enum FilterPredicate {
    /// Keep rows whose `column` (a `created_at`-shaped `YYYY-MM-DD HH:MM:SS`
    /// value) falls in one of `years`.
    YearMembership { column: String, years: HashSet<i32> },
    /// Keep rows whose `column`'s hour-of-day is in `[min_hour, max_hour)`,
    /// matching the original's half-open comparison exactly.
    HourRange {
        column: String,
        min_hour: u32,
        max_hour: u32,
    },
    /// Keep rows whose numeric `column` is `>= min_amount`.
    MinFinalAmount { column: String, min_amount: f64 },
}

fn date_part(value: &str) -> Option<&str> {
    value.split(' ').next()
}

fn time_part(value: &str) -> Option<&str> {
    value.split(' ').nth(1)
}

impl FilterPredicate {
    fn keep(&self, record: &Record) -> bool {
        match self {
            FilterPredicate::YearMembership { column, years } => record
                .get(column)
                .and_then(date_part)
                .and_then(|date| date.split('-').next())
                .and_then(|y| y.parse::<i32>().ok())
                .map(|year| years.contains(&year))
                .unwrap_or(false),
            FilterPredicate::HourRange {
                column,
                min_hour,
                max_hour,
            } => record
                .get(column)
                .and_then(time_part)
                .and_then(|time| time.split(':').next())
                .and_then(|h| h.parse::<u32>().ok())
                .map(|hour| *min_hour <= hour && hour < *max_hour)
                .unwrap_or(false),
            FilterPredicate::MinFinalAmount { column, min_amount } => record
                .get(column)
                .and_then(|v| v.parse::<f64>().ok())
                .map(|amount| amount >= *min_amount)
                .unwrap_or(false),
        }
    }
}

pub struct Filter {
    output_kind: String,
    predicate: FilterPredicate,
}

impl Filter {
    pub fn new(output_kind: impl Into<String>, predicate: FilterPredicate) -> Self {
        Self {
            output_kind: output_kind.into(),
            predicate,
        }
    }
}

#[async_trait]
impl StageLogic for Filter {
    fn output_kind(&self) -> &str {
        &self.output_kind
    }

    async fn handle_batch(
        &self,
        _session_id: SessionId,
        _origin: Option<crate::stage::BatchOrigin>,
        records: Vec<Record>,
    ) -> Vec<Record> {
        records
            .into_iter()
            .filter(|record| self.predicate.keep(record))
            .collect()
    }

    async fn on_session_flush(&self, _session_id: SessionId) -> Vec<Vec<Record>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(created_at: &str) -> Record {
        let mut r = Record::new();
        r.set("created_at", created_at);
        r
    }

    #[tokio::test]
    async fn year_membership_keeps_only_configured_years() {
        let filter = Filter::new(
            "TRN",
            FilterPredicate::YearMembership {
                column: "created_at".into(),
                years: [2024, 2025].into_iter().collect(),
            },
        );
        let records = vec![
            txn("2023-05-01 10:00:00"),
            txn("2024-05-01 10:00:00"),
            txn("2025-05-01 10:00:00"),
        ];
        let kept = filter.handle_batch(SessionId::new(), None, records).await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn hour_range_is_half_open() {
        let filter = Filter::new(
            "TRN",
            FilterPredicate::HourRange {
                column: "created_at".into(),
                min_hour: 9,
                max_hour: 17,
            },
        );
        let records = vec![
            txn("2024-01-01 08:59:00"),
            txn("2024-01-01 09:00:00"),
            txn("2024-01-01 16:59:00"),
            txn("2024-01-01 17:00:00"),
        ];
        let kept = filter.handle_batch(SessionId::new(), None, records).await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn empty_outbound_batch_is_empty_vec_not_emitted_by_caller() {
        let filter = Filter::new(
            "TRN",
            FilterPredicate::MinFinalAmount {
                column: "final_amount".into(),
                min_amount: 100.0,
            },
        );
        let mut r = Record::new();
        r.set("final_amount", "1.0");
        let kept = filter.handle_batch(SessionId::new(), None, vec![r]).await;
        assert!(kept.is_empty());
    }
}
