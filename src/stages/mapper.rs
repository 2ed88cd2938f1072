//! Mapper stage: augments each record with a derived column and emits
//! (spec §4.5), generalizing the original's
//! `year_half_created_at_transactions_mapper` and
//! `year_month_created_at_transaction_items_mapper`.

use crate::protocol::Record;
use crate::session::SessionId;
use crate::stage::StageLogic;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum MapperFunction {
    /// Derive `year_half_<source>` = `"{year}-H1"` (months 1-6) or
    /// `"{year}-H2"` (months 7-12) from a `created_at`-shaped source column.
    YearHalfOf { source: String, target: String },
    /// Derive `year_month_<source>` = `"{year}-{month}"` from a
    /// `created_at`-shaped source column.
    YearMonthOf { source: String, target: String },
}

fn year_and_month(value: &str) -> Option<(&str, &str)> {
    let date = value.split(' ').next()?;
    let mut parts = date.split('-');
    let year = parts.next()?;
    let month = parts.next()?;
    Some((year, month))
}

impl MapperFunction {
    fn apply(&self, record: &mut Record) {
        match self {
            MapperFunction::YearHalfOf { source, target } => {
                if let Some(value) = record.get(source) {
                    if let Some((year, month)) = year_and_month(value) {
                        let half = if month.parse::<u32>().unwrap_or(1) <= 6 { 1 } else { 2 };
                        record.set(target.clone(), format!("{year}-H{half}"));
                    }
                }
            }
            MapperFunction::YearMonthOf { source, target } => {
                if let Some(value) = record.get(source) {
                    if let Some((year, month)) = year_and_month(value) {
                        record.set(target.clone(), format!("{year}-{month}"));
                    }
                }
            }
        }
    }
}

pub struct Mapper {
    output_kind: String,
    function: MapperFunction,
}

impl Mapper {
    pub fn new(output_kind: impl Into<String>, function: MapperFunction) -> Self {
        Self {
            output_kind: output_kind.into(),
            function,
        }
    }
}

#[async_trait]
impl StageLogic for Mapper {
    fn output_kind(&self) -> &str {
        &self.output_kind
    }

    async fn handle_batch(
        &self,
        _session_id: SessionId,
        _origin: Option<crate::stage::BatchOrigin>,
        mut records: Vec<Record>,
    ) -> Vec<Record> {
        for record in &mut records {
            self.function.apply(record);
        }
        records
    }

    async fn on_session_flush(&self, _session_id: SessionId) -> Vec<Vec<Record>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn derives_year_half_from_created_at() {
        let mapper = Mapper::new(
            "TRN",
            MapperFunction::YearHalfOf {
                source: "created_at".into(),
                target: "year_half_created_at".into(),
            },
        );
        let mut r1 = Record::new();
        r1.set("created_at", "2024-03-10 00:00:00");
        let mut r2 = Record::new();
        r2.set("created_at", "2024-09-10 00:00:00");

        let out = mapper.handle_batch(SessionId::new(), None, vec![r1, r2]).await;
        assert_eq!(out[0].get("year_half_created_at"), Some("2024-H1"));
        assert_eq!(out[1].get("year_half_created_at"), Some("2024-H2"));
    }

    #[tokio::test]
    async fn derives_year_month_from_created_at() {
        let mapper = Mapper::new(
            "TIT",
            MapperFunction::YearMonthOf {
                source: "created_at".into(),
                target: "year_month_created_at".into(),
            },
        );
        let mut r = Record::new();
        r.set("created_at", "2024-07-15 08:00:00");
        let out = mapper.handle_batch(SessionId::new(), None, vec![r]).await;
        assert_eq!(out[0].get("year_month_created_at"), Some("2024-07"));
    }
}
