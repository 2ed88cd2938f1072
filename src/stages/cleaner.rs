//! Cleaner stage: projects each record down to a stage-declared column
//! subset and emits the reduced batch (spec §4.5), generalizing the
//! original's `*_cleaner` controllers into one configuration-driven stage.

use crate::protocol::Record;
use crate::session::SessionId;
use crate::stage::StageLogic;
use async_trait::async_trait;

pub struct Cleaner {
    output_kind: String,
    columns: Vec<String>,
}

impl Cleaner {
    pub fn new(output_kind: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            output_kind: output_kind.into(),
            columns,
        }
    }
}

#[async_trait]
impl StageLogic for Cleaner {
    fn output_kind(&self) -> &str {
        &self.output_kind
    }

    async fn handle_batch(
        &self,
        _session_id: SessionId,
        _origin: Option<crate::stage::BatchOrigin>,
        records: Vec<Record>,
    ) -> Vec<Record> {
        let columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        records.into_iter().map(|r| r.project(&columns)).collect()
    }

    async fn on_session_flush(&self, _session_id: SessionId) -> Vec<Vec<Record>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn projects_to_declared_columns_in_order() {
        let cleaner = Cleaner::new(
            "TRN",
            vec![
                "created_at".into(),
                "store_id".into(),
                "final_amount".into(),
                "transaction_id".into(),
                "user_id".into(),
            ],
        );
        let mut r = Record::new();
        r.set("user_id", "1");
        r.set("extra_column", "drop-me");
        r.set("store_id", "9");
        r.set("created_at", "2024-01-01 00:00:00");
        r.set("final_amount", "12.5");
        r.set("transaction_id", "t1");

        let out = cleaner.handle_batch(SessionId::new(), None, vec![r]).await;
        let cols: Vec<&str> = out[0].iter().map(|(k, _)| k).collect();
        assert_eq!(
            cols,
            vec!["created_at", "store_id", "final_amount", "transaction_id", "user_id"]
        );
    }
}
