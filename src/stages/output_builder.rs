//! Output builder stage: projects to a query's published column set, tags
//! the batch with its query-result kind, and writes to a per-session egress
//! queue the session router reads back to the client (spec §4.9).
//!
//! Like the joiner, this stage does not fit `StageRuntime`'s shape: its
//! downstream is not a fixed set of producer endpoints but one queue per
//! session, created lazily on first batch and closed on flush (spec §4.9,
//! "Per-session egress"). It owns its own run loop against `BrokerAdapter`
//! directly, the same departure `Joiner` already makes in `joiner.rs`.

use crate::broker::BrokerAdapter;
use crate::error::PipelineError;
use crate::protocol::constants::QRS_PREFIX;
use crate::protocol::{BatchFrame, EofFrame, Frame, Record};
use crate::session::{ControllerId, MessageId, SessionId};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub struct OutputBuilderConfig {
    /// The query-result tag this builder stamps onto every emitted batch
    /// (e.g. `Q21`).
    pub result_kind: String,
    /// Published column set, in emission order.
    pub columns: Vec<String>,
}

pub struct OutputBuilder {
    controller_id: ControllerId,
    broker: Arc<dyn BrokerAdapter>,
    consumer_endpoint: String,
    prev_controllers_amount: usize,
    config: OutputBuilderConfig,
    eof_counts: Mutex<HashMap<SessionId, usize>>,
}

impl OutputBuilder {
    pub fn new(
        controller_id: ControllerId,
        broker: Arc<dyn BrokerAdapter>,
        consumer_endpoint: impl Into<String>,
        prev_controllers_amount: usize,
        config: OutputBuilderConfig,
    ) -> Self {
        Self {
            controller_id,
            broker,
            consumer_endpoint: consumer_endpoint.into(),
            prev_controllers_amount,
            config,
            eof_counts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self) -> Result<(), PipelineError> {
        let mut subscriber = self.broker.start_consuming(&self.consumer_endpoint);
        while let Some(bytes) = subscriber.recv().await {
            if let Err(err) = self.handle_message(&bytes).await {
                warn!(controller_id = self.controller_id, error = %err, "dropping malformed frame");
            }
        }
        self.broker.stop_consuming(&self.consumer_endpoint);
        Ok(())
    }

    async fn handle_message(&self, bytes: &[u8]) -> Result<(), PipelineError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| PipelineError::MalformedFrame("non-utf8 bytes on wire".into()))?;
        match Frame::decode(text)? {
            Frame::Batch(batch) => self.handle_batch(batch).await,
            Frame::Eof(eof) => self.handle_eof(eof).await,
            Frame::Handshake { .. } => Ok(()),
        }
    }

    async fn handle_batch(&self, batch: BatchFrame) -> Result<(), PipelineError> {
        let projected = self.project(batch.records);
        if projected.is_empty() {
            return Ok(());
        }
        self.emit(batch.session_id, projected).await
    }

    /// EOF barrier, same rule every stage uses: fire once
    /// `eof_count == prev_controllers_amount`, then forget the session.
    async fn handle_eof(&self, eof: EofFrame) -> Result<(), PipelineError> {
        let fires = {
            let mut counts = self.eof_counts.lock().expect("output builder lock poisoned");
            let count = counts.entry(eof.session_id).or_insert(0);
            *count += 1;
            *count == self.prev_controllers_amount
        };
        if !fires {
            return Ok(());
        }
        self.broadcast_eof(eof.session_id).await?;
        let mut counts = self.eof_counts.lock().expect("output builder lock poisoned");
        counts.remove(&eof.session_id);
        Ok(())
    }

    fn project(&self, records: Vec<Record>) -> Vec<Record> {
        let columns: Vec<&str> = self.config.columns.iter().map(String::as_str).collect();
        records.into_iter().map(|r| r.project(&columns)).collect()
    }

    async fn emit(&self, session_id: SessionId, records: Vec<Record>) -> Result<(), PipelineError> {
        let queue = self.session_queue(session_id);
        let frame = Frame::Batch(BatchFrame {
            kind: self.config.result_kind.clone(),
            session_id,
            message_id: Some(MessageId::new()),
            producer_id: Some(self.controller_id),
            records,
        });
        self.broker.send(&queue, frame.encode().into_bytes()).await
    }

    async fn broadcast_eof(&self, session_id: SessionId) -> Result<(), PipelineError> {
        let queue = self.session_queue(session_id);
        let frame = Frame::Eof(EofFrame {
            session_id,
            message_id: Some(MessageId::new()),
            producer_id: Some(self.controller_id),
            terminated_kind: self.config.result_kind.clone(),
        });
        self.broker.send(&queue, frame.encode().into_bytes()).await
    }

    fn session_queue(&self, session_id: SessionId) -> String {
        session_result_queue(&result_queue_prefix(&self.config.result_kind), session_id)
    }
}

/// Prefix shared with the egress router for a given query-result kind:
/// `result_queue_prefix(kind)` + `-<session_id>` is the full queue name
/// both producer and consumer address (spec §4.9/§6).
pub fn result_queue_prefix(result_kind: &str) -> String {
    format!("{QRS_PREFIX}-{result_kind}")
}

/// Builds a per-session egress queue name from a query-result prefix, per
/// spec §4.9/§6 (`<prefix>-<session_id>`).
pub fn session_result_queue(prefix: &str, session_id: SessionId) -> String {
    format!("{prefix}-{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessBroker;
    use crate::protocol::constants;
    use crate::router::EgressRouter;

    fn row(store_id: &str, qty: &str) -> Record {
        let mut r = Record::new();
        r.set("store_id", store_id);
        r.set("purchases_qty", qty);
        r.set("internal_only", "drop-me");
        r
    }

    #[test]
    fn session_queue_name_is_prefixed_and_session_scoped() {
        let session_id = SessionId::new();
        let prefix = result_queue_prefix(constants::QUERY_RESULT_21);
        let name = session_result_queue(&prefix, session_id);
        assert_eq!(
            name,
            format!("{QRS_PREFIX}-{}-{}", constants::QUERY_RESULT_21, session_id)
        );
    }

    #[tokio::test]
    async fn projects_and_relabels_to_query_result_kind() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(16));
        let builder = OutputBuilder::new(
            0,
            broker,
            "in.queue",
            1,
            OutputBuilderConfig {
                result_kind: constants::QUERY_RESULT_21.to_string(),
                columns: vec!["store_id".into(), "purchases_qty".into()],
            },
        );

        let projected = builder.project(vec![row("1", "42")]);
        assert_eq!(projected.len(), 1);
        let cols: Vec<&str> = projected[0].iter().map(|(k, _)| k).collect();
        assert_eq!(cols, vec!["store_id", "purchases_qty"]);
    }

    /// Drives a batch and an EOF through the real consumer-endpoint ->
    /// emit path and confirms the egress router subscribed to the same
    /// session's Q21 queue actually receives both. Proves the producer and
    /// consumer sides agree on the per-session queue name end to end,
    /// rather than each side constructing it in isolation.
    #[tokio::test]
    async fn batch_and_eof_reach_the_session_scoped_egress_queue() {
        use std::collections::HashMap;
        use tokio::io::AsyncReadExt;

        let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(16));
        let session_id = SessionId::new();

        let mut targets = HashMap::new();
        for &tag in constants::QUERY_RESULT_KINDS.iter() {
            targets.insert(tag, 1usize);
        }
        let router = Arc::new(EgressRouter::new(targets));

        let (mut client_read, server_write) = tokio::io::duplex(8192);
        let router_broker = broker.clone();
        let run_router = router.clone();
        let egress_handle = tokio::spawn(async move {
            run_router.run(&*router_broker, server_write, session_id).await
        });

        // close every other result kind immediately so the router can
        // finish as soon as Q21 does.
        for &tag in constants::QUERY_RESULT_KINDS
            .iter()
            .filter(|&&t| t != constants::QUERY_RESULT_21)
        {
            let queue = session_result_queue(&result_queue_prefix(tag), session_id);
            broker
                .send(
                    &queue,
                    Frame::Eof(EofFrame {
                        session_id,
                        message_id: None,
                        producer_id: None,
                        terminated_kind: tag.to_string(),
                    })
                    .encode()
                    .into_bytes(),
                )
                .await
                .unwrap();
        }

        let builder = Arc::new(OutputBuilder::new(
            0,
            broker.clone(),
            "q21.in.queue",
            1,
            OutputBuilderConfig {
                result_kind: constants::QUERY_RESULT_21.to_string(),
                columns: vec!["store_id".into(), "purchases_qty".into()],
            },
        ));
        let builder_handle = tokio::spawn({
            let builder = builder.clone();
            async move { builder.run().await }
        });

        broker
            .send(
                "q21.in.queue",
                Frame::Batch(BatchFrame {
                    kind: "ignored".into(),
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(0),
                    records: vec![row("1", "42")],
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();
        broker
            .send(
                "q21.in.queue",
                Frame::Eof(EofFrame {
                    session_id,
                    message_id: None,
                    producer_id: None,
                    terminated_kind: "ignored".into(),
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), egress_handle)
            .await
            .expect("egress router should finish")
            .unwrap();
        assert!(result.is_ok());

        let mut received = Vec::new();
        client_read.read_to_end(&mut received).await.unwrap();
        let text = String::from_utf8(received).unwrap();
        assert!(text.contains("store_id"));
        assert!(text.contains("purchases_qty"));
        assert!(!text.contains("internal_only"));

        builder_handle.abort();
    }
}
