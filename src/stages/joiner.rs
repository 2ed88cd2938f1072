//! Joiner stage: enriches a stream of records with columns from a fully
//! materialized base table, keyed on a join column (spec §4.8).
//!
//! Unlike the other stages this one does not fit `StageRuntime`'s
//! single-consumer shape: it reads from two independent upstream endpoints
//! (a base-data feed and a stream-data feed) that complete on their own,
//! unrelated EOF barriers. Grounded in `original_source`'s
//! `controllers/joiners/shared/base_data_handler.py` and
//! `stream_data_handler.py`: two handlers sharing a base table and an
//! `all_base_data_received` flag per session, the stream side buffering
//! batches that arrive before the base side is ready and draining the
//! buffer once it is.

use crate::broker::BrokerAdapter;
use crate::error::PipelineError;
use crate::protocol::{BatchFrame, EofFrame, Frame, Record};
use crate::session::{ControllerId, MessageId, SessionId};
use crate::stage::fanout::ProducerGroup;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Normalizes a join-key value before comparison. The original joiner
/// compares `int(float(value))` so `"5"` and `"5.0"` match; default mirrors
/// that, falling back to the raw string for non-numeric keys.
pub type KeyNormalizer = Box<dyn Fn(&str) -> String + Send + Sync>;

pub fn numeric_key_normalizer() -> KeyNormalizer {
    Box::new(|value: &str| match value.parse::<f64>() {
        Ok(n) => (n as i64).to_string(),
        Err(_) => value.to_string(),
    })
}

pub struct JoinerConfig {
    pub output_kind: String,
    pub join_key: String,
    pub normalize: KeyNormalizer,
    pub base_prev_controllers_amount: usize,
    pub stream_prev_controllers_amount: usize,
}

#[derive(Default)]
struct SessionJoinState {
    base_table: Vec<Record>,
    base_eof_count: usize,
    base_complete: bool,
    stream_buffer: Vec<Vec<Record>>,
    stream_eof_count: usize,
}

pub struct Joiner {
    controller_id: ControllerId,
    broker: Arc<dyn BrokerAdapter>,
    base_consumer_endpoint: String,
    stream_consumer_endpoint: String,
    producer_groups: Vec<ProducerGroup>,
    config: JoinerConfig,
    sessions: Mutex<HashMap<SessionId, SessionJoinState>>,
}

impl Joiner {
    pub fn new(
        controller_id: ControllerId,
        broker: Arc<dyn BrokerAdapter>,
        base_consumer_endpoint: impl Into<String>,
        stream_consumer_endpoint: impl Into<String>,
        producer_groups: Vec<ProducerGroup>,
        config: JoinerConfig,
    ) -> Self {
        Self {
            controller_id,
            broker,
            base_consumer_endpoint: base_consumer_endpoint.into(),
            stream_consumer_endpoint: stream_consumer_endpoint.into(),
            producer_groups,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self) -> Result<(), PipelineError> {
        tokio::try_join!(self.run_base(), self.run_stream())?;
        Ok(())
    }

    async fn run_base(&self) -> Result<(), PipelineError> {
        let mut subscriber = self.broker.start_consuming(&self.base_consumer_endpoint);
        while let Some(bytes) = subscriber.recv().await {
            if let Err(err) = self.handle_base_message(&bytes).await {
                warn!(controller_id = self.controller_id, error = %err, "dropping malformed base frame");
            }
        }
        self.broker.stop_consuming(&self.base_consumer_endpoint);
        Ok(())
    }

    async fn run_stream(&self) -> Result<(), PipelineError> {
        let mut subscriber = self.broker.start_consuming(&self.stream_consumer_endpoint);
        while let Some(bytes) = subscriber.recv().await {
            if let Err(err) = self.handle_stream_message(&bytes).await {
                warn!(controller_id = self.controller_id, error = %err, "dropping malformed stream frame");
            }
        }
        self.broker.stop_consuming(&self.stream_consumer_endpoint);
        Ok(())
    }

    async fn handle_base_message(&self, bytes: &[u8]) -> Result<(), PipelineError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| PipelineError::MalformedFrame("non-utf8 bytes on wire".into()))?;
        match Frame::decode(text)? {
            Frame::Batch(batch) => self.handle_base_batch(batch),
            Frame::Eof(eof) => self.handle_base_eof(eof).await,
            Frame::Handshake { .. } => Ok(()),
        }
    }

    fn handle_base_batch(&self, batch: BatchFrame) -> Result<(), PipelineError> {
        let mut sessions = self.sessions.lock().expect("joiner session lock poisoned");
        let entry = sessions.entry(batch.session_id).or_default();
        entry.base_table.extend(batch.records);
        Ok(())
    }

    async fn handle_base_eof(&self, eof: EofFrame) -> Result<(), PipelineError> {
        let mut sessions = self.sessions.lock().expect("joiner session lock poisoned");
        let entry = sessions.entry(eof.session_id).or_default();
        entry.base_eof_count += 1;
        if entry.base_eof_count != self.config.base_prev_controllers_amount {
            return Ok(());
        }
        entry.base_complete = true;
        info!(
            controller_id = self.controller_id,
            session_id = %eof.session_id,
            "base table complete"
        );
        Ok(())
    }

    async fn handle_stream_message(&self, bytes: &[u8]) -> Result<(), PipelineError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| PipelineError::MalformedFrame("non-utf8 bytes on wire".into()))?;
        match Frame::decode(text)? {
            Frame::Batch(batch) => self.handle_stream_batch(batch).await,
            Frame::Eof(eof) => self.handle_stream_eof(eof).await,
            Frame::Handshake { .. } => Ok(()),
        }
    }

    /// Buffer unconditionally; drain immediately if the base side is
    /// already complete, matching
    /// `_handle_data_batch_message_when_all_base_data_received`.
    async fn handle_stream_batch(&self, batch: BatchFrame) -> Result<(), PipelineError> {
        let should_drain = {
            let mut sessions = self.sessions.lock().expect("joiner session lock poisoned");
            let entry = sessions.entry(batch.session_id).or_default();
            entry.stream_buffer.push(batch.records);
            entry.base_complete
        };
        if should_drain {
            self.drain_buffer(batch.session_id).await?;
        }
        Ok(())
    }

    /// On the stream barrier: if the base side is ready, drain, forward the
    /// EOF, and drop session state. Otherwise undo the barrier count and
    /// republish the EOF to this stage's own stream endpoint, so it is
    /// redelivered once more base-side progress has a chance to land
    /// (`stream_data_handler.py`'s requeue-on-barrier-inversion).
    async fn handle_stream_eof(&self, eof: EofFrame) -> Result<(), PipelineError> {
        let (fires, base_complete) = {
            let mut sessions = self.sessions.lock().expect("joiner session lock poisoned");
            let entry = sessions.entry(eof.session_id).or_default();
            entry.stream_eof_count += 1;
            let fires = entry.stream_eof_count == self.config.stream_prev_controllers_amount;
            if fires && !entry.base_complete {
                entry.stream_eof_count -= 1;
            }
            (fires, entry.base_complete)
        };

        if !fires {
            return Ok(());
        }

        if !base_complete {
            warn!(
                controller_id = self.controller_id,
                session_id = %eof.session_id,
                "stream EOF arrived before base data was complete, requeuing"
            );
            let frame = Frame::Eof(eof);
            self.broker
                .send(&self.stream_consumer_endpoint, frame.encode().into_bytes())
                .await?;
            return Ok(());
        }

        self.drain_buffer(eof.session_id).await?;
        self.broadcast_eof(eof.session_id).await?;

        let mut sessions = self.sessions.lock().expect("joiner session lock poisoned");
        sessions.remove(&eof.session_id);
        Ok(())
    }

    async fn drain_buffer(&self, session_id: SessionId) -> Result<(), PipelineError> {
        let batches = {
            let mut sessions = self.sessions.lock().expect("joiner session lock poisoned");
            let entry = sessions.entry(session_id).or_default();
            std::mem::take(&mut entry.stream_buffer)
        };

        for batch in batches {
            let joined = self.join_batch(session_id, batch);
            if !joined.is_empty() {
                self.emit(session_id, joined).await?;
            }
        }
        Ok(())
    }

    /// Inner join: a stream record with no matching base row is logged and
    /// dropped, not an error (spec §4.8, §7). On a match, base columns
    /// override stream columns with the same name.
    fn join_batch(&self, session_id: SessionId, stream_records: Vec<Record>) -> Vec<Record> {
        let sessions = self.sessions.lock().expect("joiner session lock poisoned");
        let Some(entry) = sessions.get(&session_id) else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(stream_records.len());
        for stream_record in stream_records {
            let Some(stream_key) = stream_record.get(&self.config.join_key) else {
                warn!(
                    controller_id = self.controller_id,
                    session_id = %session_id,
                    "stream record missing join key, dropping"
                );
                continue;
            };
            let stream_key = (self.config.normalize)(stream_key);

            let matched = entry.base_table.iter().find(|base_record| {
                base_record
                    .get(&self.config.join_key)
                    .map(|v| (self.config.normalize)(v) == stream_key)
                    .unwrap_or(false)
            });

            match matched {
                Some(base_record) => {
                    let mut merged = stream_record.clone();
                    for (col, val) in base_record.iter() {
                        merged.set(col, val);
                    }
                    out.push(merged);
                }
                None => {
                    warn!(
                        controller_id = self.controller_id,
                        session_id = %session_id,
                        "no base match for stream record, dropping"
                    );
                }
            }
        }
        out
    }

    async fn emit(&self, session_id: SessionId, records: Vec<Record>) -> Result<(), PipelineError> {
        for group in &self.producer_groups {
            for (endpoint, records) in group.route(records.clone()) {
                let frame = Frame::Batch(BatchFrame {
                    kind: self.config.output_kind.clone(),
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(self.controller_id),
                    records,
                });
                self.broker
                    .send(&endpoint, frame.encode().into_bytes())
                    .await?;
            }
        }
        Ok(())
    }

    async fn broadcast_eof(&self, session_id: SessionId) -> Result<(), PipelineError> {
        for group in &self.producer_groups {
            for endpoint in &group.endpoints {
                let frame = Frame::Eof(EofFrame {
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(self.controller_id),
                    terminated_kind: self.config.output_kind.clone(),
                });
                self.broker.send(endpoint, frame.encode().into_bytes()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessBroker;
    use crate::stage::fanout::FanoutPolicy;

    fn base_row(item_id: &str, item_name: &str) -> Record {
        let mut r = Record::new();
        r.set("item_id", item_id);
        r.set("item_name", item_name);
        r
    }

    fn stream_row(item_id: &str, qty: &str) -> Record {
        let mut r = Record::new();
        r.set("item_id", item_id);
        r.set("qty", qty);
        r
    }

    fn make_joiner(broker: Arc<dyn BrokerAdapter>) -> Arc<Joiner> {
        Arc::new(Joiner::new(
            0,
            broker,
            "base.queue",
            "stream.queue",
            vec![ProducerGroup::new(
                vec!["out.queue".into()],
                FanoutPolicy::RoundRobin,
            )],
            JoinerConfig {
                output_kind: crate::protocol::constants::QUERY_RESULT_21.to_string(),
                join_key: "item_id".into(),
                normalize: numeric_key_normalizer(),
                base_prev_controllers_amount: 1,
                stream_prev_controllers_amount: 1,
            },
        ))
    }

    #[tokio::test]
    async fn joins_stream_with_base_when_base_arrives_first_s4() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(16));
        let joiner = make_joiner(broker.clone());
        let handle = tokio::spawn({
            let joiner = joiner.clone();
            async move { joiner.run().await }
        });

        let mut out = broker.start_consuming("out.queue");
        let session_id = SessionId::new();

        broker
            .send(
                "base.queue",
                Frame::Batch(BatchFrame {
                    kind: crate::protocol::constants::MENU_ITEMS.to_string(),
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(0),
                    records: vec![base_row("5", "Pizza")],
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();
        broker
            .send(
                "base.queue",
                Frame::Eof(EofFrame {
                    session_id,
                    message_id: None,
                    producer_id: None,
                    terminated_kind: crate::protocol::constants::MENU_ITEMS.to_string(),
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();

        // give the base handler a moment to mark the session complete
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        broker
            .send(
                "stream.queue",
                Frame::Batch(BatchFrame {
                    kind: crate::protocol::constants::QUERY_RESULT_3X.to_string(),
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(0),
                    records: vec![stream_row("5.0", "12")],
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();

        let forwarded = out.recv().await.unwrap();
        let decoded = Frame::decode(std::str::from_utf8(&forwarded).unwrap()).unwrap();
        match decoded {
            Frame::Batch(b) => {
                assert_eq!(b.records[0].get("item_name"), Some("Pizza"));
                assert_eq!(b.records[0].get("qty"), Some("12"));
            }
            _ => panic!("expected batch"),
        }

        handle.abort();
    }

    #[tokio::test]
    async fn stream_eof_before_base_complete_is_requeued_until_ready() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(16));
        let joiner = make_joiner(broker.clone());
        let handle = tokio::spawn({
            let joiner = joiner.clone();
            async move { joiner.run().await }
        });

        let mut out = broker.start_consuming("out.queue");
        let session_id = SessionId::new();

        broker
            .send(
                "stream.queue",
                Frame::Batch(BatchFrame {
                    kind: crate::protocol::constants::QUERY_RESULT_3X.to_string(),
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(0),
                    records: vec![stream_row("7", "3")],
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();
        broker
            .send(
                "stream.queue",
                Frame::Eof(EofFrame {
                    session_id,
                    message_id: None,
                    producer_id: None,
                    terminated_kind: crate::protocol::constants::QUERY_RESULT_3X.to_string(),
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        broker
            .send(
                "base.queue",
                Frame::Batch(BatchFrame {
                    kind: crate::protocol::constants::MENU_ITEMS.to_string(),
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(0),
                    records: vec![base_row("7", "Soda")],
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();
        broker
            .send(
                "base.queue",
                Frame::Eof(EofFrame {
                    session_id,
                    message_id: None,
                    producer_id: None,
                    terminated_kind: crate::protocol::constants::MENU_ITEMS.to_string(),
                })
                .encode()
                .into_bytes(),
            )
            .await
            .unwrap();

        let forwarded = tokio::time::timeout(std::time::Duration::from_secs(2), out.recv())
            .await
            .expect("joined batch should eventually arrive")
            .unwrap();
        let decoded = Frame::decode(std::str::from_utf8(&forwarded).unwrap()).unwrap();
        assert!(matches!(decoded, Frame::Batch(b) if b.records[0].get("item_name") == Some("Soda")));

        handle.abort();
    }
}
