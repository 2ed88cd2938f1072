//! `StageRuntime`: the generic consume-transform-produce loop shared by
//! every non-ingress worker (spec §4.4). Concrete stages only supply a
//! `StageLogic`.

use crate::broker::BrokerAdapter;
use crate::error::PipelineError;
use crate::protocol::{BatchFrame, EofFrame, Frame, Record};
use crate::session::{ControllerId, MessageId, SessionId, SessionTable};
use crate::stage::fanout::ProducerGroup;
use crate::stage::logic::{BatchOrigin, StageLogic};

use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub struct StageRuntime<L: StageLogic> {
    controller_id: ControllerId,
    broker: Arc<dyn BrokerAdapter>,
    consumer_endpoint: String,
    prev_controllers_amount: usize,
    producer_groups: Vec<ProducerGroup>,
    logic: Arc<L>,
    sessions: Mutex<SessionTable<()>>,
}

impl<L: StageLogic> StageRuntime<L> {
    pub fn new(
        controller_id: ControllerId,
        broker: Arc<dyn BrokerAdapter>,
        consumer_endpoint: impl Into<String>,
        prev_controllers_amount: usize,
        producer_groups: Vec<ProducerGroup>,
        logic: Arc<L>,
    ) -> Self {
        Self {
            controller_id,
            broker,
            consumer_endpoint: consumer_endpoint.into(),
            prev_controllers_amount,
            producer_groups,
            logic,
            sessions: Mutex::new(SessionTable::new()),
        }
    }

    /// Run until the broker endpoint closes (graceful stop).
    pub async fn run(&self) -> Result<(), PipelineError> {
        let mut subscriber = self.broker.start_consuming(&self.consumer_endpoint);
        while let Some(bytes) = subscriber.recv().await {
            if let Err(err) = self.handle_message(&bytes).await {
                warn!(
                    controller_id = self.controller_id,
                    error = %err,
                    "dropping malformed frame"
                );
            }
        }
        self.broker.stop_consuming(&self.consumer_endpoint);
        info!(controller_id = self.controller_id, "stage runtime stopped");
        Ok(())
    }

    async fn handle_message(&self, bytes: &[u8]) -> Result<(), PipelineError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| PipelineError::MalformedFrame("non-utf8 bytes on wire".into()))?;
        match Frame::decode(text)? {
            Frame::Batch(batch) => self.handle_batch(batch).await,
            Frame::Eof(eof) => self.handle_eof(eof).await,
            Frame::Handshake { .. } => {
                warn!(
                    controller_id = self.controller_id,
                    "unexpected handshake frame on stage queue"
                );
                Ok(())
            }
        }
    }

    async fn handle_batch(&self, batch: BatchFrame) -> Result<(), PipelineError> {
        let origin = match (batch.producer_id, batch.message_id) {
            (Some(producer_id), Some(message_id)) => Some(BatchOrigin {
                producer_id,
                message_id,
            }),
            _ => None,
        };
        let transformed = self
            .logic
            .handle_batch(batch.session_id, origin, batch.records)
            .await;
        if !transformed.is_empty() {
            self.emit(batch.session_id, transformed).await?;
        }
        Ok(())
    }

    async fn handle_eof(&self, eof: EofFrame) -> Result<(), PipelineError> {
        let barrier_fired = {
            let mut sessions = self.sessions.lock().expect("session table lock poisoned");
            sessions.record_eof(eof.session_id, self.prev_controllers_amount)
        };
        if !barrier_fired {
            return Ok(());
        }

        for batch in self.logic.on_session_flush(eof.session_id).await {
            if !batch.is_empty() {
                self.emit(eof.session_id, batch).await?;
            }
        }
        self.broadcast_eof(eof.session_id).await?;

        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        sessions.remove(&eof.session_id);
        Ok(())
    }

    async fn emit(&self, session_id: SessionId, records: Vec<Record>) -> Result<(), PipelineError> {
        for group in &self.producer_groups {
            for (endpoint, records) in group.route(records.clone()) {
                let frame = Frame::Batch(BatchFrame {
                    kind: self.logic.output_kind().to_string(),
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

    /// Broadcast one EOF to every downstream producer endpoint across every
    /// producer group, regardless of that group's fan-out policy (spec
    /// §4.4: "broadcast one EOF to every downstream producer endpoint").
    async fn broadcast_eof(&self, session_id: SessionId) -> Result<(), PipelineError> {
        for group in &self.producer_groups {
            for endpoint in &group.endpoints {
                let frame = Frame::Eof(EofFrame {
                    session_id,
                    message_id: Some(MessageId::new()),
                    producer_id: Some(self.controller_id),
                    terminated_kind: self.logic.output_kind().to_string(),
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
    use async_trait::async_trait;

    struct Passthrough;

    #[async_trait]
    impl StageLogic for Passthrough {
        fn output_kind(&self) -> &str {
            crate::protocol::constants::TRANSACTIONS
        }

        async fn handle_batch(
            &self,
            _session_id: SessionId,
            _origin: Option<crate::stage::BatchOrigin>,
            records: Vec<Record>,
        ) -> Vec<Record> {
            records
        }

        async fn on_session_flush(&self, _session_id: SessionId) -> Vec<Vec<Record>> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn forwards_batches_and_conserves_eof_count() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(16));
        let runtime = Arc::new(StageRuntime::new(
            0,
            broker.clone(),
            "in.queue",
            1,
            vec![ProducerGroup::new(vec!["out.queue".into()], FanoutPolicy::RoundRobin)],
            Arc::new(Passthrough),
        ));

        let handle = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.run().await }
        });

        let mut out = broker.start_consuming("out.queue");
        let session_id = SessionId::new();
        let mut rec = Record::new();
        rec.set("store_id", "1");

        let batch = Frame::Batch(BatchFrame {
            kind: crate::protocol::constants::TRANSACTIONS.to_string(),
            session_id,
            message_id: Some(MessageId::new()),
            producer_id: Some(7),
            records: vec![rec],
        });
        broker
            .send("in.queue", batch.encode().into_bytes())
            .await
            .unwrap();

        let forwarded = out.recv().await.unwrap();
        let decoded = Frame::decode(std::str::from_utf8(&forwarded).unwrap()).unwrap();
        assert!(matches!(decoded, Frame::Batch(b) if b.session_id == session_id));

        let eof = Frame::Eof(EofFrame {
            session_id,
            message_id: None,
            producer_id: None,
            terminated_kind: crate::protocol::constants::TRANSACTIONS.to_string(),
        });
        broker
            .send("in.queue", eof.encode().into_bytes())
            .await
            .unwrap();

        let forwarded_eof = out.recv().await.unwrap();
        let decoded_eof = Frame::decode(std::str::from_utf8(&forwarded_eof).unwrap()).unwrap();
        assert!(matches!(decoded_eof, Frame::Eof(e) if e.session_id == session_id));

        broker.delete("in.queue");
        handle.abort();
    }
}
