//! Client-facing ingress half of the session router (spec §4.3 steps 1-2):
//! handshake, then demultiplex client batches to the first stage of each
//! record kind's pipeline.

use std::collections::{HashMap, HashSet};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::broker::BrokerAdapter;
use crate::error::PipelineError;
use crate::protocol::constants::{ALL_QUERIES, CLIENT_RECORD_KIND_ORDER};
use crate::protocol::{BatchFrame, EofFrame, Frame, FrameDecoder};
use crate::session::{ControllerId, MessageId, SessionId};
use crate::stage::fanout::ProducerGroup;

/// Round-robins inbound Batches, broadcasts inbound EOFs, to the cleaner
/// worker queues of each of the five client record kinds.
pub struct IngressRouter {
    cleaner_groups: HashMap<&'static str, ProducerGroup>,
}

impl IngressRouter {
    pub fn new(cleaner_groups: HashMap<&'static str, ProducerGroup>) -> Self {
        Self { cleaner_groups }
    }

    /// Reads the handshake off `reader`, asserting the `ALL_QUERIES`
    /// capability string, and returns the client id to echo back. The
    /// caller owns the write half and sends the Handshake reply itself
    /// (spec §4.3 step 1), since this router does not hold a writer.
    pub async fn read_handshake<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<String, PipelineError> {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|_| PipelineError::ClientDisconnected)?;
            if n == 0 {
                return Err(PipelineError::ClientDisconnected);
            }
            for frame in decoder.push(&buf[..n])? {
                match frame {
                    Frame::Handshake { id, payload } => {
                        if payload != ALL_QUERIES {
                            return Err(PipelineError::MalformedFrame(format!(
                                "handshake capability mismatch: {payload}"
                            )));
                        }
                        return Ok(id);
                    }
                    other => {
                        return Err(PipelineError::MalformedFrame(format!(
                            "expected handshake, got {}",
                            other.kind_tag()
                        )))
                    }
                }
            }
        }
    }

    /// Consumes client frames until every one of `CLIENT_RECORD_KIND_ORDER`
    /// has produced exactly one EOF, fanning each out to that kind's
    /// cleaner workers.
    pub async fn run<R: AsyncRead + Unpin>(
        &self,
        broker: &dyn BrokerAdapter,
        mut reader: R,
        session_id: SessionId,
    ) -> Result<(), PipelineError> {
        let mut decoder = FrameDecoder::new();
        let mut remaining: HashSet<&'static str> =
            CLIENT_RECORD_KIND_ORDER.iter().copied().collect();
        let mut buf = [0u8; 8192];

        while !remaining.is_empty() {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|_| PipelineError::ClientDisconnected)?;
            if n == 0 {
                return Err(PipelineError::ClientDisconnected);
            }
            for frame in decoder.push(&buf[..n])? {
                match frame {
                    Frame::Batch(batch) => self.dispatch_batch(broker, session_id, batch).await?,
                    Frame::Eof(eof) => {
                        let kind = eof.terminated_kind.clone();
                        self.broadcast_eof(broker, session_id, eof).await?;
                        remaining.remove(kind.as_str());
                    }
                    Frame::Handshake { .. } => {
                        warn!("unexpected second handshake frame, ignoring");
                    }
                }
            }
        }
        Ok(())
    }

    /// Stamps a fresh message id and producer id `0` (the session router is
    /// always producer 0 of the record stream, spec §4.3 step 2), then
    /// round-robins over that kind's cleaner queues.
    async fn dispatch_batch(
        &self,
        broker: &dyn BrokerAdapter,
        session_id: SessionId,
        mut batch: BatchFrame,
    ) -> Result<(), PipelineError> {
        batch.session_id = session_id;
        batch.message_id = Some(MessageId::new());
        batch.producer_id = Some(0 as ControllerId);

        let Some(group) = self.cleaner_groups.get(batch.kind.as_str()) else {
            warn!(kind = %batch.kind, "no cleaner group configured for record kind, dropping");
            return Ok(());
        };
        let records = batch.records.clone();
        for (endpoint, records) in group.route(records) {
            let frame = Frame::Batch(BatchFrame {
                kind: batch.kind.clone(),
                session_id,
                message_id: batch.message_id,
                producer_id: batch.producer_id,
                records,
            });
            broker
                .send(&endpoint, frame.encode().into_bytes())
                .await?;
        }
        Ok(())
    }

    async fn broadcast_eof(
        &self,
        broker: &dyn BrokerAdapter,
        session_id: SessionId,
        mut eof: EofFrame,
    ) -> Result<(), PipelineError> {
        eof.session_id = session_id;
        eof.message_id = Some(MessageId::new());
        eof.producer_id = Some(0 as ControllerId);

        let Some(group) = self.cleaner_groups.get(eof.terminated_kind.as_str()) else {
            warn!(kind = %eof.terminated_kind, "no cleaner group configured for record kind, dropping eof");
            return Ok(());
        };
        for endpoint in &group.endpoints {
            let frame = Frame::Eof(eof.clone());
            broker
                .send(endpoint, frame.encode().into_bytes())
                .await?;
        }
        Ok(())
    }
}
