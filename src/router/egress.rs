//! Result-facing egress half of the session router (spec §4.3 step 3):
//! binds the five per-session query-result queues, streams whatever
//! arrives on them straight back to the client, and closes once every
//! query-result kind has produced its expected number of EOFs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::broker::{BrokerAdapter, Subscriber};
use crate::error::PipelineError;
use crate::protocol::constants::QUERY_RESULT_KINDS;
use crate::protocol::Frame;
use crate::session::SessionId;
use crate::stages::output_builder::{result_queue_prefix, session_result_queue};
use tracing::debug;

/// Number of output-builder workers behind each query-result kind, i.e. how
/// many EOFs that kind's session queue must see before it is exhausted.
pub struct EgressRouter {
    workers_amount: HashMap<&'static str, usize>,
}

impl EgressRouter {
    pub fn new(workers_amount: HashMap<&'static str, usize>) -> Self {
        Self { workers_amount }
    }

    fn queue_name(tag: &str, session_id: SessionId) -> String {
        session_result_queue(&result_queue_prefix(tag), session_id)
    }

    pub async fn run<W: AsyncWrite + Unpin>(
        &self,
        broker: &dyn BrokerAdapter,
        mut writer: W,
        session_id: SessionId,
    ) -> Result<(), PipelineError> {
        struct KindStream {
            tag: &'static str,
            queue: String,
            subscriber: Subscriber<Vec<u8>>,
            eof_count: usize,
            target: usize,
            done: bool,
        }

        let mut streams: Vec<KindStream> = QUERY_RESULT_KINDS
            .iter()
            .map(|&tag| {
                let queue = Self::queue_name(tag, session_id);
                let subscriber = broker.start_consuming(&queue);
                let target = *self.workers_amount.get(tag).unwrap_or(&1);
                KindStream {
                    tag,
                    queue,
                    subscriber,
                    eof_count: 0,
                    target,
                    done: false,
                }
            })
            .collect();

        while streams.iter().any(|s| !s.done) {
            let mut futs: Vec<
                Pin<Box<dyn Future<Output = (usize, Option<Vec<u8>>)> + Send + '_>>,
            > = Vec::new();
            for (i, stream) in streams.iter_mut().enumerate() {
                if stream.done {
                    continue;
                }
                futs.push(Box::pin(async move { (i, stream.subscriber.recv().await) }));
            }
            let ((i, message), _idx, _rest) = futures::future::select_all(futs).await;

            match message {
                None => {
                    streams[i].done = true;
                }
                Some(bytes) => {
                    let is_eof = matches!(
                        std::str::from_utf8(&bytes)
                            .ok()
                            .and_then(|text| Frame::decode(text).ok()),
                        Some(Frame::Eof(_))
                    );
                    writer
                        .write_all(&bytes)
                        .await
                        .map_err(|_| PipelineError::ClientDisconnected)?;

                    if is_eof {
                        let stream = &mut streams[i];
                        stream.eof_count += 1;
                        if stream.eof_count >= stream.target {
                            stream.done = true;
                            debug!(kind = stream.tag, queue = %stream.queue, "query result kind exhausted");
                            broker.stop_consuming(&stream.queue);
                            broker.delete(&stream.queue);
                        }
                    }
                }
            }
        }

        writer.shutdown().await.map_err(|_| PipelineError::ClientDisconnected)?;
        Ok(())
    }
}
