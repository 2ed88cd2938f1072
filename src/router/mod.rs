//! Session router (ingress): the process that owns a client's TCP socket
//! for the life of its session (spec §4.3). Demultiplexes its record
//! batches into the pipeline and multiplexes the five query-result streams
//! back to it.

pub mod egress;
pub mod ingress;

pub use egress::EgressRouter;
pub use ingress::IngressRouter;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::broker::BrokerAdapter;
use crate::error::PipelineError;
use crate::protocol::Frame;
use crate::session::SessionId;

pub struct SessionRouter {
    broker: Arc<dyn BrokerAdapter>,
    ingress: Arc<IngressRouter>,
    egress: Arc<EgressRouter>,
}

impl SessionRouter {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        cleaner_groups: HashMap<&'static str, crate::stage::fanout::ProducerGroup>,
        query_result_workers_amount: HashMap<&'static str, usize>,
    ) -> Self {
        Self {
            broker,
            ingress: Arc::new(IngressRouter::new(cleaner_groups)),
            egress: Arc::new(EgressRouter::new(query_result_workers_amount)),
        }
    }

    /// Accepts connections on `addr` until the process is asked to stop,
    /// spawning one session handler per connection (spec §4.3,
    /// "concurrency: one worker process or goroutine per accepted
    /// connection").
    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<(), PipelineError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PipelineError::Config(format!("failed to bind {addr}: {e}")))?;
        info!(addr, "session router listening");

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            info!(%peer, "accepted connection");
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(socket).await {
                    error!(%peer, error = %err, "session handler terminated");
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> Result<(), PipelineError> {
        socket
            .set_nodelay(true)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let (mut read_half, mut write_half) = socket.into_split();

        let client_id = IngressRouter::read_handshake(&mut read_half).await?;
        let session_id = SessionId::new();

        let reply = Frame::Handshake {
            id: session_id.to_string(),
            payload: client_id.clone(),
        };
        use tokio::io::AsyncWriteExt;
        write_half
            .write_all(reply.encode().as_bytes())
            .await
            .map_err(|_| PipelineError::ClientDisconnected)?;
        info!(%client_id, %session_id, "handshake complete");

        let egress = self.egress.clone();
        let broker_for_egress = self.broker.clone();
        let egress_handle = tokio::spawn(async move {
            egress
                .run(&*broker_for_egress, write_half, session_id)
                .await
        });

        self.ingress.run(&*self.broker, read_half, session_id).await?;

        egress_handle
            .await
            .map_err(|_| PipelineError::ClientDisconnected)??;
        info!(%session_id, "session closed cleanly");
        Ok(())
    }
}
