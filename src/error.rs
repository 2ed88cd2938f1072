use crate::session::SessionId;
use thiserror::Error;

/// The error kinds named in spec §7. `UnmatchedJoin` is deliberately absent:
/// the spec calls it "per-record warning; not an error", so it is logged via
/// `tracing::warn!` at the call site instead of living here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("EOF carries unexpected kind: {0}")]
    UnexpectedEofKind(String),

    #[error("broker error: {0}")]
    BrokerError(String),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("frame for unknown session {0}")]
    SessionMismatch(SessionId),

    #[error("stream EOF arrived before base EOF for session {0}")]
    BarrierInversion(SessionId),

    #[error("configuration error: {0}")]
    Config(String),
}
