use super::constants::*;
use super::record::Record;
use crate::error::PipelineError;
use crate::session::{ControllerId, MessageId, SessionId};

/// A decoded wire frame. Three kinds share one envelope
/// (`<kind><META_DELIM><metadata>[<payload>]<END>`), distinguished by the
/// metadata tuple's arity and by the kind tag (spec §4.1).
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Handshake { id: String, payload: String },
    Batch(BatchFrame),
    Eof(EofFrame),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFrame {
    pub kind: String,
    pub session_id: SessionId,
    pub message_id: Option<MessageId>,
    pub producer_id: Option<ControllerId>,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EofFrame {
    pub session_id: SessionId,
    pub message_id: Option<MessageId>,
    pub producer_id: Option<ControllerId>,
    /// The record/result kind no more batches of which will arrive.
    pub terminated_kind: String,
}

fn known_batch_kinds() -> [&'static str; 10] {
    [
        MENU_ITEMS,
        STORES,
        USERS,
        TRANSACTIONS,
        TRANSACTION_ITEMS,
        QUERY_RESULT_1X,
        QUERY_RESULT_21,
        QUERY_RESULT_22,
        QUERY_RESULT_3X,
        QUERY_RESULT_4X,
    ]
}

impl Frame {
    /// The frame's kind tag, as it appears on the wire.
    pub fn kind_tag(&self) -> &str {
        match self {
            Frame::Handshake { .. } => HANDSHAKE,
            Frame::Batch(b) => &b.kind,
            Frame::Eof(_) => EOF,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Frame::Handshake { .. } => None,
            Frame::Batch(b) => Some(b.session_id),
            Frame::Eof(e) => Some(e.session_id),
        }
    }

    pub fn encode(&self) -> String {
        let (metadata, payload) = match self {
            Frame::Handshake { id, payload } => (id.clone(), payload.clone()),
            Frame::Batch(b) => (
                encode_metadata(b.session_id, b.message_id, b.producer_id),
                encode_batch_items(&b.records),
            ),
            Frame::Eof(e) => (
                encode_metadata(e.session_id, e.message_id, e.producer_id),
                e.terminated_kind.clone(),
            ),
        };

        let mut out = String::with_capacity(
            self.kind_tag().len() + metadata.len() + payload.len() + 3,
        );
        out.push_str(self.kind_tag());
        out.push(METADATA_DELIMITER);
        out.push_str(&metadata);
        out.push(MSG_START_DELIMITER);
        out.push_str(&payload);
        out.push(MSG_END_DELIMITER);
        out
    }

    /// Decode a single, already frame-terminated string (ending in
    /// `MSG_END_DELIMITER`). Splitting a byte stream into such strings is
    /// `FrameDecoder`'s job (`protocol::codec`).
    pub fn decode(s: &str) -> Result<Frame, PipelineError> {
        const TAG_LEN: usize = 3;
        if s.len() < TAG_LEN {
            return Err(PipelineError::MalformedFrame("frame shorter than kind tag".into()));
        }
        let kind_tag = &s[..TAG_LEN];
        let rest = &s[TAG_LEN..];

        if !rest.starts_with(METADATA_DELIMITER) {
            return Err(PipelineError::MalformedFrame("missing metadata delimiter".into()));
        }
        let after_delim = &rest[METADATA_DELIMITER.len_utf8()..];

        let start_pos = after_delim
            .find(MSG_START_DELIMITER)
            .ok_or_else(|| PipelineError::MalformedFrame("missing payload start".into()))?;
        let metadata = &after_delim[..start_pos];
        let after_start = &after_delim[start_pos + MSG_START_DELIMITER.len_utf8()..];

        let end_pos = after_start
            .find(MSG_END_DELIMITER)
            .ok_or_else(|| PipelineError::MalformedFrame("missing payload end".into()))?;
        let payload = &after_start[..end_pos];

        match kind_tag {
            HANDSHAKE => Ok(Frame::Handshake {
                id: metadata.to_string(),
                payload: payload.to_string(),
            }),
            EOF => {
                let (session_id, message_id, producer_id) = decode_metadata(metadata)?;
                if !known_batch_kinds().contains(&payload) {
                    return Err(PipelineError::UnexpectedEofKind(payload.to_string()));
                }
                Ok(Frame::Eof(EofFrame {
                    session_id,
                    message_id,
                    producer_id,
                    terminated_kind: payload.to_string(),
                }))
            }
            kind if known_batch_kinds().contains(&kind) => {
                let (session_id, message_id, producer_id) = decode_metadata(metadata)?;
                let records = decode_batch_items(payload)?;
                Ok(Frame::Batch(BatchFrame {
                    kind: kind.to_string(),
                    session_id,
                    message_id,
                    producer_id,
                    records,
                }))
            }
            other => Err(PipelineError::MalformedFrame(format!("unknown kind tag: {other}"))),
        }
    }
}

fn encode_metadata(
    session_id: SessionId,
    message_id: Option<MessageId>,
    producer_id: Option<ControllerId>,
) -> String {
    let mut parts = vec![session_id.to_string()];
    if let Some(message_id) = message_id {
        parts.push(message_id.to_string());
    }
    if let Some(producer_id) = producer_id {
        parts.push(producer_id.to_string());
    }
    parts.join(&METADATA_SEPARATOR.to_string())
}

fn decode_metadata(
    metadata: &str,
) -> Result<(SessionId, Option<MessageId>, Option<ControllerId>), PipelineError> {
    let fields: Vec<&str> = metadata.split(METADATA_SEPARATOR).collect();
    match fields.as_slice() {
        [session_id] => {
            let session_id = session_id
                .parse()
                .map_err(|_| PipelineError::MalformedFrame("bad session id".into()))?;
            Ok((session_id, None, None))
        }
        [session_id, message_id, producer_id] => {
            let session_id = session_id
                .parse()
                .map_err(|_| PipelineError::MalformedFrame("bad session id".into()))?;
            let message_id = message_id
                .parse()
                .map_err(|_| PipelineError::MalformedFrame("bad message id".into()))?;
            let producer_id: ControllerId = producer_id
                .parse()
                .map_err(|_| PipelineError::MalformedFrame("bad producer id".into()))?;
            Ok((session_id, Some(message_id), Some(producer_id)))
        }
        _ => Err(PipelineError::MalformedFrame(format!(
            "metadata arity mismatch: {} fields",
            fields.len()
        ))),
    }
}

fn encode_batch_items(records: &[Record]) -> String {
    records
        .iter()
        .map(encode_batch_item)
        .collect::<Vec<_>>()
        .join(&BATCH_ITEM_SEPARATOR.to_string())
}

fn encode_batch_item(record: &Record) -> String {
    let fields: Vec<String> = record
        .iter()
        .map(|(k, v)| format!("\"{k}\":\"{v}\""))
        .collect();
    format!(
        "{BATCH_START_DELIMITER}{}{BATCH_END_DELIMITER}",
        fields.join(&BATCH_ITEM_FIELD_SEPARATOR.to_string())
    )
}

fn decode_batch_items(payload: &str) -> Result<Vec<Record>, PipelineError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    payload
        .split(BATCH_ITEM_SEPARATOR)
        .map(decode_batch_item)
        .collect()
}

fn decode_batch_item(group: &str) -> Result<Record, PipelineError> {
    if !(group.starts_with(BATCH_START_DELIMITER) && group.ends_with(BATCH_END_DELIMITER)) {
        return Err(PipelineError::MalformedFrame("unterminated batch group".into()));
    }
    let inner = &group[1..group.len() - 1];
    let mut record = Record::new();
    for field in inner.split(BATCH_ITEM_FIELD_SEPARATOR) {
        let (key, value) = field
            .split_once(':')
            .ok_or_else(|| PipelineError::MalformedFrame("missing field separator".into()))?;
        record.set(key.trim_matches('"'), value.trim_matches('"'));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_roundtrip() {
        let f = Frame::Handshake {
            id: "client-7".to_string(),
            payload: ALL_QUERIES.to_string(),
        };
        let encoded = f.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(f, decoded);
    }

    #[test]
    fn batch_roundtrip() {
        let mut r1 = Record::new();
        r1.set("store_id", "1");
        r1.set("final_amount", "10.5");
        let mut r2 = Record::new();
        r2.set("store_id", "2");
        r2.set("final_amount", "7");

        let batch = Frame::Batch(BatchFrame {
            kind: TRANSACTIONS.to_string(),
            session_id: SessionId::new(),
            message_id: Some(MessageId::new()),
            producer_id: Some(3),
            records: vec![r1, r2],
        });

        let encoded = batch.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(batch, decoded);
    }

    #[test]
    fn eof_roundtrip() {
        let f = Frame::Eof(EofFrame {
            session_id: SessionId::new(),
            message_id: None,
            producer_id: None,
            terminated_kind: TRANSACTIONS.to_string(),
        });
        let encoded = f.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(f, decoded);
    }

    #[test]
    fn rejects_unknown_kind_tag() {
        let err = Frame::decode("XYZ|abc[payload]").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame(_)));
    }

    #[test]
    fn rejects_eof_with_unknown_terminated_kind() {
        let sid = SessionId::new();
        let frame = format!("EOF|{sid}[ZZZ]");
        let err = Frame::decode(&frame).unwrap_err();
        assert!(matches!(err, PipelineError::UnexpectedEofKind(_)));
    }

    #[test]
    fn rejects_metadata_arity_mismatch() {
        let err = Frame::decode("TRN|a,b[]").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame(_)));
    }

    #[test]
    fn rejects_unterminated_batch_group() {
        let sid = SessionId::new();
        let frame = format!("TRN|{sid}[\"a\":\"1\"]");
        let err = Frame::decode(&frame).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame(_)));
    }
}
