use super::constants::MSG_END_DELIMITER;
use super::frame::Frame;
use crate::error::PipelineError;

/// Splits an incoming byte stream into complete frames.
///
/// An incoming stream may contain multiple concatenated frames; bytes are
/// buffered until at least one `MSG_END_DELIMITER` appears, each complete
/// frame (delimiter re-appended) is decoded, and any partial trailing
/// fragment is retained for the next call (spec §4.1).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-read bytes in and decode every complete frame they produce.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, PipelineError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| PipelineError::MalformedFrame("non-utf8 bytes on wire".into()))?;
        self.buffer.push_str(text);
        self.drain()
    }

    fn drain(&mut self) -> Result<Vec<Frame>, PipelineError> {
        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find(MSG_END_DELIMITER) {
            let frame_str: String = self.buffer.drain(..=end).collect();
            frames.push(Frame::decode(&frame_str)?);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::ALL_QUERIES;
    use crate::protocol::frame::Frame;

    #[test]
    fn decodes_multiple_concatenated_frames_in_one_push() {
        let f1 = Frame::Handshake {
            id: "c1".into(),
            payload: ALL_QUERIES.into(),
        };
        let f2 = Frame::Handshake {
            id: "c2".into(),
            payload: ALL_QUERIES.into(),
        };
        let mut stream = f1.encode();
        stream.push_str(&f2.encode());

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(stream.as_bytes()).unwrap();
        assert_eq!(frames, vec![f1, f2]);
    }

    #[test]
    fn retains_partial_trailing_fragment_across_pushes() {
        let f = Frame::Handshake {
            id: "c1".into(),
            payload: ALL_QUERIES.into(),
        };
        let encoded = f.encode();
        let (head, tail) = encoded.split_at(encoded.len() - 2);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(head.as_bytes()).unwrap();
        assert!(frames.is_empty());

        let frames = decoder.push(tail.as_bytes()).unwrap();
        assert_eq!(frames, vec![f]);
    }
}
