//! V8DP transport layer: Content-Length based framing.
//!
//! The debuggee writes a header block terminated by `\r\n\r\n` followed by
//! exactly `Content-Length` bytes of JSON. The very first frame after
//! connecting is a handshake with extra headers (`Type: connect`, `V8-Version`)
//! and an empty body; empty bodies are consumed and skipped.

use serde_json::Value;

use crate::error::V8Error;

const HEADER_END: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length:";

/// Largest body the decoder will wait for.
pub const MAX_FRAME_LENGTH: usize = 512 * 1024 * 1024;

/// Encode a JSON value into a V8DP frame.
pub fn encode_frame(value: &Value) -> Vec<u8> {
    let body = value.to_string();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf
}

/// Incremental frame decoder.
///
/// Bytes are appended with [`push`](Self::push) as they arrive; complete
/// frames are taken out with [`next_frame`](Self::next_frame) until it yields
/// `None`. A frame split across any number of reads is reassembled exactly
/// once.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete frame.
    ///
    /// Returns `None` when more bytes are needed, `Some(Ok(value))` for a
    /// frame, and `Some(Err(MalformedFrame))` for a frame that was consumed
    /// but could not be used. Decoding can continue after an error.
    pub fn next_frame(&mut self) -> Option<Result<Value, V8Error>> {
        loop {
            let header_end = find(&self.buf, HEADER_END)?;
            let body_start = header_end + HEADER_END.len();

            let frame_end = parse_content_length(&self.buf[..header_end]).and_then(|length| {
                if length > MAX_FRAME_LENGTH {
                    return Err(V8Error::MalformedFrame(format!(
                        "Content-Length {length} exceeds {MAX_FRAME_LENGTH}"
                    )));
                }
                body_start.checked_add(length).ok_or_else(|| {
                    V8Error::MalformedFrame(format!("Content-Length {length} overflows"))
                })
            });
            let frame_end = match frame_end {
                Ok(end) => end,
                Err(e) => {
                    self.buf.drain(..body_start);
                    return Some(Err(e));
                }
            };

            if self.buf.len() < frame_end {
                return None;
            }

            let frame: Vec<u8> = self.buf.drain(..frame_end).collect();
            let length = frame_end - body_start;
            if length == 0 {
                tracing::trace!("skipping empty v8dp frame");
                continue;
            }

            let body = &frame[body_start..];
            return Some(
                serde_json::from_slice(body)
                    .map_err(|e| V8Error::MalformedFrame(format!("JSON parse error: {e}"))),
            );
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header: &[u8]) -> Result<usize, V8Error> {
    let header = std::str::from_utf8(header)
        .map_err(|e| V8Error::MalformedFrame(format!("header is not UTF-8: {e}")))?;
    for line in header.split("\r\n") {
        let line = line.trim();
        let is_length = line
            .get(..CONTENT_LENGTH.len())
            .is_some_and(|name| name.eq_ignore_ascii_case(CONTENT_LENGTH));
        if is_length {
            let value = line[CONTENT_LENGTH.len()..].trim();
            return value.parse::<usize>().map_err(|e| {
                V8Error::MalformedFrame(format!("invalid Content-Length value '{value}': {e}"))
            });
        }
    }
    Err(V8Error::MalformedFrame("missing Content-Length header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Result<Value, V8Error>> {
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    #[test]
    fn encode_frame_has_byte_length_header() {
        let value = json!({"text": "h\u{e9}llo"});
        let encoded = encode_frame(&value);
        let text = String::from_utf8(encoded.clone()).unwrap();
        let body = value.to_string();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));
        assert_eq!(body.len(), body.chars().count() + 1);
    }

    #[test]
    fn decode_single_frame() {
        let value = json!({"seq": 1, "type": "event", "event": "break"});
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_frame(&value));
        let frames = decode_all(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &value);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decode_multiple_frames_in_one_read() {
        let a = json!({"seq": 1});
        let b = json!({"seq": 2, "body": {"x": [1, 2, 3]}});
        let mut bytes = encode_frame(&a);
        bytes.extend(encode_frame(&b));

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let frames: Vec<Value> = decode_all(&mut decoder)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn every_chunk_split_reassembles_each_frame_once() {
        let values = vec![
            json!({"seq": 1, "type": "response", "request_seq": 1, "success": true}),
            json!({"seq": 2, "type": "event", "event": "afterCompile", "body": {"name": "\u{2603}.js"}}),
            json!({"seq": 3, "type": "response", "request_seq": 2, "body": "x".repeat(40)}),
        ];
        let mut bytes = Vec::new();
        for value in &values {
            bytes.extend(encode_frame(value));
        }

        for chunk in 1..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut out = Vec::new();
            for piece in bytes.chunks(chunk) {
                decoder.push(piece);
                out.extend(decode_all(&mut decoder).into_iter().map(Result::unwrap));
            }
            assert_eq!(out, values, "chunk size {chunk}");
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn split_at_every_offset_reassembles_once() {
        let value = json!({"seq": 9, "command": "backtrace"});
        let bytes = encode_frame(&value);
        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            decoder.push(&bytes[..split]);
            let mut out = decode_all(&mut decoder);
            decoder.push(&bytes[split..]);
            out.extend(decode_all(&mut decoder));
            assert_eq!(out.len(), 1, "split at {split}");
            assert_eq!(out[0].as_ref().unwrap(), &value);
        }
    }

    #[test]
    fn handshake_header_is_skipped() {
        let handshake = b"Type: connect\r\nV8-Version: 3.28.71\r\nProtocol-Version: 1\r\nEmbedding-Host: node v0.12.0\r\nContent-Length: 0\r\n\r\n";
        let value = json!({"seq": 1});
        let mut decoder = FrameDecoder::new();
        decoder.push(handshake);
        decoder.push(&encode_frame(&value));
        let frames = decode_all(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &value);
    }

    #[test]
    fn missing_content_length_is_dropped_and_decoding_continues() {
        let value = json!({"ok": true});
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Bad-Header: 42\r\n\r\n");
        decoder.push(&encode_frame(&value));
        let frames = decode_all(&mut decoder);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(V8Error::MalformedFrame(_))));
        assert_eq!(frames[1].as_ref().unwrap(), &value);
    }

    #[test]
    fn oversized_content_length_is_dropped_and_decoding_continues() {
        let value = json!({"ok": true});
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: 18446744073709551615\r\n\r\n");
        decoder.push(&encode_frame(&value));
        let frames = decode_all(&mut decoder);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(V8Error::MalformedFrame(_))));
        assert_eq!(frames[1].as_ref().unwrap(), &value);

        decoder.push(format!("Content-Length: {}\r\n\r\n{{}}", MAX_FRAME_LENGTH + 1).as_bytes());
        assert!(matches!(decoder.next_frame(), Some(Err(V8Error::MalformedFrame(_)))));
    }

    #[test]
    fn invalid_json_body_is_malformed() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: 5\r\n\r\n{oops");
        decoder.push(&encode_frame(&json!(1)));
        let frames = decode_all(&mut decoder);
        assert!(matches!(frames[0], Err(V8Error::MalformedFrame(_))));
        assert_eq!(frames[1].as_ref().unwrap(), &json!(1));
    }

    #[test]
    fn incomplete_body_waits_for_more_bytes() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: 14\r\n\r\n{\"short\":");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"true}");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), json!({"short": true}));
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"content-length: 2\r\n\r\n{}");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), json!({}));
    }
}
