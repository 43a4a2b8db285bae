//! Framed-protocol parser (spec.md §4.5): decodes one already-deframed
//! frame (header + opaque body) produced by the streaming transport (C1).
//! Grounded on the original's `HttpMessageParser`/`WebSocketMessageParser`
//! split in `message_processor.hpp`; this module is the `WebSocket` half.

use crate::error::ParserError;

use super::message::{Body, SessionContext, UnifiedHeader, UnifiedMessage};

/// Frames above this size are rejected outright (spec.md §4.5 / §6).
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// A frame is a 4-byte big-endian header length, the JSON-encoded
/// [`UnifiedHeader`], then the opaque body — the "small manual codec"
/// spec.md §4.1 describes laid over `serde`.
pub fn parse_frame(
    raw: &[u8],
    session_id: &str,
    client_ip: &str,
    received_at: u64,
) -> Result<UnifiedMessage, ParserError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(ParserError::BodyTooLarge);
    }
    if raw.len() < 4 {
        return Err(ParserError::Decode("frame shorter than length prefix".to_string()));
    }

    let header_len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let rest = &raw[4..];
    if header_len > rest.len() {
        return Err(ParserError::Decode("header length exceeds frame".to_string()));
    }

    let (header_bytes, body_bytes) = rest.split_at(header_len);
    let mut header: UnifiedHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| ParserError::Decode(e.to_string()))?;

    if header.cmd_id == 0 {
        return Err(ParserError::ZeroCmdId);
    }
    if body_bytes.len() + header_bytes.len() > MAX_FRAME_BYTES {
        return Err(ParserError::BodyTooLarge);
    }

    header.timestamp = received_at;

    Ok(UnifiedMessage {
        header,
        body: Body::Structured(body_bytes.to_vec()),
        session_ctx: SessionContext::framed(session_id, client_ip, received_at),
    })
}

/// Inverse of [`parse_frame`]: lays a header + opaque body back into the
/// same length-delimited wire shape, used by the streaming transport (C1)
/// to write a handler's result back onto the session's send queue.
pub fn encode_frame(header: &UnifiedHeader, body: &[u8]) -> Result<Vec<u8>, ParserError> {
    let header_bytes = serde_json::to_vec(header).map_err(|e| ParserError::Decode(e.to_string()))?;
    if header_bytes.len() + body.len() > MAX_FRAME_BYTES {
        return Err(ParserError::BodyTooLarge);
    }
    let mut out = Vec::with_capacity(4 + header_bytes.len() + body.len());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(header: &UnifiedHeader, body: &[u8]) -> Vec<u8> {
        let header_bytes = serde_json::to_vec(header).unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn encode_frame_round_trips_through_parse_frame() {
        let header = UnifiedHeader::new(2001);
        let frame = encode_frame(&header, b"payload").unwrap();
        let msg = parse_frame(&frame, "s", "127.0.0.1", 0).unwrap();
        assert_eq!(msg.header.cmd_id, 2001);
        assert_eq!(msg.body.as_structured(), Some(&b"payload"[..]));
    }

    #[test]
    fn decodes_valid_frame() {
        let header = UnifiedHeader::new(2001);
        let frame = encode(&header, b"payload");
        let msg = parse_frame(&frame, "session_1", "127.0.0.1", 1000).unwrap();
        assert_eq!(msg.header.cmd_id, 2001);
        assert_eq!(msg.body.as_structured(), Some(&b"payload"[..]));
    }

    #[test]
    fn rejects_zero_cmd_id() {
        let header = UnifiedHeader::new(0);
        let frame = encode(&header, b"");
        assert!(matches!(
            parse_frame(&frame, "s", "127.0.0.1", 0),
            Err(ParserError::ZeroCmdId)
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let header = UnifiedHeader::new(1);
        let frame = encode(&header, &vec![0u8; MAX_FRAME_BYTES + 1]);
        assert!(matches!(
            parse_frame(&frame, "s", "127.0.0.1", 0),
            Err(ParserError::BodyTooLarge)
        ));
    }

    #[test]
    fn rejects_truncated_frame() {
        assert!(parse_frame(&[0, 0, 0], "s", "127.0.0.1", 0).is_err());
    }
}
