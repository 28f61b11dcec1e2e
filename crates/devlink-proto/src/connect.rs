//! Connect-Tunnel handshake parsing.
//!
//! An inbound connection names its target in one of two ways:
//!
//! * a request line `CONNECT <prefix>-<name> HTTP/1.1`, rewritten to
//!   `CONNECT <prefix> HTTP/1.1` by removing `-<name>`;
//! * a header line `X-Worker: <name>`, removed entirely.
//!
//! Every other byte in the buffer is left untouched.

use std::ops::Range;

use devlink_core::{validate_name, CoreError, Result};

/// Upper bound on bytes buffered while looking for a target name.
pub const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

pub const WORKER_HEADER: &str = "X-Worker";

const CRLF: &[u8] = b"\r\n";
const CONNECT_METHOD: &[u8] = b"CONNECT ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    Connect,
    WorkerHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTarget {
    pub name: String,
    pub kind: HandshakeKind,
    /// The buffered bytes with `removed` cut out.
    pub rewritten: Vec<u8>,
    /// Byte range of the original buffer that carried the name.
    pub removed: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// More bytes are needed before a decision can be made.
    Incomplete,
    Extracted(ExtractedTarget),
}

fn malformed(reason: impl Into<String>) -> CoreError {
    CoreError::TunnelHandshakeMalformed(reason.into())
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(CRLF.len())
        .position(|window| window == CRLF)
        .map(|offset| from + offset)
}

/// Inspects the bytes received so far.
///
/// Returns `Incomplete` until either a matching `CONNECT` line or a complete
/// `X-Worker` header line is buffered. Fails once the header block ends
/// without a name or the buffer exceeds [`MAX_HANDSHAKE_BYTES`].
pub fn parse_handshake(buf: &[u8], prefix: &str) -> Result<HandshakeOutcome> {
    let Some(line_end) = find_crlf(buf, 0) else {
        return incomplete_or_overflow(buf);
    };

    if let Some(target) = extract_connect(buf, line_end, prefix)? {
        return Ok(HandshakeOutcome::Extracted(target));
    }

    let mut line_start = line_end + CRLF.len();
    loop {
        let Some(line_end) = find_crlf(buf, line_start) else {
            return incomplete_or_overflow(buf);
        };
        if line_end == line_start {
            return Err(malformed("no CONNECT target or X-Worker header before end of headers"));
        }

        let line = &buf[line_start..line_end];
        if let Some(name) = worker_header_value(line)? {
            let removed = line_start..line_end + CRLF.len();
            return Ok(HandshakeOutcome::Extracted(ExtractedTarget {
                name,
                kind: HandshakeKind::WorkerHeader,
                rewritten: splice_out(buf, &removed),
                removed,
            }));
        }
        line_start = line_end + CRLF.len();
    }
}

fn incomplete_or_overflow(buf: &[u8]) -> Result<HandshakeOutcome> {
    if buf.len() > MAX_HANDSHAKE_BYTES {
        Err(malformed(format!(
            "no target name within the first {MAX_HANDSHAKE_BYTES} bytes"
        )))
    } else {
        Ok(HandshakeOutcome::Incomplete)
    }
}

fn extract_connect(buf: &[u8], line_end: usize, prefix: &str) -> Result<Option<ExtractedTarget>> {
    let line = &buf[..line_end];
    if !line.starts_with(CONNECT_METHOD) {
        return Ok(None);
    }

    let target_start = CONNECT_METHOD.len();
    let target_len = line[target_start..]
        .iter()
        .position(|byte| *byte == b' ')
        .unwrap_or(line.len() - target_start);
    let target = &line[target_start..target_start + target_len];

    let marker_len = prefix.len() + 1;
    if target.len() <= marker_len
        || !target.starts_with(prefix.as_bytes())
        || target[prefix.len()] != b'-'
    {
        // Not ours; the name may still arrive as a header.
        return Ok(None);
    }

    let name = std::str::from_utf8(&target[marker_len..])
        .map_err(|_| malformed("CONNECT target is not valid UTF-8"))?;
    validate_name(name).map_err(|error| malformed(error.to_string()))?;

    let removed = target_start + prefix.len()..target_start + target_len;
    Ok(Some(ExtractedTarget {
        name: name.to_string(),
        kind: HandshakeKind::Connect,
        rewritten: splice_out(buf, &removed),
        removed,
    }))
}

fn worker_header_value(line: &[u8]) -> Result<Option<String>> {
    let Some(colon) = line.iter().position(|byte| *byte == b':') else {
        return Ok(None);
    };
    if !line[..colon].eq_ignore_ascii_case(WORKER_HEADER.as_bytes()) {
        return Ok(None);
    }

    let value = std::str::from_utf8(&line[colon + 1..])
        .map_err(|_| malformed("X-Worker header is not valid UTF-8"))?
        .trim();
    validate_name(value).map_err(|error| malformed(error.to_string()))?;
    Ok(Some(value.to_string()))
}

fn splice_out(buf: &[u8], removed: &Range<usize>) -> Vec<u8> {
    let mut rewritten = Vec::with_capacity(buf.len() - removed.len());
    rewritten.extend_from_slice(&buf[..removed.start]);
    rewritten.extend_from_slice(&buf[removed.end..]);
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn extracted(outcome: Result<HandshakeOutcome>) -> ExtractedTarget {
        match outcome {
            Ok(HandshakeOutcome::Extracted(target)) => target,
            other => panic!("expected extraction, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_line_is_rewritten_and_payload_kept() {
        let buf = b"CONNECT proxyname-worker-123 HTTP/1.1\r\nHost: x\r\n\r\n\x00\x01capnp";
        let target = extracted(parse_handshake(buf, "proxyname"));

        assert_eq!(target.name, "worker-123");
        assert_eq!(target.kind, HandshakeKind::Connect);
        assert_eq!(
            target.rewritten,
            b"CONNECT proxyname HTTP/1.1\r\nHost: x\r\n\r\n\x00\x01capnp".to_vec()
        );
        assert_eq!(buf.len() - target.rewritten.len(), "-worker-123".len());
    }

    #[test]
    fn test_worker_header_line_is_removed() {
        let buf = b"GET /api HTTP/1.1\r\nHost: localhost\r\nx-worker: billing\r\nAccept: */*\r\n\r\nbody";
        let target = extracted(parse_handshake(buf, "proxyname"));

        assert_eq!(target.name, "billing");
        assert_eq!(target.kind, HandshakeKind::WorkerHeader);
        assert_eq!(
            target.rewritten,
            b"GET /api HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\nbody".to_vec()
        );
    }

    #[test]
    fn test_partial_input_is_incomplete() {
        assert_eq!(
            parse_handshake(b"CONNECT proxyname-wor", "proxyname").unwrap(),
            HandshakeOutcome::Incomplete
        );
        assert_eq!(
            parse_handshake(b"GET / HTTP/1.1\r\nX-Worker: bill", "proxyname").unwrap(),
            HandshakeOutcome::Incomplete
        );
    }

    #[test]
    fn test_connect_with_foreign_prefix_falls_back_to_header() {
        let buf = b"CONNECT other-thing HTTP/1.1\r\nX-Worker: billing\r\n\r\n";
        let target = extracted(parse_handshake(buf, "proxyname"));
        assert_eq!(target.name, "billing");
        assert_eq!(target.kind, HandshakeKind::WorkerHeader);
    }

    #[test]
    fn test_headers_without_name_are_malformed() {
        let result = parse_handshake(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", "proxyname");
        assert!(matches!(result, Err(CoreError::TunnelHandshakeMalformed(_))));

        let result = parse_handshake(b"CONNECT proxyname- HTTP/1.1\r\n\r\n", "proxyname");
        assert!(matches!(result, Err(CoreError::TunnelHandshakeMalformed(_))));

        let result = parse_handshake(b"GET / HTTP/1.1\r\nX-Worker: a/b\r\n\r\n", "proxyname");
        assert!(matches!(result, Err(CoreError::TunnelHandshakeMalformed(_))));
    }

    #[test]
    fn test_oversized_handshake_is_malformed() {
        let buf = vec![b'a'; MAX_HANDSHAKE_BYTES + 1];
        assert!(parse_handshake(&buf, "proxyname").is_err());
    }

    proptest! {
        #[test]
        fn property_connect_rewrite_removes_exactly_the_name_token(
            prefix in "[a-z]{1,12}",
            name in "[a-z0-9][a-z0-9-]{0,30}",
            payload in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut buf = format!("CONNECT {prefix}-{name} HTTP/1.1\r\n").into_bytes();
            buf.extend_from_slice(&payload);

            let target = extracted(parse_handshake(&buf, &prefix));
            let request_line = format!("CONNECT {prefix} HTTP/1.1\r\n");

            prop_assert_eq!(&target.name, &name);
            prop_assert_eq!(buf.len() - target.rewritten.len(), name.len() + 1);
            prop_assert!(target.rewritten.starts_with(request_line.as_bytes()));
            prop_assert_eq!(&target.rewritten[request_line.len()..], payload.as_slice());
        }

        #[test]
        fn property_worker_header_rewrite_keeps_other_bytes(
            name in "[a-z][a-z0-9-]{0,30}",
            body in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let head = b"POST /rpc HTTP/1.1\r\nHost: localhost\r\n".to_vec();
            let header = format!("X-Worker: {name}\r\n").into_bytes();
            let tail = b"Content-Type: application/json\r\n\r\n".to_vec();
            let buf = [head.clone(), header.clone(), tail.clone(), body.clone()].concat();

            let target = extracted(parse_handshake(&buf, "proxyname"));

            prop_assert_eq!(target.rewritten, [head, tail, body].concat());
            prop_assert_eq!(target.removed.len(), header.len());
        }
    }
}
