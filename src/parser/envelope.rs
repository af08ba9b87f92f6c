//! Header-only message parsing.
//!
//! The reconciler needs a cheap per-message record: subject, sender,
//! message id, date, and (for the numbered layout) the conventional
//! `Status:`/`X-Status:` flag headers. Only the header segment is read,
//! bounded by the configured budget; the body is never parsed.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use mail_parser::MessageParser;

use crate::error::{MailboxError, Result};

/// The cheap per-message metadata extracted from a header segment.
#[derive(Debug, Default, Clone)]
pub struct Envelope {
    /// Decoded subject line (RFC 2047 encoded-words resolved).
    pub subject: String,
    /// Sender address (first `From:` header).
    pub from: String,
    /// The `Message-ID` header value, if present.
    pub message_id: String,
    /// Parsed `Date:` header.
    pub date: Option<DateTime<Utc>>,
    /// Raw `Status:` header value (mbox flag convention).
    pub status: Option<String>,
    /// Raw `X-Status:` header value (mbox flag convention).
    pub x_status: Option<String>,
}

/// Read at most `budget` bytes of `path` and return only the header
/// segment (up to and including the blank separator line, if one was
/// found within the budget).
pub fn read_header_block(path: &Path, budget: usize) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| MailboxError::io(path, e))?;
    let mut buf = Vec::with_capacity(budget.min(16 * 1024));
    file.take(budget as u64)
        .read_to_end(&mut buf)
        .map_err(|e| MailboxError::io(path, e))?;
    if let Some(end) = header_end(&buf) {
        buf.truncate(end);
    }
    Ok(buf)
}

/// Byte offset just past the header/body separator, handling both bare
/// LF and CRLF line endings. `None` if the buffer is all headers.
pub(crate) fn header_end(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            let rest = &buf[i + 1..];
            if rest.starts_with(b"\n") {
                return Some(i + 2);
            }
            if rest.starts_with(b"\r\n") {
                return Some(i + 3);
            }
        }
        i += 1;
    }
    None
}

/// Parse an envelope out of a header segment.
///
/// Unparseable input yields an empty envelope rather than an error; a
/// message with garbage headers still gets a record, just a bare one.
pub fn parse_envelope(header_bytes: &[u8]) -> Envelope {
    let (status, x_status) = status_headers(header_bytes);

    let mut envelope = Envelope {
        status,
        x_status,
        ..Envelope::default()
    };

    if let Some(msg) = MessageParser::default().parse(header_bytes) {
        envelope.subject = msg.subject().unwrap_or_default().to_string();
        envelope.from = msg
            .from()
            .and_then(|a| a.first())
            .and_then(|a| a.address())
            .unwrap_or_default()
            .to_string();
        envelope.message_id = msg.message_id().unwrap_or_default().to_string();
        envelope.date = msg
            .date()
            .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());
    }

    envelope
}

/// Extract the `Status:` and `X-Status:` header values with a plain line
/// scan. These are single-token ASCII headers; running them through the
/// full parser buys nothing.
fn status_headers(buf: &[u8]) -> (Option<String>, Option<String>) {
    let mut status = None;
    let mut x_status = None;
    for line in buf.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }
        if let Some(v) = header_value(line, b"status:") {
            status = Some(v);
        } else if let Some(v) = header_value(line, b"x-status:") {
            x_status = Some(v);
        }
    }
    (status, x_status)
}

fn header_value(line: &[u8], name: &[u8]) -> Option<String> {
    if line.len() < name.len() || !line[..name.len()].eq_ignore_ascii_case(name) {
        return None;
    }
    let value = &line[name.len()..];
    Some(String::from_utf8_lossy(value).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"From: User One <user1@example.com>\r\n\
Subject: Hello World\r\n\
Message-ID: <msg001@example.com>\r\n\
Date: Tue, 05 Aug 2025 10:00:00 +0000\r\n\
Status: RO\r\n\
X-Status: AF\r\n\
\r\n\
Body text that should be ignored.\r\n";

    #[test]
    fn parses_envelope_fields() {
        let env = parse_envelope(SAMPLE);
        assert_eq!(env.subject, "Hello World");
        assert_eq!(env.from, "user1@example.com");
        assert_eq!(env.message_id, "msg001@example.com");
        assert!(env.date.is_some());
    }

    #[test]
    fn extracts_status_headers_case_insensitively() {
        let env = parse_envelope(SAMPLE);
        assert_eq!(env.status.as_deref(), Some("RO"));
        assert_eq!(env.x_status.as_deref(), Some("AF"));

        let lower = parse_envelope(b"status: r\nx-status: f\n\n");
        assert_eq!(lower.status.as_deref(), Some("r"));
        assert_eq!(lower.x_status.as_deref(), Some("f"));
    }

    #[test]
    fn header_end_handles_both_line_endings() {
        assert_eq!(header_end(b"A: 1\n\nbody"), Some(6));
        assert_eq!(header_end(b"A: 1\r\n\r\nbody"), Some(8));
        assert_eq!(header_end(b"A: 1\nB: 2\n"), None);
    }

    #[test]
    fn garbage_yields_empty_envelope() {
        let env = parse_envelope(&[0xff, 0xfe, 0x00, 0x01]);
        assert!(env.subject.is_empty());
        assert!(env.date.is_none());
    }
}
