//! Demultiplexing of attached container streams.
//!
//! When a container or exec runs without a TTY the engine interleaves stdout
//! and stderr in one byte stream, each chunk prefixed by an 8-byte header:
//!
//! ```text
//! [stream: u8][0][0][0][len: u32 big-endian][payload; len]
//! ```
//!
//! `stream` is 0 (stdin), 1 (stdout) or 2 (stderr). A TTY stream has no
//! framing at all.

use crate::types::Output;

const HEADER_LEN: usize = 8;

/// Split a raw attach/logs stream into stdout and stderr.
///
/// Input that does not start with a valid frame header is returned verbatim
/// as stdout. A truncated trailing frame keeps whatever payload arrived.
pub fn demux(raw: &[u8]) -> Output {
    let mut out = Output::default();
    if !looks_framed(raw) {
        out.stdout.extend_from_slice(raw);
        return out;
    }

    let mut rest = raw;
    while rest.len() >= HEADER_LEN {
        let stream = rest[0];
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let body = &rest[HEADER_LEN..];
        let take = len.min(body.len());
        match stream {
            2 => out.stderr.extend_from_slice(&body[..take]),
            _ => out.stdout.extend_from_slice(&body[..take]),
        }
        rest = &body[take..];
    }
    out
}

fn looks_framed(raw: &[u8]) -> bool {
    raw.len() >= HEADER_LEN && raw[0] <= 2 && raw[1..4] == [0, 0, 0]
}
