//! Message shaping for Parley.
//!
//! Inbound payloads are normalized to a single line before they reach a room,
//! and queued outbound payloads are joined into one frame by the writer.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// A client identifier, unique within the process.
pub type ClientId = u64;

/// Separator between coalesced payloads in one outbound frame.
pub const NEWLINE: u8 = b'\n';

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next client identifier.
#[must_use]
pub fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Collapse an inbound payload onto one line.
///
/// Every newline becomes a space, then surrounding ASCII whitespace is trimmed,
/// so a single frame can never read as several lines downstream.
#[must_use]
pub fn normalize(payload: &[u8]) -> Bytes {
    let replaced: Vec<u8> = payload
        .iter()
        .map(|&b| if b == NEWLINE { b' ' } else { b })
        .collect();
    Bytes::copy_from_slice(replaced.trim_ascii())
}

/// Join `first` and any further payloads into one newline-separated frame.
#[must_use]
pub fn coalesce(first: Bytes, rest: Vec<Bytes>) -> Bytes {
    if rest.is_empty() {
        return first;
    }

    let len = first.len() + rest.iter().map(|p| p.len() + 1).sum::<usize>();
    let mut frame = BytesMut::with_capacity(len);
    frame.put(first);
    for payload in rest {
        frame.put_u8(NEWLINE);
        frame.put(payload);
    }
    frame.freeze()
}

/// Notification fanned out when a member joins.
#[must_use]
pub fn welcome_notice(name: &str) -> Bytes {
    Bytes::from(format!("welcome {} to the room!", name))
}

/// Notification fanned out when a member leaves on its own.
#[must_use]
pub fn left_notice(name: &str) -> Bytes {
    Bytes::from(format!("{} left the room", name))
}
