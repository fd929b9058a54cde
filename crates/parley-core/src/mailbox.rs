//! Bounded per-client mailbox.
//!
//! The room loop owns the [`Outbox`] and the client's outbound pump owns the
//! [`Inbox`]. The outbox can be released two ways:
//!
//! - [`Outbox::close`]: the inbox yields what is already queued, then ends.
//! - [`Outbox::abort`]: the inbox ends at the next receive, queued payloads
//!   are discarded, and the connection's disconnect signal fires so the
//!   inbound pump stops reading too.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Why a non-blocking push failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The mailbox is at capacity.
    Full,
    /// The inbox has been dropped.
    Closed,
}

/// Create a mailbox holding at most `capacity` payloads.
#[must_use]
pub fn channel(capacity: usize) -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let aborted = Arc::new(AtomicBool::new(false));
    let disconnect = CancellationToken::new();
    (
        Outbox {
            tx,
            aborted: Arc::clone(&aborted),
            disconnect: disconnect.clone(),
        },
        Inbox {
            rx,
            aborted,
            disconnect,
        },
    )
}

/// Writing side of a mailbox.
#[derive(Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Bytes>,
    aborted: Arc<AtomicBool>,
    disconnect: CancellationToken,
}

impl Outbox {
    /// Enqueue without waiting.
    pub fn try_push(&self, payload: Bytes) -> Result<(), PushError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Release the mailbox, letting the reader drain what is queued.
    pub fn close(self) {
        drop(self);
    }

    /// Release the mailbox, discard what is queued and disconnect the client.
    pub fn abort(self) {
        self.aborted.store(true, Ordering::Release);
        self.disconnect.cancel();
        drop(self);
    }
}

/// Reading side of a mailbox.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Bytes>,
    aborted: Arc<AtomicBool>,
    disconnect: CancellationToken,
}

impl Inbox {
    /// Wait for the next payload.
    ///
    /// Returns `None` once the outbox is closed and drained, or immediately
    /// after an abort.
    pub async fn recv(&mut self) -> Option<Bytes> {
        let payload = self.rx.recv().await;
        if self.is_aborted() {
            self.rx.close();
            return None;
        }
        payload
    }

    /// Take every payload queued at this instant without waiting for more.
    pub fn drain_queued(&mut self) -> Vec<Bytes> {
        if self.is_aborted() {
            return Vec::new();
        }
        let queued = self.rx.len();
        let mut payloads = Vec::with_capacity(queued);
        for _ in 0..queued {
            match self.rx.try_recv() {
                Ok(payload) => payloads.push(payload),
                Err(_) => break,
            }
        }
        payloads
    }

    /// Signal that fires when the client must drop its connection.
    #[must_use]
    pub fn disconnect_token(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    /// Fire the disconnect signal.
    pub fn disconnect(&self) {
        self.disconnect.cancel();
    }

    /// Whether the room forcibly released this mailbox.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_reports_full() {
        let (outbox, _inbox) = channel(2);
        assert!(outbox.try_push(Bytes::from_static(b"1")).is_ok());
        assert!(outbox.try_push(Bytes::from_static(b"2")).is_ok());
        assert_eq!(outbox.try_push(Bytes::from_static(b"3")), Err(PushError::Full));
    }

    #[test]
    fn test_push_reports_closed() {
        let (outbox, inbox) = channel(2);
        drop(inbox);
        assert_eq!(outbox.try_push(Bytes::from_static(b"1")), Err(PushError::Closed));
    }

    #[tokio::test]
    async fn test_close_drains_queued() {
        let (outbox, mut inbox) = channel(4);
        outbox.try_push(Bytes::from_static(b"a")).unwrap();
        outbox.try_push(Bytes::from_static(b"b")).unwrap();
        outbox.close();

        assert_eq!(inbox.recv().await, Some(Bytes::from_static(b"a")));
        assert_eq!(inbox.recv().await, Some(Bytes::from_static(b"b")));
        assert_eq!(inbox.recv().await, None);
        assert!(!inbox.is_aborted());
        assert!(!inbox.disconnect_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_abort_discards_queued() {
        let (outbox, mut inbox) = channel(4);
        let disconnect = inbox.disconnect_token();
        outbox.try_push(Bytes::from_static(b"a")).unwrap();
        outbox.abort();
        assert!(disconnect.is_cancelled());

        assert!(inbox.drain_queued().is_empty());
        assert_eq!(inbox.recv().await, None);
        assert!(inbox.is_aborted());
    }

    #[tokio::test]
    async fn test_drain_takes_only_what_is_queued() {
        let (outbox, mut inbox) = channel(8);
        for payload in ["a", "b", "c"] {
            outbox.try_push(Bytes::from(payload)).unwrap();
        }

        assert_eq!(inbox.recv().await, Some(Bytes::from_static(b"a")));
        assert_eq!(
            inbox.drain_queued(),
            vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]
        );
        assert!(inbox.drain_queued().is_empty());
    }
}
