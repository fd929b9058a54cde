//! Clients: one attached connection and its two pumps.
//!
//! The inbound pump reads frames and forwards them to the room. The outbound
//! pump drains the client's mailbox onto the connection and keeps it alive
//! with pings. The room closing the mailbox is what stops the outbound side.
//! The only thing the pumps share is the mailbox's disconnect signal, which
//! fires when the room evicts the client or the outbound pump stops, and
//! makes the inbound pump stop reading.

use crate::mailbox::{self, Inbox, DEFAULT_MAILBOX_CAPACITY};
use crate::message::{coalesce, next_client_id, normalize, ClientId};
use crate::metrics;
use crate::room::{Member, Room, RoomError};
use parley_transport::{
    is_expected_close, Connection, ConnectionReader, ConnectionWriter, Incoming, TransportError,
};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Outbound payloads buffered before the room drops the client.
    pub mailbox_capacity: usize,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// How long the peer may stay silent before it is considered dead.
    pub pong_wait: Duration,
    /// Deadline for a single write.
    pub write_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_message_size: 512,
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Ping interval: nine tenths of the pong wait, so the peer always sees a
    /// ping before its deadline runs out. Never shorter than a millisecond.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        (self.pong_wait * 9 / 10).max(Duration::from_millis(1))
    }
}

/// Handles to the pumps of an attached client.
#[derive(Debug)]
pub struct ClientTasks {
    id: ClientId,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl ClientTasks {
    /// The client's id.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Wait until both pumps have finished.
    pub async fn wait(self) {
        let (inbound, outbound) = tokio::join!(self.inbound, self.outbound);
        if let Err(e) = inbound.and(outbound) {
            warn!(client = self.id, error = %e, "Client pump panicked");
        }
    }
}

/// Attach a connection to `room` as a new client.
///
/// Joins the room, then starts the inbound and outbound pumps on their own
/// tasks. The welcome notice is already queued for every member, the new
/// client included, when this returns.
///
/// # Errors
///
/// Returns [`RoomError::RoomClosed`] if the room's event loop is not running.
pub async fn attach(
    connection: Box<dyn Connection>,
    room: &Room,
    display_name: impl Into<String>,
    config: &ClientConfig,
) -> Result<ClientTasks, RoomError> {
    let id = next_client_id();
    let name = display_name.into();
    let remote = connection.remote_addr();
    let (outbox, inbox) = mailbox::channel(config.mailbox_capacity);

    room.join(Member::new(id, name.clone(), outbox)).await?;
    metrics::record_client_attached();
    debug!(room = %room.name(), client = id, name = %name, remote = ?remote, "Client attached");

    let (reader, writer) = connection.split();
    let disconnect = inbox.disconnect_token();
    let inbound = tokio::spawn(inbound_pump(
        reader,
        room.clone(),
        id,
        disconnect,
        config.clone(),
    ));
    let outbound = tokio::spawn(outbound_pump(writer, inbox, id, config.clone()));

    Ok(ClientTasks {
        id,
        inbound,
        outbound,
    })
}

/// Why the inbound pump stopped reading.
#[derive(Debug)]
enum ReadExit {
    Closed(Option<u16>),
    Failed(TransportError),
    Disconnected,
    RoomClosed,
}

async fn inbound_pump(
    mut reader: Box<dyn ConnectionReader>,
    room: Room,
    id: ClientId,
    disconnect: CancellationToken,
    config: ClientConfig,
) {
    let exit = read_loop(reader.as_mut(), &room, &disconnect, &config).await;

    match &exit {
        ReadExit::Closed(code) if is_expected_close(*code) => {
            debug!(room = %room.name(), client = id, code = ?code, "Connection closed");
        }
        ReadExit::Closed(code) => {
            warn!(room = %room.name(), client = id, code = ?code, "Connection closed unexpectedly");
            metrics::record_abnormal_close("close_code");
        }
        ReadExit::Failed(e) => {
            warn!(room = %room.name(), client = id, error = %e, "Connection read failed");
            metrics::record_abnormal_close(match e {
                TransportError::Timeout => "timeout",
                TransportError::MessageTooLarge { .. } => "too_large",
                _ => "receive",
            });
        }
        ReadExit::Disconnected => {
            debug!(room = %room.name(), client = id, "Connection dropped by the server");
        }
        ReadExit::RoomClosed => {
            debug!(room = %room.name(), client = id, "Room stopped while reading");
        }
    }

    if let Err(e) = room.leave(id).await {
        debug!(client = id, error = %e, "Leave not delivered");
    }
    drop(reader);
}

async fn read_loop(
    reader: &mut dyn ConnectionReader,
    room: &Room,
    disconnect: &CancellationToken,
    config: &ClientConfig,
) -> ReadExit {
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        // Checked first so an evicted client never gets another frame in.
        let read = tokio::select! {
            biased;
            () = disconnect.cancelled() => return ReadExit::Disconnected,
            read = time::timeout_at(deadline, reader.recv()) => read,
        };
        let frame = match read {
            Err(_) => return ReadExit::Failed(TransportError::Timeout),
            Ok(Err(e)) => return ReadExit::Failed(e),
            Ok(Ok(None)) => return ReadExit::Closed(None),
            Ok(Ok(Some(frame))) => frame,
        };

        match frame {
            Incoming::Pong => {
                deadline = Instant::now() + config.pong_wait;
            }
            Incoming::Close(code) => return ReadExit::Closed(code),
            Incoming::Message(data) => {
                if data.len() > config.max_message_size {
                    return ReadExit::Failed(TransportError::MessageTooLarge {
                        size: data.len(),
                        max: config.max_message_size,
                    });
                }
                metrics::record_inbound_message();
                if room.broadcast(normalize(&data)).await.is_err() {
                    return ReadExit::RoomClosed;
                }
            }
        }
    }
}

async fn outbound_pump(
    mut writer: Box<dyn ConnectionWriter>,
    mut inbox: Inbox,
    id: ClientId,
    config: ClientConfig,
) {
    if let Err(e) = write_loop(writer.as_mut(), &mut inbox, &config).await {
        debug!(client = id, error = %e, "Connection write failed");
    }
    inbox.disconnect();

    if let Err(e) = with_deadline(config.write_wait, writer.close()).await {
        trace!(client = id, error = %e, "Release after close");
    }
}

async fn write_loop(
    writer: &mut dyn ConnectionWriter,
    inbox: &mut Inbox,
    config: &ClientConfig,
) -> Result<(), TransportError> {
    let period = config.ping_period();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            payload = inbox.recv() => {
                let Some(first) = payload else {
                    debug!(aborted = inbox.is_aborted(), "Mailbox closed");
                    return with_deadline(config.write_wait, writer.send_close()).await;
                };

                let frame = coalesce(first, inbox.drain_queued());
                let len = frame.len();
                with_deadline(config.write_wait, writer.send_text(frame)).await?;
                metrics::record_frame_written(len);
            }
            _ = ticker.tick() => {
                with_deadline(config.write_wait, writer.send_ping()).await?;
            }
        }
    }
}

async fn with_deadline<F>(wait: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    time::timeout(wait, write)
        .await
        .map_err(|_| TransportError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Outbox;
    use crate::message::{left_notice, welcome_notice};
    use crate::room::RoomConfig;
    use bytes::Bytes;
    use parley_transport::memory::{self, MemoryPeer, Outgoing};

    fn started_room() -> Room {
        let (room, runner) = Room::new(1, "first", &RoomConfig::default());
        runner.spawn();
        room
    }

    async fn observe(room: &Room) -> Inbox {
        let (outbox, mut inbox) = mailbox::channel(64);
        room.join(Member::new(next_client_id(), "observer", outbox))
            .await
            .unwrap();
        assert_eq!(inbox.recv().await.unwrap(), welcome_notice("observer"));
        inbox
    }

    async fn connect(room: &Room, name: &str, config: &ClientConfig) -> (ClientTasks, MemoryPeer) {
        let (conn, peer) = memory::pair();
        let tasks = attach(Box::new(conn), room, name, config).await.unwrap();
        (tasks, peer)
    }

    async fn collect_frames(peer: &mut MemoryPeer) -> Vec<Outgoing> {
        let mut frames = Vec::new();
        while let Some(frame) = peer.next_frame().await {
            frames.push(frame);
        }
        frames
    }

    fn spawn_pump(config: &ClientConfig, capacity: usize) -> (Outbox, MemoryPeer) {
        let (outbox, inbox) = mailbox::channel(capacity);
        let (conn, peer) = memory::pair();
        let (_reader, writer) = Box::new(conn).split();
        tokio::spawn(outbound_pump(writer, inbox, 0, config.clone()));
        (outbox, peer)
    }

    /// Writer whose peer never reads: every write hangs.
    struct StalledWriter;

    #[async_trait::async_trait]
    impl ConnectionWriter for StalledWriter {
        async fn send_text(&mut self, _data: Bytes) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn send_ping(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn send_close(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_ping_period_is_nine_tenths_of_pong_wait() {
        let config = ClientConfig::default();
        assert_eq!(config.ping_period(), Duration::from_secs(54));

        let zero = ClientConfig {
            pong_wait: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert_eq!(zero.ping_period(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_inbound_payload_is_normalized() {
        let room = started_room();
        let mut observer = observe(&room).await;
        let (_tasks, peer) = connect(&room, "Bob", &ClientConfig::default()).await;
        assert_eq!(observer.recv().await.unwrap(), welcome_notice("Bob"));

        peer.send_text("  hello\nworld  \n").unwrap();
        assert_eq!(observer.recv().await.unwrap(), Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn test_close_frame_leaves_room_and_closes_connection() {
        let room = started_room();
        let mut observer = observe(&room).await;
        let (tasks, mut peer) = connect(&room, "Bob", &ClientConfig::default()).await;
        assert_eq!(observer.recv().await.unwrap(), welcome_notice("Bob"));

        peer.send_close(1000).unwrap();
        assert_eq!(observer.recv().await.unwrap(), left_notice("Bob"));
        tasks.wait().await;

        let frames = collect_frames(&mut peer).await;
        assert_eq!(frames.first().and_then(Outgoing::as_text), Some("welcome Bob to the room!"));
        assert_eq!(frames.last(), Some(&Outgoing::Close));
    }

    #[tokio::test]
    async fn test_hang_up_leaves_room() {
        let room = started_room();
        let mut observer = observe(&room).await;
        let (tasks, mut peer) = connect(&room, "Eve", &ClientConfig::default()).await;
        assert_eq!(observer.recv().await.unwrap(), welcome_notice("Eve"));

        peer.hang_up();
        assert_eq!(observer.recv().await.unwrap(), left_notice("Eve"));
        tasks.wait().await;
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects_client() {
        let room = started_room();
        let mut observer = observe(&room).await;
        let config = ClientConfig {
            max_message_size: 8,
            ..ClientConfig::default()
        };
        let (tasks, peer) = connect(&room, "Big", &config).await;
        assert_eq!(observer.recv().await.unwrap(), welcome_notice("Big"));

        peer.send_text("this is far too long").unwrap();
        assert_eq!(observer.recv().await.unwrap(), left_notice("Big"));
        tasks.wait().await;
    }

    #[tokio::test]
    async fn test_queued_payloads_are_coalesced_into_one_frame() {
        let config = ClientConfig::default();
        let (outbox, inbox) = mailbox::channel(8);
        for payload in ["a", "b", "c"] {
            outbox.try_push(Bytes::from(payload)).unwrap();
        }

        let (conn, mut peer) = memory::pair();
        let (_reader, writer) = Box::new(conn).split();
        let pump = tokio::spawn(outbound_pump(writer, inbox, 0, config));

        assert_eq!(peer.next_frame().await.unwrap().as_text(), Some("a\nb\nc"));

        outbox.close();
        assert_eq!(peer.next_frame().await, Some(Outgoing::Close));
        assert_eq!(peer.next_frame().await, None);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_graceful_close_drains_before_close_frame() {
        let (outbox, mut peer) = spawn_pump(&ClientConfig::default(), 8);
        outbox.try_push(Bytes::from("last words")).unwrap();
        outbox.close();

        let frames = collect_frames(&mut peer).await;
        assert_eq!(
            frames,
            vec![Outgoing::Text(Bytes::from("last words")), Outgoing::Close]
        );
    }

    #[tokio::test]
    async fn test_abort_skips_queued_payloads() {
        let (outbox, mut peer) = spawn_pump(&ClientConfig::default(), 8);
        // Abort before the pump gets a chance to read.
        outbox.try_push(Bytes::from("dropped")).unwrap();
        outbox.abort();

        assert_eq!(collect_frames(&mut peer).await, vec![Outgoing::Close]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_writer_is_released_after_write_wait() {
        let config = ClientConfig::default();
        let (outbox, inbox) = mailbox::channel(8);
        let disconnect = inbox.disconnect_token();
        outbox.try_push(Bytes::from("stuck")).unwrap();

        let start = Instant::now();
        let pump = tokio::spawn(outbound_pump(Box::new(StalledWriter), inbox, 0, config.clone()));
        time::timeout(Duration::from_secs(3600), pump)
            .await
            .expect("pump never released the connection")
            .unwrap();

        // One deadline for the stuck write, one for the release.
        assert!(start.elapsed() <= config.write_wait * 2);
        assert!(disconnect.is_cancelled());
        drop(outbox);
    }

    #[tokio::test]
    async fn test_evicted_client_cannot_post() {
        let room = started_room();
        let mut observer = observe(&room).await;
        let config = ClientConfig {
            mailbox_capacity: 1,
            ..ClientConfig::default()
        };
        let (tasks, mut peer) = connect(&room, "Slow", &config).await;
        assert_eq!(observer.recv().await.unwrap(), welcome_notice("Slow"));

        for payload in ["one", "two", "three"] {
            room.broadcast(payload).await.unwrap();
        }
        for payload in ["one", "two", "three"] {
            assert_eq!(observer.recv().await.unwrap(), Bytes::from(payload));
        }

        let frames = collect_frames(&mut peer).await;
        assert_eq!(frames.last(), Some(&Outgoing::Close));

        // The reading half may already be gone; either way nothing gets in.
        let _ = peer.send_text("ghost message");
        time::timeout(Duration::from_secs(5), tasks.wait())
            .await
            .expect("inbound pump kept reading after eviction");

        room.broadcast("after").await.unwrap();
        assert_eq!(observer.recv().await.unwrap(), Bytes::from("after"));
        assert!(observer.drain_queued().is_empty());
        assert_eq!(peer.try_next_frame(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_is_dropped_after_pong_wait() {
        let room = started_room();
        let mut observer = observe(&room).await;
        let (tasks, mut peer) = connect(&room, "Mute", &ClientConfig::default()).await;
        assert_eq!(observer.recv().await.unwrap(), welcome_notice("Mute"));

        let start = Instant::now();
        assert_eq!(observer.recv().await.unwrap(), left_notice("Mute"));
        assert!(start.elapsed() >= Duration::from_secs(59));
        tasks.wait().await;

        let frames = collect_frames(&mut peer).await;
        assert!(frames.contains(&Outgoing::Ping));
        assert_eq!(frames.last(), Some(&Outgoing::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_client_alive() {
        let room = started_room();
        let mut observer = observe(&room).await;
        let (_tasks, mut peer) = connect(&room, "Chatty", &ClientConfig::default()).await;
        assert_eq!(observer.recv().await.unwrap(), welcome_notice("Chatty"));

        tokio::spawn(async move {
            while let Some(frame) = peer.next_frame().await {
                if frame == Outgoing::Ping && peer.send_pong().is_err() {
                    break;
                }
            }
        });

        time::sleep(Duration::from_secs(200)).await;
        room.broadcast("still here").await.unwrap();
        assert_eq!(observer.recv().await.unwrap(), Bytes::from("still here"));
    }

    #[tokio::test]
    async fn test_attach_to_stopped_room_fails() {
        let (room, runner) = Room::new(9, "stopped", &RoomConfig::default());
        drop(runner);

        let (conn, _peer) = memory::pair();
        let result = attach(Box::new(conn), &room, "late", &ClientConfig::default()).await;
        assert!(matches!(result, Err(RoomError::RoomClosed(_))));
    }
}
