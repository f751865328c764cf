//! Transport adapter: the read/write/close contract a session relies on.
//!
//! A [`Connection`] is a decoded frame stream plus an envelope sink. The
//! session never sees sockets; it only pulls `Result<Envelope, TransportError>`
//! items and pushes envelopes, and closing is dropping both halves.

use futures::channel::mpsc as chan;
use futures::{Sink, SinkExt, Stream, StreamExt};
use shared::{Envelope, EnvelopeCodec, TransportError};
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Envelope, TransportError>> + Send>>;
pub type FrameSink = Pin<Box<dyn Sink<Envelope, Error = TransportError> + Send>>;

pub struct Connection {
    pub peer: String,
    pub reader: FrameStream,
    pub writer: FrameSink,
}

/// The far side of an in-memory connection.
///
/// `inbound` feeds frames to the session as if a client had sent them;
/// `outbound` yields whatever the session's write pump delivers.
pub struct RemoteEnd {
    pub inbound: chan::Sender<Result<Envelope, TransportError>>,
    pub outbound: chan::Receiver<Envelope>,
}

impl RemoteEnd {
    /// Queues a frame for the session's read pump.
    pub fn push(&mut self, envelope: Envelope) -> bool {
        self.inbound.try_send(Ok(envelope)).is_ok()
    }

    /// Next envelope written by the session, or `None` once it has closed.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.outbound.next().await
    }
}

impl Connection {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, write_half) = stream.into_split();

        let reader = FramedRead::new(read_half, EnvelopeCodec::new())
            .map(|frame| frame.and_then(|decoded| decoded));
        let writer = FramedWrite::new(write_half, EnvelopeCodec::new());

        Self {
            peer,
            reader: Box::pin(reader),
            writer: Box::pin(writer),
        }
    }

    /// A connection backed by channels instead of a socket.
    ///
    /// Used for server-driven sessions (NPCs) and in tests.
    pub fn in_memory(capacity: usize) -> (Self, RemoteEnd) {
        let (inbound_tx, inbound_rx) = chan::channel(capacity);
        let (outbound_tx, outbound_rx) = chan::channel(capacity);

        let writer = outbound_tx.sink_map_err(|_| TransportError::Closed);

        let connection = Self {
            peer: "in-memory".to_string(),
            reader: Box::pin(inbound_rx),
            writer: Box::pin(writer),
        };
        let remote = RemoteEnd {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (connection, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Packet;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let (mut connection, mut remote) = Connection::in_memory(4);

        assert!(remote.push(Envelope::unsigned(Packet::Logout)));
        let received = connection.reader.next().await.unwrap().unwrap();
        assert_eq!(received.packet, Packet::Logout);

        connection
            .writer
            .send(Envelope::new(1, Packet::Notice { text: "hi".into() }))
            .await
            .unwrap();
        let sent = remote.next().await.unwrap();
        assert_eq!(sent.sender_id, 1);
    }

    #[tokio::test]
    async fn test_in_memory_close_ends_remote_stream() {
        let (connection, mut remote) = Connection::in_memory(4);
        drop(connection);

        assert!(remote.next().await.is_none());
        assert!(!remote.push(Envelope::unsigned(Packet::Logout)));
    }

    #[tokio::test]
    async fn test_dropped_remote_fails_writes() {
        let (mut connection, remote) = Connection::in_memory(4);
        drop(remote);

        let result = connection.writer.send(Envelope::unsigned(Packet::Logout)).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(connection.reader.next().await.is_none());
    }
}
