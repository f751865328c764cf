//! Integration tests for the session hub over real TCP connections
//!
//! These tests start a full server on an ephemeral port and talk to it the
//! way a client would.

use futures::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::network::Server;
use server::store::MemoryStore;
use shared::{Envelope, EnvelopeCodec, Packet, SessionId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(3);

type Client = Framed<TcpStream, EnvelopeCodec>;

async fn start_server(config: ServerConfig) -> SocketAddr {
    let server = Server::bind(config, Arc::new(MemoryStore::new()))
        .await
        .expect("server should start");
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        npc_count: 0,
        ..ServerConfig::default()
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, EnvelopeCodec::new())
}

/// Reads until an envelope matches, skipping everything else
async fn next_matching<F>(client: &mut Client, mut matches: F) -> Envelope
where
    F: FnMut(&Envelope) -> bool,
{
    timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Ok(envelope))) if matches(&envelope) => return envelope,
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("transport error: {}", e),
                None => panic!("server closed the connection"),
            }
        }
    })
    .await
    .expect("timed out waiting for envelope")
}

async fn send(client: &mut Client, sender_id: SessionId, packet: Packet) {
    client.send(Envelope::new(sender_id, packet)).await.unwrap();
}

/// Connects, reads the welcome and logs in; returns the client and its id
async fn login(addr: SocketAddr, name: &str, password: &str) -> (Client, SessionId) {
    let mut client = connect(addr).await;
    let welcome = next_matching(&mut client, |_| true).await;
    let id = match welcome.packet {
        Packet::Welcome { session_id, .. } => session_id,
        other => panic!("expected welcome first, got {:?}", other),
    };

    send(
        &mut client,
        0,
        Packet::Login {
            name: name.to_string(),
            password: password.to_string(),
        },
    )
    .await;
    next_matching(&mut client, |e| matches!(e.packet, Packet::LoginAccepted { .. })).await;
    (client, id)
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// The first frame on a new connection names the session
    #[tokio::test]
    async fn welcome_is_first_frame() {
        let addr = start_server(test_config()).await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;

        let a = next_matching(&mut first, |_| true).await;
        let b = next_matching(&mut second, |_| true).await;

        match (a.packet, b.packet) {
            (
                Packet::Welcome { session_id: a_id, .. },
                Packet::Welcome { session_id: b_id, .. },
            ) => {
                assert_ne!(a_id, b_id);
                assert_eq!(a.sender_id, a_id);
                assert_eq!(b.sender_id, b_id);
            }
            other => panic!("expected two welcomes, got {:?}", other),
        }
    }

    /// A peer disconnecting is announced exactly once
    #[tokio::test]
    async fn disconnect_announced_once() {
        let addr = start_server(test_config()).await;
        let (mut ada, _) = login(addr, "ada", "pw").await;
        let (bob, bob_id) = login(addr, "bob", "pw").await;

        next_matching(&mut ada, |e| {
            matches!(e.packet, Packet::PlayerJoined { id, .. } if id == bob_id)
        })
        .await;
        drop(bob);

        let left = next_matching(&mut ada, |e| matches!(e.packet, Packet::PlayerLeft { .. })).await;
        assert_eq!(left.packet, Packet::PlayerLeft { id: bob_id });

        // A marker round trip proves no second notice was queued before it
        send(&mut ada, 0, Packet::Move { dx: 0, dy: 0 }).await;
        let next = next_matching(&mut ada, |e| {
            matches!(e.packet, Packet::MoveRejected { .. } | Packet::PlayerLeft { .. })
        })
        .await;
        assert!(matches!(next.packet, Packet::MoveRejected { .. }));
    }

    /// Silent connections are closed after the idle timeout
    #[tokio::test]
    async fn idle_connection_is_closed() {
        let mut config = test_config();
        config.session.idle_timeout = Some(Duration::from_millis(100));
        let addr = start_server(config).await;
        let mut client = connect(addr).await;

        let bye = next_matching(&mut client, |e| matches!(e.packet, Packet::Disconnected { .. })).await;
        assert_eq!(
            bye.packet,
            Packet::Disconnected {
                reason: "idle timeout".to_string()
            }
        );
    }
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// A hand-built frame (big-endian length prefix + bincode body) is accepted
    #[tokio::test]
    async fn raw_frame_format() {
        let addr = start_server(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut body).await.unwrap();
        let welcome: Envelope = bincode::deserialize(&body).unwrap();
        assert!(matches!(welcome.packet, Packet::Welcome { .. }));

        let login = bincode::serialize(&Envelope::unsigned(Packet::Login {
            name: "raw".to_string(),
            password: "pw".to_string(),
        }))
        .unwrap();
        stream.write_all(&(login.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&login).await.unwrap();

        let mut client = Framed::new(stream, EnvelopeCodec::new());
        next_matching(&mut client, |e| matches!(e.packet, Packet::LoginAccepted { .. })).await;
    }

    /// An undecodable frame is skipped and the connection stays usable
    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let addr = start_server(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let garbage = [0xffu8; 7];
        stream.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&garbage).await.unwrap();

        let mut client = Framed::new(stream, EnvelopeCodec::new());
        next_matching(&mut client, |e| matches!(e.packet, Packet::Welcome { .. })).await;
        send(
            &mut client,
            0,
            Packet::Login {
                name: "still-here".to_string(),
                password: "pw".to_string(),
            },
        )
        .await;
        next_matching(&mut client, |e| matches!(e.packet, Packet::LoginAccepted { .. })).await;
    }
}

/// ROUTING TESTS
mod routing_tests {
    use super::*;

    /// Peers see chat from the real sender, whatever the client claimed
    #[tokio::test]
    async fn sender_is_stamped() {
        let addr = start_server(test_config()).await;
        let (mut ada, ada_id) = login(addr, "ada", "pw").await;
        let (mut bob, bob_id) = login(addr, "bob", "pw").await;

        send(&mut bob, 0, Packet::Chat { text: "unsigned".to_string() }).await;
        send(&mut bob, ada_id, Packet::Chat { text: "forged".to_string() }).await;

        for expected in ["unsigned", "forged"] {
            let heard = next_matching(&mut ada, |e| matches!(e.packet, Packet::Chat { .. })).await;
            assert_eq!(heard.sender_id, bob_id);
            assert_eq!(
                heard.packet,
                Packet::Chat {
                    text: expected.to_string()
                }
            );
        }
    }

    /// Whispers reach exactly one peer
    #[tokio::test]
    async fn whisper_reaches_one_peer() {
        let addr = start_server(test_config()).await;
        let (mut ada, ada_id) = login(addr, "ada", "pw").await;
        let (mut bob, _) = login(addr, "bob", "pw").await;
        let (mut cy, cy_id) = login(addr, "cy", "pw").await;
        next_matching(&mut cy, |e| {
            matches!(e.packet, Packet::PlayerJoined { id, .. } if id == cy_id)
        })
        .await;

        send(&mut ada, 0, Packet::Whisper { to: cy_id, text: "psst".to_string() }).await;
        send(&mut ada, 0, Packet::Chat { text: "all".to_string() }).await;

        let first = next_matching(&mut cy, |e| {
            matches!(e.packet, Packet::Whisper { .. } | Packet::Chat { .. })
        })
        .await;
        assert_eq!(first.sender_id, ada_id);
        assert!(matches!(first.packet, Packet::Whisper { .. }));

        let first = next_matching(&mut bob, |e| {
            matches!(e.packet, Packet::Whisper { .. } | Packet::Chat { .. })
        })
        .await;
        assert!(matches!(first.packet, Packet::Chat { .. }));
    }

    /// An administrator can kick a player off the server
    #[tokio::test]
    async fn admin_kick() {
        let addr = start_server(test_config()).await;
        let (mut admin, admin_id) = login(addr, "admin", "admin").await;
        let (mut ada, ada_id) = login(addr, "ada", "pw").await;

        send(
            &mut admin,
            0,
            Packet::Kick {
                target: ada_id,
                reason: "testing".to_string(),
            },
        )
        .await;

        let bye = next_matching(&mut ada, |e| matches!(e.packet, Packet::Disconnected { .. })).await;
        assert_eq!(
            bye.packet,
            Packet::Disconnected {
                reason: format!("kicked by {}: testing", admin_id)
            }
        );

        let result = next_matching(&mut admin, |e| matches!(e.packet, Packet::AdminResult { .. })).await;
        assert_eq!(
            result.packet,
            Packet::AdminResult {
                output: format!("kicked session {}", ada_id)
            }
        );
    }
}
