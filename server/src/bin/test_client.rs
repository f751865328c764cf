use clap::Parser;
use futures::{SinkExt, StreamExt};
use shared::{get_timestamp, Envelope, EnvelopeCodec, Packet};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;

/// Logs in, says a few things, walks around and prints everything it receives
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    #[arg(short = 'u', long, default_value = "tester")]
    name: String,

    #[arg(short = 'p', long, default_value = "secret")]
    password: String,

    /// Number of chat/move rounds to send
    #[arg(short = 'r', long, default_value = "5")]
    rounds: u32,
}

type Connection = Framed<TcpStream, EnvelopeCodec>;

async fn send(framed: &mut Connection, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
    println!("-> {:?}", packet);
    framed.send(Envelope::unsigned(packet)).await?;
    Ok(())
}

/// Prints whatever arrives within `window`; false once the server hung up
async fn drain(framed: &mut Connection, window: Duration) -> bool {
    loop {
        match timeout(window, framed.next()).await {
            Ok(Some(Ok(Ok(envelope)))) => {
                println!("<- [{}] {:?}", envelope.sender_id, envelope.packet)
            }
            Ok(Some(Ok(Err(e)))) => println!("<- malformed frame: {}", e),
            Ok(Some(Err(e))) => {
                println!("Connection error: {}", e);
                return false;
            }
            Ok(None) => {
                println!("Server closed the connection");
                return false;
            }
            Err(_) => return true,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let stream = TcpStream::connect(&args.server).await?;
    let mut framed = Framed::new(stream, EnvelopeCodec::new());

    match framed.next().await {
        Some(Ok(Ok(envelope))) => println!("<- [{}] {:?}", envelope.sender_id, envelope.packet),
        other => {
            println!("Expected a welcome, got {:?}", other);
            return Ok(());
        }
    }

    send(
        &mut framed,
        Packet::Login {
            name: args.name.clone(),
            password: args.password.clone(),
        },
    )
    .await?;
    if !drain(&mut framed, Duration::from_millis(500)).await {
        return Ok(());
    }

    for round in 0..args.rounds {
        send(&mut framed, Packet::Heartbeat { timestamp: get_timestamp() }).await?;
        send(
            &mut framed,
            Packet::Chat {
                text: format!("hello #{} from {}", round + 1, args.name),
            },
        )
        .await?;
        let dx = if round % 2 == 0 { 1 } else { -1 };
        send(&mut framed, Packet::Move { dx, dy: 0 }).await?;

        if !drain(&mut framed, Duration::from_secs(1)).await {
            return Ok(());
        }
        sleep(Duration::from_millis(200)).await;
    }

    send(&mut framed, Packet::Logout).await?;
    drain(&mut framed, Duration::from_millis(500)).await;
    println!("Test client finished");

    Ok(())
}
