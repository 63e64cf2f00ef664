//! Thin terminal wiring: stdin lines feed the peer's `send` stream, `recv`
//! and `status` print as they arrive. Everything interesting happens in the
//! peer crates.

use bluetalk_dbus::Connection;
use bluetalk_peer::Peer;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let conn = match Connection::connect_system_bus().await {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("system bus connection failed: {err}");
            std::process::exit(1);
        }
    };

    let (peer, mut channels) = Peer::new(conn);
    tokio::spawn(peer.run());

    let send_tx = channels.send_tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = channels.recv_rx.recv() => match msg {
                    Some(msg) => println!("[peer] {msg}"),
                    None => break,
                },
                status = channels.status_rx.recv() => match status {
                    Some(status) => println!("[status] {status}"),
                    None => break,
                },
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim().to_owned();
                        if line.is_empty() {
                            continue;
                        }
                        if send_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}
