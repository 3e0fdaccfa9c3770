//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use email_gate::config::GatewayConfig;
use email_gate::{GatewayServer, Shutdown};

/// Start a mock upstream that answers every request with
/// `"<path> <x-user-email or ->"`.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        let head_end = loop {
                            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                                break pos + 4;
                            }
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        };

                        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
                        let content_length = head
                            .lines()
                            .filter_map(|l| l.split_once(':'))
                            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        // Drain the body so closing the socket does not reset the client.
                        while buf.len() < head_end + content_length {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }

                        let mut lines = head.lines();
                        let path = lines
                            .next()
                            .and_then(|l| l.split_whitespace().nth(1))
                            .unwrap_or("?")
                            .to_string();
                        let email = lines
                            .filter_map(|l| l.split_once(':'))
                            .find(|(k, _)| k.eq_ignore_ascii_case("x-user-email"))
                            .map(|(_, v)| v.trim().to_string())
                            .unwrap_or_else(|| "-".to_string());

                        let body = format!("{} {}", path, email);
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// A running gate plus the handles tests need to drive it.
pub struct RunningGate {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

/// Start the gate on an ephemeral port in front of `upstream`.
///
/// Returns the sender config updates can be pushed on.
pub async fn start_gate(
    upstream: SocketAddr,
    mut config: GatewayConfig,
) -> (RunningGate, mpsc::UnboundedSender<GatewayConfig>) {
    config.upstream.address = upstream.to_string();
    let (config_updates, rx) = mpsc::unbounded_channel();
    let gate = serve_gate(config, rx).await;
    (gate, config_updates)
}

/// Start the gate with `config` as given, taking updates from `updates`.
pub async fn serve_gate(
    mut config: GatewayConfig,
    updates: mpsc::UnboundedReceiver<GatewayConfig>,
) -> RunningGate {
    config.observability.metrics_enabled = false;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config).unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    RunningGate { addr, shutdown }
}

/// A local port with nothing listening on it.
pub fn dead_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
