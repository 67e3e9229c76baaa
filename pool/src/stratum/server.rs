/// Stratum TCP server
///
/// Newline-delimited JSON-RPC over TCP. Each connection gets a uuid session
/// id, one writer task fed by both responses and job notifications, and is
/// handed to the coordinator on open and on close.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::coordinator::StratumCoordinator;
use super::protocol::{JobNotification, StratumError, StratumRequest, StratumResponse};
use crate::metrics::prometheus as metrics;

const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub struct StratumServer {
    listen: String,
    max_connections: usize,
    coordinator: Arc<StratumCoordinator>,
    connection_count: AtomicUsize,
}

impl StratumServer {
    pub fn new(listen: &str, max_connections: usize, coordinator: Arc<StratumCoordinator>) -> Self {
        Self {
            listen: listen.to_string(),
            max_connections,
            coordinator,
            connection_count: AtomicUsize::new(0),
        }
    }

    /// Bind with SO_REUSEADDR so restarts don't trip over TIME_WAIT sockets.
    pub fn bind(&self) -> Result<TcpListener> {
        let sock_addr: SocketAddr = self
            .listen
            .parse()
            .map_err(|e| anyhow!("Invalid address '{}': {}", self.listen, e))?;
        let domain = if sock_addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };
        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&socket2::SockAddr::from(sock_addr))?;
        socket.listen(1024)?;
        let std_listener: std::net::TcpListener = socket.into();
        Ok(TcpListener::from_std(std_listener)?)
    }

    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = self.bind()?;
        tracing::info!("Stratum server listening on {}", self.listen);
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((mut socket, peer_addr)) => {
                    if !self.reserve_slot() {
                        tracing::warn!(
                            "Max connections ({}) reached, rejecting {}",
                            self.max_connections,
                            peer_addr
                        );
                        let _ = socket.shutdown().await;
                        continue;
                    }
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(socket, peer_addr).await {
                            tracing::warn!("Connection error from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => tracing::error!("Failed to accept connection: {}", e),
            }
        }
    }

    /// Claims a connection slot before the connection task is spawned, so a
    /// burst of accepts cannot overshoot the limit.
    fn reserve_slot(&self) -> bool {
        let previous = self.connection_count.fetch_add(1, Ordering::AcqRel);
        if previous >= self.max_connections {
            self.connection_count.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Runs one connection on a slot already claimed by [`Self::reserve_slot`].
    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let session_id = Uuid::new_v4().to_string();
        metrics::inc_active_connections();
        tracing::info!("New connection {} from {}", session_id, peer_addr);

        let (reader, writer) = socket.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<JobNotification>();
        let writer_task = tokio::spawn(write_loop(writer, out_rx, notify_rx));

        self.coordinator
            .connect(&session_id, &peer_addr.ip().to_string(), notify_tx)
            .await;

        let res = self.read_loop(&session_id, reader, &out_tx).await;

        self.coordinator.close(&session_id).await;
        drop(out_tx);
        writer_task.abort();
        self.connection_count.fetch_sub(1, Ordering::AcqRel);
        metrics::dec_active_connections();
        tracing::info!("Miner socket {} closed", session_id);
        res
    }

    async fn read_loop(
        &self,
        session_id: &str,
        reader: tokio::net::tcp::OwnedReadHalf,
        out: &mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match tokio::time::timeout(IDLE_TIMEOUT, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(_)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    tracing::debug!("{} -> {}", session_id, trimmed);
                    let response = match serde_json::from_str::<StratumRequest>(trimmed) {
                        Ok(req) => self.coordinator.handle_request(session_id, req).await,
                        Err(e) => {
                            tracing::warn!("Unparsable request from {}: {}", session_id, e);
                            StratumResponse::error(Value::Null, StratumError::parse_error())
                        }
                    };
                    send_json(out, &response)?;
                }
                Ok(Err(e)) => return Err(anyhow!("read error: {}", e)),
                Err(_) => {
                    tracing::warn!("Connection {} idle, dropping", session_id);
                    return Ok(());
                }
            }
        }
    }
}

fn send_json<T: serde::Serialize>(out: &mpsc::UnboundedSender<String>, message: &T) -> Result<()> {
    let payload = serde_json::to_string(message)? + "\n";
    out.send(payload).map_err(|_| anyhow!("connection writer closed"))
}

async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut responses: mpsc::UnboundedReceiver<String>,
    mut notifications: mpsc::UnboundedReceiver<JobNotification>,
) {
    loop {
        let payload = tokio::select! {
            Some(msg) = responses.recv() => msg,
            Some(job) = notifications.recv() => {
                match serde_json::to_string(&job.to_notification()) {
                    Ok(s) => s + "\n",
                    Err(e) => {
                        tracing::error!("Failed to encode notification: {}", e);
                        continue;
                    }
                }
            }
            else => break,
        };
        if writer.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
        let _ = writer.flush().await;
    }
}
