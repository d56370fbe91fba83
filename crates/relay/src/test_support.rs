// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scriptable fake upstream and server helpers.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::config::{LogFormat, RelayConfig};
use crate::state::RelayState;

/// How the fake upstream treats one incoming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Complete the handshake, record the subscription, relay pushed frames.
    Serve,
    /// Record the subscription, then close with the given code.
    CloseAfterSubscribe(u16),
    /// Drop the TCP connection before the handshake.
    Reject,
    /// Hold the TCP connection open without ever answering the handshake.
    Stall,
    /// Complete the handshake, then never read from the socket.
    Mute,
}

#[derive(Debug, Clone)]
enum Command {
    Send(Message),
    Close(u16),
}

/// In-process WebSocket server standing in for the upstream feed.
///
/// Connections follow the queued [`Behavior`] script in order, then
/// [`Behavior::Serve`] once the script runs out.
pub struct FakeUpstream {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    close_acks: Arc<AtomicUsize>,
    commands: broadcast::Sender<Command>,
    subscriptions: mpsc::UnboundedReceiver<String>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeUpstream {
    pub async fn spawn(script: impl IntoIterator<Item = Behavior>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let max_open = Arc::new(AtomicUsize::new(0));
        let close_acks = Arc::new(AtomicUsize::new(0));
        let (commands, _) = broadcast::channel(64);
        let (sub_tx, subscriptions) = mpsc::unbounded_channel();
        let script = Arc::new(Mutex::new(script.into_iter().collect::<VecDeque<_>>()));

        let task = {
            let accepted = Arc::clone(&accepted);
            let conn = Connection {
                open: Arc::clone(&open),
                max_open: Arc::clone(&max_open),
                close_acks: Arc::clone(&close_acks),
                commands: commands.clone(),
                subscriptions: sub_tx,
            };
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let behavior = script.lock().pop_front().unwrap_or(Behavior::Serve);
                    tokio::spawn(conn.clone().handle(stream, behavior));
                }
            })
        };

        Ok(Self { addr, accepted, open, max_open, close_acks, commands, subscriptions, task })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// WebSocket sessions currently open.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions observed.
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Server-initiated closes the client answered with its own close frame.
    pub fn close_acks(&self) -> usize {
        self.close_acks.load(Ordering::SeqCst)
    }

    /// Wait for the next subscription message received by any session.
    pub async fn next_subscription(&mut self, timeout: Duration) -> anyhow::Result<String> {
        tokio::time::timeout(timeout, self.subscriptions.recv())
            .await
            .map_err(|_| anyhow::anyhow!("no subscription within {timeout:?}"))?
            .ok_or_else(|| anyhow::anyhow!("fake upstream stopped"))
    }

    /// Send a text frame on every open session.
    pub fn push_text(&self, text: &str) {
        let _ = self.commands.send(Command::Send(Message::Text(text.into())));
    }

    /// Send a binary frame on every open session.
    pub fn push_binary(&self, bytes: &'static [u8]) {
        let _ = self.commands.send(Command::Send(Message::Binary(bytes::Bytes::from_static(bytes))));
    }

    /// Close every open session with `code`.
    pub fn close_sessions(&self, code: u16) {
        let _ = self.commands.send(Command::Close(code));
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
struct Connection {
    open: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    close_acks: Arc<AtomicUsize>,
    commands: broadcast::Sender<Command>,
    subscriptions: mpsc::UnboundedSender<String>,
}

impl Connection {
    async fn handle(self, stream: TcpStream, behavior: Behavior) {
        match behavior {
            Behavior::Reject => return,
            Behavior::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(stream);
                return;
            }
            Behavior::Serve | Behavior::CloseAfterSubscribe(_) | Behavior::Mute => {}
        }

        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now_open, Ordering::SeqCst);

        if behavior == Behavior::Mute {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(ws);
            self.open.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        let mut commands = self.commands.subscribe();

        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = self.subscriptions.send(text.as_str().to_owned());

            let mut close_code = match behavior {
                Behavior::CloseAfterSubscribe(code) => Some(code),
                _ => None,
            };
            while close_code.is_none() {
                tokio::select! {
                    cmd = commands.recv() => match cmd {
                        Ok(Command::Send(msg)) => {
                            if ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Ok(Command::Close(code)) => close_code = Some(code),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                }
            }

            if let Some(code) = close_code {
                let frame = CloseFrame { code: CloseCode::from(code), reason: "bye".into() };
                let _ = ws.close(Some(frame)).await;
                // Drain until the client acknowledges.
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_close() {
                        self.close_acks.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }

        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Relay config pointed at `upstream_url` with millisecond-scale timings.
pub fn test_config(upstream_url: &str) -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        upstream_url: upstream_url.to_owned(),
        api_key: "test-key-0123456789".to_owned(),
        bounding_boxes: vec![],
        message_types: vec!["PositionReport".to_owned()],
        reconnect_base_ms: 20,
        reconnect_cap_ms: 80,
        max_reconnect_attempts: 5,
        reconnect_cooldown_ms: 60_000,
        subscribe_grace_ms: 1000,
        connect_timeout_ms: 1000,
        subscriber_buffer: 64,
        connect_on_start: false,
        binary_as_text: true,
        log_format: LogFormat::Text,
    }
}

/// Serve the relay router on an ephemeral port.
pub async fn spawn_http_server(
    state: Arc<RelayState>,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Poll `cond` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
