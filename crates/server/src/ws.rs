use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use filedock_notify::EventHub;
use filedock_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_SEND_BUFFER_SIZE};

use crate::ServerError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 0 }
    }
}

/// WebSocket listener for event subscribers.
///
/// Every accepted connection is registered with the [`EventHub`]; a write
/// pump drains that connection's event channel into the socket and a read
/// pump watches for the close. Unregistration on close or send failure is
/// what "unsubscribe" means — clients hold no other server-side state.
pub struct SyncServer {
    port: u16,
    hub: Arc<EventHub>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, hub: Arc<EventHub>) -> Arc<Self> {
        Arc::new(Self {
            port: config.port,
            hub,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server and its connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("subscriber server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("subscriber server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection and pumps events to it until it closes.
    async fn handle_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        info!(%peer_addr, "subscriber connected");

        let (mut sink, mut reader) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel(WS_SEND_BUFFER_SIZE);
        let connection_id = self.hub.register(tx);

        let cancel = self.cancel.clone();
        let write_pump = tokio::spawn(async move {
            let mut ping = tokio::time::interval(WS_PING_PERIOD);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }

                    maybe = rx.recv() => match maybe {
                        Some(envelope) => {
                            let text = match serde_json::to_string(&envelope) {
                                Ok(text) => text,
                                Err(e) => {
                                    error!("event serialization failed: {e}");
                                    continue;
                                }
                            };
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        // Unregistered from the hub: nothing more to send.
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },

                    _ = ping.tick() => {
                        if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Read pump: subscribers send nothing meaningful; watch for close.
        while let Some(msg) = reader.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(other) => {
                    debug!(%peer_addr, "ignoring subscriber message: {other:?}");
                }
                Err(_) => break,
            }
        }

        self.hub.unregister(connection_id);
        let _ = write_pump.await;
        info!(%peer_addr, "subscriber disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use filedock_protocol::events::{Event, EventEnvelope, FileDeleted};

    fn sample_event() -> Event {
        Event::FileDeleted(FileDeleted {
            path: "/projects/1/old.pdf".into(),
        })
    }

    async fn started_server() -> (Arc<SyncServer>, Arc<EventHub>, tokio::task::JoinHandle<()>) {
        let hub = Arc::new(EventHub::new());
        let server = SyncServer::new(ServerConfig::default(), Arc::clone(&hub));
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        (server, hub, handle)
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let (server, _hub, handle) = started_server().await;

        let port = server.port().await;
        assert!(port > 0, "should have bound to a dynamic port");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn connected_client_receives_broadcast() {
        let (server, hub, handle) = started_server().await;
        let port = server.port().await;

        let url = format!("ws://127.0.0.1:{port}");
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.connection_count(), 1);

        hub.broadcast(&sample_event());

        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = msg.into_text().unwrap();
        let envelope: EventEnvelope = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(envelope.event, sample_event());
        assert_eq!(envelope.v, filedock_protocol::PROTOCOL_VERSION);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_event() {
        let (server, hub, handle) = started_server().await;
        let port = server.port().await;
        let url = format!("ws://127.0.0.1:{port}");

        let (mut ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.connection_count(), 2);

        hub.broadcast(&sample_event());

        for ws in [&mut ws1, &mut ws2] {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert!(msg.into_text().unwrap().contains("file_deleted"));
        }

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_unregisters_the_subscriber() {
        let (server, hub, handle) = started_server().await;
        let port = server.port().await;
        let url = format!("ws://127.0.0.1:{port}");

        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.connection_count(), 1);

        drop(ws);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hub.connection_count(), 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_open_connections() {
        let (server, hub, handle) = started_server().await;
        let port = server.port().await;
        let url = format!("ws://127.0.0.1:{port}");

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.connection_count(), 1);

        server.shutdown();
        handle.await.unwrap();

        // The client observes the close (or the stream just ends).
        let got_close = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(msg) = ws.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    return true;
                }
            }
            true
        })
        .await
        .unwrap();
        assert!(got_close);
    }
}
