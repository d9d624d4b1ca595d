use super::messages::{ClientEvent, ServerEvent};
use crate::config::ClientConfig;
use crate::error::{ChatError, ChatResult};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, Request, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use url::Url;

/// Internal message type for the write channel
enum WriteMessage {
    Data(String),
    Close,
}

/// What the connection loop reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A (re)connection completed; room membership must be re-established.
    Connected,
    Disconnected,
    /// The server refused the credential. The loop has stopped.
    Unauthorized,
    Event(ServerEvent),
}

/// Identity presented during the handshake.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub user_id: String,
}

/// Outbound half of the transport as seen by the session.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: ClientEvent) -> ChatResult<()>;
    fn is_connected(&self) -> bool;
}

/// WebSocket client holding the single realtime connection of a session.
pub struct WebSocketClient {
    server_url: String,
    reconnect_delay: Duration,
    /// Std mutex so `emit` can be called from synchronous session code
    write_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<WriteMessage>>>>,
    connected: Arc<AtomicBool>,
    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketClient {
    pub fn new(server_url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            server_url: server_url.into(),
            reconnect_delay,
            write_tx: Arc::new(StdMutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.server_url.clone(), config.reconnect_delay)
    }

    /// Start the connection loop. Returns once the loop is spawned; progress
    /// is reported through `events`. Reconnects after `reconnect_delay` until
    /// [`disconnect`](Self::disconnect) is called or `events` is dropped.
    pub fn connect(
        &self,
        credential: Credential,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> ChatResult<()> {
        let url = handshake_url(&self.server_url, &credential)?;
        // Reject malformed credentials before spawning anything
        build_request(&url, &credential.token)?;

        let token = credential.token;
        let reconnect_delay = self.reconnect_delay;
        let write_tx = self.write_tx.clone();
        let connected = self.connected.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                // Check for shutdown before attempting connection
                if shutdown_rx.try_recv().is_ok() {
                    info!("Shutdown signal received, stopping reconnection");
                    break;
                }

                info!(url = %redacted(&url), "Connecting to realtime server");

                let request = match build_request(&url, &token) {
                    Ok(request) => request,
                    Err(e) => {
                        error!(error = %e, "Cannot build handshake request");
                        break;
                    }
                };

                match connect_async(request).await {
                    Ok((ws_stream, _)) => {
                        info!("Connected to realtime server");
                        let (mut ws_write, mut ws_read) = ws_stream.split();

                        // Create channel for outgoing messages
                        let (tx, mut rx) = mpsc::unbounded_channel::<WriteMessage>();
                        if let Ok(mut guard) = write_tx.lock() {
                            *guard = Some(tx);
                        }
                        connected.store(true, Ordering::SeqCst);

                        if events.send(TransportEvent::Connected).is_err() {
                            debug!("Session gone, closing connection");
                            let _ = ws_write.send(Message::Close(None)).await;
                            clear_writer(&write_tx, &connected);
                            break;
                        }

                        // Message loop
                        let mut should_reconnect = true;
                        loop {
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    info!("Shutdown signal received, closing connection gracefully");
                                    if let Err(e) = ws_write.send(Message::Close(None)).await {
                                        warn!(error = %e, "Failed to send close frame");
                                    }
                                    should_reconnect = false;
                                    break;
                                }
                                Some(msg) = rx.recv() => {
                                    match msg {
                                        WriteMessage::Data(data) => {
                                            if ws_write.send(Message::Text(data)).await.is_err() {
                                                error!("Failed to send frame to server");
                                                break;
                                            }
                                        }
                                        WriteMessage::Close => {
                                            info!("Close requested, sending close frame");
                                            if let Err(e) = ws_write.send(Message::Close(None)).await {
                                                warn!(error = %e, "Failed to send close frame");
                                            }
                                            should_reconnect = false;
                                            break;
                                        }
                                    }
                                }
                                msg = ws_read.next() => {
                                    match msg {
                                        Some(Ok(Message::Text(text))) => {
                                            debug!(preview = %preview(&text), "Received from server");
                                            match serde_json::from_str::<ServerEvent>(&text) {
                                                Ok(event) => {
                                                    if events.send(TransportEvent::Event(event)).is_err() {
                                                        should_reconnect = false;
                                                        break;
                                                    }
                                                }
                                                Err(e) => {
                                                    warn!(error = %e, "Ignoring unrecognized frame");
                                                }
                                            }
                                        }
                                        Some(Ok(Message::Close(_))) | None => {
                                            info!("Server closed connection");
                                            break;
                                        }
                                        Some(Err(e)) => {
                                            error!(error = %e, "WebSocket error");
                                            break;
                                        }
                                        _ => {}
                                    }
                                }
                            }
                        }

                        clear_writer(&write_tx, &connected);
                        info!("Disconnected from realtime server");

                        if !should_reconnect {
                            break;
                        }
                        if events.send(TransportEvent::Disconnected).is_err() {
                            break;
                        }
                    }
                    Err(tungstenite::Error::Http(response))
                        if matches!(
                            response.status(),
                            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                        ) =>
                    {
                        error!(status = %response.status(), "Realtime server rejected credential");
                        let _ = events.send(TransportEvent::Unauthorized);
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, url = %redacted(&url), "Failed to connect to realtime server");
                    }
                }

                debug!(delay_ms = reconnect_delay.as_millis() as u64, "Reconnecting");
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping reconnection");
                        break;
                    }
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        });

        Ok(())
    }

    /// Gracefully disconnect from the server
    pub fn disconnect(&self) {
        info!("Initiating graceful disconnect");
        // Signal shutdown to stop reconnection loop
        let _ = self.shutdown_tx.send(());
        if let Ok(guard) = self.write_tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(WriteMessage::Close);
            }
        }
    }
}

impl Emitter for WebSocketClient {
    fn emit(&self, event: ClientEvent) -> ChatResult<()> {
        let json = serde_json::to_string(&event)?;
        debug!(preview = %preview(&json), "Sending frame to server");

        let guard = self
            .write_tx
            .lock()
            .map_err(|e| ChatError::Transport(format!("Lock poisoned: {}", e)))?;

        match guard.as_ref() {
            Some(tx) => tx
                .send(WriteMessage::Data(json))
                .map_err(|_| ChatError::NotConnected),
            None => Err(ChatError::NotConnected),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn clear_writer(
    write_tx: &StdMutex<Option<mpsc::UnboundedSender<WriteMessage>>>,
    connected: &AtomicBool,
) {
    if let Ok(mut guard) = write_tx.lock() {
        *guard = None;
    }
    connected.store(false, Ordering::SeqCst);
}

/// Server URL with the credential attached as query parameters, for servers
/// that read the handshake query instead of headers.
fn handshake_url(server_url: &str, credential: &Credential) -> ChatResult<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| ChatError::Config(format!("invalid server url {}: {}", server_url, e)))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ChatError::Config(format!(
                "unsupported realtime scheme {}",
                other
            )))
        }
    }
    url.query_pairs_mut()
        .append_pair("token", &credential.token)
        .append_pair("userId", &credential.user_id);
    Ok(url)
}

fn build_request(url: &Url, token: &str) -> ChatResult<Request<()>> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ChatError::Transport(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| ChatError::Config(format!("token is not a valid header value: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    Ok(request)
}

/// First 100 characters of a frame, for log lines.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// URL for log lines, without the token.
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::RoomRef;

    fn credential() -> Credential {
        Credential {
            token: "secret-token".to_string(),
            user_id: "op-1".to_string(),
        }
    }

    #[test]
    fn test_handshake_url_carries_credential() {
        let url = handshake_url("ws://localhost:9001/socket", &credential()).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("token".to_string(), "secret-token".to_string())));
        assert!(pairs.contains(&("userId".to_string(), "op-1".to_string())));
        assert_eq!(redacted(&url), "ws://localhost:9001/socket");
    }

    #[test]
    fn test_handshake_url_rejects_http_scheme() {
        let err = handshake_url("http://localhost:9001", &credential()).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_request_has_bearer_header() {
        let url = handshake_url("ws://localhost:9001", &credential()).unwrap();
        let request = build_request(&url, "secret-token").unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer secret-token"
        );
    }

    #[test]
    fn test_emit_without_connection_fails() {
        let client = WebSocketClient::new("ws://localhost:9001", Duration::from_secs(3));
        assert!(!client.is_connected());
        let result = client.emit(ClientEvent::JoinRoom(RoomRef::new("chat-1")));
        assert!(matches!(result, Err(ChatError::NotConnected)));
    }
}
