use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use liaison::models::{ContentType, Message as ChatMessage};
use liaison::websocket::{ClientEvent, OutboundMessage, ServerError, ServerEvent, TypingNotice};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, StatusCode};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use tracing::{error, info, warn};

use crate::state::{ConnectionId, RelayState};

/// Why a handshake was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingUser,
    BadToken,
}

impl Rejection {
    fn status(&self) -> StatusCode {
        match self {
            Rejection::MissingUser => StatusCode::BAD_REQUEST,
            Rejection::BadToken => StatusCode::UNAUTHORIZED,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Rejection::MissingUser => "userId query parameter is required",
            Rejection::BadToken => "invalid or missing token",
        }
    }
}

/// Identify the connecting user from the handshake.
///
/// The token may come from the `token` query parameter or an
/// `Authorization: Bearer` header. With no expected token every token is
/// accepted.
pub fn authorize(
    query: Option<&str>,
    authorization: Option<&str>,
    expected: Option<&str>,
) -> Result<String, Rejection> {
    let mut user_id = None;
    let mut token = None;
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "userId" => user_id = Some(value.into_owned()),
            "token" => token = Some(value.into_owned()),
            _ => {}
        }
    }
    let token = token.or_else(|| {
        authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
    });

    if let Some(expected) = expected {
        if token.as_deref() != Some(expected) {
            return Err(Rejection::BadToken);
        }
    }

    match user_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(Rejection::MissingUser),
    }
}

/// Run the WebSocket handshake on a fresh TCP stream and serve the
/// connection until it closes.
pub async fn accept_connection(stream: TcpStream, state: Arc<RelayState>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut identity = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match authorize(request.uri().query(), authorization, state.access_token()) {
            Ok(user_id) => {
                identity = Some(user_id);
                Ok(response)
            }
            Err(rejection) => {
                warn!(peer = %peer, reason = rejection.reason(), "Rejecting handshake");
                let mut refused = ErrorResponse::new(Some(rejection.reason().to_string()));
                *refused.status_mut() = rejection.status();
                Err(refused)
            }
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            error!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    match identity {
        Some(user_id) => handle_connection(ws_stream, user_id, state).await,
        None => error!(peer = %peer, "Handshake completed without identity"),
    }
}

/// Serve an authenticated connection
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    user_id: String,
    state: Arc<RelayState>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = state.register(user_id.clone(), tx);
    info!(conn, user = %user_id, "User connected");

    // Forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, conn, &user_id, &state);
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(conn, user = %user_id, "Client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(conn, user = %user_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        info!(conn, user = %user_id, "WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut send_task => {
                info!(conn, user = %user_id, "Send task finished, connection lost");
                break;
            }
        }
    }

    send_task.abort();
    state.unregister(conn);
    info!(conn, user = %user_id, "User disconnected");
}

/// Handle one frame from an authenticated connection
pub fn handle_message(text: &str, conn: ConnectionId, user_id: &str, state: &RelayState) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(conn, user = %user_id, error = %e, "Failed to parse frame");
            reply(
                state,
                conn,
                &ServerEvent::Error(ServerError {
                    message: format!("unrecognized frame: {}", e),
                }),
            );
            return;
        }
    };

    match event {
        ClientEvent::JoinRoom(room) => state.join(conn, &room.chat_id),
        ClientEvent::LeaveRoom(room) => state.leave(conn, &room.chat_id),
        ClientEvent::SendMessage(outbound) => relay_message(outbound, conn, user_id, state),
        ClientEvent::TypingStart(room) => {
            let event = ServerEvent::DisplayTyping(TypingNotice {
                chat_id: room.chat_id.clone(),
                user_id: Some(user_id.to_string()),
            });
            broadcast(state, &room.chat_id, &event, Some(conn));
        }
        ClientEvent::TypingEnd(room) => {
            let event = ServerEvent::HideTyping(TypingNotice {
                chat_id: room.chat_id.clone(),
                user_id: Some(user_id.to_string()),
            });
            broadcast(state, &room.chat_id, &event, Some(conn));
        }
    }
}

fn relay_message(outbound: OutboundMessage, conn: ConnectionId, user_id: &str, state: &RelayState) {
    if outbound.content.trim().is_empty() {
        reply(
            state,
            conn,
            &ServerEvent::Error(ServerError {
                message: "message content is empty".to_string(),
            }),
        );
        return;
    }
    if outbound.sender_id != user_id {
        warn!(conn, user = %user_id, claimed = %outbound.sender_id, "Overriding spoofed sender");
    }

    // Sender identity comes from the handshake, never from the frame
    let message = ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        chat_id: outbound.chat_id.clone(),
        sender_id: user_id.to_string(),
        content: outbound.content,
        content_type: outbound.content_type,
        created_at: chrono::Utc::now().timestamp_millis(),
        temp_id: Some(outbound.temp_id),
        is_optimistic: false,
        failed: false,
    };
    let room = message.chat_id.clone();
    let notification = json!({
        "chatId": room,
        "messageId": message.id,
        "senderId": message.sender_id,
        "preview": match message.content_type {
            ContentType::Text => message.content.clone(),
            ContentType::Image => "[image]".to_string(),
            ContentType::Gift => "[gift]".to_string(),
        },
    });

    let delivered = broadcast(state, &room, &ServerEvent::ReceiveMessage(message.clone()), None);
    // The echo is how the sender confirms its optimistic entry
    if !state.is_member(conn, &room) {
        reply(state, conn, &ServerEvent::ReceiveMessage(message));
    }
    info!(conn, room = %room, delivered, "Relayed message");

    let notified = match serde_json::to_string(&ServerEvent::AdminNotification(notification)) {
        Ok(json) => state.send_outside_room(&room, &json),
        Err(e) => {
            error!(error = %e, "Failed to serialize admin notification");
            0
        }
    };
    if notified > 0 {
        info!(room = %room, notified, "Sent admin notification");
    }
}

fn broadcast(
    state: &RelayState,
    room: &str,
    event: &ServerEvent,
    exclude: Option<ConnectionId>,
) -> usize {
    match serde_json::to_string(event) {
        Ok(json) => state.send_to_room(room, &json, exclude),
        Err(e) => {
            error!(room, error = %e, "Failed to serialize event");
            0
        }
    }
}

fn reply(state: &RelayState, conn: ConnectionId, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            state.send_to(conn, &json);
        }
        Err(e) => error!(conn, error = %e, "Failed to serialize reply"),
    }
}
