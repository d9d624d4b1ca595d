//! End-to-end tests: the full `liaison` session runtime against a real relay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use liaison::{ChatApi, ChatResult, ClientConfig, Conversation, Message, SessionHandle, SessionRuntime, SessionSnapshot, TracingSink};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TOKEN: &str = "e2e-token";

/// In-memory REST backend
#[derive(Default)]
struct FakeApi {
    history: HashMap<String, Vec<Message>>,
    conversations: Vec<Conversation>,
}

impl ChatApi for FakeApi {
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>> {
        Ok(self.conversations.clone())
    }

    async fn fetch_messages(&self, chat_id: &str, limit: u32, offset: u32) -> ChatResult<Vec<Message>> {
        let all = self.history.get(chat_id).cloned().unwrap_or_default();
        let end = all.len().saturating_sub(offset as usize);
        let start = end.saturating_sub(limit as usize);
        Ok(all[start..end].to_vec())
    }

    async fn mark_read(&self, _chat_id: &str) -> ChatResult<()> {
        Ok(())
    }

    async fn upload(&self, filename: &str, _bytes: Vec<u8>) -> ChatResult<String> {
        Ok(format!("https://cdn.example/{}", filename))
    }
}

fn history_message(id: &str, sender: &str, content: &str, created_at: i64) -> Message {
    Message {
        id: id.to_string(),
        chat_id: "chat-42".to_string(),
        sender_id: sender.to_string(),
        content: content.to_string(),
        content_type: liaison::ContentType::Text,
        created_at,
        temp_id: None,
        is_optimistic: false,
        failed: false,
    }
}

fn api_with_history() -> Arc<FakeApi> {
    let mut api = FakeApi::default();
    api.history.insert(
        "chat-42".to_string(),
        vec![
            history_message("m1", "user-7", "hello?", 1_700_000_000_000),
            history_message("m2", "op-1", "hi, how can I help", 1_700_000_001_000),
            history_message("m3", "user-7", "my order is late", 1_700_000_002_000),
        ],
    );
    api.conversations.push(Conversation {
        id: "chat-42".to_string(),
        counterpart_id: "user-7".to_string(),
        counterpart_name: Some("Customer".to_string()),
        last_message: Some("my order is late".to_string()),
        last_message_at: Some(1_700_000_002_000),
        unread_count: 1,
    });
    Arc::new(api)
}

async fn serve(listener: TcpListener) -> tokio::task::JoinHandle<()> {
    let state = Arc::new(liaison_relay::RelayState::with_access_token(Some(
        TOKEN.to_string(),
    )));
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(liaison_relay::accept_connection(stream, state.clone()));
        }
    })
}

async fn start_relay() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (port, serve(listener).await)
}

fn operator_config(port: u16) -> ClientConfig {
    ClientConfig {
        server_url: format!("ws://127.0.0.1:{}", port),
        api_base_url: "http://127.0.0.1:1/api".to_string(),
        token: TOKEN.to_string(),
        operator_id: "op-1".to_string(),
        page_size: 3,
        reconnect_delay: Duration::from_millis(100),
        ..ClientConfig::default()
    }
}

async fn wait_until<F>(handle: &SessionHandle, mut predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut rx = handle.subscribe();
    let snapshot = timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
        .await
        .expect("Timeout waiting for session state")
        .expect("Session stopped")
        .clone();
    snapshot
}

async fn connect_customer(port: u16) -> Client {
    let url = format!("ws://127.0.0.1:{}/?userId=user-7&token={}", port, TOKEN);
    let (mut client, _) = connect_async(&url).await.expect("Failed to connect");
    client
        .send(tungstenite::Message::Text(
            json!({"event": "join_room", "data": {"chatId": "chat-42"}}).to_string(),
        ))
        .await
        .unwrap();
    client
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for frame")
            .expect("Stream closed")
            .expect("Read error");
        if let tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_operator_send_is_confirmed_in_place() {
    let (port, server_handle) = start_relay().await;
    let handle = SessionRuntime::spawn(operator_config(port), api_with_history(), Arc::new(TracingSink))
        .unwrap();
    wait_until(&handle, |s| s.connected).await;

    handle.open("chat-42").unwrap();
    let snapshot = wait_until(&handle, |s| s.history_loaded).await;
    assert_eq!(snapshot.messages.len(), 3);
    let mut customer = connect_customer(port).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.input("hi").unwrap();
    let event = next_event(&mut customer).await;
    assert_eq!(event["event"], "display_typing");
    assert_eq!(event["data"]["userId"], "op-1");

    handle.send_text("hi").unwrap();
    let snapshot = wait_until(&handle, |s| {
        s.messages.len() == 4 && !s.messages[3].is_optimistic
    })
    .await;
    let confirmed = &snapshot.messages[3];
    assert_eq!(confirmed.content, "hi");
    assert_eq!(confirmed.sender_id, "op-1");
    assert!(!confirmed.id.starts_with("temp-"));
    assert!(confirmed.temp_id.is_some());

    // The customer sees the typing stop, then the message
    let event = next_event(&mut customer).await;
    assert_eq!(event["event"], "hide_typing");
    let event = next_event(&mut customer).await;
    assert_eq!(event["event"], "receive_message");
    assert_eq!(event["data"]["id"], confirmed.id.as_str());

    handle.shutdown().await;
    server_handle.abort();
}

#[tokio::test]
async fn test_customer_activity_reaches_operator() {
    let (port, server_handle) = start_relay().await;
    let handle = SessionRuntime::spawn(operator_config(port), api_with_history(), Arc::new(TracingSink))
        .unwrap();
    wait_until(&handle, |s| s.connected).await;
    handle.open("chat-42").unwrap();
    wait_until(&handle, |s| s.history_loaded).await;

    let mut customer = connect_customer(port).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    customer
        .send(tungstenite::Message::Text(
            json!({"event": "typing_start", "data": {"chatId": "chat-42"}}).to_string(),
        ))
        .await
        .unwrap();
    wait_until(&handle, |s| s.remote_typing).await;

    customer
        .send(tungstenite::Message::Text(
            json!({
                "event": "send_message",
                "data": {
                    "chatId": "chat-42",
                    "senderId": "user-7",
                    "content": "still waiting",
                    "tempId": "temp-1"
                }
            })
            .to_string(),
        ))
        .await
        .unwrap();

    // A message from the counterpart clears their typing indicator
    let snapshot = wait_until(&handle, |s| s.messages.len() == 4).await;
    assert_eq!(snapshot.messages[3].content, "still waiting");
    assert!(!snapshot.remote_typing);
    let conversation = snapshot
        .conversations
        .iter()
        .find(|c| c.id == "chat-42")
        .unwrap();
    assert_eq!(conversation.unread_count, 0);
    assert_eq!(conversation.last_message.as_deref(), Some("still waiting"));

    handle.shutdown().await;
    server_handle.abort();
}

#[tokio::test]
async fn test_join_waits_for_connection() {
    // Reserve a port, release it and start the relay only after the room is open
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let handle = SessionRuntime::spawn(operator_config(port), api_with_history(), Arc::new(TracingSink))
        .unwrap();
    handle.open("chat-42").unwrap();
    let snapshot = wait_until(&handle, |s| s.history_loaded).await;
    assert!(!snapshot.connected);

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let server_handle = serve(listener).await;
    wait_until(&handle, |s| s.connected).await;

    // Once connected the deferred join lets room traffic through
    let mut customer = connect_customer(port).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    customer
        .send(tungstenite::Message::Text(
            json!({"event": "typing_start", "data": {"chatId": "chat-42"}}).to_string(),
        ))
        .await
        .unwrap();
    wait_until(&handle, |s| s.remote_typing).await;

    handle.shutdown().await;
    server_handle.abort();
}

#[tokio::test]
async fn test_rejected_token_flags_session() {
    let (port, server_handle) = start_relay().await;
    let config = ClientConfig {
        token: "wrong".to_string(),
        ..operator_config(port)
    };
    let handle = SessionRuntime::spawn(config, api_with_history(), Arc::new(TracingSink)).unwrap();

    let snapshot = wait_until(&handle, |s| s.auth_failed).await;
    assert!(!snapshot.connected);

    handle.shutdown().await;
    server_handle.abort();
}
