//! REST side of the backend: conversation list, history pages, read markers
//! and uploads.

use std::future::Future;

use reqwest::{header, multipart, Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::input::{PageRequest, UploadInput, ValidateExt};
use crate::models::{Conversation, Message};

/// Backend operations the session runtime depends on.
pub trait ChatApi: Send + Sync + 'static {
    fn list_conversations(&self) -> impl Future<Output = ChatResult<Vec<Conversation>>> + Send;

    /// One page of a conversation, oldest first. `offset` counts back from
    /// the newest message.
    fn fetch_messages(
        &self,
        chat_id: &str,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = ChatResult<Vec<Message>>> + Send;

    fn mark_read(&self, chat_id: &str) -> impl Future<Output = ChatResult<()>> + Send;

    /// Upload a file and return the URL it is served from.
    fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = ChatResult<String>> + Send;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// reqwest-backed [`ChatApi`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> ChatResult<Self> {
        // Trailing slash so joins append instead of replacing the last segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&normalized)
            .map_err(|e| ChatError::Config(format!("invalid api url {}: {}", base_url, e)))?;
        let http = Client::builder()
            .user_agent(concat!("liaison/", env!("CARGO_PKG_VERSION")))
            .build()?;

        info!(base = %base, "REST client ready");
        Ok(Self {
            http,
            base,
            token: token.into(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> ChatResult<Self> {
        Self::new(&config.api_base_url, config.token.clone())
    }

    fn endpoint(&self, path: &str) -> ChatResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ChatError::Config(format!("invalid endpoint {}: {}", path, e)))
    }

    fn messages_url(&self, chat_id: &str, limit: u32, offset: u32) -> ChatResult<Url> {
        let mut url = self.endpoint("chats/")?;
        url.path_segments_mut()
            .map_err(|_| ChatError::Config("api url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(chat_id)
            .push("messages");
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url)
    }

    fn read_url(&self, chat_id: &str) -> ChatResult<Url> {
        let mut url = self.endpoint("chats/")?;
        url.path_segments_mut()
            .map_err(|_| ChatError::Config("api url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(chat_id)
            .push("read");
        Ok(url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Map non-success responses onto [`ChatError`].
async fn check(response: Response) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ChatError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Status {
        status: status.as_u16(),
        body,
    })
}

impl ChatApi for ApiClient {
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>> {
        let url = self.endpoint("chats")?;
        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        let conversations: Vec<Conversation> = check(response).await?.json().await?;
        debug!(count = conversations.len(), "Fetched conversations");
        Ok(conversations)
    }

    async fn fetch_messages(&self, chat_id: &str, limit: u32, offset: u32) -> ChatResult<Vec<Message>> {
        PageRequest {
            chat_id: chat_id.to_string(),
            limit,
            offset,
        }
        .validate_input()?;

        let url = self.messages_url(chat_id, limit, offset)?;
        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        let page: Vec<Message> = check(response).await?.json().await?;
        debug!(chat = %chat_id, count = page.len(), offset, "Fetched message page");
        Ok(page)
    }

    async fn mark_read(&self, chat_id: &str) -> ChatResult<()> {
        let url = self.read_url(chat_id)?;
        let response = self
            .http
            .put(url)
            .header(header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> ChatResult<String> {
        UploadInput {
            filename: filename.to_string(),
            size: bytes.len(),
        }
        .validate_input()?;

        let url = self.endpoint("upload")?;
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, self.bearer())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChatError::Upload(e.to_string()))?;

        let uploaded: UploadResponse = match check(response).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| ChatError::Upload(e.to_string()))?,
            Err(ChatError::Unauthorized) => return Err(ChatError::Unauthorized),
            Err(e) => return Err(ChatError::Upload(e.to_string())),
        };
        info!(filename, url = %uploaded.url, "Uploaded file");
        Ok(uploaded.url)
    }
}
