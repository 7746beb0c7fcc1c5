//! Bot-API relay backend.
//!
//! Objects are posted as messages into one chat and read back through the
//! API's file download endpoint. The API caps downloadable files, offers no
//! partial reads, and exposes a typed upload method per media kind.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{BackendCapabilities, BlobBackend, ObjectPut};
use crate::{BlobError, BlobResult, FileType};

/// Download ceiling of the public bot API
pub const DEFAULT_RELAY_MAX_OBJECT_BYTES: u64 = 20 * 1024 * 1024;

/// Relay connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub api_base: String,
    pub bot_token: String,
    pub chat_id: String,
    pub max_object_bytes: u64,
}

impl RelayConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            max_object_bytes: DEFAULT_RELAY_MAX_OBJECT_BYTES,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_object_bytes(mut self, bytes: u64) -> Self {
        self.max_object_bytes = bytes;
        self
    }
}

/// One upload endpoint of the relay API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Photo,
    Audio,
    Video,
    Document,
}

impl UploadStrategy {
    pub fn method(&self) -> &'static str {
        match self {
            UploadStrategy::Photo => "sendPhoto",
            UploadStrategy::Audio => "sendAudio",
            UploadStrategy::Video => "sendVideo",
            UploadStrategy::Document => "sendDocument",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            UploadStrategy::Photo => "photo",
            UploadStrategy::Audio => "audio",
            UploadStrategy::Video => "video",
            UploadStrategy::Document => "document",
        }
    }

    /// Endpoints to try in order: the typed one first, the generic document
    /// endpoint last. The photo endpoint re-encodes images, so parts skip it.
    pub fn chain_for(file_type: FileType, is_part: bool) -> Vec<UploadStrategy> {
        let typed = match file_type {
            FileType::Image if !is_part => Some(UploadStrategy::Photo),
            FileType::Audio => Some(UploadStrategy::Audio),
            FileType::Video => Some(UploadStrategy::Video),
            FileType::Image | FileType::Document => None,
        };
        typed
            .into_iter()
            .chain(std::iter::once(UploadStrategy::Document))
            .collect()
    }
}

/// Remote reference of a relayed object: `{file_id}:{message_id}`.
///
/// The message id is needed to delete; bare file ids still read fine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayObjectRef {
    pub file_id: String,
    pub message_id: Option<i64>,
}

impl RelayObjectRef {
    pub fn parse(raw: &str) -> BlobResult<Self> {
        let (file_id, message_id) = match raw.rsplit_once(':') {
            Some((file_id, msg)) => {
                let message_id = msg
                    .parse::<i64>()
                    .map_err(|_| BlobError::invalid(format!("malformed relay reference '{raw}'")))?;
                (file_id, Some(message_id))
            }
            None => (raw, None),
        };
        if file_id.is_empty() {
            return Err(BlobError::invalid(format!("malformed relay reference '{raw}'")));
        }
        Ok(Self {
            file_id: file_id.to_string(),
            message_id,
        })
    }

    pub fn encode(&self) -> String {
        match self.message_id {
            Some(id) => format!("{}:{}", self.file_id, id),
            None => self.file_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T, String> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(format!(
                "{} failed ({}): {}",
                method,
                self.error_code.unwrap_or_default(),
                self.description.unwrap_or_else(|| "no description".to_string())
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    #[serde(default)]
    photo: Vec<FileRef>,
    document: Option<FileRef>,
    audio: Option<FileRef>,
    video: Option<FileRef>,
    animation: Option<FileRef>,
    voice: Option<FileRef>,
}

impl Message {
    /// The API may file an upload under a different media kind than requested.
    fn file_id(&self) -> Option<&str> {
        self.document
            .as_ref()
            .or(self.audio.as_ref())
            .or(self.video.as_ref())
            .or(self.animation.as_ref())
            .or(self.voice.as_ref())
            // Photo sizes are ascending; the last is the original resolution
            .or(self.photo.last())
            .map(|f| f.file_id.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

/// Messaging-API relay backend
#[derive(Clone)]
pub struct RelayBackend {
    http: reqwest::Client,
    config: RelayConfig,
}

impl RelayBackend {
    pub fn new(config: RelayConfig) -> BlobResult<Self> {
        if config.bot_token.is_empty() || config.chat_id.is_empty() {
            return Err(BlobError::invalid("relay backend needs a bot token and chat id"));
        }
        let http = reqwest::Client::builder().build().map_err(BlobError::backend)?;
        Ok(Self { http, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_base, self.config.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.config.api_base, self.config.bot_token, file_path)
    }

    async fn send(&self, strategy: UploadStrategy, object: &ObjectPut, data: &Bytes) -> Result<RelayObjectRef, String> {
        let mut part = Part::bytes(data.to_vec()).file_name(object.file_name.clone());
        if let Some(ct) = &object.content_type {
            part = part.mime_str(ct).map_err(|e| e.to_string())?;
        }
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", object.object_name.clone())
            .part(strategy.field(), part);

        let response = self
            .http
            .post(self.method_url(strategy.method()))
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("{}: {}", strategy.method(), e))?;

        let body: ApiResponse<Message> = response
            .json()
            .await
            .map_err(|e| format!("{}: unreadable response: {}", strategy.method(), e))?;
        let message = body.into_result(strategy.method())?;

        let file_id = message
            .file_id()
            .ok_or_else(|| format!("{}: response carried no file", strategy.method()))?;

        Ok(RelayObjectRef {
            file_id: file_id.to_string(),
            message_id: Some(message.message_id),
        })
    }
}

#[async_trait]
impl BlobBackend for RelayBackend {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::basic().with_max_object_size(self.config.max_object_bytes)
    }

    async fn put(&self, object: &ObjectPut, data: Bytes) -> BlobResult<String> {
        self.capabilities().check_size(data.len() as u64)?;

        let mut failures = Vec::new();
        for strategy in UploadStrategy::chain_for(object.file_type, object.is_part) {
            match self.send(strategy, object, &data).await {
                Ok(remote) => {
                    debug!(
                        "Relayed {} ({} bytes) via {}",
                        object.object_name,
                        data.len(),
                        strategy.method()
                    );
                    return Ok(remote.encode());
                }
                Err(reason) => {
                    warn!("Relay upload of {} via {} failed: {}", object.object_name, strategy.method(), reason);
                    failures.push(reason);
                }
            }
        }

        Err(BlobError::upload_failed(failures.join("; ")))
    }

    async fn get(&self, remote_id: &str) -> BlobResult<Bytes> {
        let remote = RelayObjectRef::parse(remote_id)?;

        let response = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", remote.file_id.as_str())])
            .send()
            .await
            .map_err(|e| BlobError::read_failed(remote_id, e.to_string()))?;
        let body: ApiResponse<RemoteFile> = response
            .json()
            .await
            .map_err(|e| BlobError::read_failed(remote_id, e.to_string()))?;
        let file = body
            .into_result("getFile")
            .map_err(|reason| BlobError::read_failed(remote_id, reason))?;
        let file_path = file
            .file_path
            .ok_or_else(|| BlobError::read_failed(remote_id, "getFile returned no file_path"))?;

        let response = self
            .http
            .get(self.file_url(&file_path))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BlobError::read_failed(remote_id, e.to_string()))?;
        response
            .bytes()
            .await
            .map_err(|e| BlobError::read_failed(remote_id, e.to_string()))
    }

    async fn delete(&self, remote_id: &str) -> BlobResult<()> {
        let remote = RelayObjectRef::parse(remote_id)?;
        let Some(message_id) = remote.message_id else {
            debug!("Relay object {} has no message id; nothing to delete", remote_id);
            return Ok(());
        };

        let response = self
            .http
            .post(self.method_url("deleteMessage"))
            .json(&serde_json::json!({
                "chat_id": self.config.chat_id,
                "message_id": message_id,
            }))
            .send()
            .await
            .map_err(BlobError::backend)?;
        let body: ApiResponse<bool> = response.json().await.map_err(BlobError::backend)?;
        if let Err(reason) = body.into_result("deleteMessage") {
            // Already-deleted messages report failure too
            warn!("Relay delete of {} reported: {}", remote_id, reason);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_always_ends_with_document() {
        assert_eq!(
            UploadStrategy::chain_for(FileType::Image, false),
            vec![UploadStrategy::Photo, UploadStrategy::Document]
        );
        assert_eq!(
            UploadStrategy::chain_for(FileType::Image, true),
            vec![UploadStrategy::Document]
        );
        assert_eq!(
            UploadStrategy::chain_for(FileType::Video, true),
            vec![UploadStrategy::Video, UploadStrategy::Document]
        );
        assert_eq!(
            UploadStrategy::chain_for(FileType::Document, false),
            vec![UploadStrategy::Document]
        );
    }

    #[test]
    fn object_refs_round_trip() {
        let parsed = RelayObjectRef::parse("BQACAgIAAxk:4711").unwrap();
        assert_eq!(parsed.file_id, "BQACAgIAAxk");
        assert_eq!(parsed.message_id, Some(4711));
        assert_eq!(parsed.encode(), "BQACAgIAAxk:4711");

        let bare = RelayObjectRef::parse("BQACAgIAAxk").unwrap();
        assert_eq!(bare.message_id, None);

        assert!(RelayObjectRef::parse("abc:notanumber").is_err());
        assert!(RelayObjectRef::parse(":12").is_err());
    }

    #[test]
    fn message_prefers_document_then_largest_photo() {
        let json = serde_json::json!({
            "message_id": 9,
            "photo": [{"file_id": "small"}, {"file_id": "large"}]
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.file_id(), Some("large"));

        let json = serde_json::json!({"message_id": 9, "document": {"file_id": "doc"}});
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.file_id(), Some("doc"));
    }

    #[test]
    fn api_errors_carry_description() {
        let body: ApiResponse<Message> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: IMAGE_PROCESS_FAILED"
        }))
        .unwrap();
        let err = body.into_result("sendPhoto").unwrap_err();
        assert!(err.contains("400"));
        assert!(err.contains("IMAGE_PROCESS_FAILED"));
    }

    #[test]
    fn capabilities_are_capped_without_range() {
        let backend = RelayBackend::new(RelayConfig::new("token", "-100")).unwrap();
        let caps = backend.capabilities();
        assert!(!caps.supports_range);
        assert_eq!(caps.max_object_size, Some(DEFAULT_RELAY_MAX_OBJECT_BYTES));
        assert!(RelayBackend::new(RelayConfig::new("", "-100")).is_err());
    }
}
