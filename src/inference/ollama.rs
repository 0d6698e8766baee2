//! Ollama vision backend.
//!
//! Sends the image (base64) together with the query to Ollama's chat
//! endpoint and returns the assistant message text.

use super::InferenceBackend;
use crate::config::ModelConfig;
use crate::error::InferenceError;
use crate::models::ImageRef;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for the Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub retries: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

impl From<&ModelConfig> for OllamaConfig {
    fn from(model: &ModelConfig) -> Self {
        Self {
            ollama_url: model.ollama_url.trim_end_matches('/').to_string(),
            model_name: model.name.clone(),
            temperature: model.temperature,
            timeout_seconds: model.timeout_seconds,
            retries: model.retries,
        }
    }
}

/// Message in the chat request.
#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Ollama `/api/tags` response.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Vision model served by a local or remote Ollama instance.
pub struct OllamaBackend {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create the backend. Does not contact the server; see `health_check`.
    pub fn connect(config: OllamaConfig) -> Result<Self, InferenceError> {
        info!(
            "Initializing Ollama backend with model {} at {}",
            config.model_name, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_request(&self, image_b64: String, query: &str, system: Option<&str>) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
                images: Vec::new(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: query.to_string(),
            images: vec![image_b64],
        });

        OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout(self.config.timeout_seconds)
        } else if e.is_connect() {
            InferenceError::Connect(self.config.ollama_url.clone())
        } else {
            InferenceError::Transport(e.to_string())
        }
    }

    async fn send_once(&self, request: &OllamaChatRequest) -> Result<String, InferenceError> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api { status, body });
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        Ok(chat_response.message.content.trim().to_string())
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn run_inference(
        &self,
        image: &ImageRef,
        query: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, InferenceError> {
        let bytes = tokio::fs::read(image.path())
            .await
            .map_err(|source| InferenceError::Image {
                path: image.to_string(),
                source,
            })?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let request = self.build_request(encoded, query, system_instruction);

        debug!("Calling model with query: {}", query);

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(text) => {
                    debug!("Got response ({} chars)", text.len());
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(
                        "Inference attempt {} failed: {}. Retrying ({}/{})",
                        attempt, e, attempt, self.config.retries
                    );
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn health_check(&self) -> Result<(), InferenceError> {
        let url = format!("{}/api/tags", self.config.ollama_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api { status, body });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();

        if model_available(&names, &self.config.model_name) {
            info!("Model {} is available", self.config.model_name);
            Ok(())
        } else {
            Err(InferenceError::ModelMissing(self.config.model_name.clone()))
        }
    }
}

/// Match a model name against the server's tags, treating a missing tag as `:latest`.
fn model_available(available: &[String], wanted: &str) -> bool {
    let normalize = |name: &str| {
        if name.contains(':') {
            name.to_string()
        } else {
            format!("{}:latest", name)
        }
    };
    let wanted = normalize(wanted);
    available.iter().any(|name| normalize(name) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CHAT_OK: &str = r#"{"message":{"role":"assistant","content":" EXIT 12 "}}"#;

    /// Local server answering each connection with the next scripted
    /// `(status, body)`. Returns its URL and a hit counter.
    async fn scripted_server(replies: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            let mut replies = replies.into_iter();
            while let Ok((mut stream, _)) = listener.accept().await {
                read_request(&mut stream).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = replies.next().unwrap_or((500, "exhausted"));
                let reply = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, hits)
    }

    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    return;
                }
            }
        }
    }

    fn image_file() -> tempfile::NamedTempFile {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(b"not really a png").unwrap();
        image
    }

    fn test_config(url: &str) -> OllamaConfig {
        OllamaConfig {
            ollama_url: url.to_string(),
            model_name: "llava:13b".to_string(),
            temperature: 0.1,
            timeout_seconds: 5,
            retries: 0,
        }
    }

    #[test]
    fn test_request_shape() {
        let backend = OllamaBackend::connect(test_config("http://localhost:11434")).unwrap();
        let request = backend.build_request("aGVsbG8=".to_string(), "What is shown?", Some("Be brief."));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "llava:13b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json["messages"][0].get("images").is_none());
        assert_eq!(json["messages"][1]["content"], "What is shown?");
        assert_eq!(json["messages"][1]["images"][0], "aGVsbG8=");
    }

    #[test]
    fn test_request_without_system_instruction() {
        let backend = OllamaBackend::connect(test_config("http://localhost:11434")).unwrap();
        let request = backend.build_request(String::new(), "q", None);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn test_model_available() {
        let tags = vec!["llava:13b".to_string(), "bakllava".to_string()];
        assert!(model_available(&tags, "llava:13b"));
        assert!(model_available(&tags, "bakllava:latest"));
        assert!(!model_available(&tags, "llava:34b"));
    }

    #[test]
    fn test_config_from_model_settings() {
        let model = ModelConfig {
            ollama_url: "http://gpu-box:11434/".to_string(),
            ..ModelConfig::default()
        };
        let config = OllamaConfig::from(&model);
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.retries, model.retries);
    }

    #[tokio::test]
    async fn test_missing_image_is_inference_error() {
        let backend = OllamaBackend::connect(test_config("http://localhost:11434")).unwrap();
        let err = backend
            .run_inference(&ImageRef::new("/definitely/not/here.png"), "q", None)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Image { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connect_error() {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(b"not really a png").unwrap();

        let backend = OllamaBackend::connect(test_config("http://127.0.0.1:1")).unwrap();
        let err = backend
            .run_inference(&ImageRef::new(image.path()), "q", None)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Connect(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (url, hits) = scripted_server(vec![(503, "loading model"), (200, CHAT_OK)]).await;
        let backend = OllamaBackend::connect(OllamaConfig {
            retries: 2,
            ..test_config(&url)
        })
        .unwrap();
        let image = image_file();

        let text = backend
            .run_inference(&ImageRef::new(image.path()), "q", None)
            .await
            .unwrap();
        assert_eq!(text, "EXIT 12");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_stop_after_configured_attempts() {
        let (url, hits) = scripted_server(vec![(503, "busy"), (503, "busy"), (503, "busy"), (200, CHAT_OK)]).await;
        let backend = OllamaBackend::connect(OllamaConfig {
            retries: 2,
            ..test_config(&url)
        })
        .unwrap();
        let image = image_file();

        let err = backend
            .run_inference(&ImageRef::new(image.path()), "q", None)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Api { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, hits) = scripted_server(vec![(404, "model not found"), (200, CHAT_OK)]).await;
        let backend = OllamaBackend::connect(OllamaConfig {
            retries: 2,
            ..test_config(&url)
        })
        .unwrap();
        let image = image_file();

        let err = backend
            .run_inference(&ImageRef::new(image.path()), "q", None)
            .await
            .unwrap_err();
        match err {
            InferenceError::Api { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_check_against_tags() {
        let (url, _) = scripted_server(vec![
            (200, r#"{"models":[{"name":"llava:13b"}]}"#),
            (200, r#"{"models":[{"name":"bakllava:latest"}]}"#),
        ])
        .await;
        let backend = OllamaBackend::connect(test_config(&url)).unwrap();

        assert!(backend.health_check().await.is_ok());
        assert!(matches!(
            backend.health_check().await,
            Err(InferenceError::ModelMissing(_))
        ));
    }
}
