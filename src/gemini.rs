//! Chat session backed by the Gemini `generateContent` REST endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{InitError, SendError};
use crate::session::{ChatSession, Payload, SessionFactory};

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    InlineData(Blob),
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

impl Content {
    fn user(payload: Payload) -> Self {
        let parts = match payload {
            Payload::Text(text) => vec![Part::Text(text)],
            Payload::Multipart { text, image } => {
                let mut parts = Vec::with_capacity(2);
                // The API rejects empty text parts; an image-only turn sends just the image.
                if !text.is_empty() {
                    parts.push(Part::Text(text));
                }
                parts.push(Part::InlineData(Blob {
                    mime_type: image.mime_type,
                    data: image.base64_data,
                }));
                parts
            }
        };
        Self { role: "user", parts }
    }

    fn model(text: &str) -> Self {
        Self {
            role: "model",
            parts: vec![Part::Text(text.to_string())],
        }
    }
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GenerateContentResponse {
    fn into_reply(self) -> Result<String, SendError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = block_reason
                .map(|r| format!("prompt blocked: {}", r))
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(SendError::EmptyReply(reason));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text)
            .collect();

        if text.is_empty() {
            let reason = candidate
                .finish_reason
                .unwrap_or_else(|| "empty candidate".to_string());
            return Err(SendError::EmptyReply(reason));
        }

        Ok(text)
    }
}

/// Builds [`GeminiSession`]s from the loaded configuration.
#[derive(Debug, Clone)]
pub struct GeminiSessionFactory {
    base_url: String,
    timeout: Duration,
    system_instruction: Option<String>,
}

impl GeminiSessionFactory {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            system_instruction: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let factory = Self::new(config.base_url(), config.request_timeout());
        match config.system_instruction() {
            Some(instruction) => factory.with_system_instruction(instruction),
            None => factory,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

impl SessionFactory for GeminiSessionFactory {
    fn create(&self, model: &str, credential: &str) -> Result<Arc<dyn ChatSession>, InitError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(InitError::EmptyModel);
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| InitError::Client(e.to_string()))?;

        Ok(Arc::new(GeminiSession {
            client,
            url: format!("{}/models/{}:generateContent", self.base_url, model),
            model: model.to_string(),
            api_key: credential.to_string(),
            system_instruction: self.system_instruction.clone(),
            history: Mutex::new(Vec::new()),
        }))
    }
}

pub struct GeminiSession {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    system_instruction: Option<String>,
    // Only turns that got a reply are kept, so a failed send leaves context untouched.
    history: Mutex<Vec<Content>>,
}

impl GeminiSession {
    async fn generate(&self, contents: &[Content]) -> Result<String, SendError> {
        let request = GenerateContentRequest {
            contents,
            system_instruction: self.system_instruction.as_ref().map(|text| SystemInstruction {
                parts: vec![Part::Text(text.clone())],
            }),
        };

        let response = self.client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| truncate(&body, 200));
            return Err(SendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| SendError::Decode(e.to_string()))?;
        body.into_reply()
    }
}

#[async_trait]
impl ChatSession for GeminiSession {
    fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, payload: Payload) -> Result<String, SendError> {
        let mut history = self.history.lock().await;

        let mut contents = history.clone();
        contents.push(Content::user(payload));

        tracing::debug!(model = %self.model, turns = contents.len(), "generateContent");
        let reply = self.generate(&contents).await;

        match &reply {
            Ok(text) => {
                contents.push(Content::model(text));
                *history = contents;
            }
            Err(err) => tracing::warn!(model = %self.model, error = %err, "generateContent failed"),
        }
        reply
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InlineImage;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/models/gemini-test:generateContent";

    fn reply_body(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
    }

    async fn session_for(server: &MockServer) -> Arc<dyn ChatSession> {
        GeminiSessionFactory::new(&server.uri(), Duration::from_secs(5))
            .create("gemini-test", "test-key")
            .unwrap()
    }

    async fn request_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_text_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        let reply = session.send(Payload::Text("Hello".to_string())).await.unwrap();
        assert_eq!(reply, "Hi there");

        let bodies = request_bodies(&server).await;
        assert_eq!(
            bodies[0],
            json!({ "contents": [{ "role": "user", "parts": [{ "text": "Hello" }] }] })
        );
    }

    #[tokio::test]
    async fn test_history_carries_previous_turns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("sure")))
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        session.send(Payload::Text("one".to_string())).await.unwrap();
        session.send(Payload::Text("two".to_string())).await.unwrap();

        let bodies = request_bodies(&server).await;
        let contents = bodies[1]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["parts"][0]["text"], "one");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "sure");
        assert_eq!(contents[2]["parts"][0]["text"], "two");
    }

    #[tokio::test]
    async fn test_image_only_turn_sends_inline_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("a cat")))
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        let payload = Payload::Multipart {
            text: String::new(),
            image: InlineImage {
                mime_type: "image/png".to_string(),
                base64_data: "AQID".to_string(),
            },
        };
        assert_eq!(session.send(payload).await.unwrap(), "a cat");

        let bodies = request_bodies(&server).await;
        assert_eq!(
            bodies[0]["contents"][0]["parts"],
            json!([{ "inlineData": { "mimeType": "image/png", "data": "AQID" } }])
        );
    }

    #[tokio::test]
    async fn test_system_instruction_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("ok")))
            .mount(&server)
            .await;

        let session = GeminiSessionFactory::new(&server.uri(), Duration::from_secs(5))
            .with_system_instruction("Be brief.")
            .create("gemini-test", "test-key")
            .unwrap();
        session.send(Payload::Text("hi".to_string())).await.unwrap();

        let bodies = request_bodies(&server).await;
        assert_eq!(
            bodies[0]["systemInstruction"],
            json!({ "parts": [{ "text": "Be brief." }] })
        );
    }

    #[tokio::test]
    async fn test_api_error_message_and_history_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT" }
            })))
            .mount(&server)
            .await;

        let factory = GeminiSessionFactory::new(&server.uri(), Duration::from_secs(5));
        let session = factory.create("gemini-test", "bad-key").unwrap();
        let err = session.send(Payload::Text("hello".to_string())).await.unwrap_err();
        assert_eq!(
            err,
            SendError::Api {
                status: 400,
                message: "API key not valid.".to_string()
            }
        );

        session.send(Payload::Text("again".to_string())).await.unwrap_err();
        let bodies = request_bodies(&server).await;
        assert_eq!(bodies[1]["contents"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_plain_text_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        let err = session.send(Payload::Text("hello".to_string())).await.unwrap_err();
        assert_eq!(
            err,
            SendError::Api {
                status: 502,
                message: "Bad Gateway".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_empty_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let session = session_for(&server).await;
        let err = session.send(Payload::Text("hello".to_string())).await.unwrap_err();
        assert_eq!(err, SendError::EmptyReply("prompt blocked: SAFETY".to_string()));
    }

    #[test]
    fn test_thought_parts_are_skipped() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "thinking...", "thought": true },
                    { "text": "Hello " },
                    { "text": "world" }
                ]}
            }]
        }))
        .unwrap();
        assert_eq!(response.into_reply().unwrap(), "Hello world");
    }

    #[test]
    fn test_empty_candidate_reports_finish_reason() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "MAX_TOKENS" }]
        }))
        .unwrap();
        assert_eq!(
            response.into_reply().unwrap_err(),
            SendError::EmptyReply("MAX_TOKENS".to_string())
        );
    }

    #[test]
    fn test_empty_model_is_init_error() {
        let factory = GeminiSessionFactory::new("http://localhost", Duration::from_secs(1));
        assert_eq!(
            factory.create("  ", "key").err(),
            Some(InitError::EmptyModel)
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("  short  ", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
