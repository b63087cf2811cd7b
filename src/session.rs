use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{InitError, SendError};

/// Image bytes carried inline with a message, already base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub base64_data: String,
}

/// What a single turn sends to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    /// Text followed by one inline image. The text may be empty.
    Multipart { text: String, image: InlineImage },
}

impl Payload {
    pub fn text(&self) -> &str {
        match self {
            Payload::Text(text) => text,
            Payload::Multipart { text, .. } => text,
        }
    }

    pub fn image(&self) -> Option<&InlineImage> {
        match self {
            Payload::Text(_) => None,
            Payload::Multipart { image, .. } => Some(image),
        }
    }
}

/// A stateful conversation with a hosted model.
///
/// Implementations keep the model-side context between turns; callers only
/// hand over the newest turn.
#[async_trait]
pub trait ChatSession: Send + Sync {
    fn model(&self) -> &str;

    async fn send(&self, payload: Payload) -> Result<String, SendError>;
}

/// Creates chat sessions bound to a model and credential.
pub trait SessionFactory {
    fn create(&self, model: &str, credential: &str) -> Result<Arc<dyn ChatSession>, InitError>;
}
