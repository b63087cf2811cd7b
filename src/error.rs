//! Error taxonomy surfaced by the conversation controller.
//!
//! `Config` and `Init` are terminal: the controller never gets a session and
//! every send affordance stays disabled. `Validation` and `Send` are
//! recoverable; a send failure rolls the optimistic user message back.

use thiserror::Error;

/// Failure while constructing a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("model identifier is empty")]
    EmptyModel,
    #[error("could not build HTTP client: {0}")]
    Client(String),
}

/// Failure of a single send on an established chat session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("Gemini API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("model returned no text ({0})")]
    EmptyReply(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to start chat session: {0}")]
    Init(#[from] InitError),
    #[error("invalid attachment: {0}")]
    Validation(String),
    #[error("failed to send message: {0}")]
    Send(#[from] SendError),
}

impl ChatError {
    /// Terminal errors leave the controller without a session for its lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatError::Config(_) | ChatError::Init(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(ChatError::Config("missing key".into()).is_terminal());
        assert!(ChatError::Init(InitError::EmptyModel).is_terminal());
        assert!(!ChatError::Validation("not an image".into()).is_terminal());
        assert!(!ChatError::Send(SendError::Transport("reset".into())).is_terminal());
    }

    #[test]
    fn test_send_error_message_is_user_readable() {
        let err = ChatError::from(SendError::Api {
            status: 429,
            message: "Resource has been exhausted".into(),
        });
        assert_eq!(
            err.to_string(),
            "failed to send message: Gemini API error 429: Resource has been exhausted"
        );
    }
}
