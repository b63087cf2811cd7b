//! Conversation state and the commands that change it.
//!
//! A submission goes `Idle -> Sending -> Idle`. The user message is appended
//! optimistically when the send starts and removed again if the send fails,
//! with the draft restored so it can be retried without retyping.

use std::sync::Arc;

use crate::attachment::{AttachmentPreview, FileBlob, ImageAttachment};
use crate::error::{ChatError, SendError};
use crate::session::{ChatSession, Payload, SessionFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub attachment: Option<AttachmentPreview>,
}

impl Message {
    fn user(input: &PendingInput) -> Self {
        Self {
            role: Role::User,
            text: input.text.clone(),
            attachment: input.attachment.as_ref().map(ImageAttachment::preview),
        }
    }

    fn model(text: String) -> Self {
        Self {
            role: Role::Model,
            text,
            attachment: None,
        }
    }
}

/// The draft the user is composing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingInput {
    pub text: String,
    pub attachment: Option<ImageAttachment>,
}

impl PendingInput {
    /// Whitespace-only text with no attachment counts as nothing to send.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }

    fn to_payload(&self) -> Payload {
        match &self.attachment {
            None => Payload::Text(self.text.clone()),
            Some(image) => Payload::Multipart {
                text: self.text.clone(),
                image: image.to_inline(),
            },
        }
    }
}

/// A send that has been started but not yet performed.
///
/// Produced by [`Controller::begin_submit`]; its result must be handed back
/// to [`Controller::finish_submit`].
pub struct Dispatch {
    session: Arc<dyn ChatSession>,
    payload: Payload,
}

impl Dispatch {
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub async fn run(self) -> Result<String, SendError> {
        self.session.send(self.payload).await
    }
}

#[derive(Default)]
pub struct Controller {
    session: Option<Arc<dyn ChatSession>>,
    messages: Vec<Message>,
    pending: PendingInput,
    // Rollback snapshot of the draft being sent. Present exactly while busy.
    in_flight: Option<PendingInput>,
    last_error: Option<String>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the chat session. A missing or blank credential is a
    /// configuration error; either failure leaves sending disabled.
    pub fn initialize_session(
        &mut self,
        factory: &dyn SessionFactory,
        credential: Option<&str>,
        model: &str,
    ) -> Result<(), ChatError> {
        if self.session.is_some() {
            tracing::warn!("chat session already initialized, keeping the existing one");
            return Ok(());
        }

        let result = match credential.map(str::trim).filter(|c| !c.is_empty()) {
            None => Err(ChatError::Config(
                "API key is not set. Export GEMINI_API_KEY or run `vision-chat config --set-api-key <KEY>`"
                    .to_string(),
            )),
            Some(credential) => factory
                .create(model, credential)
                .map_err(ChatError::from),
        };

        match result {
            Ok(session) => {
                tracing::info!(model = %session.model(), "chat session created");
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                self.report(err.clone());
                Err(err)
            }
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn model(&self) -> Option<&str> {
        self.session.as_deref().map(|s| s.model())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending(&self) -> &PendingInput {
        &self.pending
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True when [`Controller::begin_submit`] would start a send.
    pub fn can_submit(&self) -> bool {
        self.session.is_some() && !self.is_busy() && !self.pending.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.pending.text
    }

    /// Draft text is editable at any time, including while a send is outstanding.
    pub fn text_mut(&mut self) -> &mut String {
        &mut self.pending.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.pending.text = text.into();
    }

    /// Stage an image, replacing any previous one. Non-images are rejected
    /// and the current attachment is kept.
    pub fn stage_attachment(&mut self, file: FileBlob) -> Result<(), ChatError> {
        let name = file.name.clone();
        match ImageAttachment::from_blob(file) {
            Ok(image) => {
                tracing::debug!(name = %image.name(), mime = %image.mime_type(), size = image.len(), "attachment staged");
                self.pending.attachment = Some(image);
                Ok(())
            }
            Err(err) => {
                tracing::info!(name = %name, "rejected attachment");
                self.report(err.clone());
                Err(err)
            }
        }
    }

    pub fn clear_attachment(&mut self) {
        self.pending.attachment = None;
    }

    /// Record an error for display.
    pub fn report(&mut self, error: ChatError) {
        tracing::warn!(error = %error, terminal = error.is_terminal(), "conversation error");
        self.last_error = Some(error.to_string());
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    /// Start a submission: append the user message, move the draft into the
    /// rollback snapshot and hand back the send to perform. Returns `None`
    /// (changing nothing) when there is no session, a send is already
    /// outstanding, or nothing is staged.
    pub fn begin_submit(&mut self) -> Option<Dispatch> {
        if self.is_busy() {
            tracing::debug!("submit ignored, a send is already outstanding");
            return None;
        }
        let session = self.session.clone()?;
        if self.pending.is_empty() {
            return None;
        }

        let snapshot = std::mem::take(&mut self.pending);
        let payload = snapshot.to_payload();
        self.messages.push(Message::user(&snapshot));
        self.in_flight = Some(snapshot);
        self.last_error = None;

        tracing::info!(
            text_len = payload.text().len(),
            with_image = payload.image().is_some(),
            "sending message"
        );

        Some(Dispatch { session, payload })
    }

    /// Apply the outcome of the outstanding send.
    pub fn finish_submit(&mut self, result: Result<String, SendError>) {
        let Some(snapshot) = self.in_flight.take() else {
            tracing::warn!("send outcome arrived with nothing in flight, ignoring");
            return;
        };

        match result {
            Ok(reply) => {
                tracing::info!(reply_len = reply.len(), "reply received");
                self.messages.push(Message::model(reply));
            }
            Err(err) => {
                // The busy guard keeps our user message at the tail of the log.
                let removed = self.messages.pop();
                debug_assert!(matches!(removed, Some(Message { role: Role::User, .. })));
                self.pending = snapshot;
                self.report(ChatError::Send(err));
            }
        }
    }

    /// Run a whole submission. Returns false if nothing was sent.
    pub async fn submit(&mut self) -> bool {
        let Some(dispatch) = self.begin_submit() else {
            return false;
        };
        let result = dispatch.run().await;
        self.finish_submit(result);
        true
    }
}
