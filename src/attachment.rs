use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::ChatError;
use crate::session::InlineImage;

/// A file handed to the controller by the file source, with its declared MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file fully; the MIME type is declared from its extension.
    pub async fn from_path(path: &Path) -> Result<Self, ChatError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ChatError::Validation(format!("cannot read {}: {}", path.display(), e)))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, mime_type_for_path(path), bytes))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Declared MIME type for a path, based on its extension only.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// A staged image. Cloning shares the underlying bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    name: String,
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageAttachment {
    /// Accepts the blob only if its declared MIME type is an image type.
    pub fn from_blob(blob: FileBlob) -> Result<Self, ChatError> {
        if !blob.is_image() {
            return Err(ChatError::Validation("not an image".to_string()));
        }

        Ok(Self {
            name: blob.name,
            mime_type: blob.mime_type,
            bytes: blob.bytes.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn to_inline(&self) -> InlineImage {
        InlineImage {
            mime_type: self.mime_type.clone(),
            base64_data: STANDARD.encode(&self.bytes),
        }
    }

    pub fn preview(&self) -> AttachmentPreview {
        AttachmentPreview {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.bytes.len(),
        }
    }
}

/// Displayable reference to an image attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPreview {
    pub name: String,
    pub mime_type: String,
    pub size: usize,
}

impl AttachmentPreview {
    pub fn label(&self) -> String {
        format!("{} · {} · {}", self.name, self.mime_type, format_size(self.size))
    }
}

fn format_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;

    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}
