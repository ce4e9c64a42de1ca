//! A remote file open for editing within a session.

use tracing::{debug, warn};

use portal_core::transfer::{FrameSink, TransferError, UploadSummary, upload};

use crate::connector::{ConnectorError, ConnectorHandle};
use crate::file_source::{DownloadRequest, FileSource, FileSourceError};

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("failed to load {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: FileSourceError,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Outcome of asking to close the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseRequest {
    Close,
    /// There are unsaved changes; the caller decides whether to discard.
    UnsavedChanges,
}

#[derive(Debug, Clone)]
pub struct FileEditor {
    path: String,
    text: String,
    dirty: bool,
}

impl FileEditor {
    /// Download `request.path` and decode it as UTF-8 text.
    pub async fn open<S: FileSource>(
        source: &S,
        request: &DownloadRequest,
    ) -> Result<Self, EditorError> {
        let bytes = source.download(request).await.map_err(|source| EditorError::Load {
            path: request.path.clone(),
            source,
        })?;

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %request.path, "file is not valid UTF-8, invalid bytes replaced");
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };
        debug!(path = %request.path, bytes = text.len(), "file opened");
        Ok(Self::from_text(request.path.clone(), text))
    }

    pub fn from_text(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            dirty: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn update(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            self.text = text;
            self.dirty = true;
        }
    }

    /// Write the whole file through `sink`. The dirty flag clears only after
    /// CLOSE went out.
    pub fn save<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<UploadSummary, EditorError> {
        let summary = upload(sink, &self.path, &self.text)?;
        self.dirty = false;
        Ok(summary)
    }

    /// Save over a live session's channel.
    pub async fn save_to(
        &mut self,
        connector: &ConnectorHandle,
    ) -> Result<UploadSummary, EditorError> {
        let summary = connector.save(&self.path, &self.text).await?;
        self.dirty = false;
        Ok(summary)
    }

    pub fn request_close(&self) -> CloseRequest {
        if self.dirty {
            CloseRequest::UnsavedChanges
        } else {
            CloseRequest::Close
        }
    }

    /// Drop unsaved changes and close.
    pub fn discard(self) {
        if self.dirty {
            debug!(path = %self.path, "discarding unsaved changes");
        }
    }
}
