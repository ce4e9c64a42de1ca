//! Fetching remote file contents for editing.

use std::future::Future;
use tracing::debug;

/// Everything the download endpoint needs to locate one remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub server: String,
    pub identity: String,
    pub path: String,
    pub session_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FileSourceError {
    #[error("file service is unavailable")]
    Unavailable,

    #[error("download failed with status {0}")]
    Status(u16),

    #[error("download failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl FileSourceError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Request(err)
        }
    }
}

/// Raw bytes of a remote file.
pub trait FileSource: Send + Sync {
    fn download(
        &self,
        request: &DownloadRequest,
    ) -> impl Future<Output = Result<Vec<u8>, FileSourceError>> + Send;
}

/// Downloads through the HTTP API's `servers/sftp-download` endpoint.
#[derive(Debug, Clone)]
pub struct HttpFileSource {
    client: reqwest::Client,
    api_base: String,
}

impl HttpFileSource {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    fn download_url(&self) -> String {
        format!("{}/servers/sftp-download", self.api_base.trim_end_matches('/'))
    }
}

impl FileSource for HttpFileSource {
    async fn download(&self, request: &DownloadRequest) -> Result<Vec<u8>, FileSourceError> {
        let url = self.download_url();
        debug!(%url, server = %request.server, path = %request.path, "downloading file");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("serverId", request.server.as_str()),
                ("identityId", request.identity.as_str()),
                ("path", request.path.as_str()),
                ("sessionToken", request.session_token.as_str()),
            ])
            .send()
            .await
            .map_err(FileSourceError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FileSourceError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(FileSourceError::from_reqwest)?;
        Ok(body.to_vec())
    }
}
