//! Multipart HTTP upload of encoded segments.
//!
//! One POST per segment with the payload in the `audio` form field. A
//! non-2xx status is a `SoundtrapError::Transport`; there is no retry.

use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use tracing::info;

use super::{EncodedSegment, TransportSink};
use crate::error::{Result, SoundtrapError};

#[derive(Debug, Clone)]
pub struct HttpUploaderConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl HttpUploaderConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            timeout: Duration::from_secs(20),
        }
    }
}

/// Uploads each segment with a blocking `reqwest` client.
///
/// The client is built lazily on the first send so that constructing the
/// uploader inside an async context is safe; sends run on the pipeline's
/// blocking thread.
pub struct HttpUploader {
    config: HttpUploaderConfig,
    client: Option<Client>,
}

impl HttpUploader {
    pub fn new(config: HttpUploaderConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&Client> {
        if self.client.is_none() {
            let client = Client::builder()
                .timeout(self.config.timeout)
                .build()
                .map_err(|e| SoundtrapError::Transport(format!("client build failed: {e}")))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| SoundtrapError::Transport("client unavailable".into()))
    }
}

impl TransportSink for HttpUploader {
    fn send(&mut self, encoded: &EncodedSegment) -> Result<()> {
        let part = multipart::Part::bytes(encoded.bytes.clone())
            .file_name(format!("segment-{}.{}", encoded.segment_id, encoded.extension))
            .mime_str(encoded.content_type)
            .map_err(|e| SoundtrapError::Transport(format!("multipart part failed: {e}")))?;
        let form = multipart::Form::new().part("audio", part);

        let url = self.config.url.clone();
        let token = self.config.bearer_token.clone();
        let mut request = self.client()?.post(&url).multipart(form);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| SoundtrapError::Transport(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SoundtrapError::Transport(format!(
                "upload returned status {status}"
            )));
        }

        info!(
            segment_id = encoded.segment_id,
            bytes = encoded.bytes.len(),
            %status,
            "segment uploaded"
        );
        Ok(())
    }
}

impl std::fmt::Debug for HttpUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUploader")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}
