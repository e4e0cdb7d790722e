//! HTTP implementations of the artwork seams.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};

use crate::artwork::{ArtworkSource, ArtworkUploader};
use crate::errors::PresenceError;

const USER_AGENT: &str = concat!("PMORichPresence/", env!("CARGO_PKG_VERSION"));
const CATBOX_API: &str = "https://catbox.moe/user/api.php";
/// Size requested from the source; large enough for the presence card.
const ARTWORK_SIZE: u32 = 512;

fn build_client(timeout: Duration) -> Result<Client, PresenceError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Anonymous uploads to catbox.moe.
#[derive(Debug, Clone)]
pub struct CatboxUploader {
    client: Client,
    endpoint: String,
}

impl CatboxUploader {
    pub fn new() -> Result<Self, PresenceError> {
        Self::with_endpoint(CATBOX_API)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, PresenceError> {
        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ArtworkUploader for CatboxUploader {
    fn name(&self) -> &str {
        "catbox"
    }

    async fn upload(&self, _key: &str, image: Bytes) -> Result<String, PresenceError> {
        let part = Part::stream(image)
            .file_name("cover.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("reqtype", "fileupload")
            .part("fileToUpload", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let body = body.trim();

        if status != StatusCode::OK {
            return Err(PresenceError::rejected(
                self.name(),
                format!("HTTP {}: {}", status, body),
            ));
        }
        if !body.starts_with("http") {
            return Err(PresenceError::rejected(self.name(), body));
        }
        Ok(body.to_string())
    }
}

/// Image endpoint of the playback source core.
#[derive(Debug, Clone)]
pub struct HttpArtworkSource {
    client: Client,
    base_url: String,
}

impl HttpArtworkSource {
    pub fn new(host: &str, port: u16) -> Result<Self, PresenceError> {
        Ok(Self {
            client: build_client(Duration::from_secs(10))?,
            base_url: format!("http://{}:{}", host, port),
        })
    }

    pub fn image_url(&self, key: &str) -> String {
        format!(
            "{}/api/image/{}?scale=fit&width={size}&height={size}&format=image/jpeg",
            self.base_url,
            key,
            size = ARTWORK_SIZE
        )
    }
}

#[async_trait]
impl ArtworkSource for HttpArtworkSource {
    async fn fetch_artwork(&self, key: &str) -> Result<Option<Bytes>, PresenceError> {
        let response = self.client.get(self.image_url(key)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                Ok((!bytes.is_empty()).then_some(bytes))
            }
            status => Err(PresenceError::SourceUnavailable(format!(
                "HTTP {} for image {}",
                status, key
            ))),
        }
    }
}

/// Source without any image endpoint (no core address configured).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArtwork;

#[async_trait]
impl ArtworkSource for NoArtwork {
    async fn fetch_artwork(&self, _key: &str) -> Result<Option<Bytes>, PresenceError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url() {
        let source = HttpArtworkSource::new("core.local", 9100).unwrap();
        assert_eq!(
            source.image_url("abc123"),
            "http://core.local:9100/api/image/abc123?scale=fit&width=512&height=512&format=image/jpeg"
        );
    }

    #[tokio::test]
    async fn test_no_artwork() {
        assert_eq!(NoArtwork.fetch_artwork("k").await.unwrap(), None);
    }
}
