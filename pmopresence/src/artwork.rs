//! Cover art: fetch from the playback source, upload to a public host, cache the URL.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pmocache::ArtifactCache;
use tracing::{debug, warn};

use crate::errors::PresenceError;

/// Raw image bytes provider, backed by the playback source.
#[async_trait]
pub trait ArtworkSource: Debug + Send + Sync {
    /// `Ok(None)` when the source has no image for `key`.
    async fn fetch_artwork(&self, key: &str) -> Result<Option<Bytes>, PresenceError>;
}

/// Public image host.
#[async_trait]
pub trait ArtworkUploader: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Uploads `image` and returns its public URL.
    async fn upload(&self, key: &str, image: Bytes) -> Result<String, PresenceError>;
}

/// Tries each provider in order and keeps the first URL obtained.
#[derive(Debug, Default)]
pub struct FallbackUploader {
    providers: Vec<Arc<dyn ArtworkUploader>>,
}

impl FallbackUploader {
    pub fn new(providers: Vec<Arc<dyn ArtworkUploader>>) -> Self {
        Self { providers }
    }

    pub fn push(&mut self, provider: Arc<dyn ArtworkUploader>) {
        self.providers.push(provider);
    }
}

#[async_trait]
impl ArtworkUploader for FallbackUploader {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn upload(&self, key: &str, image: Bytes) -> Result<String, PresenceError> {
        for provider in &self.providers {
            match provider.upload(key, image.clone()).await {
                Ok(url) => {
                    debug!("Uploaded {} to {}: {}", key, provider.name(), url);
                    return Ok(url);
                }
                Err(e) => warn!("Upload to {} failed: {}", provider.name(), e),
            }
        }
        Err(PresenceError::UploadExhausted {
            attempts: self.providers.len(),
        })
    }
}

/// Turns an artwork key into a public URL, going through the cache first.
#[derive(Debug)]
pub struct ArtworkResolver {
    cache: Arc<ArtifactCache>,
    source: Arc<dyn ArtworkSource>,
    uploader: Arc<dyn ArtworkUploader>,
}

impl ArtworkResolver {
    pub fn new(
        cache: Arc<ArtifactCache>,
        source: Arc<dyn ArtworkSource>,
        uploader: Arc<dyn ArtworkUploader>,
    ) -> Self {
        Self {
            cache,
            source,
            uploader,
        }
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn cached(&self, key: &str) -> Option<String> {
        self.cache.get(key)
    }

    /// Cached URL, or fetch + upload + store. Failures are logged and yield `None`.
    pub async fn resolve(&self, key: &str, ttl_ms: i64) -> Option<String> {
        if let Some(url) = self.cache.get(key) {
            debug!("Cover cache hit for {}", key);
            return Some(url);
        }

        match self.fetch_and_upload(key).await {
            Ok(Some(url)) => {
                self.cache.set(key, &url, ttl_ms);
                Some(url)
            }
            Ok(None) => {
                debug!("No artwork available for {}", key);
                None
            }
            Err(e) => {
                warn!("Cover art unavailable for {}: {}", key, e);
                None
            }
        }
    }

    async fn fetch_and_upload(&self, key: &str) -> Result<Option<String>, PresenceError> {
        let Some(image) = self.source.fetch_artwork(key).await? else {
            return Ok(None);
        };
        debug!("Uploading cover {} ({} bytes)", key, image.len());
        self.uploader.upload(key, image).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StaticSource(Option<&'static [u8]>);

    #[async_trait]
    impl ArtworkSource for StaticSource {
        async fn fetch_artwork(&self, _key: &str) -> Result<Option<Bytes>, PresenceError> {
            Ok(self.0.map(Bytes::from_static))
        }
    }

    #[derive(Debug, Default)]
    struct CountingUploader {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtworkUploader for CountingUploader {
        fn name(&self) -> &str {
            "counting"
        }

        async fn upload(&self, key: &str, _image: Bytes) -> Result<String, PresenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PresenceError::rejected("counting", "nope"))
            } else {
                Ok(format!("https://files.example/{}.jpg", key))
            }
        }
    }

    #[tokio::test]
    async fn test_fallback_keeps_first_success() {
        let broken = Arc::new(CountingUploader {
            fail: true,
            ..Default::default()
        });
        let working = Arc::new(CountingUploader::default());
        let fallback = FallbackUploader::new(vec![broken.clone(), working.clone()]);

        let url = fallback.upload("k", Bytes::from_static(b"jpg")).await.unwrap();
        assert_eq!(url, "https://files.example/k.jpg");
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert_eq!(working.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_exhausted() {
        let fallback = FallbackUploader::new(vec![
            Arc::new(CountingUploader {
                fail: true,
                ..Default::default()
            }),
            Arc::new(CountingUploader {
                fail: true,
                ..Default::default()
            }),
        ]);
        assert!(matches!(
            fallback.upload("k", Bytes::new()).await,
            Err(PresenceError::UploadExhausted { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_resolve_uploads_once_then_hits_cache() {
        let cache = Arc::new(ArtifactCache::in_memory().unwrap());
        let uploader = Arc::new(CountingUploader::default());
        let resolver = ArtworkResolver::new(
            cache.clone(),
            Arc::new(StaticSource(Some(b"jpg"))),
            uploader.clone(),
        );

        assert_eq!(resolver.cached("img"), None);
        let first = resolver.resolve("img", 60_000).await;
        let second = resolver.resolve("img", 60_000).await;
        assert_eq!(first.as_deref(), Some("https://files.example/img.jpg"));
        assert_eq!(first, second);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_image_is_not_uploaded() {
        let uploader = Arc::new(CountingUploader::default());
        let resolver = ArtworkResolver::new(
            Arc::new(ArtifactCache::in_memory().unwrap()),
            Arc::new(StaticSource(None)),
            uploader.clone(),
        );
        assert_eq!(resolver.resolve("img", 60_000).await, None);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    }
}
