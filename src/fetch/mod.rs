//! Bounded HTTP image fetching.
//!
//! Candidate thumbnails come from untrusted URLs, so every download is
//! capped in both time and size before the bytes reach the decoder.

use image::DynamicImage;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

use crate::config::FetchConfig;

/// Why a candidate image could not be turned into a decoded picture.
///
/// Callers treat every variant as "skip this candidate"; the variant only
/// matters for logging.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("failed to read response body: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Seam for the download step so the ranking pipeline can be exercised
/// without a network.
pub trait FetchImage: Send + Sync {
    fn fetch(&self, url: &str) -> Result<DynamicImage, FetchError>;
}

/// HTTP fetcher with a per-request timeout and payload cap.
pub struct ImageFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl ImageFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();

        Self {
            agent,
            max_bytes: config.max_bytes,
        }
    }
}

impl FetchImage for ImageFetcher {
    fn fetch(&self, url: &str) -> Result<DynamicImage, FetchError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        // Read one byte past the cap so an oversized payload is detected
        // without buffering the whole thing.
        let mut body = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes + 1)
            .read_to_end(&mut body)?;

        if body.len() as u64 > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let image = image::load_from_memory(&body)?;

        // Canonical 3-channel RGB regardless of source format
        Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
    }
}
