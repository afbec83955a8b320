//! Scene-to-image ranking pipeline.
//!
//! Embeds the scene description once, then walks the candidates in input
//! order: fetch, embed, score by cosine similarity. Candidates that fail to
//! download or decode are dropped; they never fail the request.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::clip::{cosine_similarity, SceneEmbedder};
use crate::fetch::FetchImage;

/// Number of top-scoring candidates returned per request.
pub const TOP_RESULTS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct RankRequest {
    pub scene: String,
    pub images: Vec<CandidateImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateImage {
    /// Display URL reported back to the caller.
    pub url: String,
    /// URL the image bytes are fetched from.
    pub thumb: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredImage {
    pub url: String,
    pub score: f64,
}

/// Rank the request's candidates against its scene description.
///
/// A failure to embed the scene text is a request-level error; per-candidate
/// failures are logged and skipped. The result is sorted by score descending
/// (ties keep input order) and truncated to [`TOP_RESULTS`].
pub fn rank(
    embedder: &dyn SceneEmbedder,
    fetcher: &dyn FetchImage,
    request: &RankRequest,
) -> Result<Vec<ScoredImage>> {
    let text_embedding = embedder.embed_text(&request.scene)?;

    let mut scored = Vec::with_capacity(request.images.len());

    for candidate in &request.images {
        let image = match fetcher.fetch(&candidate.thumb) {
            Ok(image) => image,
            Err(e) => {
                warn!(url = %candidate.thumb, error = %e, "Skipping candidate: fetch failed");
                continue;
            }
        };

        let image_embedding = match embedder.embed_image(&image) {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(url = %candidate.thumb, error = %e, "Skipping candidate: embedding failed");
                continue;
            }
        };

        let score = round_score(cosine_similarity(&image_embedding, &text_embedding));
        scored.push(ScoredImage {
            url: candidate.url.clone(),
            score,
        });
    }

    debug!(
        candidates = request.images.len(),
        scored = scored.len(),
        "Ranked candidates"
    );

    // Stable sort: equal scores keep their original input order
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(TOP_RESULTS);

    Ok(scored)
}

/// Round a similarity to 4 decimal digits for the response payload.
fn round_score(score: f32) -> f64 {
    (f64::from(score) * 10_000.0).round() / 10_000.0
}
