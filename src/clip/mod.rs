//! CLIP (Contrastive Language-Image Pre-training) embeddings module
//!
//! Provides the joint text/image embedding space the ranking endpoint
//! scores against: a scene description and a candidate image embed to
//! vectors whose cosine similarity is the match score.

mod model;

pub use model::{cosine_similarity, ClipModel};

use anyhow::Result;
use image::DynamicImage;

/// Seam for the embedding model so the ranking pipeline receives an
/// injected handle rather than reaching for a global, and so tests can
/// substitute a canned embedder.
///
/// Implementations must be safe for concurrent use; the server shares one
/// instance across all in-flight requests.
pub trait SceneEmbedder: Send + Sync {
    /// Embed a free-text description into the shared vector space.
    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a decoded image into the shared vector space.
    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>>;

    /// Model identifier for diagnostics.
    fn model_name(&self) -> &'static str;
}
