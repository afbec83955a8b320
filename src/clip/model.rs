//! CLIP model implementation using ONNX Runtime

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

use super::SceneEmbedder;
use crate::config::ModelConfig;

/// CLIP embedding (512-dimensional vector for ViT-B/32)
pub type ClipEmbedding = Vec<f32>;

/// CLIP input resolution (ViT-B/32)
const INPUT_SIZE: u32 = 224;

/// CLIP text context length
const CONTEXT_LENGTH: usize = 77;

/// End-of-text token id, also used for padding
const PAD_TOKEN_ID: u32 = 49407;

/// CLIP normalization constants (ImageNet stats)
const MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

// Qdrant's CLIP ViT-B/32 ONNX exports; the tokenizer.json comes from the
// Xenova export of the same checkpoint (the Qdrant repos do not ship one).
const VISION_MODEL_URL: &str =
    "https://huggingface.co/Qdrant/clip-ViT-B-32-vision/resolve/main/model.onnx";
const TEXT_MODEL_URL: &str =
    "https://huggingface.co/Qdrant/clip-ViT-B-32-text/resolve/main/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/tokenizer.json";

/// CLIP ViT-B/32 wrapper: visual encoder, text encoder and the BPE
/// tokenizer, loaded once at startup and shared read-only for the lifetime
/// of the process.
///
/// The ONNX sessions need `&mut` to run, so each sits behind a `Mutex`;
/// the public API is `&self` and the handle is shared via `Arc`.
pub struct ClipModel {
    visual: Mutex<Session>,
    text: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl ClipModel {
    /// Load encoder sessions and tokenizer, downloading the model files
    /// into the cache directory on first run.
    ///
    /// Any failure here is fatal to startup: the server must not serve
    /// requests with a partially-initialized model.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.models_dir)?;

        let visual_path = ensure_model(
            &config.models_dir,
            "clip-vit-b32-vision.onnx",
            VISION_MODEL_URL,
        )?;
        let text_path = ensure_model(&config.models_dir, "clip-vit-b32-text.onnx", TEXT_MODEL_URL)?;
        let tokenizer_path = ensure_model(
            &config.models_dir,
            "clip-vit-b32-tokenizer.json",
            TOKENIZER_URL,
        )?;

        let visual = build_session(&visual_path, config.intra_threads)?;
        let text = build_session(&text_path, config.intra_threads)?;
        let tokenizer = load_tokenizer(&tokenizer_path)?;

        tracing::info!(model = "clip-vit-b32", "CLIP encoders and tokenizer loaded");

        Ok(Self {
            visual: Mutex::new(visual),
            text: Mutex::new(text),
            tokenizer,
        })
    }

    /// Run the visual encoder on an image
    fn run_visual_encoder(&self, img: &DynamicImage) -> Result<ClipEmbedding> {
        let pixel_values = preprocess_image(img);
        let (data, _offset) = pixel_values.into_raw_vec_and_offset();

        let input_tensor = Tensor::from_array((
            [
                1usize,
                3,
                INPUT_SIZE as usize,
                INPUT_SIZE as usize,
            ],
            data.into_boxed_slice(),
        ))?;

        let mut session = self
            .visual
            .lock()
            .map_err(|_| anyhow!("Visual session lock poisoned"))?;

        let outputs = session.run(ort::inputs!["pixel_values" => input_tensor])?;

        let embedding_output = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding output from visual encoder"))?;

        let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

        Ok(l2_normalize(embedding_data))
    }

    /// Run the text encoder on a string
    fn run_text_encoder(&self, text: &str) -> Result<ClipEmbedding> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Failed to tokenize text: {}", e))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let len = input_ids.len();

        let input_tensor = Tensor::from_array(([1usize, len], input_ids.into_boxed_slice()))?;

        let mut session = self
            .text
            .lock()
            .map_err(|_| anyhow!("Text session lock poisoned"))?;

        let outputs = session.run(ort::inputs!["input_ids" => input_tensor])?;

        let embedding_output = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding output from text encoder"))?;

        let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

        Ok(l2_normalize(embedding_data))
    }
}

impl SceneEmbedder for ClipModel {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.run_text_encoder(text)
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        self.run_visual_encoder(image)
    }

    fn model_name(&self) -> &'static str {
        "clip-vit-b32"
    }
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(file = %filename, "Downloading CLIP model file...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download {}: {}", filename, e))?;

        // Write to a temp name first so an interrupted download never
        // leaves a truncated file behind under the final name.
        let tmp_path = models_dir.join(format!("{}.partial", filename));
        let mut file = std::fs::File::create(&tmp_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        std::fs::rename(&tmp_path, &model_path)?;
        tracing::info!(file = %filename, path = ?model_path, "Model file downloaded");
    }

    Ok(model_path)
}

fn build_session(path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(path)?;

    Ok(session)
}

/// Load the BPE tokenizer configured for CLIP's fixed 77-token context
fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let mut tokenizer =
        Tokenizer::from_file(path).map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(CONTEXT_LENGTH),
        direction: PaddingDirection::Right,
        pad_to_multiple_of: None,
        pad_id: PAD_TOKEN_ID,
        pad_type_id: 0,
        pad_token: "<|endoftext|>".to_string(),
    }));

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: CONTEXT_LENGTH,
            strategy: TruncationStrategy::LongestFirst,
            stride: 0,
            direction: TruncationDirection::Right,
        }))
        .map_err(|e| anyhow!("Failed to apply truncation config: {}", e))?;

    Ok(tokenizer)
}

/// Resize to the model input size and normalize into an NCHW tensor
fn preprocess_image(img: &DynamicImage) -> Array4<f32> {
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let size = INPUT_SIZE as usize;
    let mut pixel_values = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                // Normalize: (pixel/255 - mean) / std
                pixel_values[[0, c, y, x]] = ((pixel[c] as f32 / 255.0) - MEAN[c]) / STD[c];
            }
        }
    }

    pixel_values
}

/// L2 normalize an embedding to unit length
fn l2_normalize(embedding: &[f32]) -> ClipEmbedding {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm > 0.0 {
        embedding.iter().map(|x| x / norm).collect()
    } else {
        embedding.to_vec()
    }
}

/// Calculate cosine similarity between two CLIP embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        // Zero vector passes through unchanged
        let zero = l2_normalize(&[0.0, 0.0]);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn preprocess_solid_color_image() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            48,
            image::Rgb([255, 0, 0]),
        ));
        let tensor = preprocess_image(&img);

        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        // A solid red image stays solid through the resize, so every
        // channel value is the normalized constant.
        let red = tensor[[0, 0, 0, 0]];
        let green = tensor[[0, 1, 100, 100]];
        let blue = tensor[[0, 2, 223, 223]];
        assert!((red - (1.0 - MEAN[0]) / STD[0]).abs() < 1e-4);
        assert!((green - (0.0 - MEAN[1]) / STD[1]).abs() < 1e-4);
        assert!((blue - (0.0 - MEAN[2]) / STD[2]).abs() < 1e-4);
    }
}
