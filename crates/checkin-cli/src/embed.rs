//! `checkin embed` / `checkin compare` - run the embedding model on face crops.

use std::path::Path;

use anyhow::{Context, Result};
use checkin_core::embedder::distance;
use checkin_core::{Embedding, FaceEmbedder};
use checkin_service::Config;

fn embed_file(embedder: &mut FaceEmbedder, path: &Path) -> Result<Embedding> {
    let face = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgb8();
    embedder
        .embed(&face)
        .with_context(|| format!("failed to embed {}", path.display()))
}

/// Print the embedding of a pre-cropped face image as JSON.
pub fn embed(config: &Config, image: &Path) -> Result<()> {
    let mut embedder = config.load_embedder().context("failed to load embedding model")?;
    let embedding = embed_file(&mut embedder, image)?;

    let out = serde_json::json!({
        "image": image.display().to_string(),
        "model_version": embedding.model_version,
        "dim": embedding.dim(),
        "values": embedding.values,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Embed two face crops and report their distance against the accept threshold.
pub fn compare(config: &Config, a: &Path, b: &Path) -> Result<()> {
    let mut embedder = config.load_embedder().context("failed to load embedding model")?;
    let ea = embed_file(&mut embedder, a)?;
    let eb = embed_file(&mut embedder, b)?;

    let distance = distance(&ea, &eb)?;
    let threshold = config.pipeline.accept_distance;
    let accepted = distance < threshold;
    tracing::debug!(distance, threshold, accepted, "compared embeddings");

    let out = serde_json::json!({
        "a": a.display().to_string(),
        "b": b.display().to_string(),
        "distance": distance,
        "threshold": threshold,
        "match": accepted,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
