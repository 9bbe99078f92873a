//! `checkin models` - list the embedding variants and check the configured model file.

use anyhow::{bail, Context, Result};
use checkin_models::{ModelIntegrityError, MODELS};
use checkin_service::Config;

/// Print every known variant and whether its file is present in the model directory.
pub fn list(config: &Config) -> Result<()> {
    println!("Model directory: {}", config.model_dir.display());
    println!();

    for model in MODELS {
        let path = config.model_dir.join(model.name);
        let marker = if model.variant.eq_ignore_ascii_case(&config.model_variant) {
            "*"
        } else {
            " "
        };
        let state = if path.exists() { "present" } else { "missing" };
        println!(
            "{marker} {:<14} {:<20} {}x{} -> {}-d  [{state}]",
            model.variant, model.name, model.input_size, model.input_size, model.embedding_dim
        );
    }

    Ok(())
}

/// Verify the configured model file. With `--print-digest`, print its SHA-256
/// so it can be pinned via `CHECKIN_MODEL_SHA256`.
pub fn verify(config: &Config, print_digest: bool) -> Result<()> {
    let model = config.model().context("invalid model variant")?;
    let path = config.model_dir.join(model.name);

    if print_digest {
        let digest = checkin_models::sha256_file_hex(&path)
            .with_context(|| format!("failed to hash {}", path.display()))?;
        println!("{digest}  {}", path.display());
        return Ok(());
    }

    match config.model_path() {
        Ok(path) => {
            let pinned = if config.model_sha256.is_some() {
                "checksum ok"
            } else {
                "present, no checksum pinned"
            };
            println!("{} ({pinned})", path.display());
            Ok(())
        }
        Err(checkin_service::ConfigError::Model(ModelIntegrityError::MissingModel {
            path, ..
        })) => {
            bail!(
                "model file not found: {}\n  place the {} ONNX export there or set CHECKIN_MODEL_DIR",
                path.display(),
                model.variant
            )
        }
        Err(e) => Err(e).context("model verification failed"),
    }
}
