use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Maps a model name to its HuggingFace filename
fn model_filename(model_name: &str) -> String {
    format!("ggml-{model_name}.bin")
}

/// Ensures the model file exists, downloading it if necessary.
/// Returns true if a download happened, false if the file was already there.
///
/// # Errors
/// Returns error if the download or the final rename fails
pub fn ensure_model_downloaded(model_name: &str, model_path: &Path) -> Result<bool> {
    if model_path.exists() {
        tracing::debug!(path = %model_path.display(), "model already present");
        return Ok(false);
    }

    tracing::info!(
        model = model_name,
        path = %model_path.display(),
        "model not found, downloading"
    );
    download_model(model_name, model_path)?;
    Ok(true)
}

fn download_model(model_name: &str, model_path: &Path) -> Result<()> {
    let url = format!("{MODEL_BASE_URL}/{}", model_filename(model_name));

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).context("failed to create model directory")?;
    }

    tracing::info!(url = %url, "downloading model");

    // Download to a temp file, then rename: a crashed download never leaves
    // a truncated file at the model path.
    let temp_path = model_path.with_extension("partial");

    let mut response = reqwest::blocking::get(&url)
        .with_context(|| format!("failed to download model from {url}"))?;
    if !response.status().is_success() {
        anyhow::bail!("download failed with status {}: {}", response.status(), url);
    }

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create temp file at {}", temp_path.display()))?;
    let bytes = response
        .copy_to(&mut file)
        .context("failed to stream model to disk")?;
    drop(file);

    fs::rename(&temp_path, model_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            model_path.display()
        )
    })?;

    tracing::info!(
        path = %model_path.display(),
        size = bytes,
        "model downloaded"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_filename() {
        assert_eq!(model_filename("base.en"), "ggml-base.en.bin");
        assert_eq!(model_filename("tiny"), "ggml-tiny.bin");
        assert_eq!(model_filename("large-v3"), "ggml-large-v3.bin");
    }

    #[test]
    fn test_existing_model_is_not_redownloaded() {
        let model_path = std::env::temp_dir().join("pushtalk_existing_model.bin");
        fs::write(&model_path, b"dummy model data").unwrap();

        let downloaded = ensure_model_downloaded("base.en", &model_path).unwrap();
        assert!(!downloaded);

        fs::remove_file(&model_path).unwrap();
    }

    #[test]
    #[ignore = "requires network access and downloads a large file"]
    fn test_download_tiny_model() {
        let model_path = std::env::temp_dir().join("pushtalk_download_test.bin");
        let _ = fs::remove_file(&model_path);

        let downloaded = ensure_model_downloaded("tiny", &model_path).unwrap();
        assert!(downloaded);
        assert!(model_path.exists());
        assert!(fs::metadata(&model_path).unwrap().len() > 0);

        fs::remove_file(&model_path).unwrap();
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_unknown_model_download_fails() {
        let model_path = std::env::temp_dir().join("pushtalk_bogus_model.bin");
        let _ = fs::remove_file(&model_path);

        let result = download_model("nonexistent-model-xyz", &model_path);
        assert!(result.is_err());

        let _ = fs::remove_file(&model_path);
    }
}
