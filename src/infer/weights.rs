//! Weight File Management
//!
//! Ensures the local pipeline's model files exist before a session is
//! built, downloading them from configured URLs when missing.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::extract::local::LocalPipelineConfig;

/// Make sure every file the local pipeline needs is present
pub fn ensure_pipeline_weights(config: &LocalPipelineConfig) -> Result<()> {
    ensure_weight("field detector", &config.det_model, config.det_url.as_deref())?;
    ensure_weight("text recognizer", &config.rec_model, config.rec_url.as_deref())?;
    ensure_weight("character dictionary", &config.dict, config.dict_url.as_deref())?;
    Ok(())
}

/// Ensure one weight file exists, downloading it if a URL is configured
pub fn ensure_weight(label: &str, path: &Path, url: Option<&str>) -> Result<()> {
    if is_present(path) {
        debug!("{label} already available at {:?}", path);
        return Ok(());
    }

    let Some(url) = url else {
        bail!("{label} missing at {:?} and no download URL is configured", path);
    };

    info!("Downloading {label} from {url}");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rt = Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(download(url, path))?;

    if !is_present(path) {
        bail!("download completed but {label} verification failed");
    }

    info!("Successfully downloaded {label}");
    Ok(())
}

/// A zero-length file counts as absent (an interrupted download)
fn is_present(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

async fn download(url: &str, path: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("failed to send download request")?;

    if !response.status().is_success() {
        bail!("download failed with status {}: {url}", response.status());
    }

    // Download into a sidecar file so a partial transfer never passes for a
    // complete weight file
    let temp_path = path.with_extension("part");
    let mut file = std::fs::File::create(&temp_path).context("failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("error reading download stream")?;
        file.write_all(&chunk).context("failed to write to temp file")?;
        hasher.update(&chunk);
    }

    file.flush().context("failed to flush temp file")?;
    drop(file);

    debug!("downloaded {url} (sha256 {:x})", hasher.finalize());

    std::fs::rename(&temp_path, path).context("failed to move downloaded file into place")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_existing_weight_is_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"weights").unwrap();

        assert!(ensure_weight("detector", file.path(), None).is_ok());
    }

    #[test]
    fn test_missing_weight_without_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("det.onnx");

        let err = ensure_weight("detector", &path, None).unwrap_err();
        assert!(err.to_string().contains("no download URL"));
    }

    #[test]
    fn test_zero_length_weight_treated_as_missing() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let err = ensure_weight("detector", file.path(), None).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
