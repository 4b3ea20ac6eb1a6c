//! Fetching the U2-Net weights into the local model cache.

use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{BgStripError, Result};

/// Release asset the `~/.u2net` cache is populated from.
pub const U2NET_URL: &str =
    "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Make sure `path` holds the model, downloading it from `url` when absent.
///
/// A file already at `path` is used as is and no request is made.
pub fn ensure_model(path: &Path, url: &str, expected_sha256: Option<&str>) -> Result<()> {
    if path.is_file() {
        debug!(model = %path.display(), "model already cached");
        return Ok(());
    }
    download_file(url, path, expected_sha256)
}

/// Download `url` to `path`.
///
/// The body is streamed into a temporary file next to `path`, checked against
/// `expected_sha256` when given, and only then renamed into place.
pub fn download_file(url: &str, path: &Path, expected_sha256: Option<&str>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| BgStripError::file_system(dir, "cache directory creation", e))?;

    info!(url, target = %path.display(), "downloading model");
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| BgStripError::download(url, e))?;
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| BgStripError::download(url, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(BgStripError::download(url, format!("HTTP {status}")));
    }

    let temp = tempfile::Builder::new()
        .prefix(".u2net-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| BgStripError::file_system(dir, "temporary file creation", e))?;

    let pb = ProgressBar::new(response.content_length().unwrap_or(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    {
        let mut writer = pb.wrap_write(BufWriter::new(temp.as_file()));
        io::copy(&mut response, &mut writer).map_err(|e| BgStripError::download(url, e))?;
        writer
            .flush()
            .map_err(|e| BgStripError::file_system(temp.path(), "flush", e))?;
    }
    pb.finish_and_clear();

    if !verify_file_integrity(temp.path(), expected_sha256)? {
        return Err(BgStripError::download(url, "SHA-256 mismatch"));
    }

    temp.persist(path)
        .map_err(|e| BgStripError::file_system(path, "model save", e.error))?;
    info!(model = %path.display(), "model downloaded");
    Ok(())
}

/// `true` when no hash is expected or the file's SHA-256 matches it.
pub fn verify_file_integrity(path: &Path, expected_sha256: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_sha256 else {
        return Ok(true);
    };
    Ok(sha256_file(path)?.eq_ignore_ascii_case(expected))
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| BgStripError::file_system(path, "open", e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher)
        .map_err(|e| BgStripError::file_system(path, "hashing", e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // nothing listens on the discard port, so any request fails fast
    const UNREACHABLE_URL: &str = "http://127.0.0.1:9/u2net.onnx";

    #[test]
    fn test_cached_model_skips_download() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let model = temp_dir.path().join("u2net.onnx");
        fs::write(&model, b"cached weights")?;

        ensure_model(&model, UNREACHABLE_URL, None)?;

        assert_eq!(fs::read(&model)?, b"cached weights");
        assert_eq!(fs::read_dir(temp_dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_download_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join(".u2net").join("u2net.onnx");

        let err = ensure_model(&model, UNREACHABLE_URL, None).unwrap_err();

        assert!(matches!(err, BgStripError::Download { .. }), "{err}");
        assert!(!model.exists());
        let leftovers = fs::read_dir(temp_dir.path().join(".u2net")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_verify_file_integrity_no_hash() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("u2net.onnx");
        fs::write(&file, "test content")?;

        assert!(verify_file_integrity(&file, None)?);
        Ok(())
    }

    #[test]
    fn test_verify_file_integrity_with_hash() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("u2net.onnx");
        fs::write(&file, "test content")?;

        let mut hasher = Sha256::new();
        hasher.update(b"test content");
        let expected = format!("{:x}", hasher.finalize());

        assert_eq!(sha256_file(&file)?, expected);
        assert!(verify_file_integrity(&file, Some(&expected))?);
        assert!(verify_file_integrity(&file, Some(&expected.to_uppercase()))?);
        assert!(!verify_file_integrity(&file, Some(&"0".repeat(64)))?);
        Ok(())
    }

    #[test]
    fn test_verify_file_integrity_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.onnx");
        assert!(verify_file_integrity(&missing, Some("00")).is_err());
    }
}
