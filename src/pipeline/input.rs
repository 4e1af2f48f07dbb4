//! Input resolution: read a local path or download a URL into memory.
//!
//! The pipeline works on bytes, so no temp file is involved: local files are
//! read whole and URLs are fetched with a timeout. The file name (last path
//! or URL segment) is kept as the detector's extension hint.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Raw bytes of a document plus the name it arrived under.
#[derive(Debug, Clone)]
pub struct RawInput {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP(S) URL.
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<RawInput, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<RawInput, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
            path: PathBuf::from(path),
        },
        _ => PipelineError::Internal(format!("{}: {}", path.display(), e)),
    })?;

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(RawInput {
        bytes,
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<RawInput, PipelineError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timeout after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| failed(e.to_string()))?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(RawInput {
        bytes: bytes.to_vec(),
        filename: filename_from_url(url),
    })
}

/// Last non-empty path segment containing a dot, if any.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty() && last.contains('.')).then(|| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_filename() {
        assert_eq!(
            filename_from_url("https://example.com/a/balance.docx?x=1").as_deref(),
            Some("balance.docx")
        );
        assert_eq!(filename_from_url("https://example.com/download"), None);
        assert_eq!(filename_from_url("https://example.com/"), None);
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = load_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_keeps_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        tokio::fs::write(&path, b"\x89PNG").await.unwrap();
        let input = load_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(input.bytes, b"\x89PNG");
        assert_eq!(input.filename.as_deref(), Some("scan.png"));
    }
}
