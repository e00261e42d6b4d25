//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! Splitting works on an in-memory buffer, so a URL is downloaded straight
//! into memory and a local file is read whole. Both paths check the `%PDF`
//! magic bytes before returning so callers get a meaningful error rather
//! than a pdfium parse failure.

use crate::error::Pdf2CardsError;
use std::path::PathBuf;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// A PDF read into memory, with the name it should be stored under.
#[derive(Clone)]
pub struct ResolvedInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ResolvedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedInput")
            .field("filename", &self.filename)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2CardsError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Reject buffers that do not start with `%PDF`.
pub fn ensure_pdf(name: &str, bytes: &[u8]) -> Result<(), Pdf2CardsError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    Err(Pdf2CardsError::NotAPdf {
        name: name.to_string(),
        magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
    })
}

async fn read_local(path_str: &str) -> Result<ResolvedInput, Pdf2CardsError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Pdf2CardsError::PermissionDenied { path: path.clone() },
        _ => Pdf2CardsError::FileNotFound { path: path.clone() },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    ensure_pdf(&filename, &bytes)?;

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput { filename, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2CardsError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| Pdf2CardsError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2CardsError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?.to_vec();
    let filename = filename_from_url(url);
    ensure_pdf(&filename, &bytes)?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), filename);
    Ok(ResolvedInput { filename, bytes })
}

/// Last path segment of the URL when it looks like a filename.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_taken_from_url_path() {
        assert_eq!(filename_from_url("https://x.org/papers/cells.pdf?dl=1"), "cells.pdf");
        assert_eq!(filename_from_url("https://x.org/download"), "downloaded.pdf");
        assert_eq!(filename_from_url("not a url"), "downloaded.pdf");
    }

    #[test]
    fn magic_bytes_checked() {
        assert!(ensure_pdf("a.pdf", b"%PDF-1.4\n...").is_ok());
        match ensure_pdf("a.txt", b"hello").unwrap_err() {
            Pdf2CardsError::NotAPdf { name, magic } => {
                assert_eq!(name, "a.txt");
                assert_eq!(magic, b"hell");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ensure_pdf("empty.pdf", b"").is_err());
    }

    #[tokio::test]
    async fn reads_local_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"%PDF-1.7 body")
            .unwrap();

        let resolved = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.filename, "notes.pdf");
        assert_eq!(resolved.bytes, b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn missing_file_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, Pdf2CardsError::FileNotFound { .. }));
    }
}
