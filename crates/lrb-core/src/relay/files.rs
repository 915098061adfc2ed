//! Pre-transfer checks for relayed attachments.
//!
//! Files are rejected, never truncated. The declared size and the extension are
//! checked before any download; the real size is checked again before upload.

use crate::{domain::Attachment, errors::Error, Result};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB

pub const DEFAULT_ALLOWED_FILE_TYPES: &[&str] = &[
    ".txt", ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".png", ".jpg", ".jpeg", ".gif", ".zip",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLimits {
    pub max_bytes: u64,
    /// Lowercase, dot-prefixed.
    pub allowed_extensions: Vec<String>,
}

impl Default for FileLimits {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_FILE_SIZE,
            DEFAULT_ALLOWED_FILE_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl FileLimits {
    pub fn new(max_bytes: u64, allowed_extensions: Vec<String>) -> Self {
        Self {
            max_bytes,
            allowed_extensions,
        }
    }

    /// Check what the platform told us about the file, before downloading it.
    pub fn check_declared(&self, attachment: &Attachment) -> std::result::Result<(), String> {
        let Some(ext) = extension_of(&attachment.filename) else {
            return Err(format!("{}: file has no extension", attachment.filename));
        };
        if !self.allowed_extensions.iter().any(|a| a == &ext) {
            return Err(format!("{}: file type {ext} is not allowed", attachment.filename));
        }
        if let Some(size) = attachment.size {
            self.check_size(&attachment.filename, size)?;
        }
        Ok(())
    }

    /// Check the downloaded bytes, before uploading them.
    pub fn check_downloaded(&self, filename: &str, bytes: &[u8]) -> std::result::Result<(), String> {
        self.check_size(filename, bytes.len() as u64)
    }

    fn check_size(&self, filename: &str, size: u64) -> std::result::Result<(), String> {
        if size > self.max_bytes {
            return Err(format!(
                "{filename}: {} exceeds the {} limit",
                human_size(size),
                human_size(self.max_bytes)
            ));
        }
        Ok(())
    }
}

/// Append a downloaded chunk, failing once the total would exceed `max_bytes`.
///
/// Adapters use this while streaming a download so an oversized file is
/// abandoned without being buffered in full.
pub fn append_capped(
    buf: &mut Vec<u8>,
    chunk: &[u8],
    max_bytes: u64,
    filename: &str,
) -> Result<()> {
    if (buf.len() + chunk.len()) as u64 > max_bytes {
        return Err(Error::PayloadRejected(format!(
            "{filename}: download exceeds the {} limit",
            human_size(max_bytes)
        )));
    }
    buf.extend_from_slice(chunk);
    Ok(())
}

/// `Report.Final.PDF` → `.pdf`
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_lowercase()))
}

pub fn human_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes >= 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / MB)
    } else if bytes >= 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes}B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(name: &str, size: Option<u64>) -> Attachment {
        Attachment {
            id: "1".to_string(),
            filename: name.to_string(),
            size,
            url: format!("https://cdn.example/{name}"),
        }
    }

    #[test]
    fn extension_is_case_insensitive_and_uses_last_dot() {
        assert_eq!(extension_of("Report.Final.PDF"), Some(".pdf".to_string()));
        assert_eq!(extension_of("archive.tar.gz"), Some(".gz".to_string()));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(".env"), None);
    }

    #[test]
    fn oversized_declared_file_is_rejected() {
        let limits = FileLimits::default();
        let err = limits
            .check_declared(&att("scan.pdf", Some(15 * 1024 * 1024)))
            .unwrap_err();
        assert!(err.contains("15.0MB"), "{err}");
        assert!(err.contains("10.0MB"), "{err}");
    }

    #[test]
    fn disallowed_extension_is_rejected_before_size() {
        let limits = FileLimits::default();
        let err = limits.check_declared(&att("run.exe", Some(1))).unwrap_err();
        assert!(err.contains(".exe"));
    }

    #[test]
    fn unknown_size_passes_declared_check_but_not_downloaded_check() {
        let limits = FileLimits::new(4, vec![".txt".to_string()]);
        assert!(limits.check_declared(&att("a.txt", None)).is_ok());
        assert!(limits.check_downloaded("a.txt", b"1234").is_ok());
        assert!(limits.check_downloaded("a.txt", b"12345").is_err());
    }

    #[test]
    fn capped_append_stops_at_limit() {
        let mut buf = Vec::new();
        append_capped(&mut buf, b"abc", 5, "a.txt").unwrap();
        let err = append_capped(&mut buf, b"def", 5, "a.txt").unwrap_err();
        assert!(matches!(err, Error::PayloadRejected(_)));
        assert_eq!(buf, b"abc");
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(2048), "2.0KB");
        assert_eq!(human_size(10 * 1024 * 1024), "10.0MB");
    }
}
