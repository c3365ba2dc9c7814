//! Interface consumed from the bootstrap HTTP downloader (§4.7), which is
//! out of scope for this crate. Only a trait and an offline stub live here,
//! so `client_config`-adjacent code has something concrete to call against
//! in tests without pulling in an HTTP client dependency.

use std::path::{Path, PathBuf};

use crate::error::ClientConfigError;

/// Status and headers returned by a bootstrap download, mirroring what an
/// HTTP client would hand back without this crate depending on one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResponse {
    pub status: u16,
    pub content_length: Option<u64>,
}

/// The interface the client config layer needs from a bootstrap downloader.
/// A real implementation (HTTP, out of scope here) would fetch `target_path`
/// from `host:port` into `outdir`.
pub trait Downloader {
    fn download(
        &self,
        host: &str,
        port: u16,
        target_path: &str,
        outdir: &Path,
        connect_timeout_secs: u64,
        download_timeout_secs: u64,
    ) -> Result<DownloadResponse, ClientConfigError>;
}

/// Offline stand-in: always reports that bootstrap downloading isn't
/// available in this build. Exists so `ClientConfig`-adjacent code compiles
/// and can be exercised in tests without a network dependency.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineDownloader;

impl Downloader for OfflineDownloader {
    fn download(
        &self,
        _host: &str,
        _port: u16,
        _target_path: &str,
        _outdir: &Path,
        _connect_timeout_secs: u64,
        _download_timeout_secs: u64,
    ) -> Result<DownloadResponse, ClientConfigError> {
        Err(ClientConfigError::InvalidMethylomeHeader(
            "bootstrap downloading is not implemented in this build".to_string(),
        ))
    }
}

#[must_use]
pub fn default_outdir(config_dir: &Path) -> PathBuf {
    config_dir.join("downloads")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_downloader_reports_not_implemented() {
        let d = OfflineDownloader;
        let dir = tempfile::tempdir().unwrap();
        let result = d.download("mirror.example.org", 80, "/hg38.tar.gz", dir.path(), 5, 30);
        assert!(result.is_err());
    }
}
