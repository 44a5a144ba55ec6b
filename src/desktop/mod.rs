// src/desktop/mod.rs
// Native file-system bridge: output directory, downloads, reveal in file manager

mod filename;
mod resolver;
mod url_guard;

pub use filename::{resolve_destination, sanitize_filename};
pub use resolver::{BlockedAddress, GuardedResolver};
pub use url_guard::{is_blocked, validate_download_url};

use crate::config::{ClientConfig, ConfigError};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid download URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Download host is not allowed: {0}")]
    BlockedHost(String),

    #[error("Download failed with HTTP {status}")]
    Http { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub directory: PathBuf,
    /// Untrusted; sanitized before use
    pub filename: String,
}

#[async_trait]
pub trait FileSystemBridge: Send + Sync {
    async fn select_output_directory(&self) -> Result<PathBuf, BridgeError>;

    /// Returns the final path of the written file
    async fn download_file(&self, request: DownloadRequest) -> Result<PathBuf, BridgeError>;

    async fn show_item_in_folder(&self, path: &Path) -> Result<(), BridgeError>;
}

pub struct NativeFileBridge {
    client: reqwest::Client,
    default_dir: Option<PathBuf>,
}

impl NativeFileBridge {
    pub fn new(default_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::with_resolver(default_dir, GuardedResolver::new())
    }

    /// IP-literal redirects are stopped by the policy; names are checked by
    /// `resolver` on every connect.
    pub fn with_resolver(
        default_dir: Option<PathBuf>,
        resolver: GuardedResolver,
    ) -> Result<Self, ConfigError> {
        let redirects = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            let blocked = attempt
                .url()
                .host_str()
                .and_then(url_guard::literal_ip)
                .map(is_blocked)
                .unwrap_or(false);
            if blocked {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .redirect(redirects)
            .dns_resolver(Arc::new(resolver))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            default_dir,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        Self::new(config.output_dir.clone())
    }
}

#[async_trait]
impl FileSystemBridge for NativeFileBridge {
    async fn select_output_directory(&self) -> Result<PathBuf, BridgeError> {
        match &self.default_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                Ok(dir.clone())
            }
            None => Ok(std::env::current_dir()?),
        }
    }

    async fn download_file(&self, request: DownloadRequest) -> Result<PathBuf, BridgeError> {
        let url = validate_download_url(&request.url)?;
        let destination = resolve_destination(&request.directory, &request.filename);
        let partial = filename::partial_path(&destination);

        tokio::fs::create_dir_all(&request.directory).await?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Download of {} failed: HTTP {}", request.url, status.as_u16());
            return Err(BridgeError::Http {
                status: status.as_u16(),
            });
        }

        let written = match write_body(response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &destination).await?;

        tracing::info!(
            "Downloaded {} bytes to {}",
            written,
            destination.display()
        );
        Ok(destination)
    }

    async fn show_item_in_folder(&self, path: &Path) -> Result<(), BridgeError> {
        tokio::fs::metadata(path).await?;

        let (program, args) = reveal_command(path)?;
        tracing::debug!("Revealing {} with {}", path.display(), program);
        tokio::process::Command::new(program).args(args).spawn()?;
        Ok(())
    }
}

fn request_error(err: reqwest::Error) -> BridgeError {
    match resolver::blocked_source(&err) {
        Some(blocked) => BridgeError::BlockedHost(blocked.host.clone()),
        None => BridgeError::Network(err.to_string()),
    }
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64, BridgeError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| BridgeError::Network(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

fn reveal_command(path: &Path) -> Result<(&'static str, Vec<OsString>), BridgeError> {
    if cfg!(target_os = "windows") {
        let mut select = OsString::from("/select,");
        select.push(path.as_os_str());
        Ok(("explorer", vec![select]))
    } else if cfg!(target_os = "macos") {
        Ok(("open", vec![OsString::from("-R"), path.as_os_str().to_os_string()]))
    } else if cfg!(unix) {
        let folder = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        Ok(("xdg-open", vec![folder.as_os_str().to_os_string()]))
    } else {
        Err(BridgeError::Unsupported("show_item_in_folder".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_select_output_directory_creates_configured_dir() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("converted");
        let bridge = NativeFileBridge::new(Some(target.clone())).unwrap();

        let selected = bridge.select_output_directory().await.unwrap();

        assert_eq!(selected, target);
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_select_output_directory_defaults_to_cwd() {
        let bridge = NativeFileBridge::new(None).unwrap();
        let selected = bridge.select_output_directory().await.unwrap();
        assert_eq!(selected, std::env::current_dir().unwrap());
    }

    #[tokio::test]
    async fn test_show_item_requires_existing_path() {
        let bridge = NativeFileBridge::new(None).unwrap();
        let missing = bridge
            .show_item_in_folder(Path::new("/definitely/not/here.txt"))
            .await;
        assert!(matches!(missing, Err(BridgeError::Io(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reveal_command_opens_parent_on_linux() {
        let (program, args) = reveal_command(Path::new("/tmp/out/file.txt")).unwrap();
        assert_eq!(program, "xdg-open");
        assert_eq!(args, vec![OsString::from("/tmp/out")]);
    }
}
