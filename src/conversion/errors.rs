// src/conversion/errors.rs
// Conversion error taxonomy and user-facing classification

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// Transport failure before any HTTP response
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx HTTP response
    #[error("Server error (HTTP {status}): {detail}")]
    Server { status: u16, detail: String },

    /// Terminal `failed` status from the server
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// Reconnect attempts ran out; the conversion itself may still finish
    #[error("Progress stream stalled after {attempts} reconnect attempts")]
    ChannelExhausted { attempts: u32 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ConversionError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::classify(&self.to_string())
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(err: std::io::Error) -> Self {
        ConversionError::Io(err.to_string())
    }
}

/// Best-effort user-facing category for a raw error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConversionFailed,
    FileNotFound,
    Timeout,
    UnsupportedFormat,
    NetworkError,
    FileTooLarge,
    PermissionDenied,
    DiskSpace,
    ServerError,
    Unknown,
}

impl ErrorCategory {
    /// First matching pattern wins; more specific categories come first
    pub fn classify(raw: &str) -> Self {
        static PATTERNS: OnceLock<Vec<(ErrorCategory, Regex)>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            [
                (
                    ErrorCategory::FileTooLarge,
                    r"(?i)too large|\b413\b|payload|exceeds? .*(size|limit)|file size",
                ),
                (
                    ErrorCategory::DiskSpace,
                    r"(?i)disk space|no space|disk full|enospc|quota",
                ),
                (
                    ErrorCategory::FileNotFound,
                    r"(?i)not found|no such file|\b404\b|enoent",
                ),
                (
                    ErrorCategory::Timeout,
                    r"(?i)timed? ?out|timeout|\b408\b|\b504\b",
                ),
                (
                    ErrorCategory::UnsupportedFormat,
                    r"(?i)unsupported|not supported|invalid format|unknown format|\b415\b",
                ),
                (
                    ErrorCategory::PermissionDenied,
                    r"(?i)permission|access denied|forbidden|unauthori[sz]ed|eacces|\b40[13]\b",
                ),
                (
                    ErrorCategory::NetworkError,
                    r"(?i)network|connection|econnrefused|dns|offline|unreachable",
                ),
                (ErrorCategory::ConversionFailed, r"(?i)conver(sion|t)"),
                (
                    ErrorCategory::ServerError,
                    r"(?i)server error|internal|\b5\d\d\b|bad gateway|service unavailable",
                ),
            ]
            .into_iter()
            .filter_map(|(category, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((category, re)),
                Err(e) => {
                    tracing::error!("Invalid error pattern for {:?}: {}", category, e);
                    None
                }
            })
            .collect()
        });

        patterns
            .iter()
            .find(|(_, re)| re.is_match(raw))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCategory::ConversionFailed => "The conversion failed",
            ErrorCategory::FileNotFound => "The file could not be found",
            ErrorCategory::Timeout => "The operation timed out",
            ErrorCategory::UnsupportedFormat => "This format is not supported",
            ErrorCategory::NetworkError => "A network error occurred",
            ErrorCategory::FileTooLarge => "The file is too large",
            ErrorCategory::PermissionDenied => "Permission denied",
            ErrorCategory::DiskSpace => "Not enough disk space",
            ErrorCategory::ServerError => "The server reported an error",
            ErrorCategory::Unknown => "An unknown error occurred",
        }
    }

    /// Translation key for the UI string table
    pub fn i18n_key(self) -> &'static str {
        match self {
            ErrorCategory::ConversionFailed => "errors.conversionFailed",
            ErrorCategory::FileNotFound => "errors.fileNotFound",
            ErrorCategory::Timeout => "errors.timeout",
            ErrorCategory::UnsupportedFormat => "errors.unsupportedFormat",
            ErrorCategory::NetworkError => "errors.networkError",
            ErrorCategory::FileTooLarge => "errors.fileTooLarge",
            ErrorCategory::PermissionDenied => "errors.permissionDenied",
            ErrorCategory::DiskSpace => "errors.diskSpace",
            ErrorCategory::ServerError => "errors.serverError",
            ErrorCategory::Unknown => "errors.unknown",
        }
    }
}

/// Classified error as exposed to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub message: String,
    pub i18n_key: String,
    pub detail: String,
}

impl From<&ConversionError> for ErrorReport {
    fn from(err: &ConversionError) -> Self {
        let category = err.category();
        Self {
            category,
            message: category.message().to_string(),
            i18n_key: category.i18n_key().to_string(),
            detail: err.to_string(),
        }
    }
}
