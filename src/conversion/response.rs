// src/conversion/response.rs
// JSON bodies returned by the conversion endpoints

use crate::progress::ProgressStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversionResponse {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "downloadUrl")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchResponse {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "totalFiles")]
    pub total_files: usize,
    #[serde(default)]
    pub successful: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub results: Vec<BatchResult>,
}

/// Per-file outcome; `index` is the submission position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub filename: String,
    pub success: bool,
    #[serde(default, alias = "download_url", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub index: usize,
}

/// Maps a server status string to a terminal status, if it is one
pub fn terminal_status(raw: &str) -> Option<ProgressStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "completed" | "complete" | "success" | "done" => Some(ProgressStatus::Completed),
        "failed" | "error" => Some(ProgressStatus::Failed),
        _ => None,
    }
}

impl ConversionResponse {
    pub fn terminal(&self) -> Option<ProgressStatus> {
        terminal_status(&self.status)
    }
}

impl BatchResponse {
    pub fn ordered_results(&self) -> Vec<BatchResult> {
        let mut results = self.results.clone();
        results.sort_by_key(|r| r.index);
        results
    }

    /// Every submitted file has reported success or error
    pub fn is_resolved(&self) -> bool {
        let expected = self.total_files.max(self.successful + self.failed);
        expected > 0 && self.results.len() >= expected
    }

    /// Counters cover every file even when per-file results are omitted
    pub fn counters_resolved(&self) -> bool {
        self.total_files > 0 && self.successful + self.failed >= self.total_files
    }

    /// Resolved batches succeed when any file did; the status string only
    /// decides for batches still in progress
    pub fn outcome(&self) -> Option<ProgressStatus> {
        let any_success = if self.is_resolved() {
            self.results.iter().any(|r| r.success)
        } else if self.counters_resolved() {
            self.successful > 0
        } else {
            return terminal_status(&self.status);
        };

        if any_success {
            Some(ProgressStatus::Completed)
        } else {
            Some(ProgressStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Single(ConversionResponse),
    Batch(BatchResponse),
}

impl SubmitOutcome {
    pub fn session_id(&self) -> Option<&str> {
        let id = match self {
            SubmitOutcome::Single(response) => response.session_id.as_deref(),
            SubmitOutcome::Batch(response) => response.session_id.as_deref(),
        };
        id.map(str::trim).filter(|id| !id.is_empty())
    }
}
