// src/conversion/status.rs
// Observable session state and its reduction rules

use super::errors::{ConversionError, ErrorReport};
use super::response::{BatchResult, SubmitOutcome};
use crate::progress::{ChannelEventKind, ProgressEvent, ProgressStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    #[default]
    Idle,
    Uploading,
    Converting,
    Completed,
    Failed,
}

impl ConversionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversionStatus::Completed | ConversionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Everything a UI needs to render one conversion attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: ConversionStatus,
    /// Bytes sent, as a percentage of the request body
    pub upload_progress: u8,
    /// Server-side conversion percentage
    pub progress: f32,
    pub message: String,
    pub current_operation: Option<String>,
    pub session_id: Option<String>,
    pub download_url: Option<String>,
    pub error: Option<ErrorReport>,
    /// Batch results in submission order
    pub results: Vec<BatchResult>,
    pub batch: Option<BatchSummary>,
    /// False until some attempt has been made
    pub show_feedback: bool,
    pub is_connected: bool,
    pub reconnect_attempt: u32,
    /// Progress stream gave up; the conversion may still finish server-side
    pub stalled: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl SessionSnapshot {
    pub(crate) fn idle(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub(crate) fn begin(generation: u64) -> Self {
        Self {
            status: ConversionStatus::Uploading,
            show_feedback: true,
            submitted_at: Some(Utc::now()),
            generation,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, status: ConversionStatus) {
        if self.status != status {
            self.status = status;
            self.show_feedback = true;
        }
        if status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn apply_upload_progress(&mut self, percent: u8) -> bool {
        if self.status != ConversionStatus::Uploading {
            return false;
        }
        let percent = percent.min(100);
        if percent <= self.upload_progress && percent < 100 {
            return false;
        }

        self.upload_progress = percent;
        if percent == 100 {
            self.transition(ConversionStatus::Converting);
        }
        true
    }

    /// Applies the HTTP response; returns true when a progress channel is needed
    pub(crate) fn apply_outcome(&mut self, outcome: &SubmitOutcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.upload_progress = 100;
        self.session_id = outcome.session_id().map(str::to_string);

        let terminal = match outcome {
            SubmitOutcome::Single(response) => {
                self.message = response.message.clone();
                self.download_url = response.download_url.clone();
                match response.terminal() {
                    Some(ProgressStatus::Failed) => {
                        let detail = response
                            .error
                            .clone()
                            .filter(|e| !e.is_empty())
                            .unwrap_or_else(|| response.message.clone());
                        self.fail(&ConversionError::Conversion(detail));
                        return false;
                    }
                    other => other,
                }
            }
            SubmitOutcome::Batch(response) => {
                self.message = response.message.clone();
                self.results = response.ordered_results();
                self.batch = Some(BatchSummary {
                    total_files: response.total_files,
                    successful: response.successful,
                    failed: response.failed,
                });
                match response.outcome() {
                    Some(ProgressStatus::Failed) => {
                        let detail = if response.message.is_empty() {
                            "every file in the batch failed".to_string()
                        } else {
                            response.message.clone()
                        };
                        self.fail(&ConversionError::Conversion(detail));
                        return false;
                    }
                    other => other,
                }
            }
        };

        if terminal == Some(ProgressStatus::Completed) {
            self.finish();
            return false;
        }

        if self.session_id.is_none() {
            self.fail(&ConversionError::InvalidResponse(
                "response has no session_id".to_string(),
            ));
            return false;
        }

        self.transition(ConversionStatus::Converting);
        true
    }

    /// Latest known server state; overwrites rather than merges
    pub(crate) fn apply_progress(&mut self, event: &ProgressEvent) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.progress = event.progress;
        self.message = event.message.clone();
        self.current_operation = event.current_operation.clone();
        if event.download_url.is_some() {
            self.download_url = event.download_url.clone();
        }

        match event.status {
            ProgressStatus::Uploading | ProgressStatus::Converting => {
                self.transition(ConversionStatus::Converting)
            }
            ProgressStatus::Completed => self.finish(),
            ProgressStatus::Failed => {
                let detail = if event.message.is_empty() {
                    "conversion failed".to_string()
                } else {
                    event.message.clone()
                };
                self.fail(&ConversionError::Conversion(detail));
            }
        }
        true
    }

    pub(crate) fn apply_channel_event(&mut self, kind: &ChannelEventKind) -> bool {
        match kind {
            ChannelEventKind::Progress(event) => self.apply_progress(event),
            ChannelEventKind::Connected => {
                self.is_connected = true;
                self.reconnect_attempt = 0;
                self.stalled = false;
                true
            }
            ChannelEventKind::Disconnected { .. } => {
                let changed = self.is_connected;
                self.is_connected = false;
                changed
            }
            ChannelEventKind::ReconnectScheduled { attempt, .. } => {
                self.reconnect_attempt = *attempt;
                true
            }
            ChannelEventKind::Exhausted { attempts } => {
                if self.status.is_terminal() {
                    return false;
                }
                self.is_connected = false;
                self.reconnect_attempt = *attempts;
                self.stalled = true;
                true
            }
            ChannelEventKind::Error(_) => false,
        }
    }

    pub(crate) fn fail(&mut self, err: &ConversionError) {
        self.error = Some(ErrorReport::from(err));
        self.transition(ConversionStatus::Failed);
    }

    pub(crate) fn finish(&mut self) {
        self.progress = 100.0;
        self.error = None;
        self.transition(ConversionStatus::Completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::errors::ErrorCategory;
    use crate::conversion::response::{BatchResponse, ConversionResponse};
    use std::time::Duration;

    fn event(progress: f32, status: ProgressStatus, message: &str) -> ProgressEvent {
        ProgressEvent {
            session_id: "s1".to_string(),
            progress,
            status,
            message: message.to_string(),
            current_operation: None,
            download_url: None,
        }
    }

    fn single(status: &str, session_id: Option<&str>) -> SubmitOutcome {
        SubmitOutcome::Single(ConversionResponse {
            session_id: session_id.map(str::to_string),
            status: status.to_string(),
            message: "accepted".to_string(),
            download_url: None,
            error: None,
        })
    }

    fn result(index: usize, success: bool) -> BatchResult {
        BatchResult {
            filename: format!("file{}.png", index),
            success,
            download_url: None,
            error: None,
            index,
        }
    }

    #[test]
    fn test_idle_has_no_feedback() {
        let snapshot = SessionSnapshot::idle(3);
        assert_eq!(snapshot.status, ConversionStatus::Idle);
        assert!(!snapshot.show_feedback);
        assert_eq!(snapshot.generation, 3);
    }

    #[test]
    fn test_upload_progress_moves_to_converting_at_100() {
        let mut snapshot = SessionSnapshot::begin(1);

        assert!(snapshot.apply_upload_progress(40));
        assert!(!snapshot.apply_upload_progress(30));
        assert_eq!(snapshot.upload_progress, 40);
        assert_eq!(snapshot.status, ConversionStatus::Uploading);

        assert!(snapshot.apply_upload_progress(100));
        assert_eq!(snapshot.status, ConversionStatus::Converting);
        assert!(!snapshot.apply_upload_progress(100));
    }

    #[test]
    fn test_non_terminal_response_needs_channel() {
        let mut snapshot = SessionSnapshot::begin(1);

        assert!(snapshot.apply_outcome(&single("converting", Some("s1"))));
        assert_eq!(snapshot.status, ConversionStatus::Converting);
        assert_eq!(snapshot.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_terminal_response_skips_channel() {
        let mut snapshot = SessionSnapshot::begin(1);
        assert!(!snapshot.apply_outcome(&single("completed", Some("s1"))));
        assert_eq!(snapshot.status, ConversionStatus::Completed);
        assert!(snapshot.finished_at.is_some());

        let mut snapshot = SessionSnapshot::begin(1);
        assert!(!snapshot.apply_outcome(&single("failed", Some("s1"))));
        assert_eq!(snapshot.status, ConversionStatus::Failed);
    }

    #[test]
    fn test_missing_session_id_fails() {
        let mut snapshot = SessionSnapshot::begin(1);

        assert!(!snapshot.apply_outcome(&single("converting", None)));
        assert_eq!(snapshot.status, ConversionStatus::Failed);
        assert!(snapshot.error.is_some());
    }

    #[test]
    fn test_batch_partial_success_completes_in_index_order() {
        let mut snapshot = SessionSnapshot::begin(1);
        let outcome = SubmitOutcome::Batch(BatchResponse {
            session_id: Some("b1".to_string()),
            status: "completed".to_string(),
            message: String::new(),
            total_files: 3,
            successful: 2,
            failed: 1,
            results: vec![result(2, true), result(0, false), result(1, true)],
        });

        assert!(!snapshot.apply_outcome(&outcome));
        assert_eq!(snapshot.status, ConversionStatus::Completed);
        let indexes: Vec<usize> = snapshot.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(snapshot.batch.map(|b| b.successful), Some(2));
    }

    #[test]
    fn test_batch_counters_reporting_no_success_fail() {
        let mut snapshot = SessionSnapshot::begin(1);
        let outcome = SubmitOutcome::Batch(BatchResponse {
            session_id: Some("b2".to_string()),
            status: "completed".to_string(),
            message: String::new(),
            total_files: 3,
            successful: 0,
            failed: 3,
            results: Vec::new(),
        });

        assert!(!snapshot.apply_outcome(&outcome));
        assert_eq!(snapshot.status, ConversionStatus::Failed);
        assert!(snapshot.results.is_empty());
        let report = snapshot.error.unwrap();
        assert_eq!(report.category, ErrorCategory::ConversionFailed);
    }

    #[test]
    fn test_progress_overwrites_and_terminal_never_regresses() {
        let mut snapshot = SessionSnapshot::begin(1);
        snapshot.apply_outcome(&single("converting", Some("s1")));

        assert!(snapshot.apply_progress(&event(70.0, ProgressStatus::Converting, "Encoding")));
        assert!(snapshot.apply_progress(&event(50.0, ProgressStatus::Converting, "Muxing")));
        assert_eq!(snapshot.progress, 50.0);
        assert_eq!(snapshot.message, "Muxing");

        assert!(snapshot.apply_progress(&event(100.0, ProgressStatus::Completed, "Done")));
        assert_eq!(snapshot.status, ConversionStatus::Completed);

        assert!(!snapshot.apply_progress(&event(10.0, ProgressStatus::Converting, "late")));
        assert!(!snapshot.apply_progress(&event(0.0, ProgressStatus::Failed, "late")));
        assert_eq!(snapshot.status, ConversionStatus::Completed);
        assert_eq!(snapshot.message, "Done");
    }

    #[test]
    fn test_failed_event_is_classified_as_conversion_error() {
        let mut snapshot = SessionSnapshot::begin(1);
        snapshot.apply_outcome(&single("converting", Some("s1")));

        snapshot.apply_progress(&event(30.0, ProgressStatus::Failed, "codec crashed"));

        assert_eq!(snapshot.status, ConversionStatus::Failed);
        let report = snapshot.error.unwrap();
        assert_eq!(report.category, ErrorCategory::ConversionFailed);
    }

    #[test]
    fn test_connection_events_track_channel_state() {
        let mut snapshot = SessionSnapshot::begin(1);
        snapshot.apply_outcome(&single("converting", Some("s1")));

        snapshot.apply_channel_event(&ChannelEventKind::Connected);
        assert!(snapshot.is_connected);

        snapshot.apply_channel_event(&ChannelEventKind::ReconnectScheduled {
            attempt: 2,
            delay: Duration::from_secs(2),
        });
        assert_eq!(snapshot.reconnect_attempt, 2);

        snapshot.apply_channel_event(&ChannelEventKind::Exhausted { attempts: 5 });
        assert!(snapshot.stalled);
        assert!(!snapshot.is_connected);
        assert_eq!(snapshot.status, ConversionStatus::Converting);
    }
}
