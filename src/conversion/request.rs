use super::errors::ConversionError;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Conversion family; selects the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
    Data,
    Archive,
    Spreadsheet,
    Subtitle,
    Ebook,
    Font,
}

impl MediaType {
    pub const ALL: [MediaType; 10] = [
        MediaType::Image,
        MediaType::Video,
        MediaType::Audio,
        MediaType::Document,
        MediaType::Data,
        MediaType::Archive,
        MediaType::Spreadsheet,
        MediaType::Subtitle,
        MediaType::Ebook,
        MediaType::Font,
    ];

    pub fn as_path(self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
            MediaType::Data => "data",
            MediaType::Archive => "archive",
            MediaType::Spreadsheet => "spreadsheet",
            MediaType::Subtitle => "subtitle",
            MediaType::Ebook => "ebook",
            MediaType::Font => "font",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        MediaType::ALL
            .into_iter()
            .find(|media| media.as_path() == needle)
            .ok_or_else(|| format!("unknown media type '{}'", s))
    }
}

/// One file queued for upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: None,
            bytes: Bytes::from(bytes),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub async fn from_path(path: &Path) -> Result<Self, ConversionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ConversionError::Io(format!("{}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ConversionError::InvalidRequest(format!("{} has no file name", path.display()))
            })?;

        Ok(Self::new(file_name, bytes))
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Format-specific option bag, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionOptions {
    fields: Vec<(String, String)>,
}

impl ConversionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    pub fn quality(self, quality: u8) -> Self {
        self.set("quality", quality.min(100))
    }

    pub fn bitrate(self, bitrate: &str) -> Self {
        self.set("bitrate", bitrate)
    }

    pub fn sample_rate(self, hz: u32) -> Self {
        self.set("sample_rate", hz)
    }

    pub fn channels(self, channels: u8) -> Self {
        self.set("channels", channels)
    }

    pub fn delimiter(self, delimiter: &str) -> Self {
        self.set("delimiter", delimiter)
    }

    pub fn encoding(self, encoding: &str) -> Self {
        self.set("encoding", encoding)
    }

    pub fn subset_text(self, text: &str) -> Self {
        self.set("subset_text", text)
    }

    pub fn optimize(self, optimize: bool) -> Self {
        self.set("optimize", optimize)
    }

    pub fn compression_level(self, level: u8) -> Self {
        self.set("compression_level", level.min(9))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Immutable conversion submission
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    media_type: MediaType,
    files: Vec<UploadFile>,
    output_format: String,
    options: ConversionOptions,
    batch: bool,
}

impl ConversionRequest {
    pub fn single(media_type: MediaType, file: UploadFile, output_format: &str) -> Self {
        Self {
            media_type,
            files: vec![file],
            output_format: normalize_format(output_format),
            options: ConversionOptions::default(),
            batch: false,
        }
    }

    pub fn batch(media_type: MediaType, files: Vec<UploadFile>, output_format: &str) -> Self {
        Self {
            media_type,
            files,
            output_format: normalize_format(output_format),
            options: ConversionOptions::default(),
            batch: true,
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(UploadFile::len).sum()
    }

    pub fn validate(&self) -> Result<(), ConversionError> {
        if self.files.is_empty() {
            return Err(ConversionError::InvalidRequest(
                "no files selected".to_string(),
            ));
        }
        if self.output_format.is_empty() {
            return Err(ConversionError::InvalidRequest(
                "output format is required".to_string(),
            ));
        }
        if let Some(file) = self.files.iter().find(|f| f.file_name.trim().is_empty()) {
            return Err(ConversionError::InvalidRequest(format!(
                "file of {} bytes has no name",
                file.len()
            )));
        }
        Ok(())
    }

    pub fn endpoint_path(&self) -> String {
        if self.batch {
            format!("/api/{}/batch-convert", self.media_type.as_path())
        } else {
            format!("/api/{}/convert", self.media_type.as_path())
        }
    }

    /// Multipart body: `file` (or repeated `files`), `output_format`, then options
    pub(crate) fn to_multipart(&self, tracker: &UploadTracker) -> Result<Form, ConversionError> {
        let field = if self.batch { "files" } else { "file" };

        let mut form = Form::new();
        for file in &self.files {
            form = form.part(field, file_part(file, tracker)?);
        }
        form = form.text("output_format", self.output_format.clone());
        for (key, value) in self.options.iter() {
            form = form.text(key.to_string(), value.to_string());
        }

        Ok(form)
    }
}

fn normalize_format(format: &str) -> String {
    format.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn file_part(file: &UploadFile, tracker: &UploadTracker) -> Result<Part, ConversionError> {
    // slices share the file buffer
    let bytes = file.bytes.clone();
    let total = bytes.len();
    let tracker = tracker.clone();
    let stream = futures_util::stream::iter((0..total).step_by(UPLOAD_CHUNK_SIZE).map(
        move |start| {
            let chunk = bytes.slice(start..(start + UPLOAD_CHUNK_SIZE).min(total));
            tracker.advance(chunk.len() as u64);
            Ok::<_, std::io::Error>(chunk)
        },
    ));

    let part = Part::stream_with_length(Body::wrap_stream(stream), file.len())
        .file_name(file.file_name.clone());

    match &file.mime {
        Some(mime) => part
            .mime_str(mime)
            .map_err(|e| ConversionError::InvalidRequest(format!("invalid mime '{}': {}", mime, e))),
        None => Ok(part),
    }
}

pub type UploadProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Counts streamed bytes and reports non-decreasing whole percentages
#[derive(Clone)]
pub struct UploadTracker {
    sent: Arc<AtomicU64>,
    reported: Arc<AtomicU8>,
    total: u64,
    callback: UploadProgressFn,
}

impl UploadTracker {
    pub fn new(total: u64, callback: UploadProgressFn) -> Self {
        Self {
            sent: Arc::new(AtomicU64::new(0)),
            reported: Arc::new(AtomicU8::new(0)),
            total,
            callback,
        }
    }

    pub fn advance(&self, bytes: u64) {
        let sent = self.sent.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let percent = if self.total == 0 {
            100
        } else {
            (sent.saturating_mul(100) / self.total).min(100) as u8
        };
        self.report(percent);
    }

    /// Upload finished from the transport's point of view
    pub fn finish(&self) {
        self.report(100);
    }

    fn report(&self, percent: u8) {
        let previous = self.reported.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            (self.callback)(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_tracker(total: u64) -> (UploadTracker, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = UploadTracker::new(total, Arc::new(move |p| sink.lock().unwrap().push(p)));
        (tracker, seen)
    }

    #[test]
    fn test_media_type_parsing() {
        assert_eq!("Video".parse::<MediaType>(), Ok(MediaType::Video));
        assert_eq!(" ebook ".parse::<MediaType>(), Ok(MediaType::Ebook));
        assert!("hologram".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_endpoint_paths() {
        let single = ConversionRequest::single(MediaType::Audio, UploadFile::new("a.wav", vec![1]), "mp3");
        assert_eq!(single.endpoint_path(), "/api/audio/convert");

        let batch = ConversionRequest::batch(
            MediaType::Image,
            vec![UploadFile::new("a.png", vec![1]), UploadFile::new("b.png", vec![2])],
            ".WEBP",
        );
        assert_eq!(batch.endpoint_path(), "/api/image/batch-convert");
        assert_eq!(batch.output_format(), "webp");
        assert!(batch.is_batch());
        assert_eq!(batch.total_bytes(), 2);
    }

    #[test]
    fn test_validate_rejects_incomplete_requests() {
        let empty = ConversionRequest::batch(MediaType::Image, Vec::new(), "png");
        assert!(matches!(empty.validate(), Err(ConversionError::InvalidRequest(_))));

        let no_format = ConversionRequest::single(MediaType::Image, UploadFile::new("a.png", vec![1]), "  ");
        assert!(no_format.validate().is_err());

        let unnamed = ConversionRequest::single(MediaType::Image, UploadFile::new(" ", vec![1]), "png");
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_options_replace_and_keep_order() {
        let options = ConversionOptions::new()
            .quality(150)
            .bitrate("192k")
            .optimize(true)
            .set("quality", 80);

        let pairs: Vec<(&str, &str)> = options.iter().collect();
        assert_eq!(pairs, vec![("quality", "80"), ("bitrate", "192k"), ("optimize", "true")]);
        assert_eq!(ConversionOptions::new().quality(150).get("quality"), Some("100"));
        assert_eq!(ConversionOptions::new().compression_level(12).get("compression_level"), Some("9"));
    }

    #[test]
    fn test_tracker_reports_monotonic_percentages() {
        let (tracker, seen) = recording_tracker(200);

        tracker.advance(50);
        tracker.advance(0);
        tracker.advance(100);
        tracker.finish();
        tracker.advance(50);

        assert_eq!(*seen.lock().unwrap(), vec![25, 75, 100]);
    }

    #[test]
    fn test_tracker_with_empty_upload_reports_completion_once() {
        let (tracker, seen) = recording_tracker(0);

        tracker.finish();
        tracker.finish();

        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[test]
    fn test_upload_buffer_is_shared_between_copies() {
        let data = vec![7u8; 3 * UPLOAD_CHUNK_SIZE + 10];
        let ptr = data.as_ptr();

        let file = UploadFile::new("clip.mov", data);
        let request = ConversionRequest::single(MediaType::Video, file.clone(), "mp4");

        assert_eq!(file.bytes.as_ptr(), ptr);
        assert_eq!(request.files[0].bytes.as_ptr(), ptr);
        let tracker = UploadTracker::new(request.total_bytes(), Arc::new(|_: u8| {}));
        assert!(request.to_multipart(&tracker).is_ok());
    }

    #[tokio::test]
    async fn test_upload_file_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        tokio::fs::write(&path, b"RIFF").await.unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.file_name, "clip.wav");
        assert_eq!(file.len(), 4);

        let missing = UploadFile::from_path(&dir.path().join("nope.wav")).await;
        assert!(matches!(missing, Err(ConversionError::Io(_))));
    }
}
