use std::path::{Path, PathBuf};

const FALLBACK_NAME: &str = "download";
const MAX_NAME_BYTES: usize = 255;

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce an untrusted name to a single safe path component
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let stem = trimmed.split('.').next().unwrap_or_default().trim_end();
    let name = if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    };

    truncate_bytes(name, MAX_NAME_BYTES)
}

pub fn resolve_destination(directory: &Path, filename: &str) -> PathBuf {
    directory.join(sanitize_filename(filename))
}

/// `<name>.part` next to the final destination
pub(crate) fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

fn truncate_bytes(mut name: String, max: usize) -> String {
    if name.len() <= max {
        return name;
    }
    let mut cut = max;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name.truncate(cut);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_directories_and_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\win.ini"), "win.ini");
        assert_eq!(sanitize_filename("/abs/path/report.pdf"), "report.pdf");
    }

    #[test]
    fn test_falls_back_for_empty_names() {
        for raw in ["", ".", "..", "  ", "dir/", "...", "\u{0007}"] {
            assert_eq!(sanitize_filename(raw), "download", "sanitizing {:?}", raw);
        }
    }

    #[test]
    fn test_removes_reserved_characters() {
        assert_eq!(sanitize_filename("a<b>c:d\"e|f?g*h.txt"), "abcdefgh.txt");
        assert_eq!(sanitize_filename("  .hidden. "), "hidden");
        assert_eq!(sanitize_filename("tab\there.csv"), "tabhere.csv");
    }

    #[test]
    fn test_prefixes_windows_device_names() {
        assert_eq!(sanitize_filename("CON"), "_CON");
        assert_eq!(sanitize_filename("com1.txt"), "_com1.txt");
        assert_eq!(sanitize_filename("console.txt"), "console.txt");
    }

    #[test]
    fn test_truncates_long_names_on_char_boundary() {
        let long = "é".repeat(200);
        let name = sanitize_filename(&long);
        assert!(name.len() <= 255);
        assert!(name.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_destination_and_partial_paths() {
        let destination = resolve_destination(Path::new("/tmp/out"), "../clip.mp4");
        assert_eq!(destination, PathBuf::from("/tmp/out/clip.mp4"));
        assert_eq!(partial_path(&destination), PathBuf::from("/tmp/out/clip.mp4.part"));
    }
}
