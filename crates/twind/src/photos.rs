//! Reference photos shown next to a match.
//!
//! Layout: `<celebrities_dir>/<label lowercased, spaces → _>/<photo>`.

use std::path::Path;

/// Never show more than a 2×2 grid.
pub const MAX_PHOTOS: usize = 4;
const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Directory name for a celebrity label, or `None` if the label could
/// escape the photo directory.
pub fn celebrity_dir_name(label: &str) -> Option<String> {
    let name = label.trim().to_lowercase().replace(' ', "_");
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return None;
    }
    Some(name)
}

/// URLs of up to [`MAX_PHOTOS`] photos for `label`, sorted by file name.
/// A celebrity without a photo directory simply has no photos.
pub fn photo_urls(celebrities_dir: &Path, label: &str) -> Vec<String> {
    let Some(dir_name) = celebrity_dir_name(label) else {
        return Vec::new();
    };
    let Ok(read) = std::fs::read_dir(celebrities_dir.join(&dir_name)) else {
        return Vec::new();
    };

    let mut files: Vec<String> = read
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files.truncate(MAX_PHOTOS);

    files
        .into_iter()
        .map(|file| format!("/celebrities/{}/{}", encode_segment(&dir_name), encode_segment(&file)))
        .collect()
}

/// Percent-encode one URL path segment, keeping RFC 3986 unreserved characters.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
