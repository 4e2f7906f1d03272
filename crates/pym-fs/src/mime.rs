//! Mime-type patterns and content sniffing.

use regex::{Regex, RegexBuilder};

use crate::error::UploadError;

/// Type recorded when nothing better is known.
pub const MIME_TYPE_UNKNOWN: &str = "application/octet-stream";

/// Type of content that is valid UTF-8.
pub const MIME_TYPE_TEXT: &str = "text/plain";

/// A `major/minor` pattern such as `image/*` or `text/plain`.
///
/// A `*` not preceded by `.` matches any run of characters; each half is
/// otherwise a regular expression matched against the whole half,
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct MimePattern {
    source: String,
    major: Regex,
    minor: Regex,
}

impl MimePattern {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Self, UploadError> {
        let (major, minor) = pattern.split_once('/').ok_or_else(|| {
            UploadError::configuration(format!("mime pattern '{pattern}' (missing '/')"))
        })?;
        Ok(Self {
            source: pattern.to_string(),
            major: compile_half(pattern, major)?,
            minor: compile_half(pattern, minor)?,
        })
    }

    /// Whether `mime_type` matches.
    pub fn matches(&self, mime_type: &str) -> bool {
        let (major, minor) = mime_type.split_once('/').unwrap_or((mime_type, ""));
        self.major.is_match(major) && self.minor.is_match(minor)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn compile_half(pattern: &str, half: &str) -> Result<Regex, UploadError> {
    let mut expr = String::with_capacity(half.len() + 4);
    expr.push('^');
    let mut prev = None;
    for c in half.chars() {
        if c == '*' && prev != Some('.') {
            expr.push_str(".*");
        } else {
            expr.push(c);
        }
        prev = Some(c);
    }
    expr.push('$');
    RegexBuilder::new(&expr)
        .case_insensitive(true)
        .build()
        .map_err(|e| UploadError::configuration(format!("mime pattern '{pattern}' ({e})")))
}

/// Allow and deny lists of mime patterns.
#[derive(Debug, Clone)]
pub struct MimeFilter {
    allowed: Vec<MimePattern>,
    denied: Vec<MimePattern>,
}

impl MimeFilter {
    /// Compile both lists.
    pub fn new<S: AsRef<str>>(allowed: &[S], denied: &[S]) -> Result<Self, UploadError> {
        let compile = |list: &[S]| {
            list.iter()
                .map(|p| MimePattern::new(p.as_ref()))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            allowed: compile(allowed)?,
            denied: compile(denied)?,
        })
    }

    /// A type passes if it matches at least one allowed and no denied
    /// pattern.
    pub fn check(&self, mime_type: &str) -> Result<(), UploadError> {
        if !self.allowed.iter().any(|p| p.matches(mime_type)) {
            return Err(UploadError::permission("Mime-type not allowed"));
        }
        if let Some(p) = self.denied.iter().find(|p| p.matches(mime_type)) {
            log::debug!("Mime-type '{mime_type}' denied by '{}'", p.as_str());
            return Err(UploadError::permission("Mime-type not allowed"));
        }
        Ok(())
    }
}

/// Detect the binary format from magic bytes.
fn detect_magic(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match &bytes[0..4] {
        [0x89, b'P', b'N', b'G'] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, _] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8'] => Some("image/gif"),
        [b'R', b'I', b'F', b'F'] if bytes.len() >= 12 && &bytes[8..12] == b"WEBP" => {
            Some("image/webp")
        }
        [b'B', b'M', _, _] => Some("image/bmp"),
        [b'%', b'P', b'D', b'F'] => Some("application/pdf"),
        [b'P', b'K', 0x03, 0x04] => Some("application/zip"),
        [0x1F, 0x8B, _, _] => Some("application/gzip"),
        [0x7F, b'E', b'L', b'F'] => Some("application/x-executable"),
        [b'M', b'Z', _, _] => Some("application/x-msdownload"),
        [b'O', b'g', b'g', b'S'] => Some("audio/ogg"),
        [b'f', b'L', b'a', b'C'] => Some("audio/flac"),
        [b'I', b'D', b'3', _] => Some("audio/mpeg"),
        [_, _, _, _] if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" => Some("video/mp4"),
        _ => None,
    }
}

/// Zip based formats recognized by file name.
fn is_zip_family(mime_type: &str) -> bool {
    mime_type.starts_with("application/vnd.openxmlformats")
        || mime_type.starts_with("application/vnd.oasis.opendocument")
        || mime_type == "application/epub+zip"
        || mime_type == "application/java-archive"
}

/// Mime-type and encoding of `head`, the first bytes of a file.
///
/// The bytes decide the family. `filename` can only narrow it: a `text/*`
/// guess for text, an office document for a zip container.
pub fn sniff(head: &[u8], filename: &str) -> (String, Option<String>) {
    let guess = mime_guess::from_path(filename).first_raw();
    if let Some(detected) = detect_magic(head) {
        let refined = match guess {
            Some(g) if detected == "application/zip" && is_zip_family(g) => g,
            _ => detected,
        };
        return (refined.to_string(), None);
    }
    if utf8_prefix(head) {
        let mime_type = match guess {
            Some(g) if g.starts_with("text/") => g,
            _ => MIME_TYPE_TEXT,
        };
        return (mime_type.to_string(), Some("utf-8".to_string()));
    }
    (MIME_TYPE_UNKNOWN.to_string(), None)
}

/// Whether `head` is UTF-8, allowing a character cut off at the end.
fn utf8_prefix(head: &[u8]) -> bool {
    match std::str::from_utf8(head) {
        Ok(s) => !s.contains('\0'),
        Err(e) => e.error_len().is_none() && !head[..e.valid_up_to()].contains(&0),
    }
}
