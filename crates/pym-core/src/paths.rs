//! Path safety checks.
//!
//! Client supplied filenames and cache paths are validated before they are
//! joined onto any directory on disk.

use crate::{Error, Result};

/// Characters never accepted in a path.
const UNSAFE_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Check that a relative path cannot escape its base directory and contains
/// no unsafe characters.
///
/// Segments are separated by `/`. The path is rejected if it is empty,
/// absolute, starts with `~`, has an empty, `.` or `..` segment, or contains a
/// control or shell/OS-reserved character.
///
/// # Examples
///
/// ```
/// use pym_core::paths::is_path_safe;
///
/// assert!(is_path_safe("report.pdf").is_ok());
/// assert!(is_path_safe("docs/2024/report.pdf").is_ok());
/// assert!(is_path_safe("../../etc/passwd").is_err());
/// assert!(is_path_safe("/etc/passwd").is_err());
/// ```
pub fn is_path_safe(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::unsafe_path(path, "empty path"));
    }
    if path.starts_with('/') {
        return Err(Error::unsafe_path(path, "absolute path"));
    }
    if path.starts_with('~') {
        return Err(Error::unsafe_path(path, "home directory reference"));
    }
    if path.chars().any(char::is_control) {
        return Err(Error::unsafe_path(path, "control character"));
    }
    if path.contains(UNSAFE_CHARS) {
        return Err(Error::unsafe_path(path, "unsafe character"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(Error::unsafe_path(path, "empty path segment")),
            "." => return Err(Error::unsafe_path(path, "current directory reference")),
            ".." => return Err(Error::unsafe_path(path, "parent directory reference")),
            _ => {}
        }
    }
    Ok(())
}

/// Check a directory used as a cache root or a file inside it.
///
/// The path, with its leading `/` removed, must be safe and must either live
/// below `tmp` or have at least three segments (`home/alice/cache`). This
/// keeps a misconfigured cache from purging `/` or `/home`.
pub fn check_cache_path(path: &str) -> Result<()> {
    let relative = path.trim_start_matches('/');
    is_path_safe(relative)?;
    let segments: Vec<&str> = relative.split('/').collect();
    if segments.first() != Some(&"tmp") && segments.len() < 3 {
        return Err(Error::unsafe_path(
            path,
            "cache path must start with /tmp or have at least 3 segments",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_paths() {
        assert!(is_path_safe("a.txt").is_ok());
        assert!(is_path_safe("dir/sub/file name with spaces.txt").is_ok());
        assert!(is_path_safe("über.pdf").is_ok());
        assert!(is_path_safe(".hidden").is_ok());
    }

    #[test]
    fn test_traversal_rejected() {
        let err = is_path_safe("../../etc/passwd").unwrap_err();
        assert!(err.to_string().contains("parent directory"));
        assert!(is_path_safe("a/../b").is_err());
        assert!(is_path_safe("a/./b").is_err());
    }

    #[test]
    fn test_absolute_and_home_rejected() {
        assert!(is_path_safe("/etc/passwd").is_err());
        assert!(is_path_safe("~/secret").is_err());
    }

    #[test]
    fn test_unsafe_characters_rejected() {
        assert!(is_path_safe("a\\b").is_err());
        assert!(is_path_safe("c:evil").is_err());
        assert!(is_path_safe("nul\0byte").is_err());
        assert!(is_path_safe("line\nbreak").is_err());
        assert!(is_path_safe("pipe|me").is_err());
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert!(is_path_safe("").is_err());
        assert!(is_path_safe("a//b").is_err());
        assert!(is_path_safe("dir/").is_err());
    }

    #[test]
    fn test_cache_path() {
        assert!(check_cache_path("/tmp/pym/upload_cache").is_ok());
        assert!(check_cache_path("/tmp").is_ok());
        assert!(check_cache_path("/home/xavier/cache").is_ok());
        assert!(check_cache_path("/home/xavier").is_err());
        assert!(check_cache_path("/").is_err());
        assert!(check_cache_path("/tmp/../etc").is_err());
    }
}
