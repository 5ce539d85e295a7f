//! File admission: binary sniffing, size caps, decoding, categorization.

use std::borrow::Cow;
use std::path::Path;

use crate::types::FileCategory;

/// Bytes inspected for the NUL sniff.
const SNIFF_WINDOW: usize = 8192;

pub fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_WINDOW)].contains(&0)
}

/// Lossy UTF-8 decode. Invalid sequences become replacement characters;
/// decoding never fails.
pub fn decode_lossy(bytes: &[u8]) -> (Cow<'_, str>, bool) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (Cow::Borrowed(s), false),
        Err(_) => (String::from_utf8_lossy(bytes), true),
    }
}

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "env", "lock",
];
const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc", "org"];

/// Classify a repository-relative path.
pub fn categorize(path: &str, has_language: bool) -> FileCategory {
    let lower = path.to_ascii_lowercase();
    let file_name = Path::new(&lower)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    let ext = Path::new(&lower)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let in_test_dir = lower
        .split('/')
        .any(|seg| seg == "test" || seg == "tests" || seg == "__tests__" || seg == "spec");
    let test_named = stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
        || stem.ends_with("_spec");

    if has_language && (in_test_dir || test_named) {
        return FileCategory::Test;
    }
    if has_language {
        return FileCategory::Source;
    }
    if CONFIG_EXTENSIONS.contains(&ext) {
        return FileCategory::Config;
    }
    if DOC_EXTENSIONS.contains(&ext) {
        return FileCategory::Docs;
    }
    FileCategory::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_sniff_finds_early_nul() {
        assert!(is_binary(&[0x00, 0x01, 0x02]));
        assert!(!is_binary(b"plain text, no nulls"));
    }

    #[test]
    fn test_binary_sniff_ignores_late_nul() {
        let mut bytes = vec![b'a'; SNIFF_WINDOW];
        bytes.push(0);
        assert!(!is_binary(&bytes));
    }

    #[test]
    fn test_decode_lossy_flags_invalid_sequences() {
        let (text, lossy) = decode_lossy(b"ok");
        assert_eq!(text, "ok");
        assert!(!lossy);

        let (text, lossy) = decode_lossy(&[b'a', 0xff, b'b']);
        assert!(lossy);
        assert!(text.contains('\u{fffd}'));
    }

    #[test]
    fn test_categorize_tests_and_source() {
        assert_eq!(categorize("tests/test_auth.py", true), FileCategory::Test);
        assert_eq!(categorize("src/auth_test.go", true), FileCategory::Test);
        assert_eq!(categorize("src/Button.spec.tsx", true), FileCategory::Test);
        assert_eq!(categorize("src/auth.py", true), FileCategory::Source);
    }

    #[test]
    fn test_categorize_config_docs_other() {
        assert_eq!(categorize("config/app.yaml", false), FileCategory::Config);
        assert_eq!(categorize("README.md", false), FileCategory::Docs);
        assert_eq!(categorize("assets/logo.svg", false), FileCategory::Other);
    }
}
