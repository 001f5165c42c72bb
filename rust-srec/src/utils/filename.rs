//! Filename sanitization utilities for cross-platform compatibility.
//!
//! Sanitizes filenames derived from extractor-reported titles by replacing or
//! removing characters that are invalid on Windows, Linux, or macOS, while
//! preserving valid Unicode characters like Chinese, Japanese, and Korean text.

/// Characters forbidden in the output filename.
const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum length of a sanitized filename, in codepoints.
const MAX_LEN: usize = 150;

/// Sanitize a string for use as a filename.
///
/// 1. Replaces each forbidden character with `_`, independently -- runs of
///    forbidden characters become a run of the same number of `_`.
/// 2. Trims leading/trailing whitespace and dots.
/// 3. Truncates to [`MAX_LEN`] codepoints.
/// 4. Falls back to `"video"` if the result is empty.
///
/// Idempotent: applying it twice yields the same result (property P7).
///
/// # Examples
///
/// ```
/// use media_svc::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world"), "hello_world");
/// assert_eq!(sanitize_filename("observe???"), "observe___");
/// assert_eq!(sanitize_filename(""), "video");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    if input.is_empty() {
        return "video".to_string();
    }

    let mut result = String::with_capacity(input.len());

    for c in input.chars() {
        if c.is_control() || FORBIDDEN_CHARS.contains(&c) {
            result.push('_');
        } else {
            result.push(c);
        }
    }

    let trimmed = result.trim_matches(|c: char| c.is_whitespace() || c == '.');

    let truncated: String = trimmed.chars().take(MAX_LEN).collect();

    if truncated.is_empty() {
        "video".to_string()
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_falls_back_to_video() {
        assert_eq!(sanitize_filename(""), "video");
    }

    #[test]
    fn only_invalid_characters_replaced_independently() {
        assert_eq!(sanitize_filename("???"), "___");
        assert_eq!(sanitize_filename("<>:"), "___");
    }

    #[test]
    fn all_invalid_then_trimmed_falls_back_to_video() {
        // A lone underscore survives trimming (only whitespace/dots are trimmed).
        assert_eq!(sanitize_filename("?"), "_");
    }

    #[test]
    fn leading_trailing_whitespace_and_dots_trimmed() {
        assert_eq!(sanitize_filename("  hello  "), "hello");
        assert_eq!(sanitize_filename("...hello..."), "hello");
        assert_eq!(sanitize_filename(" . hello . "), "hello");
    }

    #[test]
    fn cjk_characters_preserved() {
        assert_eq!(sanitize_filename("观看一只青蛙"), "观看一只青蛙");
        assert_eq!(sanitize_filename("观看一只青蛙?"), "观看一只青蛙_");
    }

    #[test]
    fn mixed_valid_and_invalid() {
        assert_eq!(sanitize_filename("hello?world"), "hello_world");
        assert_eq!(sanitize_filename("file<name>test"), "file_name_test");
        assert_eq!(sanitize_filename("a:b:c"), "a_b_c");
    }

    #[test]
    fn consecutive_invalid_chars_replaced_independently() {
        assert_eq!(sanitize_filename("hello???world"), "hello___world");
        assert_eq!(sanitize_filename("a<>:\"b"), "a____b");
    }

    #[test]
    fn control_characters_replaced() {
        assert_eq!(sanitize_filename("hello\x00world"), "hello_world");
        assert_eq!(sanitize_filename("test\x1ffile"), "test_file");
    }

    #[test]
    fn truncates_to_150_codepoints() {
        let long_title: String = std::iter::repeat('a').take(300).collect();
        let sanitized = sanitize_filename(&long_title);
        assert_eq!(sanitized.chars().count(), MAX_LEN);
    }

    #[test]
    fn truncation_counts_codepoints_not_bytes() {
        let long_title: String = std::iter::repeat('青').take(200).collect();
        let sanitized = sanitize_filename(&long_title);
        assert_eq!(sanitized.chars().count(), MAX_LEN);
    }

    #[test]
    fn idempotent_across_varied_inputs() {
        let inputs = [
            "hello?world",
            "观看一只青蛙?",
            "  test  ",
            "...dots...",
            "",
            "?",
        ];
        for input in inputs {
            let once = sanitize_filename(input);
            let twice = sanitize_filename(&once);
            assert_eq!(once, twice, "idempotency failed for input: {input}");
        }
    }

    #[test]
    fn never_contains_forbidden_char() {
        let input = "a\\b/c:d*e?f\"g<h>i|j";
        let sanitized = sanitize_filename(input);
        assert!(!sanitized.chars().any(|c| FORBIDDEN_CHARS.contains(&c)));
    }
}
