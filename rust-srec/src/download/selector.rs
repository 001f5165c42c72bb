//! Format-selector construction (§4.6.3): maps (mode, quality) or an explicit
//! format-id pair to the `-f` selector string passed to the extractor.

use crate::domain::Mode;

fn height_cap_from_quality(quality: &str) -> Option<&str> {
    if let Some(n) = quality.strip_prefix("height<=") {
        return Some(n);
    }
    match quality {
        "best8k" => Some("4320"),
        "best4k" => Some("2160"),
        "best" | "auto" => Some("1080"),
        "fast" => Some("720"),
        "640p" => Some("640"),
        _ => None,
    }
}

/// Build the extractor `-f` selector string. A literal bracketed selector
/// (containing `[` and `]`) is passed through unchanged.
pub fn build_selector(
    mode: Mode,
    quality: &str,
    video_format: Option<&str>,
    audio_format: Option<&str>,
) -> String {
    if quality.contains('[') && quality.contains(']') {
        return quality.to_string();
    }

    if let (Some(v), Some(a)) = (video_format, audio_format) {
        return match mode {
            Mode::Merged => format!("{v}+{a}"),
            Mode::VideoOnly => v.to_string(),
            Mode::AudioOnly => a.to_string(),
            Mode::SubtitlesOnly | Mode::ThumbnailOnly => v.to_string(),
        };
    }
    if let Some(v) = video_format
        && mode == Mode::VideoOnly
    {
        return v.to_string();
    }
    if let Some(a) = audio_format
        && mode == Mode::AudioOnly
    {
        return a.to_string();
    }

    match mode {
        Mode::AudioOnly => "bestaudio/best".to_string(),
        Mode::VideoOnly => {
            let cap = height_cap_from_quality(quality).unwrap_or("720");
            format!("bestvideo[height<=?{cap}]/bestvideo")
        }
        Mode::Merged => {
            let Some(cap) = height_cap_from_quality(quality) else {
                return "bv+ba/b".to_string();
            };
            format!("bv[height<=?{cap}]+ba/best[height<=?{cap}]/b")
        }
        Mode::SubtitlesOnly | Mode::ThumbnailOnly => "bv+ba/b".to_string(),
    }
}

/// A conservative selector favoring `mp4`/`m4a` containers, used by the
/// merge-corruption fallback rung (§4.6.4 rung 4).
pub fn conservative_mp4_selector(height_cap: &str) -> String {
    format!(
        "bv[ext=mp4][height<=?{height_cap}]+ba[ext=m4a]/best[ext=mp4][height<=?{height_cap}]"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_selector_for_explicit_formats() {
        assert_eq!(
            build_selector(Mode::Merged, "best", Some("137"), Some("140")),
            "137+140"
        );
        assert_eq!(
            build_selector(Mode::VideoOnly, "best", Some("137"), Some("140")),
            "137"
        );
        assert_eq!(
            build_selector(Mode::AudioOnly, "best", Some("137"), Some("140")),
            "140"
        );
    }

    #[test]
    fn adaptive_selector_table_matches_spec() {
        assert_eq!(
            build_selector(Mode::AudioOnly, "best", None, None),
            "bestaudio/best"
        );
        assert_eq!(
            build_selector(Mode::VideoOnly, "best8k", None, None),
            "bestvideo[height<=?4320]/bestvideo"
        );
        assert_eq!(
            build_selector(Mode::VideoOnly, "640p", None, None),
            "bestvideo[height<=?640]/bestvideo"
        );
        assert_eq!(
            build_selector(Mode::Merged, "best8k", None, None),
            "bv[height<=?4320]+ba/best[height<=?4320]/b"
        );
        assert_eq!(
            build_selector(Mode::Merged, "fast", None, None),
            "bv[height<=?720]+ba/best[height<=?720]/b"
        );
        assert_eq!(
            build_selector(Mode::Merged, "height<=500", None, None),
            "bv[height<=?500]+ba/best[height<=?500]/b"
        );
    }

    #[test]
    fn literal_bracketed_selector_passes_through() {
        let literal = "bv[height<=?900]+ba";
        assert_eq!(
            build_selector(Mode::Merged, literal, None, None),
            literal
        );
    }

    #[test]
    fn merged_other_quality_falls_back_to_plain_best() {
        assert_eq!(
            build_selector(Mode::Merged, "unrecognized-token", None, None),
            "bv+ba/b"
        );
    }
}
