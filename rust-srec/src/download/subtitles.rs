//! CJK-aware SRT post-processing (§4.6.2): each cue's body lines are merged
//! into a single logical line, joined with no separator across a CJK/CJK
//! boundary and a single space otherwise, then cleaned up so stray
//! whitespace and pre-punctuation spacing left by the join don't survive.

use regex::Regex;

/// Unicode block ranges treated as CJK for line-join purposes.
const CJK_RANGES: &[(u32, u32)] = &[
    (0x2E80, 0x2EFF),   // CJK Radicals Supplement
    (0x3040, 0x30FF),   // Hiragana + Katakana
    (0x3400, 0x4DBF),   // CJK Unified Ideographs Extension A
    (0x4E00, 0x9FFF),   // CJK Unified Ideographs
    (0xAC00, 0xD7A3),   // Hangul Syllables
    (0xF900, 0xFAFF),   // CJK Compatibility Ideographs
    (0xFF00, 0xFFEF),   // Halfwidth and Fullwidth Forms
];

fn is_cjk_char(c: char) -> bool {
    let cp = c as u32;
    CJK_RANGES.iter().any(|&(lo, hi)| cp >= lo && cp <= hi)
}

/// Merge a cue's body lines into one logical line.
pub fn merge_lines_to_single(lines: &[&str]) -> String {
    let mut out = String::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if out.is_empty() {
            out.push_str(line);
            continue;
        }
        let prev_ends_cjk = out.chars().last().is_some_and(is_cjk_char);
        let next_starts_cjk = line.chars().next().is_some_and(is_cjk_char);
        if !(prev_ends_cjk && next_starts_cjk) {
            out.push(' ');
        }
        out.push_str(line);
    }

    let punct_re = Regex::new(r"\s+([,\.!?;:])").expect("valid regex");
    let out = punct_re.replace_all(&out, "$1").to_string();
    let whitespace_re = Regex::new(r"\s+").expect("valid regex");
    whitespace_re.replace_all(&out, " ").to_string()
}

/// One parsed SRT cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub index: String,
    pub timing: String,
    pub text: String,
}

/// Parse an SRT file's contents into cues, merge each cue's body to one line,
/// and re-serialize. Unparseable input (no blank-line-delimited blocks) is
/// returned unchanged.
pub fn normalize_srt(input: &str) -> String {
    let normalized_input = input.replace("\r\n", "\n");
    let blocks: Vec<&str> = normalized_input
        .split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .collect();

    if blocks.is_empty() {
        return input.to_string();
    }

    let mut cues = Vec::new();
    for block in &blocks {
        let mut lines = block.lines();
        let Some(index) = lines.next() else { continue };
        let Some(timing) = lines.next() else { continue };
        if !timing.contains("-->") {
            // Not a well-formed cue block; bail out and return input unchanged.
            return input.to_string();
        }
        let body_lines: Vec<&str> = lines.collect();
        let text = merge_lines_to_single(&body_lines);
        cues.push(Cue {
            index: index.trim().to_string(),
            timing: timing.trim().to_string(),
            text,
        });
    }

    cues
        .into_iter()
        .map(|c| format!("{}\n{}\n{}\n", c.index, c.timing, c.text))
        .collect::<Vec<_>>()
        .join("\n")
}
