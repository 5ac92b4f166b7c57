//! Flattening of segment-only transcript responses.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub text: String,
}

/// Join segments in start order into one text, dropping blank segments and
/// sentences already said.
pub fn assemble_segments(segments: &[Segment]) -> String {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by(|a, b| a.start.total_cmp(&b.start));

    let combined = ordered
        .iter()
        .map(|segment| segment.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    dedupe_sentences(&combined)
}

fn dedupe_sentences(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();

    for sentence in sentences(text) {
        let repeated = kept
            .iter()
            .any(|existing| *existing == sentence || (sentence.len() > 10 && existing.contains(sentence)));
        if !repeated {
            kept.push(sentence);
        }
    }

    kept.join(" ")
}

/// Split after `.`, `!` or `?` when followed by whitespace, keeping the
/// terminator. Decimals and abbreviations inside a word stay whole.
fn sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            parts.push(text[start..end].trim());
            start = end;
        }
    }
    parts.push(text[start..].trim());

    parts.retain(|part| !part.is_empty());
    parts
}
