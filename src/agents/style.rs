//! Pure helpers for making agent output blend into the visible human text.

/// Hard cap on any content entering a round
pub const MAX_CONTENT_CHARS: usize = 280;

/// Tolerance window around the median human submission length
const LENGTH_TOLERANCE: f64 = 0.4;

/// Normalize for duplicate comparison (trim whitespace, lowercase)
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Collapse generated text to a single line
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters, respecting char boundaries
pub fn cap(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

pub fn is_duplicate(text: &str, used: &[String]) -> bool {
    let key = normalize(text);
    used.iter().any(|u| normalize(u) == key)
}

/// Target length window derived from the median of visible human submission
/// lengths. Returns None when there is nothing to match against.
pub fn length_window(visible: &[String]) -> Option<(usize, usize)> {
    let mut lengths: Vec<usize> = visible
        .iter()
        .map(|t| t.chars().count())
        .filter(|len| *len > 0)
        .collect();
    if lengths.is_empty() {
        return None;
    }
    lengths.sort_unstable();
    let median = lengths[lengths.len() / 2];

    let lo = ((median as f64) * (1.0 - LENGTH_TOLERANCE)).floor() as usize;
    let hi = ((median as f64) * (1.0 + LENGTH_TOLERANCE)).ceil() as usize;
    Some((lo.max(1), hi.min(MAX_CONTENT_CHARS)))
}

pub fn within_window(text: &str, window: Option<(usize, usize)>) -> bool {
    match window {
        Some((lo, hi)) => {
            let len = text.chars().count();
            len >= lo && len <= hi
        }
        None => !text.is_empty(),
    }
}

/// Deterministic fallback: copy a real human submission verbatim, truncated to
/// the window, skipping anything a teammate already used this round.
pub fn fallback_text(
    visible: &[String],
    used: &[String],
    window: Option<(usize, usize)>,
) -> Option<String> {
    use rand::seq::IndexedRandom;

    let candidates: Vec<&String> = visible
        .iter()
        .filter(|t| !t.trim().is_empty() && !is_duplicate(t, used))
        .collect();

    let mut rng = rand::rng();
    let picked = candidates.choose(&mut rng)?;

    let max = window.map(|(_, hi)| hi).unwrap_or(MAX_CONTENT_CHARS);
    Some(cap(&single_line(picked), max))
}
