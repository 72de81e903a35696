//! Companion mode lookup.
//!
//! A personality poll's winning option text is mapped to a mode tag. Prefix
//! matches win over substring matches; anything unrecognised maps to
//! [`DEFAULT_MODE`].

pub use lounge_db::entities::room::DEFAULT_MODE;

/// Keyword to mode tag, in priority order.
const MODE_KEYWORDS: &[(&str, &str)] = &[
    ("friend", "friendly"),
    ("play", "playful"),
    ("fun", "playful"),
    ("silly", "playful"),
    ("flirt", "flirty"),
    ("romant", "flirty"),
    ("support", "supportive"),
    ("comfort", "supportive"),
    ("kind", "supportive"),
    ("sarcas", "sarcastic"),
    ("snark", "sarcastic"),
    ("serious", "focused"),
    ("focus", "focused"),
    ("professional", "focused"),
    ("chao", "chaotic"),
    ("wild", "chaotic"),
];

/// All mode tags a room can be switched to.
#[must_use]
pub fn known_modes() -> Vec<&'static str> {
    let mut modes: Vec<&'static str> = std::iter::once(DEFAULT_MODE)
        .chain(MODE_KEYWORDS.iter().map(|(_, tag)| *tag))
        .collect();
    modes.dedup();
    modes
}

/// Resolve free option text to a mode tag.
#[must_use]
pub fn resolve_mode(text: &str) -> &'static str {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return DEFAULT_MODE;
    }

    if let Some((_, tag)) = MODE_KEYWORDS
        .iter()
        .find(|(keyword, _)| normalized.starts_with(keyword))
    {
        return tag;
    }

    MODE_KEYWORDS
        .iter()
        .find(|(keyword, _)| normalized.contains(keyword))
        .map_or(DEFAULT_MODE, |(_, tag)| tag)
}
