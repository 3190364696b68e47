use super::{ContentFilter, Tunables};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Custom guild emotes (`<:name:id>`, `<a:name:id>`) and unicode pictographs.
static EMOTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<a?:[A-Za-z0-9_]+:\d+>|\p{Extended_Pictographic}")
        .expect("emote pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodKind {
    Mentions,
    Emotes,
    Newlines,
}

impl FloodKind {
    pub fn default_max(&self) -> usize {
        match self {
            FloodKind::Mentions => 5,
            FloodKind::Emotes => 5,
            FloodKind::Newlines => 10,
        }
    }

    pub fn count(&self, content: &str) -> usize {
        match self {
            FloodKind::Mentions => content.matches('@').count(),
            FloodKind::Emotes => EMOTE_RE.find_iter(content).count(),
            FloodKind::Newlines => content.matches('\n').count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodSettings {
    pub max: usize,
}

impl Default for FloodSettings {
    fn default() -> Self {
        Self { max: 5 }
    }
}

/// Flags messages where the occurrence count exceeds `max`.
pub struct FloodFilter {
    kind: FloodKind,
    settings: Tunables<FloodSettings>,
}

impl FloodFilter {
    pub fn new(kind: FloodKind) -> Self {
        Self {
            kind,
            settings: Tunables::new(FloodSettings {
                max: kind.default_max(),
            }),
        }
    }

    pub fn kind(&self) -> FloodKind {
        self.kind
    }
}

impl ContentFilter for FloodFilter {
    fn matches(&self, content: &str, _user_id: u64, _at: DateTime<Utc>) -> bool {
        self.kind.count(content) > self.settings.read().max
    }

    fn settings(&self) -> Value {
        self.settings.to_json()
    }

    fn update_settings(&self, patch: &Value) -> Result<(), serde_json::Error> {
        self.settings.merge(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions() {
        let filter = FloodFilter::new(FloodKind::Mentions);
        let five = "<@1> <@2> <@3> <@4> <@5>";
        let six = "<@1> <@2> <@3> <@4> <@5> <@6>";
        assert!(!filter.matches(five, 1, Utc::now()));
        assert!(filter.matches(six, 1, Utc::now()));
    }

    #[test]
    fn test_emotes() {
        assert_eq!(FloodKind::Emotes.count("<:pog:123> <a:dance:456>"), 2);
        assert_eq!(FloodKind::Emotes.count("😀😀😀"), 3);

        let filter = FloodFilter::new(FloodKind::Emotes);
        assert!(!filter.matches("nice 😀😀", 1, Utc::now()));
        assert!(filter.matches("😀😀😀<:pog:1><:pog:2><:pog:3>", 1, Utc::now()));
    }

    #[test]
    fn test_newlines() {
        let filter = FloodFilter::new(FloodKind::Newlines);
        assert!(!filter.matches(&"a\n".repeat(10), 1, Utc::now()));
        assert!(filter.matches(&"a\n".repeat(11), 1, Utc::now()));
    }
}
