use super::{ContentFilter, Tunables};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_BANNED_WORDS: &[&str] = &[
    "fuck", "shit", "bitch", "cunt", "asshole", "dickhead", "retard", "whore",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BannedWordSettings {
    pub words: Vec<String>,
}

impl Default for BannedWordSettings {
    fn default() -> Self {
        Self {
            words: DEFAULT_BANNED_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// Case-insensitive substring match against a word list.
pub struct BannedWordFilter {
    settings: Tunables<BannedWordSettings>,
}

impl BannedWordFilter {
    pub fn new(settings: BannedWordSettings) -> Self {
        Self {
            settings: Tunables::new(settings),
        }
    }
}

impl Default for BannedWordFilter {
    fn default() -> Self {
        Self::new(BannedWordSettings::default())
    }
}

impl ContentFilter for BannedWordFilter {
    fn matches(&self, content: &str, _user_id: u64, _at: DateTime<Utc>) -> bool {
        let lowered = content.to_lowercase();
        self.settings
            .read()
            .words
            .iter()
            .map(|w| w.trim().to_lowercase())
            .any(|w| !w.is_empty() && lowered.contains(&w))
    }

    fn settings(&self) -> Value {
        self.settings.to_json()
    }

    fn update_settings(&self, patch: &Value) -> Result<(), serde_json::Error> {
        self.settings.merge(patch)
    }
}
