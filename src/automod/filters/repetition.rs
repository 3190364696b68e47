use super::{ContentFilter, Tunables};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Users tracked before idle histories are swept.
const HISTORY_SWEEP_THRESHOLD: usize = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepetitionSettings {
    pub window_secs: i64,
    pub message_count: usize,
    pub similarity_threshold: f64,
}

impl Default for RepetitionSettings {
    fn default() -> Self {
        Self {
            window_secs: 30,
            message_count: 4,
            similarity_threshold: 0.85,
        }
    }
}

/// Flags a user who keeps sending near-identical messages inside a rolling
/// time window.
pub struct RepetitionFilter {
    settings: Tunables<RepetitionSettings>,
    history: Mutex<HashMap<u64, VecDeque<(DateTime<Utc>, String)>>>,
}

impl RepetitionFilter {
    pub fn new(settings: RepetitionSettings) -> Self {
        Self {
            settings: Tunables::new(settings),
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracked_users(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for RepetitionFilter {
    fn default() -> Self {
        Self::new(RepetitionSettings::default())
    }
}

impl ContentFilter for RepetitionFilter {
    fn matches(&self, content: &str, user_id: u64, at: DateTime<Utc>) -> bool {
        let settings = self.settings.read().clone();
        let window = Duration::seconds(settings.window_secs.max(0));
        let needed = settings.message_count.max(2);

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() > HISTORY_SWEEP_THRESHOLD {
            history.retain(|_, entries| {
                entries
                    .back()
                    .map_or(false, |(sent, _)| at.signed_duration_since(*sent) <= window)
            });
        }

        let entries = history.entry(user_id).or_default();
        while let Some((sent, _)) = entries.front() {
            if at.signed_duration_since(*sent) > window {
                entries.pop_front();
            } else {
                break;
            }
        }
        entries.push_back((at, content.to_string()));
        while entries.len() > needed {
            entries.pop_front();
        }

        if entries.len() < needed {
            return false;
        }

        let recent: Vec<&str> = entries.iter().map(|(_, text)| text.as_str()).collect();
        let mut similar_pairs = 0usize;
        for i in 0..recent.len() {
            for j in (i + 1)..recent.len() {
                if similarity(recent[i], recent[j]) >= settings.similarity_threshold {
                    similar_pairs += 1;
                }
            }
        }

        if similar_pairs >= needed {
            // Start over so the next message is judged on fresh evidence.
            entries.clear();
            return true;
        }
        false
    }

    fn settings(&self) -> Value {
        self.settings.to_json()
    }

    fn update_settings(&self, patch: &Value) -> Result<(), serde_json::Error> {
        self.settings.merge(patch)
    }
}

/// Exact match scores 1.0, containment 0.9, otherwise the share of distinct
/// characters the two texts have in common relative to the longer text.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return 0.9;
    }

    let a_chars: HashSet<char> = a.chars().collect();
    let b_chars: HashSet<char> = b.chars().collect();
    let common = a_chars.intersection(&b_chars).count();
    let longest = a.chars().count().max(b.chars().count());
    common as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_similarity_scores() {
        assert_eq!(similarity("hello", "hello"), 1.0);
        assert_eq!(similarity("hello", "hello world"), 0.9);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        // {a, b} shared out of 4 characters
        assert_eq!(similarity("abcd", "abxy"), 0.5);
        assert_eq!(similarity("", "abc"), 0.0);
    }

    #[test]
    fn test_fourth_identical_message_flags() {
        let filter = RepetitionFilter::default();
        let start = t0();
        for i in 0..3 {
            assert!(!filter.matches("buy my stuff", 1, start + Duration::seconds(i)));
        }
        assert!(filter.matches("buy my stuff", 1, start + Duration::seconds(3)));
    }

    #[test]
    fn test_messages_outside_window_do_not_flag() {
        let filter = RepetitionFilter::default();
        let start = t0();
        for i in 0..4 {
            assert!(!filter.matches("buy my stuff", 1, start + Duration::seconds(31 * i)));
        }
    }

    #[test]
    fn test_users_are_tracked_separately() {
        let filter = RepetitionFilter::default();
        let start = t0();
        for i in 0..4 {
            let user = if i % 2 == 0 { 1 } else { 2 };
            assert!(!filter.matches("same text", user, start + Duration::seconds(i)));
        }
        assert_eq!(filter.tracked_users(), 2);
    }

    #[test]
    fn test_distinct_messages_do_not_flag() {
        let filter = RepetitionFilter::default();
        let start = t0();
        let texts = ["good morning", "what's up?", "anyone around", "lunch at 1"];
        for (i, text) in texts.iter().enumerate() {
            assert!(!filter.matches(text, 1, start + Duration::seconds(i as i64)));
        }
    }

    #[test]
    fn test_history_resets_after_flag() {
        let filter = RepetitionFilter::default();
        let start = t0();
        for i in 0..4 {
            filter.matches("spam", 1, start + Duration::seconds(i));
        }
        assert!(!filter.matches("spam", 1, start + Duration::seconds(5)));
    }

    #[test]
    fn test_settings_patch() {
        let filter = RepetitionFilter::default();
        filter
            .update_settings(&serde_json::json!({ "message_count": 2 }))
            .unwrap();
        assert_eq!(filter.settings()["message_count"], 2);
        assert_eq!(filter.settings()["window_secs"], 30);

        // Two identical messages form a single pair, below the required two
        let start = t0();
        assert!(!filter.matches("x", 1, start));
        assert!(!filter.matches("x", 1, start + Duration::seconds(1)));

        assert!(filter
            .update_settings(&serde_json::json!({ "message_count": "many" }))
            .is_err());
    }
}
