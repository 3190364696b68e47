use super::{ContentFilter, Tunables};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsSettings {
    pub min_length: usize,
    pub ratio: f64,
}

impl Default for CapsSettings {
    fn default() -> Self {
        Self {
            min_length: 6,
            ratio: 0.7,
        }
    }
}

pub struct CapsFilter {
    settings: Tunables<CapsSettings>,
}

impl CapsFilter {
    pub fn new(settings: CapsSettings) -> Self {
        Self {
            settings: Tunables::new(settings),
        }
    }
}

impl Default for CapsFilter {
    fn default() -> Self {
        Self::new(CapsSettings::default())
    }
}

impl ContentFilter for CapsFilter {
    fn matches(&self, content: &str, _user_id: u64, _at: DateTime<Utc>) -> bool {
        let settings = self.settings.read();
        let length = content.chars().count();
        if length == 0 || length < settings.min_length {
            return false;
        }
        let upper = content.chars().filter(|c| c.is_uppercase()).count();
        upper as f64 / length as f64 > settings.ratio
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

    fn check(content: &str) -> bool {
        CapsFilter::default().matches(content, 1, Utc::now())
    }

    #[test]
    fn test_ratio_threshold() {
        // 8 of 10 uppercase
        assert!(check("ABCDEFGHij"));
        // 6 of 10 uppercase
        assert!(!check("ABCDEFghij"));
        assert!(check("AAAAAAAAAA"));
    }

    #[test]
    fn test_short_messages_ignored() {
        assert!(!check("OK"));
        assert!(!check("LOL!!"));
        assert!(!check(""));
    }

    #[test]
    fn test_custom_ratio() {
        let filter = CapsFilter::default();
        filter
            .update_settings(&serde_json::json!({ "ratio": 0.5 }))
            .unwrap();
        assert!(filter.matches("ABCDEFghij", 1, Utc::now()));
    }
}
