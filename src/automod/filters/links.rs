use super::{ContentFilter, Tunables};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static INVITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:discord\.gg|discord(?:app)?\.com/invite)/[a-z0-9-]+")
        .expect("invite pattern is valid")
});

static URL_HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://([^\s/?#:@]+)").expect("url pattern is valid"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub allowed_domains: Vec<String>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            allowed_domains: ["discord.com", "discordapp.com", "imgur.com", "youtube.com"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

/// Flags server invites and links to hosts outside the allow-list.
/// Subdomains of an allowed host (`www.youtube.com`) are allowed.
pub struct LinkFilter {
    settings: Tunables<LinkSettings>,
}

impl LinkFilter {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            settings: Tunables::new(settings),
        }
    }

    fn host_allowed(allowed: &[String], host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        allowed.iter().any(|domain| {
            let domain = domain.trim().to_ascii_lowercase();
            !domain.is_empty()
                && (host == domain || host.ends_with(&format!(".{}", domain)))
        })
    }
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self::new(LinkSettings::default())
    }
}

impl ContentFilter for LinkFilter {
    fn matches(&self, content: &str, _user_id: u64, _at: DateTime<Utc>) -> bool {
        if INVITE_RE.is_match(content) {
            return true;
        }
        let settings = self.settings.read();
        URL_HOST_RE
            .captures_iter(content)
            .filter_map(|cap| cap.get(1))
            .any(|host| !Self::host_allowed(&settings.allowed_domains, host.as_str()))
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
        LinkFilter::default().matches(content, 1, Utc::now())
    }

    #[test]
    fn test_invites_flag() {
        assert!(check("join https://discord.gg/abc123"));
        assert!(check("discord.com/invite/xyz please"));
        assert!(check("DISCORDAPP.COM/INVITE/Abc"));
    }

    #[test]
    fn test_allow_list() {
        assert!(!check("see https://youtube.com/watch?v=x"));
        assert!(!check("see https://www.youtube.com/watch?v=x"));
        assert!(!check("https://i.imgur.com/cat.png"));
        assert!(check("free nitro https://steamcommunity.ru/gift"));
        // Look-alike host is not a subdomain
        assert!(check("https://notyoutube.com/watch"));
    }

    #[test]
    fn test_plain_text_passes() {
        assert!(!check("no links in here, just discord talk"));
    }

    #[test]
    fn test_custom_allow_list() {
        let filter = LinkFilter::default();
        filter
            .update_settings(&serde_json::json!({ "allowed_domains": ["rust-lang.org"] }))
            .unwrap();
        assert!(!filter.matches("https://doc.rust-lang.org/std", 1, Utc::now()));
        assert!(filter.matches("https://youtube.com/watch", 1, Utc::now()));
    }
}
