use crate::automod::filters::{
    BannedWordFilter, CapsFilter, ContentFilter, FloodFilter, FloodKind, LinkFilter,
    RepetitionFilter,
};
use crate::automod::punishment::{Punishment, PunishmentTable};
use crate::config::RuleDefaults;
use crate::db::{parse_sqlite_utc, Database, RuleSettingsRecord};
use crate::error::RuleError;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    Spam,
    Caps,
    Links,
    BadWords,
    MentionSpam,
    EmoteSpam,
    NewlineSpam,
}

impl RuleKind {
    /// Registration order. Evaluation stops at the first match in this order.
    pub const ALL: [RuleKind; 7] = [
        RuleKind::Spam,
        RuleKind::Caps,
        RuleKind::Links,
        RuleKind::BadWords,
        RuleKind::MentionSpam,
        RuleKind::EmoteSpam,
        RuleKind::NewlineSpam,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Spam => "spam",
            RuleKind::Caps => "caps",
            RuleKind::Links => "links",
            RuleKind::BadWords => "bad_words",
            RuleKind::MentionSpam => "mention_spam",
            RuleKind::EmoteSpam => "emote_spam",
            RuleKind::NewlineSpam => "newline_spam",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RuleKind::Spam => "Repeating the same message in quick succession",
            RuleKind::Caps => "Messages written mostly in capital letters",
            RuleKind::Links => "Server invites and links to unapproved sites",
            RuleKind::BadWords => "Use of banned words",
            RuleKind::MentionSpam => "Mentioning too many users at once",
            RuleKind::EmoteSpam => "Too many emotes in one message",
            RuleKind::NewlineSpam => "Too many line breaks in one message",
        }
    }

    pub fn default_punishments(&self) -> PunishmentTable {
        let warn = Punishment::Warn;
        let mute_1h = Punishment::Mute(Duration::hours(1));
        let mute_1d = Punishment::Mute(Duration::days(1));
        let ladder = match self {
            RuleKind::Spam => [warn, mute_1h, mute_1d, Punishment::Ban(Some(Duration::days(3)))],
            RuleKind::Caps | RuleKind::EmoteSpam | RuleKind::NewlineSpam => {
                [warn, warn, mute_1h, mute_1d]
            }
            RuleKind::Links | RuleKind::BadWords => {
                [warn, mute_1h, mute_1d, Punishment::Ban(Some(Duration::days(7)))]
            }
            RuleKind::MentionSpam => [
                warn,
                mute_1h,
                Punishment::Ban(Some(Duration::days(1))),
                Punishment::Ban(None),
            ],
        };
        PunishmentTable::new(ladder.into_iter().enumerate().map(|(i, p)| (i as u32 + 1, p)))
    }

    fn build_filter(&self) -> Box<dyn ContentFilter> {
        match self {
            RuleKind::Spam => Box::new(RepetitionFilter::default()),
            RuleKind::Caps => Box::new(CapsFilter::default()),
            RuleKind::Links => Box::new(LinkFilter::default()),
            RuleKind::BadWords => Box::new(BannedWordFilter::default()),
            RuleKind::MentionSpam => Box::new(FloodFilter::new(FloodKind::Mentions)),
            RuleKind::EmoteSpam => Box::new(FloodFilter::new(FloodKind::Emotes)),
            RuleKind::NewlineSpam => Box::new(FloodFilter::new(FloodKind::Newlines)),
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        RuleKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| RuleError::UnknownRule(s.to_string()))
    }
}

/// A content rule with its enabled flag and escalation ladder.
pub struct Rule {
    kind: RuleKind,
    enabled: AtomicBool,
    last_update: Mutex<DateTime<Utc>>,
    punishments: PunishmentTable,
    filter: Box<dyn ContentFilter>,
}

impl Rule {
    pub fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(true),
            last_update: Mutex::new(Utc::now()),
            punishments: kind.default_punishments(),
            filter: kind.build_filter(),
        }
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn description(&self) -> &'static str {
        self.kind.description()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        *self.last_update.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn punishments(&self) -> &PunishmentTable {
        &self.punishments
    }

    pub fn punishment_for(&self, violation_count: u32) -> Punishment {
        self.punishments.for_count(violation_count)
    }

    /// Disabled rules and blank content never match.
    pub fn check(&self, content: &str, user_id: u64, at: DateTime<Utc>) -> bool {
        if !self.is_enabled() || content.trim().is_empty() {
            return false;
        }
        self.filter.matches(content, user_id, at)
    }

    pub fn settings(&self) -> Value {
        self.filter.settings()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        self.touch(Utc::now());
    }

    pub fn update_settings(&self, patch: &Value) -> Result<(), RuleError> {
        self.filter
            .update_settings(patch)
            .map_err(|source| RuleError::InvalidSettings {
                rule: self.name(),
                source,
            })?;
        self.touch(Utc::now());
        Ok(())
    }

    fn restore(&self, record: &RuleSettingsRecord) -> Result<(), RuleError> {
        let settings: Value = serde_json::from_str(&record.settings).map_err(|source| {
            RuleError::InvalidSettings {
                rule: self.name(),
                source,
            }
        })?;
        self.filter
            .update_settings(&settings)
            .map_err(|source| RuleError::InvalidSettings {
                rule: self.name(),
                source,
            })?;
        self.enabled.store(record.enabled, Ordering::Relaxed);
        self.touch(parse_sqlite_utc(&record.last_update).unwrap_or_else(Utc::now));
        Ok(())
    }

    fn apply_defaults(&self, defaults: &RuleDefaults) -> Result<(), RuleError> {
        if let Some(settings) = &defaults.settings {
            self.update_settings(settings)?;
        }
        if let Some(enabled) = defaults.enabled {
            self.enabled.store(enabled, Ordering::Relaxed);
        }
        Ok(())
    }

    fn touch(&self, at: DateTime<Utc>) {
        *self.last_update.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

/// Every rule for one guild, kept in registration order.
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn with_defaults() -> Self {
        Self {
            rules: RuleKind::ALL.into_iter().map(Rule::new).collect(),
        }
    }

    pub fn get(&self, kind: RuleKind) -> &Rule {
        // `rules` is built from `RuleKind::ALL`, so the index always exists.
        let idx = RuleKind::ALL.iter().position(|k| *k == kind).unwrap_or(0);
        &self.rules[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Returns the first enabled, non-exempt rule that matches. Later rules
    /// are not evaluated once one matches.
    pub fn first_match<F>(
        &self,
        content: &str,
        user_id: u64,
        at: DateTime<Utc>,
        is_exempt: F,
    ) -> Option<&Rule>
    where
        F: Fn(RuleKind) -> bool,
    {
        self.rules
            .iter()
            .filter(|rule| !is_exempt(rule.kind()))
            .find(|rule| rule.check(content, user_id, at))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Per-guild rule sets, created on first use from built-in defaults plus
/// the startup rules file, then overridden by stored guild settings.
pub struct RuleBook {
    guilds: RwLock<HashMap<u64, Arc<RuleSet>>>,
    defaults: HashMap<RuleKind, RuleDefaults>,
}

impl RuleBook {
    pub fn new(defaults: HashMap<String, RuleDefaults>) -> Self {
        let mut known = HashMap::new();
        for (name, rule_defaults) in defaults {
            match name.parse::<RuleKind>() {
                Ok(kind) => {
                    known.insert(kind, rule_defaults);
                }
                Err(_) => warn!("Ignoring defaults for unknown automod rule '{}'", name),
            }
        }
        Self {
            guilds: RwLock::new(HashMap::new()),
            defaults: known,
        }
    }

    pub fn for_guild(&self, guild_id: u64) -> Arc<RuleSet> {
        if let Some(set) = self
            .guilds
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&guild_id)
        {
            return set.clone();
        }

        let mut guilds = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        guilds
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("Creating automod rule set for guild {}", guild_id);
                Arc::new(self.fresh_set())
            })
            .clone()
    }

    fn fresh_set(&self) -> RuleSet {
        let set = RuleSet::with_defaults();
        for (kind, defaults) in &self.defaults {
            if let Err(e) = set.get(*kind).apply_defaults(defaults) {
                warn!("Ignoring startup defaults for rule {}: {}", kind, e);
            }
        }
        set
    }

    /// Applies stored per-guild overrides. Rows for unknown rules or with
    /// unreadable settings are skipped. Returns how many rows were applied.
    pub fn apply_stored(&self, records: &[RuleSettingsRecord]) -> usize {
        let mut applied = 0;
        for record in records {
            let Ok(kind) = record.rule_name.parse::<RuleKind>() else {
                debug!("Skipping stored settings for unknown rule '{}'", record.rule_name);
                continue;
            };
            let set = self.for_guild(record.guild_id);
            match set.get(kind).restore(record) {
                Ok(()) => applied += 1,
                Err(e) => warn!(
                    "Skipping stored settings for rule {} in guild {}: {}",
                    kind, record.guild_id, e
                ),
            }
        }
        applied
    }

    pub async fn load(&self, db: &Database) -> Result<usize, RuleError> {
        let records = db.run_blocking(|db| db.list_rule_settings()).await?;
        let applied = self.apply_stored(&records);
        info!("Loaded {} stored automod rule overrides", applied);
        Ok(applied)
    }

    pub async fn set_enabled(
        &self,
        db: &Database,
        guild_id: u64,
        kind: RuleKind,
        enabled: bool,
    ) -> Result<(), RuleError> {
        let set = self.for_guild(guild_id);
        let rule = set.get(kind);
        rule.set_enabled(enabled);
        self.persist(db, guild_id, rule).await
    }

    /// Merges `patch` into the rule's settings and returns the result.
    pub async fn update_settings(
        &self,
        db: &Database,
        guild_id: u64,
        kind: RuleKind,
        patch: &Value,
    ) -> Result<Value, RuleError> {
        let set = self.for_guild(guild_id);
        let rule = set.get(kind);
        rule.update_settings(patch)?;
        self.persist(db, guild_id, rule).await?;
        Ok(rule.settings())
    }

    async fn persist(&self, db: &Database, guild_id: u64, rule: &Rule) -> Result<(), RuleError> {
        let name = rule.name();
        let enabled = rule.is_enabled();
        let settings = rule.settings().to_string();
        let last_update = rule.last_update();
        db.run_blocking(move |db| {
            db.upsert_rule_settings(guild_id, name, enabled, &settings, last_update)
        })
        .await?;
        info!(
            "Automod rule {} in guild {} saved (enabled: {})",
            name, guild_id, enabled
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    #[test]
    fn test_rule_names_round_trip() {
        for kind in RuleKind::ALL {
            assert_eq!(kind.name().parse::<RuleKind>().unwrap(), kind);
        }
        assert!("nope".parse::<RuleKind>().is_err());
        assert_eq!("  CAPS ".parse::<RuleKind>().unwrap(), RuleKind::Caps);
    }

    #[test]
    fn test_blank_content_never_matches() {
        let set = RuleSet::with_defaults();
        for rule in set.iter() {
            for content in ["", "   ", "\n\t "] {
                assert!(!rule.check(content, 1, Utc::now()), "{} matched blank", rule.name());
            }
        }
    }

    #[test]
    fn test_escalation_is_monotonic() {
        for kind in RuleKind::ALL {
            let table = kind.default_punishments();
            assert_eq!(table.max_count(), 4);
            for count in 1..8 {
                assert!(
                    table.for_count(count) <= table.for_count(count + 1),
                    "{} escalates backwards at {}",
                    kind,
                    count
                );
            }
        }
    }

    #[test]
    fn test_caps_ladder() {
        let table = RuleKind::Caps.default_punishments();
        assert_eq!(table.for_count(1), Punishment::Warn);
        assert_eq!(table.for_count(2), Punishment::Warn);
        assert_eq!(table.for_count(4), Punishment::Mute(Duration::days(1)));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let rule = Rule::new(RuleKind::Caps);
        assert!(rule.check("AAAAAAAAAA", 1, Utc::now()));
        rule.set_enabled(false);
        assert!(!rule.check("AAAAAAAAAA", 1, Utc::now()));
    }

    #[test]
    fn test_first_match_uses_registration_order() {
        let set = RuleSet::with_defaults();
        // Caps and links both match; caps is registered first
        let content = "JOIN HTTPS://DISCORD.GG/ABC";
        let hit = set.first_match(content, 1, Utc::now(), |_| false).unwrap();
        assert_eq!(hit.kind(), RuleKind::Caps);

        let hit = set
            .first_match(content, 1, Utc::now(), |kind| kind == RuleKind::Caps)
            .unwrap();
        assert_eq!(hit.kind(), RuleKind::Links);

        assert!(set.first_match("hello there", 1, Utc::now(), |_| false).is_none());
    }

    #[test]
    fn test_startup_defaults_apply_to_new_guilds() {
        let mut defaults = HashMap::new();
        defaults.insert(
            "caps".to_string(),
            RuleDefaults {
                enabled: Some(false),
                settings: None,
            },
        );
        defaults.insert(
            "newline_spam".to_string(),
            RuleDefaults {
                enabled: None,
                settings: Some(serde_json::json!({ "max": 2 })),
            },
        );
        defaults.insert("mystery".to_string(), RuleDefaults::default());

        let book = RuleBook::new(defaults);
        let set = book.for_guild(7);
        assert!(!set.get(RuleKind::Caps).is_enabled());
        assert!(set.get(RuleKind::NewlineSpam).check("a\nb\nc\nd", 1, Utc::now()));
        // Same Arc on second lookup
        assert!(Arc::ptr_eq(&set, &book.for_guild(7)));
    }

    #[tokio::test]
    async fn test_overrides_persist_and_reload() {
        let db = test_db();
        let book = RuleBook::new(HashMap::new());
        book.set_enabled(&db, 7, RuleKind::Links, false).await.unwrap();
        let settings = book
            .update_settings(&db, 7, RuleKind::Caps, &serde_json::json!({ "ratio": 0.5 }))
            .await
            .unwrap();
        assert_eq!(settings["ratio"], 0.5);

        let invalid = book
            .update_settings(&db, 7, RuleKind::Caps, &serde_json::json!({ "ratio": "high" }))
            .await;
        assert!(matches!(invalid, Err(RuleError::InvalidSettings { .. })));

        // A fresh book picks the overrides up from storage
        let reloaded = RuleBook::new(HashMap::new());
        assert_eq!(reloaded.load(&db).await.unwrap(), 2);
        let set = reloaded.for_guild(7);
        assert!(!set.get(RuleKind::Links).is_enabled());
        assert_eq!(set.get(RuleKind::Caps).settings()["ratio"], 0.5);
        // Other guilds keep defaults
        assert!(reloaded.for_guild(8).get(RuleKind::Links).is_enabled());
    }
}
