use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use tracing::warn;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub discord_token: String,
    pub owner_id: Option<u64>,
    pub database_url: String,
    pub status_message: String,
    pub dev_guild_id: Option<u64>,
    pub register_commands: bool,

    // Auto-moderation
    pub automod_enabled: bool,
    pub mute_role_id: Option<u64>,
    pub mod_log_channel_id: Option<u64>,
    pub automod_notify_users: bool,
    pub automod_rules_file: String,
    pub message_cache_size: usize,
}

/// Startup defaults for a single rule, read from the rules TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RuleDefaults {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            owner_id: env::var("OWNER_ID").ok().and_then(|id| id.parse().ok()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/niludetsu.db".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Keeping the peace".to_string()),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
            register_commands: env::var("REGISTER_COMMANDS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),

            automod_enabled: env::var("AUTOMOD_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            mute_role_id: env::var("MUTE_ROLE_ID").ok().and_then(|id| id.parse().ok()),
            mod_log_channel_id: env::var("MOD_LOG_CHANNEL_ID")
                .ok()
                .and_then(|id| id.parse().ok()),
            automod_notify_users: env::var("AUTOMOD_NOTIFY_USERS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            automod_rules_file: env::var("AUTOMOD_RULES_FILE")
                .unwrap_or_else(|_| "automod.toml".to_string()),
            message_cache_size: env::var("MESSAGE_CACHE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        })
    }

    /// Reads per-rule startup defaults. A missing file means built-in defaults;
    /// an unreadable one is logged and ignored.
    pub fn load_rule_defaults(&self) -> HashMap<String, RuleDefaults> {
        let Ok(content) = fs::read_to_string(&self.automod_rules_file) else {
            return HashMap::new();
        };
        match parse_rule_defaults(&content) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(
                    "Ignoring malformed automod rules file {}: {}",
                    self.automod_rules_file, e
                );
                HashMap::new()
            }
        }
    }
}

/// Parses a rules file of the form:
///
/// ```toml
/// [rules.caps]
/// enabled = true
/// settings = { ratio = 0.8 }
/// ```
pub fn parse_rule_defaults(content: &str) -> anyhow::Result<HashMap<String, RuleDefaults>> {
    #[derive(Deserialize)]
    struct RulesWrapper {
        #[serde(default)]
        rules: HashMap<String, RuleDefaults>,
    }
    let wrapper: RulesWrapper = toml::from_str(content)?;
    Ok(wrapper.rules)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .field("database_url", &self.database_url)
            .field("status_message", &self.status_message)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("register_commands", &self.register_commands)
            .field("automod_enabled", &self.automod_enabled)
            .field("mute_role_id", &self.mute_role_id)
            .field("mod_log_channel_id", &self.mod_log_channel_id)
            .field("automod_notify_users", &self.automod_notify_users)
            .field("automod_rules_file", &self.automod_rules_file)
            .field("message_cache_size", &self.message_cache_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing vars
        env::remove_var("DISCORD_TOKEN");
        let result = Config::build();
        assert!(result.is_err(), "Should fail when required vars are missing");

        // 2. Test defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        env::remove_var("MUTE_ROLE_ID");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert!(config.automod_enabled);
        assert_eq!(config.mute_role_id, None);
        assert_eq!(config.message_cache_size, 1000);

        // 3. Test debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(debug_output.contains("[REDACTED]"));

        // Cleanup
        env::remove_var("DISCORD_TOKEN");
    }

    #[test]
    fn test_parse_rule_defaults() {
        let content = r#"
            [rules.caps]
            enabled = false

            [rules.spam]
            settings = { message_count = 5, window_secs = 20 }
        "#;
        let rules = parse_rule_defaults(content).unwrap();
        assert_eq!(rules["caps"].enabled, Some(false));
        assert_eq!(rules["spam"].enabled, None);
        let settings = rules["spam"].settings.as_ref().unwrap();
        assert_eq!(settings["message_count"], 5);

        assert!(parse_rule_defaults("rules = 3").is_err());
    }
}
