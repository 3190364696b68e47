/// Tables owned by the moderation subsystem. Every statement is idempotent
/// so `execute_init` can run on each start.
pub const SCHEMA: &str = "
    -- Manual and automatic moderation actions (warn / mute / ban)
    CREATE TABLE IF NOT EXISTS mod_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        guild_id TEXT NOT NULL,
        moderator_id TEXT NOT NULL,
        action_type TEXT NOT NULL,
        reason TEXT NOT NULL,
        created_at DATETIME NOT NULL,
        expires_at DATETIME,
        active BOOLEAN NOT NULL DEFAULT TRUE
    );
    CREATE INDEX IF NOT EXISTS idx_mod_actions_expiry ON mod_actions (active, expires_at);

    CREATE TABLE IF NOT EXISTS automod_violations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        guild_id TEXT NOT NULL,
        rule_name TEXT NOT NULL,
        created_at DATETIME NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE
    );
    CREATE INDEX IF NOT EXISTS idx_violations_user_rule ON automod_violations (guild_id, user_id, rule_name, active);

    -- Per-guild overrides of the built-in rule defaults
    CREATE TABLE IF NOT EXISTS automod_rules (
        guild_id TEXT NOT NULL,
        rule_name TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        settings TEXT NOT NULL DEFAULT '{}',
        last_update DATETIME NOT NULL,
        PRIMARY KEY (guild_id, rule_name)
    );

    CREATE TABLE IF NOT EXISTS automod_exceptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        rule_name TEXT NOT NULL,
        moderator_id TEXT NOT NULL,
        created_at DATETIME NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE
    );
    CREATE INDEX IF NOT EXISTS idx_exceptions_channel ON automod_exceptions (channel_id, rule_name, active);
";
