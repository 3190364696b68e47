pub mod schema;

use crate::config::Config;
use crate::error::StorageError;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SQLITE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type StorageResult<T> = Result<T, StorageError>;

/// Kind of a stored moderation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Warn,
    Mute,
    Ban,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Warn => "warn",
            ActionType::Mute => "mute",
            ActionType::Ban => "ban",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warn" => Ok(ActionType::Warn),
            "mute" => Ok(ActionType::Mute),
            "ban" => Ok(ActionType::Ban),
            other => Err(format!("unknown action type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewModAction {
    pub user_id: u64,
    pub guild_id: u64,
    pub moderator_id: u64,
    pub action_type: ActionType,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModActionRecord {
    pub id: i64,
    pub user_id: u64,
    pub guild_id: u64,
    pub moderator_id: u64,
    pub action_type: ActionType,
    pub reason: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub active: bool,
}

impl ModActionRecord {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at.as_deref().and_then(parse_sqlite_utc)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRecord {
    pub id: i64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub rule_name: String,
    pub moderator_id: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSettingsRecord {
    pub guild_id: u64,
    pub rule_name: String,
    pub enabled: bool,
    pub settings: String,
    pub last_update: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationCount {
    pub guild_id: u64,
    pub user_id: u64,
    pub rule_name: String,
    pub count: u32,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> StorageResult<Self> {
        Self::open(&config.database_url)
    }

    pub fn open(path: &str) -> StorageResult<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn execute_init(&self) -> StorageResult<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs a synchronous database call on the blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Database) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))?
    }

    // --- Moderation actions ---

    pub fn insert_mod_action(&self, action: &NewModAction) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO mod_actions (user_id, guild_id, moderator_id, action_type, reason, created_at, expires_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, TRUE)",
            (
                action.user_id.to_string(),
                action.guild_id.to_string(),
                action.moderator_id.to_string(),
                action.action_type.as_str(),
                &action.reason,
                now_sqlite(),
                action.expires_at.map(format_sqlite_utc),
            ),
        )?;
        let id = conn.last_insert_rowid();
        debug!(
            "Database: Recorded {} action {} for user {} in guild {}",
            action.action_type, id, action.user_id, action.guild_id
        );
        Ok(id)
    }

    pub fn get_mod_action(&self, id: i64) -> StorageResult<Option<ModActionRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, user_id, guild_id, moderator_id, action_type, reason, created_at, expires_at, active
                 FROM mod_actions WHERE id = ?1",
                [id],
                mod_action_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Active mutes and bans that carry an expiry, oldest expiry first.
    pub fn list_active_timed_actions(&self) -> StorageResult<Vec<ModActionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, guild_id, moderator_id, action_type, reason, created_at, expires_at, active
             FROM mod_actions
             WHERE active = 1 AND expires_at IS NOT NULL AND action_type IN ('mute', 'ban')
             ORDER BY expires_at ASC",
        )?;
        let rows = stmt.query_map([], mod_action_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn list_user_mod_actions(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> StorageResult<Vec<ModActionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, guild_id, moderator_id, action_type, reason, created_at, expires_at, active
             FROM mod_actions WHERE guild_id = ?1 AND user_id = ?2 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(
            (guild_id.to_string(), user_id.to_string()),
            mod_action_from_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn deactivate_mod_action(&self, id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE mod_actions SET active = 0 WHERE id = ?1 AND active = 1",
            [id],
        )?;
        Ok(count)
    }

    // --- Violations ---

    pub fn insert_violation(&self, guild_id: u64, user_id: u64, rule_name: &str) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO automod_violations (user_id, guild_id, rule_name, created_at, active)
             VALUES (?1, ?2, ?3, ?4, TRUE)",
            (user_id.to_string(), guild_id.to_string(), rule_name, now_sqlite()),
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn active_violation_counts(&self) -> StorageResult<Vec<ViolationCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT guild_id, user_id, rule_name, COUNT(*) FROM automod_violations
             WHERE active = 1 GROUP BY guild_id, user_id, rule_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ViolationCount {
                guild_id: id_column(row, 0)?,
                user_id: id_column(row, 1)?,
                rule_name: row.get(2)?,
                count: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn active_violation_count(
        &self,
        guild_id: u64,
        user_id: u64,
        rule_name: &str,
    ) -> StorageResult<u32> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM automod_violations
             WHERE guild_id = ?1 AND user_id = ?2 AND rule_name = ?3 AND active = 1",
            (guild_id.to_string(), user_id.to_string(), rule_name),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn deactivate_violations(
        &self,
        guild_id: u64,
        user_id: u64,
        rule_name: &str,
    ) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE automod_violations SET active = 0
             WHERE guild_id = ?1 AND user_id = ?2 AND rule_name = ?3 AND active = 1",
            (guild_id.to_string(), user_id.to_string(), rule_name),
        )?;
        Ok(count)
    }

    // --- Exceptions ---

    /// Inserts an exception unless an active one already exists.
    /// Returns whether a row was written.
    pub fn add_exception(
        &self,
        guild_id: u64,
        channel_id: u64,
        rule_name: &str,
        moderator_id: u64,
    ) -> StorageResult<bool> {
        let conn = self.conn()?;
        let exists = conn
            .prepare(
                "SELECT 1 FROM automod_exceptions WHERE channel_id = ?1 AND rule_name = ?2 AND active = 1",
            )?
            .exists((channel_id.to_string(), rule_name))?;
        if exists {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO automod_exceptions (guild_id, channel_id, rule_name, moderator_id, created_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, TRUE)",
            (
                guild_id.to_string(),
                channel_id.to_string(),
                rule_name,
                moderator_id.to_string(),
                now_sqlite(),
            ),
        )?;
        Ok(true)
    }

    pub fn deactivate_exception(&self, channel_id: u64, rule_name: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE automod_exceptions SET active = 0 WHERE channel_id = ?1 AND rule_name = ?2 AND active = 1",
            (channel_id.to_string(), rule_name),
        )?;
        Ok(count)
    }

    pub fn list_active_exceptions(&self, guild_id: Option<u64>) -> StorageResult<Vec<ExceptionRecord>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, guild_id, channel_id, rule_name, moderator_id, created_at
             FROM automod_exceptions WHERE active = 1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(guild_id) = guild_id {
            sql.push_str(" AND guild_id = ?");
            params.push(Box::new(guild_id.to_string()));
        }
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let params_slice: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(&params_slice[..], |row| {
            Ok(ExceptionRecord {
                id: row.get(0)?,
                guild_id: id_column(row, 1)?,
                channel_id: id_column(row, 2)?,
                rule_name: row.get(3)?,
                moderator_id: id_column(row, 4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // --- Rule settings ---

    pub fn upsert_rule_settings(
        &self,
        guild_id: u64,
        rule_name: &str,
        enabled: bool,
        settings: &str,
        last_update: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO automod_rules (guild_id, rule_name, enabled, settings, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(guild_id, rule_name) DO UPDATE SET enabled = ?3, settings = ?4, last_update = ?5",
            (
                guild_id.to_string(),
                rule_name,
                enabled,
                settings,
                format_sqlite_utc(last_update),
            ),
        )?;
        Ok(())
    }

    pub fn list_rule_settings(&self) -> StorageResult<Vec<RuleSettingsRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT guild_id, rule_name, enabled, settings, last_update FROM automod_rules",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RuleSettingsRecord {
                guild_id: id_column(row, 0)?,
                rule_name: row.get(1)?,
                enabled: row.get(2)?,
                settings: row.get(3)?,
                last_update: row.get(4)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

fn mod_action_from_row(row: &Row<'_>) -> rusqlite::Result<ModActionRecord> {
    let action_type: String = row.get(4)?;
    let action_type = action_type.parse::<ActionType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into())
    })?;

    Ok(ModActionRecord {
        id: row.get(0)?,
        user_id: id_column(row, 1)?,
        guild_id: id_column(row, 2)?,
        moderator_id: id_column(row, 3)?,
        action_type,
        reason: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
        active: row.get(8)?,
    })
}

/// Snowflakes are stored as text; read one back as `u64`.
fn id_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: String = row.get(idx)?;
    raw.parse::<u64>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn format_sqlite_utc(ts: DateTime<Utc>) -> String {
    ts.format(SQLITE_TIME_FORMAT).to_string()
}

pub fn now_sqlite() -> String {
    format_sqlite_utc(Utc::now())
}

pub fn parse_sqlite_utc(ts: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(ts, SQLITE_TIME_FORMAT).ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}
