//! Test doubles shared by the automod unit tests.

use crate::automod::gateway::{LogEntry, ModerationGateway};
use crate::db::Database;
use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

pub fn test_db() -> Database {
    let db = Database::open(":memory:").unwrap();
    db.execute_init().unwrap();
    db
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    AddRole { guild_id: u64, user_id: u64, role_id: u64 },
    RemoveRole { guild_id: u64, user_id: u64, role_id: u64 },
    Ban { guild_id: u64, user_id: u64 },
    Unban { guild_id: u64, user_id: u64 },
    DeleteMessage { channel_id: u64, message_id: u64 },
    Notify { user_id: u64, content: String },
    PostLog { channel_id: u64, entry: LogEntry },
}

/// Records successful calls; operations named in `fail_on` are rejected
/// and not recorded.
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    failing: Mutex<HashSet<&'static str>>,
    missing: Mutex<HashSet<&'static str>>,
    roles: Mutex<HashSet<(u64, u64, u64)>>,
}

impl MockGateway {
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Makes `op` answer as if its target no longer exists.
    pub fn missing_on(&self, op: &'static str) {
        self.missing.lock().unwrap().insert(op);
    }

    pub fn give_role(&self, guild_id: u64, user_id: u64, role_id: u64) {
        self.roles.lock().unwrap().insert((guild_id, user_id, role_id));
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::PostLog { entry, .. } => Some(entry),
                _ => None,
            })
            .collect()
    }

    fn check(&self, op: &'static str) -> Result<(), GatewayError> {
        if self.missing.lock().unwrap().contains(op) {
            return Err(GatewayError::NotFound(format!("{} target", op)));
        }
        if self.failing.lock().unwrap().contains(op) {
            return Err(GatewayError::Rejected(format!("{} refused", op)));
        }
        Ok(())
    }

    fn attempt(&self, op: &'static str, call: GatewayCall) -> Result<(), GatewayError> {
        self.check(op)?;
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ModerationGateway for MockGateway {
    async fn add_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        _reason: &str,
    ) -> Result<(), GatewayError> {
        self.attempt("add_role", GatewayCall::AddRole { guild_id, user_id, role_id })?;
        self.give_role(guild_id, user_id, role_id);
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        _reason: &str,
    ) -> Result<(), GatewayError> {
        self.attempt("remove_role", GatewayCall::RemoveRole { guild_id, user_id, role_id })?;
        self.roles.lock().unwrap().remove(&(guild_id, user_id, role_id));
        Ok(())
    }

    async fn member_has_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<bool, GatewayError> {
        self.check("member_has_role")?;
        Ok(self.roles.lock().unwrap().contains(&(guild_id, user_id, role_id)))
    }

    async fn ban(&self, guild_id: u64, user_id: u64, _reason: &str) -> Result<(), GatewayError> {
        self.attempt("ban", GatewayCall::Ban { guild_id, user_id })
    }

    async fn unban(&self, guild_id: u64, user_id: u64, _reason: &str) -> Result<(), GatewayError> {
        self.attempt("unban", GatewayCall::Unban { guild_id, user_id })
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), GatewayError> {
        self.attempt("delete_message", GatewayCall::DeleteMessage { channel_id, message_id })
    }

    async fn notify_user(&self, user_id: u64, content: &str) -> Result<(), GatewayError> {
        self.attempt(
            "notify_user",
            GatewayCall::Notify {
                user_id,
                content: content.to_string(),
            },
        )
    }

    async fn post_log(&self, channel_id: u64, entry: &LogEntry) -> Result<(), GatewayError> {
        self.attempt(
            "post_log",
            GatewayCall::PostLog {
                channel_id,
                entry: entry.clone(),
            },
        )
    }
}
