use crate::automod::gateway::ModerationGateway;
use crate::automod::punishment::Punishment;
use crate::automod::scheduler::ExpiryScheduler;
use crate::db::{format_sqlite_utc, now_sqlite, ActionType, Database, ModActionRecord, NewModAction};
use crate::error::{ApplierError, StorageError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Who is being punished, by whom and why.
#[derive(Debug, Clone, Copy)]
pub struct PunishmentTarget<'a> {
    pub guild_id: u64,
    pub user_id: u64,
    pub moderator_id: u64,
    pub reason: &'a str,
    /// Rule that triggered the punishment, if it came from auto-moderation.
    pub rule_name: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Warned {
        action_id: i64,
    },
    Muted {
        action_id: i64,
        until: DateTime<Utc>,
    },
    Banned {
        action_id: i64,
        until: Option<DateTime<Utc>>,
    },
}

impl Applied {
    pub fn action_id(&self) -> i64 {
        match self {
            Applied::Warned { action_id }
            | Applied::Muted { action_id, .. }
            | Applied::Banned { action_id, .. } => *action_id,
        }
    }
}

/// Turns an escalation tier into a Discord action plus a stored record.
///
/// The record is written only after the Discord action succeeded, so a
/// failed action never leaves a dangling record behind.
pub struct PunishmentApplier {
    db: Database,
    gateway: Arc<dyn ModerationGateway>,
    scheduler: ExpiryScheduler,
    mute_role_id: Option<u64>,
    notify_users: bool,
}

impl PunishmentApplier {
    pub fn new(
        db: Database,
        gateway: Arc<dyn ModerationGateway>,
        scheduler: ExpiryScheduler,
        mute_role_id: Option<u64>,
        notify_users: bool,
    ) -> Self {
        Self {
            db,
            gateway,
            scheduler,
            mute_role_id,
            notify_users,
        }
    }

    /// Parses a punishment code (`warn`, `mute_2h`, `ban_3d`, `ban`) and
    /// applies it.
    pub async fn apply_code(
        &self,
        target: PunishmentTarget<'_>,
        code: &str,
    ) -> Result<Applied, ApplierError> {
        let punishment = Punishment::parse(code)?;
        self.apply(target, punishment).await
    }

    pub async fn apply(
        &self,
        target: PunishmentTarget<'_>,
        punishment: Punishment,
    ) -> Result<Applied, ApplierError> {
        let applied = match punishment {
            Punishment::Warn => {
                let record = self.record(&target, ActionType::Warn, None).await?;
                Applied::Warned {
                    action_id: record.id,
                }
            }
            Punishment::Mute(duration) => {
                let role_id = self.mute_role_id.ok_or(ApplierError::MissingMuteRole)?;
                let until = expiry(duration)?;
                self.gateway
                    .add_role(target.guild_id, target.user_id, role_id, target.reason)
                    .await?;

                let record = self
                    .record_or_schedule(&target, ActionType::Mute, Some(until))
                    .await?;
                self.scheduler.schedule(&record);
                self.notify(&target, &punishment).await;
                Applied::Muted {
                    action_id: record.id,
                    until,
                }
            }
            Punishment::Ban(duration) => {
                let until = duration.map(expiry).transpose()?;
                // Banned users share no guild with the bot, so DM first.
                self.notify(&target, &punishment).await;
                self.gateway
                    .ban(target.guild_id, target.user_id, target.reason)
                    .await?;

                let record = self.record_or_schedule(&target, ActionType::Ban, until).await?;
                self.scheduler.schedule(&record);
                Applied::Banned {
                    action_id: record.id,
                    until,
                }
            }
        };

        info!(
            "Applied {} to user {} in guild {} (rule: {}, action {})",
            punishment,
            target.user_id,
            target.guild_id,
            target.rule_name.unwrap_or("manual"),
            applied.action_id()
        );
        Ok(applied)
    }

    /// Stores the action. If that fails after a timed punishment was already
    /// applied, its expiry is still scheduled from memory.
    async fn record_or_schedule(
        &self,
        target: &PunishmentTarget<'_>,
        action_type: ActionType,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ModActionRecord, StorageError> {
        match self.record(target, action_type, expires_at).await {
            Ok(record) => Ok(record),
            Err(e) => {
                if let Some(until) = expires_at {
                    self.scheduler
                        .schedule_at(target.guild_id, target.user_id, action_type, until);
                }
                Err(e)
            }
        }
    }

    async fn record(
        &self,
        target: &PunishmentTarget<'_>,
        action_type: ActionType,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ModActionRecord, StorageError> {
        let action = NewModAction {
            user_id: target.user_id,
            guild_id: target.guild_id,
            moderator_id: target.moderator_id,
            action_type,
            reason: target.reason.to_string(),
            expires_at,
        };
        let stored = action.clone();
        let id = self
            .db
            .run_blocking(move |db| db.insert_mod_action(&stored))
            .await
            .map_err(|e| {
                warn!(
                    "{} for user {} was applied but could not be recorded: {}",
                    action_type, target.user_id, e
                );
                e
            })?;

        Ok(ModActionRecord {
            id,
            user_id: action.user_id,
            guild_id: action.guild_id,
            moderator_id: action.moderator_id,
            action_type,
            reason: action.reason,
            created_at: now_sqlite(),
            expires_at: expires_at.map(format_sqlite_utc),
            active: true,
        })
    }

    async fn notify(&self, target: &PunishmentTarget<'_>, punishment: &Punishment) {
        if !self.notify_users {
            return;
        }
        let content = format!(
            "You have received a {} in the server.\nReason: {}",
            punishment.describe(),
            target.reason
        );
        if let Err(e) = self.gateway.notify_user(target.user_id, &content).await {
            debug!("Could not DM user {}: {}", target.user_id, e);
        }
    }
}

fn expiry(duration: Duration) -> Result<DateTime<Utc>, ApplierError> {
    Utc::now()
        .checked_add_signed(duration)
        .ok_or_else(|| ApplierError::DurationOutOfRange(duration.to_string()))
}
