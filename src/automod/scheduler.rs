use crate::automod::gateway::ModerationGateway;
use crate::db::{ActionType, Database, ModActionRecord};
use crate::error::{ApplierError, GatewayError, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Attempts made by a scheduled task before leaving the action to the next
/// startup reconciliation.
const LIFT_ATTEMPTS: u32 = 3;
const LIFT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The record was cleared by someone else before it expired.
    AlreadyInactive,
    Lifted,
    /// The member no longer had the mute role.
    RoleAlreadyRemoved,
    /// The member or ban no longer exists.
    TargetGone,
    /// The unmute/unban call failed; the record stays active for a retry.
    LiftFailed,
}

impl ExpiryOutcome {
    fn closes_record(self) -> bool {
        self != ExpiryOutcome::LiftFailed
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub resolved: usize,
    pub scheduled: usize,
    /// Overdue actions whose lift failed and were handed to a retrying task.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum ExpiryJob {
    Record(i64),
    /// A punishment that was applied but could not be stored.
    Unrecorded {
        guild_id: u64,
        user_id: u64,
        action_type: ActionType,
    },
}

/// Lifts timed mutes and bans when they expire. Each pending expiry is an
/// independent sleeping task; `reconcile` rebuilds them after a restart.
#[derive(Clone)]
pub struct ExpiryScheduler {
    db: Database,
    gateway: Arc<dyn ModerationGateway>,
    mute_role_id: Option<u64>,
}

impl ExpiryScheduler {
    pub fn new(db: Database, gateway: Arc<dyn ModerationGateway>, mute_role_id: Option<u64>) -> Self {
        Self {
            db,
            gateway,
            mute_role_id,
        }
    }

    /// Spawns a task that waits until the record's expiry and then lifts it.
    /// Records without an expiry are ignored.
    pub fn schedule(&self, record: &ModActionRecord) -> Option<JoinHandle<()>> {
        let expires_at = record.expires_at_utc()?;
        debug!(
            "Scheduling expiry of {} action {} at {}",
            record.action_type, record.id, expires_at
        );
        Some(self.spawn_expiry(expires_at, ExpiryJob::Record(record.id)))
    }

    /// Lifts a mute or ban at `until` without a stored record to close.
    pub fn schedule_at(
        &self,
        guild_id: u64,
        user_id: u64,
        action_type: ActionType,
        until: DateTime<Utc>,
    ) -> JoinHandle<()> {
        warn!(
            "Scheduling unrecorded {} expiry for user {} in guild {} at {}",
            action_type, user_id, guild_id, until
        );
        self.spawn_expiry(
            until,
            ExpiryJob::Unrecorded {
                guild_id,
                user_id,
                action_type,
            },
        )
    }

    fn spawn_expiry(&self, at: DateTime<Utc>, job: ExpiryJob) -> JoinHandle<()> {
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let scheduler = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for attempt in 1..=LIFT_ATTEMPTS {
                match scheduler.run(job).await {
                    Ok(ExpiryOutcome::LiftFailed) if attempt < LIFT_ATTEMPTS => {
                        warn!(
                            "Expiry {:?} failed (attempt {}/{}); retrying in {}s",
                            job,
                            attempt,
                            LIFT_ATTEMPTS,
                            LIFT_RETRY_DELAY.as_secs()
                        );
                        tokio::time::sleep(LIFT_RETRY_DELAY).await;
                    }
                    Ok(ExpiryOutcome::LiftFailed) => {
                        error!("Giving up on expiry {:?} until the next restart", job);
                        break;
                    }
                    Ok(outcome) => {
                        debug!("Expiry {:?} finished: {:?}", job, outcome);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to resolve expiry {:?}: {}", job, e);
                        break;
                    }
                }
            }
        })
    }

    async fn run(&self, job: ExpiryJob) -> Result<ExpiryOutcome, ApplierError> {
        match job {
            ExpiryJob::Record(action_id) => self.resolve(action_id).await,
            ExpiryJob::Unrecorded {
                guild_id,
                user_id,
                action_type,
            } => Ok(self.lift(guild_id, user_id, action_type).await),
        }
    }

    /// Lifts an action now. The record is marked inactive unless the lift
    /// failed for a reason worth retrying.
    pub async fn resolve(&self, action_id: i64) -> Result<ExpiryOutcome, ApplierError> {
        let record = self
            .db
            .run_blocking(move |db| db.get_mod_action(action_id))
            .await?;
        let Some(record) = record.filter(|r| r.active) else {
            return Ok(ExpiryOutcome::AlreadyInactive);
        };

        let outcome = self
            .lift(record.guild_id, record.user_id, record.action_type)
            .await;
        if !outcome.closes_record() {
            warn!("Action {} could not be lifted; leaving it active", action_id);
            return Ok(outcome);
        }

        self.db
            .run_blocking(move |db| db.deactivate_mod_action(action_id))
            .await?;
        Ok(outcome)
    }

    async fn lift(&self, guild_id: u64, user_id: u64, action_type: ActionType) -> ExpiryOutcome {
        match action_type {
            ActionType::Mute => self.lift_mute(guild_id, user_id).await,
            ActionType::Ban => self.lift_ban(guild_id, user_id).await,
            ActionType::Warn => ExpiryOutcome::Lifted,
        }
    }

    async fn lift_mute(&self, guild_id: u64, user_id: u64) -> ExpiryOutcome {
        let Some(role_id) = self.mute_role_id else {
            warn!(
                "Mute of user {} expired but no mute role is configured",
                user_id
            );
            return ExpiryOutcome::LiftFailed;
        };

        match self.gateway.member_has_role(guild_id, user_id, role_id).await {
            Ok(true) => {}
            Ok(false) => return ExpiryOutcome::RoleAlreadyRemoved,
            Err(GatewayError::NotFound(_)) => {
                debug!("User {} left guild {} before their mute expired", user_id, guild_id);
                return ExpiryOutcome::TargetGone;
            }
            Err(e) => {
                warn!("Could not look up member {} for expired mute: {}", user_id, e);
                return ExpiryOutcome::LiftFailed;
            }
        }

        match self
            .gateway
            .remove_role(guild_id, user_id, role_id, "Mute expired")
            .await
        {
            Ok(()) => {
                info!("Unmuted user {} in guild {} (mute expired)", user_id, guild_id);
                ExpiryOutcome::Lifted
            }
            Err(GatewayError::NotFound(_)) => ExpiryOutcome::TargetGone,
            Err(e) => {
                error!("Failed to unmute user {}: {}", user_id, e);
                ExpiryOutcome::LiftFailed
            }
        }
    }

    async fn lift_ban(&self, guild_id: u64, user_id: u64) -> ExpiryOutcome {
        match self
            .gateway
            .unban(guild_id, user_id, "Temporary ban expired")
            .await
        {
            Ok(()) => {
                info!("Unbanned user {} in guild {} (ban expired)", user_id, guild_id);
                ExpiryOutcome::Lifted
            }
            Err(GatewayError::NotFound(_)) => {
                debug!("Ban of user {} in guild {} was already lifted", user_id, guild_id);
                ExpiryOutcome::TargetGone
            }
            Err(e) => {
                warn!("Failed to unban user {}: {}", user_id, e);
                ExpiryOutcome::LiftFailed
            }
        }
    }

    /// Lifts every active timed action already past due and schedules the
    /// rest.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StorageError> {
        let records = self
            .db
            .run_blocking(|db| db.list_active_timed_actions())
            .await?;

        let now = Utc::now();
        let mut report = ReconcileReport::default();
        for record in records {
            let Some(expires_at) = record.expires_at_utc() else {
                warn!(
                    "Action {} has an unreadable expiry {:?}; leaving it alone",
                    record.id, record.expires_at
                );
                continue;
            };

            if expires_at <= now {
                match self.resolve(record.id).await {
                    Ok(ExpiryOutcome::LiftFailed) => {
                        report.failed += 1;
                        self.schedule(&record);
                    }
                    Ok(outcome) => {
                        debug!("Resolved overdue action {}: {:?}", record.id, outcome);
                        report.resolved += 1;
                    }
                    Err(e) => {
                        error!("Failed to resolve overdue action {}: {}", record.id, e);
                        report.failed += 1;
                    }
                }
            } else if self.schedule(&record).is_some() {
                report.scheduled += 1;
            }
        }

        info!(
            "Expiry reconciliation: {} overdue actions resolved, {} rescheduled, {} failed",
            report.resolved, report.scheduled, report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automod::testing::{test_db, GatewayCall, MockGateway};
    use crate::db::NewModAction;
    use chrono::{DateTime, Duration};

    fn timed(db: &Database, action_type: ActionType, expires_at: DateTime<Utc>) -> i64 {
        db.insert_mod_action(&NewModAction {
            user_id: 42,
            guild_id: 7,
            moderator_id: 1,
            action_type,
            reason: "test".to_string(),
            expires_at: Some(expires_at),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_mute_removes_role() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        gateway.give_role(7, 42, 500);
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), Some(500));
        let id = timed(&db, ActionType::Mute, Utc::now() - Duration::minutes(1));

        assert_eq!(scheduler.resolve(id).await.unwrap(), ExpiryOutcome::Lifted);
        assert!(gateway
            .calls()
            .contains(&GatewayCall::RemoveRole { guild_id: 7, user_id: 42, role_id: 500 }));
        assert!(!db.get_mod_action(id).unwrap().unwrap().active);

        // Already closed
        assert_eq!(
            scheduler.resolve(id).await.unwrap(),
            ExpiryOutcome::AlreadyInactive
        );
    }

    #[tokio::test]
    async fn test_manually_removed_role_is_noop() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), Some(500));
        let id = timed(&db, ActionType::Mute, Utc::now());

        assert_eq!(
            scheduler.resolve(id).await.unwrap(),
            ExpiryOutcome::RoleAlreadyRemoved
        );
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::RemoveRole { .. })));
        assert!(!db.get_mod_action(id).unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_failed_unban_keeps_record_active() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        gateway.fail_on("unban");
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), None);
        let id = timed(&db, ActionType::Ban, Utc::now());

        assert_eq!(scheduler.resolve(id).await.unwrap(), ExpiryOutcome::LiftFailed);
        assert!(db.get_mod_action(id).unwrap().unwrap().active);
        // Still picked up by the next reconciliation
        assert_eq!(db.list_active_timed_actions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_member_lookup_failure_keeps_mute_active() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        gateway.give_role(7, 42, 500);
        gateway.fail_on("member_has_role");
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), Some(500));
        let id = timed(&db, ActionType::Mute, Utc::now());

        assert_eq!(scheduler.resolve(id).await.unwrap(), ExpiryOutcome::LiftFailed);
        assert!(db.get_mod_action(id).unwrap().unwrap().active);
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::RemoveRole { .. })));
    }

    #[tokio::test]
    async fn test_missing_ban_closes_record() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        gateway.missing_on("unban");
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), None);
        let id = timed(&db, ActionType::Ban, Utc::now());

        assert_eq!(scheduler.resolve(id).await.unwrap(), ExpiryOutcome::TargetGone);
        assert!(!db.get_mod_action(id).unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_departed_member_closes_mute() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        gateway.missing_on("member_has_role");
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), Some(500));
        let id = timed(&db, ActionType::Mute, Utc::now());

        assert_eq!(scheduler.resolve(id).await.unwrap(), ExpiryOutcome::TargetGone);
        assert!(!db.get_mod_action(id).unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_unrecorded_mute_is_lifted() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        gateway.give_role(7, 42, 500);
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), Some(500));

        scheduler
            .schedule_at(7, 42, ActionType::Mute, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::RemoveRole { guild_id: 7, user_id: 42, role_id: 500 }]
        );
    }

    #[tokio::test]
    async fn test_reconcile_resolves_overdue_and_schedules_rest() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), Some(500));

        let overdue = timed(&db, ActionType::Ban, Utc::now() - Duration::hours(1));
        let pending = timed(&db, ActionType::Mute, Utc::now() + Duration::hours(5));

        let report = scheduler.reconcile().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport { resolved: 1, scheduled: 1, failed: 0 }
        );
        assert!(gateway
            .calls()
            .contains(&GatewayCall::Unban { guild_id: 7, user_id: 42 }));
        assert!(!db.get_mod_action(overdue).unwrap().unwrap().active);
        assert!(db.get_mod_action(pending).unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_scheduled_task_fires() {
        let db = test_db();
        let gateway = Arc::new(MockGateway::default());
        let scheduler = ExpiryScheduler::new(db.clone(), gateway.clone(), None);
        let id = timed(&db, ActionType::Ban, Utc::now());
        let record = db.get_mod_action(id).unwrap().unwrap();

        let handle = scheduler.schedule(&record).unwrap();
        handle.await.unwrap();
        assert!(!db.get_mod_action(id).unwrap().unwrap().active);
        assert_eq!(gateway.calls(), vec![GatewayCall::Unban { guild_id: 7, user_id: 42 }]);
    }
}
