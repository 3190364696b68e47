use crate::automod::rules::RuleKind;
use crate::db::Database;
use crate::error::StorageError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

type LedgerKey = (u64, u64, RuleKind);

/// Active violation counts per (guild, user, rule), cached in memory in
/// front of the `automod_violations` table.
///
/// The cache only moves after a successful write, so it never runs ahead of
/// storage. Reads never touch the database.
pub struct ViolationLedger {
    db: Database,
    counts: Mutex<HashMap<LedgerKey, u32>>,
}

impl ViolationLedger {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a ledger primed from storage.
    pub async fn load(db: Database) -> Result<Self, StorageError> {
        let ledger = Self::new(db);
        let loaded = ledger.refresh().await?;
        info!("Violation ledger primed with {} active counters", loaded);
        Ok(ledger)
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<LedgerKey, u32>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the cache with the current aggregate from storage.
    pub async fn refresh(&self) -> Result<usize, StorageError> {
        let rows = self
            .db
            .run_blocking(|db| db.active_violation_counts())
            .await?;

        let mut fresh = HashMap::new();
        for row in rows {
            match row.rule_name.parse::<RuleKind>() {
                Ok(kind) => {
                    fresh.insert((row.guild_id, row.user_id, kind), row.count);
                }
                Err(_) => debug!("Ignoring violations for unknown rule '{}'", row.rule_name),
            }
        }
        let loaded = fresh.len();
        *self.counts() = fresh;
        Ok(loaded)
    }

    pub fn count(&self, guild_id: u64, user_id: u64, kind: RuleKind) -> u32 {
        self.counts()
            .get(&(guild_id, user_id, kind))
            .copied()
            .unwrap_or(0)
    }

    /// Non-zero counters for a user, in rule registration order.
    pub fn counts_for_user(&self, guild_id: u64, user_id: u64) -> Vec<(RuleKind, u32)> {
        let counts = self.counts();
        RuleKind::ALL
            .into_iter()
            .filter_map(|kind| {
                counts
                    .get(&(guild_id, user_id, kind))
                    .copied()
                    .filter(|c| *c > 0)
                    .map(|c| (kind, c))
            })
            .collect()
    }

    /// Appends a violation and returns the new active count. On a failed
    /// write the counter is left untouched.
    pub async fn record(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: RuleKind,
    ) -> Result<u32, StorageError> {
        let rule_name = kind.name();
        if let Err(e) = self
            .db
            .run_blocking(move |db| db.insert_violation(guild_id, user_id, rule_name))
            .await
        {
            warn!(
                "Failed to record {} violation for user {} in guild {}: {}",
                kind, user_id, guild_id, e
            );
            return Err(e);
        }

        let mut counts = self.counts();
        let entry = counts.entry((guild_id, user_id, kind)).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    /// Deactivates a user's violations for one rule and resets the counter.
    pub async fn clear(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: RuleKind,
    ) -> Result<usize, StorageError> {
        let rule_name = kind.name();
        let cleared = self
            .db
            .run_blocking(move |db| db.deactivate_violations(guild_id, user_id, rule_name))
            .await?;
        self.counts().remove(&(guild_id, user_id, kind));
        info!(
            "Cleared {} {} violations for user {} in guild {}",
            cleared, kind, user_id, guild_id
        );
        Ok(cleared)
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

    #[tokio::test]
    async fn test_record_increments() {
        let ledger = ViolationLedger::new(test_db());
        assert_eq!(ledger.count(7, 42, RuleKind::Caps), 0);
        assert_eq!(ledger.record(7, 42, RuleKind::Caps).await.unwrap(), 1);
        assert_eq!(ledger.record(7, 42, RuleKind::Caps).await.unwrap(), 2);
        assert_eq!(ledger.record(7, 42, RuleKind::Links).await.unwrap(), 1);
        assert_eq!(ledger.count(7, 42, RuleKind::Caps), 2);
        assert_eq!(ledger.count(8, 42, RuleKind::Caps), 0);
        assert_eq!(
            ledger.counts_for_user(7, 42),
            vec![(RuleKind::Caps, 2), (RuleKind::Links, 1)]
        );
    }

    #[tokio::test]
    async fn test_load_from_storage() {
        let db = test_db();
        db.insert_violation(7, 42, "spam").unwrap();
        db.insert_violation(7, 42, "spam").unwrap();
        db.insert_violation(7, 42, "retired_rule").unwrap();

        let ledger = ViolationLedger::load(db).await.unwrap();
        assert_eq!(ledger.count(7, 42, RuleKind::Spam), 2);
        assert_eq!(ledger.record(7, 42, RuleKind::Spam).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_counter() {
        let db = test_db();
        let ledger = ViolationLedger::new(db.clone());
        ledger.record(7, 42, RuleKind::Caps).await.unwrap();

        db.run_blocking(|db| {
            db.conn()?.execute_batch("DROP TABLE automod_violations")?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(ledger.record(7, 42, RuleKind::Caps).await.is_err());
        assert_eq!(ledger.count(7, 42, RuleKind::Caps), 1);
    }

    #[tokio::test]
    async fn test_clear_resets() {
        let db = test_db();
        let ledger = ViolationLedger::new(db.clone());
        ledger.record(7, 42, RuleKind::Caps).await.unwrap();
        ledger.record(7, 42, RuleKind::Caps).await.unwrap();

        assert_eq!(ledger.clear(7, 42, RuleKind::Caps).await.unwrap(), 2);
        assert_eq!(ledger.count(7, 42, RuleKind::Caps), 0);
        assert_eq!(db.active_violation_count(7, 42, "caps").unwrap(), 0);
        assert_eq!(ledger.record(7, 42, RuleKind::Caps).await.unwrap(), 1);
    }
}
