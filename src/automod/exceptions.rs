use crate::automod::rules::RuleKind;
use crate::db::{Database, ExceptionRecord};
use crate::error::StorageError;
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Standing per-channel opt-outs from individual rules.
///
/// Lookups are served from memory. Mutations update memory first, so an
/// exception a moderator just added holds for the rest of the process even
/// if the write failed.
pub struct ExceptionRegistry {
    db: Database,
    exempt: RwLock<HashSet<(u64, RuleKind)>>,
}

impl ExceptionRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            exempt: RwLock::new(HashSet::new()),
        }
    }

    pub async fn load(db: Database) -> Result<Self, StorageError> {
        let registry = Self::new(db);
        let loaded = registry.refresh().await?;
        info!("Loaded {} automod channel exceptions", loaded);
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashSet<(u64, RuleKind)>> {
        self.exempt.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<(u64, RuleKind)>> {
        self.exempt.write().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn refresh(&self) -> Result<usize, StorageError> {
        let rows = self
            .db
            .run_blocking(|db| db.list_active_exceptions(None))
            .await?;

        let fresh: HashSet<(u64, RuleKind)> = rows
            .into_iter()
            .filter_map(|row| match row.rule_name.parse::<RuleKind>() {
                Ok(kind) => Some((row.channel_id, kind)),
                Err(_) => {
                    debug!(
                        "Ignoring exception for unknown rule '{}' in channel {}",
                        row.rule_name, row.channel_id
                    );
                    None
                }
            })
            .collect();
        let loaded = fresh.len();
        *self.write() = fresh;
        Ok(loaded)
    }

    pub fn is_exempt(&self, channel_id: u64, kind: RuleKind) -> bool {
        self.read().contains(&(channel_id, kind))
    }

    /// Adds an exception. Returns `false` if the channel was already exempt.
    pub async fn add(
        &self,
        guild_id: u64,
        channel_id: u64,
        kind: RuleKind,
        moderator_id: u64,
    ) -> Result<bool, StorageError> {
        self.write().insert((channel_id, kind));

        let rule_name = kind.name();
        let inserted = self
            .db
            .run_blocking(move |db| db.add_exception(guild_id, channel_id, rule_name, moderator_id))
            .await
            .map_err(|e| {
                warn!(
                    "Failed to persist {} exception for channel {}: {}",
                    kind, channel_id, e
                );
                e
            })?;

        if inserted {
            info!("Channel {} is now exempt from rule {}", channel_id, kind);
        }
        Ok(inserted)
    }

    /// Removes an exception. Returns whether an active one existed.
    pub async fn remove(&self, channel_id: u64, kind: RuleKind) -> Result<bool, StorageError> {
        let was_cached = self.write().remove(&(channel_id, kind));

        let rule_name = kind.name();
        let removed = self
            .db
            .run_blocking(move |db| db.deactivate_exception(channel_id, rule_name))
            .await
            .map_err(|e| {
                warn!(
                    "Failed to persist removal of {} exception for channel {}: {}",
                    kind, channel_id, e
                );
                e
            })?;

        if removed > 0 {
            info!("Channel {} is no longer exempt from rule {}", channel_id, kind);
        }
        Ok(was_cached || removed > 0)
    }

    pub async fn list(&self, guild_id: u64) -> Result<Vec<ExceptionRecord>, StorageError> {
        self.db
            .run_blocking(move |db| db.list_active_exceptions(Some(guild_id)))
            .await
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
    async fn test_add_is_idempotent() {
        let db = test_db();
        let registry = ExceptionRegistry::new(db.clone());

        assert!(registry.add(7, 100, RuleKind::Links, 1).await.unwrap());
        assert!(!registry.add(7, 100, RuleKind::Links, 1).await.unwrap());
        assert!(registry.is_exempt(100, RuleKind::Links));
        assert!(!registry.is_exempt(100, RuleKind::Caps));
        assert!(!registry.is_exempt(101, RuleKind::Links));

        let rows = registry.list(7).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rule_name, "links");
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ExceptionRegistry::new(test_db());
        registry.add(7, 100, RuleKind::Links, 1).await.unwrap();

        assert!(registry.remove(100, RuleKind::Links).await.unwrap());
        assert!(!registry.is_exempt(100, RuleKind::Links));
        assert!(!registry.remove(100, RuleKind::Links).await.unwrap());
        assert!(registry.list(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_unknown_rules() {
        let db = test_db();
        db.add_exception(7, 100, "links", 1).unwrap();
        db.add_exception(7, 100, "retired_rule", 1).unwrap();

        let registry = ExceptionRegistry::load(db).await.unwrap();
        assert!(registry.is_exempt(100, RuleKind::Links));
        assert_eq!(registry.refresh().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_still_exempts() {
        let db = test_db();
        let registry = ExceptionRegistry::new(db.clone());
        db.run_blocking(|db| {
            db.conn()?.execute_batch("DROP TABLE automod_exceptions")?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(registry.add(7, 100, RuleKind::Caps, 1).await.is_err());
        assert!(registry.is_exempt(100, RuleKind::Caps));
    }
}
