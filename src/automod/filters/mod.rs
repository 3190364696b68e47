//! Content inspection for each rule kind. A filter only answers "does this
//! message match"; enablement, exemptions and punishments live in
//! [`crate::automod::rules`].

pub mod caps;
pub mod flood;
pub mod links;
pub mod repetition;
pub mod words;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use caps::{CapsFilter, CapsSettings};
pub use flood::{FloodFilter, FloodKind, FloodSettings};
pub use links::{LinkFilter, LinkSettings};
pub use repetition::{similarity, RepetitionFilter, RepetitionSettings};
pub use words::{BannedWordFilter, BannedWordSettings};

pub trait ContentFilter: Send + Sync {
    fn matches(&self, content: &str, user_id: u64, at: DateTime<Utc>) -> bool;

    /// Current tunables as JSON.
    fn settings(&self) -> Value;

    /// Merges `patch` over the current tunables. Keys absent from the patch
    /// keep their value.
    fn update_settings(&self, patch: &Value) -> Result<(), serde_json::Error>;
}

/// Tunables shared behind a lock. Filters are pure functions of their
/// settings, so a poisoned lock still holds usable data.
pub(crate) struct Tunables<S> {
    inner: RwLock<S>,
}

impl<S: Serialize + DeserializeOwned + Clone> Tunables<S> {
    pub(crate) fn new(settings: S) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, S> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn to_json(&self) -> Value {
        serde_json::to_value(&*self.read()).unwrap_or(Value::Null)
    }

    pub(crate) fn merge(&self, patch: &Value) -> Result<(), serde_json::Error> {
        let mut current = serde_json::to_value(&*self.read())?;
        if let (Value::Object(base), Value::Object(patch)) = (&mut current, patch) {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
        } else if !patch.is_null() {
            current = patch.clone();
        }
        let merged: S = serde_json::from_value(current)?;
        *self.write() = merged;
        Ok(())
    }
}
