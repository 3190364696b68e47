//! Auto-moderation: rule evaluation, escalating punishments, and the
//! bookkeeping behind them.

pub mod applier;
pub mod exceptions;
pub mod filters;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod punishment;
pub mod rules;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use applier::{Applied, PunishmentApplier, PunishmentTarget};
pub use exceptions::ExceptionRegistry;
pub use gateway::{LogEntry, ModerationGateway, SerenityGateway};
pub use ledger::ViolationLedger;
pub use orchestrator::{AutoMod, InboundMessage, ModerationOutcome};
pub use punishment::{Punishment, PunishmentTable};
pub use rules::{Rule, RuleBook, RuleKind, RuleSet};
pub use scheduler::{ExpiryOutcome, ExpiryScheduler, ReconcileReport};
