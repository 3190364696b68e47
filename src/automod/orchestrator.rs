use crate::automod::applier::{Applied, PunishmentApplier, PunishmentTarget};
use crate::automod::exceptions::ExceptionRegistry;
use crate::automod::gateway::{
    LogEntry, ModerationGateway, LOG_COLOR_BAN, LOG_COLOR_INFO, LOG_COLOR_MUTE, LOG_COLOR_WARN,
};
use crate::automod::ledger::ViolationLedger;
use crate::automod::punishment::Punishment;
use crate::automod::rules::{RuleBook, RuleKind};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A message (or edited message) as seen by auto-moderation.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author_id: u64,
    pub author_is_bot: bool,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationOutcome {
    /// Not eligible: bot author, DM, unchanged edit, or automod disabled.
    Ignored,
    Clean,
    Violation {
        rule: RuleKind,
        count: u32,
        punishment: Punishment,
        applied: bool,
    },
}

pub struct AutoMod {
    rules: Arc<RuleBook>,
    ledger: Arc<ViolationLedger>,
    exceptions: Arc<ExceptionRegistry>,
    applier: Arc<PunishmentApplier>,
    gateway: Arc<dyn ModerationGateway>,
    bot_id: u64,
    log_channel_id: Option<u64>,
    enabled: bool,
}

impl AutoMod {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Arc<RuleBook>,
        ledger: Arc<ViolationLedger>,
        exceptions: Arc<ExceptionRegistry>,
        applier: Arc<PunishmentApplier>,
        gateway: Arc<dyn ModerationGateway>,
        bot_id: u64,
        log_channel_id: Option<u64>,
        enabled: bool,
    ) -> Self {
        Self {
            rules,
            ledger,
            exceptions,
            applier,
            gateway,
            bot_id,
            log_channel_id,
            enabled,
        }
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    pub fn ledger(&self) -> &ViolationLedger {
        &self.ledger
    }

    pub fn exceptions(&self) -> &ExceptionRegistry {
        &self.exceptions
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn process_message(&self, message: &InboundMessage) -> ModerationOutcome {
        let Some(guild_id) = message.guild_id else {
            return ModerationOutcome::Ignored;
        };
        if !self.enabled || message.author_is_bot || message.author_id == self.bot_id {
            return ModerationOutcome::Ignored;
        }

        let set = self.rules.for_guild(guild_id);
        let matched = set.first_match(
            &message.content,
            message.author_id,
            message.sent_at,
            |kind| self.exceptions.is_exempt(message.channel_id, kind),
        );
        let Some(rule) = matched else {
            return ModerationOutcome::Clean;
        };

        let kind = rule.kind();
        info!(
            "Automod: rule {} matched message {} from user {} in channel {} (guild {})",
            kind, message.message_id, message.author_id, message.channel_id, guild_id
        );

        // A failed ledger write still punishes, using the count before this violation.
        let count = match self.ledger.record(guild_id, message.author_id, kind).await {
            Ok(count) => count,
            Err(_) => self.ledger.count(guild_id, message.author_id, kind),
        };
        let punishment = rule.punishment_for(count);

        let reason = format!("Auto-moderation: {}", kind.description());
        let target = PunishmentTarget {
            guild_id,
            user_id: message.author_id,
            moderator_id: self.bot_id,
            reason: &reason,
            rule_name: Some(kind.name()),
        };
        let result = self.applier.apply(target, punishment).await;
        if let Err(e) = &result {
            error!(
                "Automod: failed to apply {} to user {} for rule {}: {}",
                punishment, message.author_id, kind, e
            );
        }

        if let Err(e) = self
            .gateway
            .delete_message(message.channel_id, message.message_id)
            .await
        {
            debug!(
                "Automod: could not delete message {}: {}",
                message.message_id, e
            );
        }

        let entry = violation_log(message, kind, count, punishment, &result);
        self.post_log(&entry).await;

        ModerationOutcome::Violation {
            rule: kind,
            count,
            punishment,
            applied: result.is_ok(),
        }
    }

    /// Edits are moderated like new messages, unless the text is unchanged.
    pub async fn process_edit(
        &self,
        previous_content: Option<&str>,
        message: &InboundMessage,
    ) -> ModerationOutcome {
        if previous_content == Some(message.content.as_str()) {
            debug!(
                "Automod: ignoring edit of message {} with unchanged content",
                message.message_id
            );
            return ModerationOutcome::Ignored;
        }
        self.process_message(message).await
    }

    async fn post_log(&self, entry: &LogEntry) {
        let Some(channel_id) = self.log_channel_id else {
            return;
        };
        if let Err(e) = self.gateway.post_log(channel_id, entry).await {
            warn!("Automod: could not post to mod log channel {}: {}", channel_id, e);
        }
    }
}

fn violation_log(
    message: &InboundMessage,
    kind: RuleKind,
    count: u32,
    punishment: Punishment,
    result: &Result<Applied, crate::error::ApplierError>,
) -> LogEntry {
    let (outcome, color) = match result {
        Ok(_) => (
            "Applied".to_string(),
            match punishment {
                Punishment::Warn => LOG_COLOR_WARN,
                Punishment::Mute(_) => LOG_COLOR_MUTE,
                Punishment::Ban(_) => LOG_COLOR_BAN,
            },
        ),
        Err(e) => (format!("Failed: {}", e), LOG_COLOR_INFO),
    };

    LogEntry {
        title: format!("Auto-moderation: {}", kind.name()),
        description: truncate(&message.content, 1000),
        fields: vec![
            ("User".to_string(), format!("<@{}>", message.author_id)),
            ("Channel".to_string(), format!("<#{}>", message.channel_id)),
            ("Violations".to_string(), count.to_string()),
            ("Punishment".to_string(), punishment.describe()),
            ("Outcome".to_string(), outcome),
        ],
        color,
    }
}

fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut out: String = content.chars().take(max_chars).collect();
    out.push('…');
    out
}
