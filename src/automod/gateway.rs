use crate::error::GatewayError;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Embed colours for mod-log entries.
pub const LOG_COLOR_WARN: u32 = 0xF1C40F;
pub const LOG_COLOR_MUTE: u32 = 0xE67E22;
pub const LOG_COLOR_BAN: u32 = 0xE74C3C;
pub const LOG_COLOR_INFO: u32 = 0x95A5A6;

/// A summary posted to the moderators' log channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub title: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
    pub color: u32,
}

/// Every Discord-side effect the moderation subsystem performs.
#[async_trait]
pub trait ModerationGateway: Send + Sync {
    async fn add_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError>;

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError>;

    async fn member_has_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<bool, GatewayError>;

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), GatewayError>;

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), GatewayError>;

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), GatewayError>;

    async fn notify_user(&self, user_id: u64, content: &str) -> Result<(), GatewayError>;

    async fn post_log(&self, channel_id: u64, entry: &LogEntry) -> Result<(), GatewayError>;
}

/// Discord answers 404 for unknown members, users, bans and messages.
fn classify(error: serenity::Error) -> GatewayError {
    if let serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)) = &error {
        if response.status_code.as_u16() == 404 {
            return GatewayError::NotFound(response.error.message.clone());
        }
    }
    GatewayError::Discord(error)
}

pub struct SerenityGateway {
    http: Arc<serenity::Http>,
}

impl SerenityGateway {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ModerationGateway for SerenityGateway {
    async fn add_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.http
            .add_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                serenity::RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.http
            .remove_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                serenity::RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn member_has_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<bool, GatewayError> {
        let member = self
            .http
            .get_member(serenity::GuildId::new(guild_id), serenity::UserId::new(user_id))
            .await
            .map_err(classify)?;
        Ok(member.roles.contains(&serenity::RoleId::new(role_id)))
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), GatewayError> {
        serenity::GuildId::new(guild_id)
            .ban_with_reason(&self.http, serenity::UserId::new(user_id), 0, reason)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), GatewayError> {
        self.http
            .remove_ban(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                Some(reason),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), GatewayError> {
        self.http
            .delete_message(
                serenity::ChannelId::new(channel_id),
                serenity::MessageId::new(message_id),
                Some("Auto-moderation"),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn notify_user(&self, user_id: u64, content: &str) -> Result<(), GatewayError> {
        serenity::UserId::new(user_id)
            .direct_message(&self.http, serenity::CreateMessage::new().content(content))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn post_log(&self, channel_id: u64, entry: &LogEntry) -> Result<(), GatewayError> {
        let mut embed = serenity::CreateEmbed::new()
            .title(&entry.title)
            .description(&entry.description)
            .color(entry.color)
            .timestamp(serenity::Timestamp::now());
        for (name, value) in &entry.fields {
            embed = embed.field(name, value, true);
        }

        serenity::ChannelId::new(channel_id)
            .send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await
            .map_err(classify)?;
        Ok(())
    }
}
