use crate::automod::RuleKind;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use serde_json::Value;
use tracing::info;

/// Manage auto-moderation
#[poise::command(
    slash_command,
    subcommands(
        "status",
        "enable",
        "disable",
        "configure",
        "exception",
        "violations",
        "clear"
    ),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Parses a rule name, telling the caller which names exist when it fails.
async fn parse_rule(ctx: Context<'_>, name: &str) -> Result<Option<RuleKind>, Error> {
    match name.parse::<RuleKind>() {
        Ok(kind) => Ok(Some(kind)),
        Err(e) => {
            let known: Vec<&str> = RuleKind::ALL.iter().map(|k| k.name()).collect();
            ctx.say(format!("❌ {}. Known rules: `{}`", e, known.join("`, `")))
                .await?;
            Ok(None)
        }
    }
}

/// Show the rules and their punishments for this server
#[poise::command(slash_command)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let automod = &ctx.data().automod;
    let set = automod.rules().for_guild(guild_id.get());

    let mut embed = serenity::CreateEmbed::new()
        .title("🛡️ Auto-moderation")
        .description(if automod.is_enabled() {
            "Auto-moderation is **active**."
        } else {
            "Auto-moderation is **disabled** for this bot."
        })
        .color(0x5865F2);

    for rule in set.iter() {
        let state = if rule.is_enabled() { "✅" } else { "⛔" };
        embed = embed.field(
            format!("{} `{}`", state, rule.name()),
            format!("{}\n{}", rule.description(), rule.punishments().ladder()),
            false,
        );
    }

    let config = &ctx.data().config;
    embed = embed
        .field(
            "Mute role",
            config
                .mute_role_id
                .map(|id| format!("<@&{}>", id))
                .unwrap_or_else(|| "Not set (mutes will fail)".to_string()),
            true,
        )
        .field(
            "Log channel",
            config
                .mod_log_channel_id
                .map(|id| format!("<#{}>", id))
                .unwrap_or_else(|| "Not set".to_string()),
            true,
        );

    let exceptions = automod.exceptions().list(guild_id.get()).await?;
    embed = embed.footer(serenity::CreateEmbedFooter::new(format!(
        "{} channel exception(s)",
        exceptions.len()
    )));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable a rule
#[poise::command(slash_command)]
pub async fn enable(
    ctx: Context<'_>,
    #[description = "spam, caps, links, bad_words, mention_spam, emote_spam or newline_spam"] rule: String,
) -> Result<(), Error> {
    set_rule_enabled(ctx, &rule, true).await
}

/// Disable a rule
#[poise::command(slash_command)]
pub async fn disable(
    ctx: Context<'_>,
    #[description = "spam, caps, links, bad_words, mention_spam, emote_spam or newline_spam"] rule: String,
) -> Result<(), Error> {
    set_rule_enabled(ctx, &rule, false).await
}

async fn set_rule_enabled(ctx: Context<'_>, rule: &str, enabled: bool) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let Some(kind) = parse_rule(ctx, rule).await? else {
        return Ok(());
    };

    let data = ctx.data();
    data.automod
        .rules()
        .set_enabled(&data.db, guild_id.get(), kind, enabled)
        .await?;

    info!(
        "{} {} automod rule {} in guild {}",
        ctx.author().name,
        if enabled { "enabled" } else { "disabled" },
        kind,
        guild_id
    );
    ctx.say(format!(
        "✅ Rule `{}` is now **{}**.",
        kind,
        if enabled { "enabled" } else { "disabled" }
    ))
    .await?;
    Ok(())
}

/// Change a rule's settings with a JSON object
#[poise::command(slash_command)]
pub async fn configure(
    ctx: Context<'_>,
    #[description = "spam, caps, links, bad_words, mention_spam, emote_spam or newline_spam"] rule: String,
    #[description = "Settings to change, e.g. {\"ratio\": 0.8}"] settings: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let Some(kind) = parse_rule(ctx, &rule).await? else {
        return Ok(());
    };

    let patch: Value = match serde_json::from_str(&settings) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            ctx.say("❌ Settings must be a JSON object.").await?;
            return Ok(());
        }
        Err(e) => {
            ctx.say(format!("❌ Invalid JSON: {}", e)).await?;
            return Ok(());
        }
    };

    let data = ctx.data();
    let merged = match data
        .automod
        .rules()
        .update_settings(&data.db, guild_id.get(), kind, &patch)
        .await
    {
        Ok(merged) => merged,
        Err(e) => {
            ctx.say(format!("❌ {}", e)).await?;
            return Ok(());
        }
    };

    let pretty = serde_json::to_string_pretty(&merged)?;
    ctx.say(format!("✅ Updated `{}`:\n```json\n{}\n```", kind, pretty))
        .await?;
    Ok(())
}

/// Manage per-channel rule exceptions
#[poise::command(
    slash_command,
    subcommands("exception_add", "exception_remove", "exception_list")
)]
pub async fn exception(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Stop enforcing a rule in a channel
#[poise::command(slash_command, rename = "add")]
pub async fn exception_add(
    ctx: Context<'_>,
    #[description = "Channel to exempt"] channel: serenity::GuildChannel,
    #[description = "spam, caps, links, bad_words, mention_spam, emote_spam or newline_spam"] rule: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let Some(kind) = parse_rule(ctx, &rule).await? else {
        return Ok(());
    };

    let added = ctx
        .data()
        .automod
        .exceptions()
        .add(guild_id.get(), channel.id.get(), kind, ctx.author().id.get())
        .await?;

    if added {
        ctx.say(format!("✅ <#{}> is now exempt from `{}`.", channel.id, kind))
            .await?;
    } else {
        ctx.say(format!("ℹ️ <#{}> was already exempt from `{}`.", channel.id, kind))
            .await?;
    }
    Ok(())
}

/// Enforce a rule in a channel again
#[poise::command(slash_command, rename = "remove")]
pub async fn exception_remove(
    ctx: Context<'_>,
    #[description = "Channel to enforce again"] channel: serenity::GuildChannel,
    #[description = "spam, caps, links, bad_words, mention_spam, emote_spam or newline_spam"] rule: String,
) -> Result<(), Error> {
    let Some(kind) = parse_rule(ctx, &rule).await? else {
        return Ok(());
    };

    let removed = ctx
        .data()
        .automod
        .exceptions()
        .remove(channel.id.get(), kind)
        .await?;

    if removed {
        ctx.say(format!("✅ `{}` applies to <#{}> again.", kind, channel.id))
            .await?;
    } else {
        ctx.say(format!("ℹ️ <#{}> had no exception for `{}`.", channel.id, kind))
            .await?;
    }
    Ok(())
}

/// List channel exceptions in this server
#[poise::command(slash_command, rename = "list")]
pub async fn exception_list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let exceptions = ctx.data().automod.exceptions().list(guild_id.get()).await?;

    if exceptions.is_empty() {
        ctx.say("📭 No channel exceptions.").await?;
        return Ok(());
    }

    let lines: Vec<String> = exceptions
        .iter()
        .map(|e| {
            format!(
                "<#{}> · `{}` · added by <@{}> at {}",
                e.channel_id, e.rule_name, e.moderator_id, e.created_at
            )
        })
        .collect();

    let embed = serenity::CreateEmbed::new()
        .title("Channel exceptions")
        .description(lines.join("\n"))
        .color(0x5865F2);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show a member's active violation counts
#[poise::command(slash_command)]
pub async fn violations(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let automod = &ctx.data().automod;
    let counts = automod.ledger().counts_for_user(guild_id.get(), user.id.get());

    if counts.is_empty() {
        ctx.say(format!("✅ {} has no active violations.", user.name))
            .await?;
        return Ok(());
    }

    let set = automod.rules().for_guild(guild_id.get());
    let mut embed = serenity::CreateEmbed::new()
        .title(format!("Violations for {}", user.name))
        .color(0xE67E22);
    for (kind, count) in counts {
        let next = set.get(kind).punishment_for(count + 1);
        embed = embed.field(
            format!("`{}`", kind),
            format!("{} active · next: {}", count, next.describe()),
            true,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Reset a member's violations for a rule
#[poise::command(slash_command)]
pub async fn clear(
    ctx: Context<'_>,
    #[description = "Member to reset"] user: serenity::User,
    #[description = "spam, caps, links, bad_words, mention_spam, emote_spam or newline_spam"] rule: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let Some(kind) = parse_rule(ctx, &rule).await? else {
        return Ok(());
    };

    let cleared = ctx
        .data()
        .automod
        .ledger()
        .clear(guild_id.get(), user.id.get(), kind)
        .await?;

    ctx.say(format!(
        "🧹 Cleared {} `{}` violation(s) for {}.",
        cleared, kind, user.name
    ))
    .await?;
    Ok(())
}
