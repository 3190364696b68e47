use niludetsu::automod::{
    AutoMod, ExceptionRegistry, ExpiryScheduler, InboundMessage, ModerationGateway,
    PunishmentApplier, RuleBook, SerenityGateway, ViolationLedger,
};
use niludetsu::commands::{admin, automod};
use niludetsu::{cache::ContentCache, config::Config, db::Database, Data, Error};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();
    let owners = config
        .owner_id
        .map(|id| std::iter::once(serenity::UserId::new(id)).collect())
        .unwrap_or_default();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![automod::automod(), admin::shutdown()],
            owners,
            event_handler: |_ctx, event, _framework, data| {
                Box::pin(async move { handle_event(event, data).await })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);
                let bot_id = ready.user.id.get();

                let db = Database::new(&config)?;
                db.execute_init()?;

                let gateway: Arc<dyn ModerationGateway> =
                    Arc::new(SerenityGateway::new(ctx.http.clone()));
                let scheduler =
                    ExpiryScheduler::new(db.clone(), gateway.clone(), config.mute_role_id);
                let applier = PunishmentApplier::new(
                    db.clone(),
                    gateway.clone(),
                    scheduler.clone(),
                    config.mute_role_id,
                    config.automod_notify_users,
                );

                let rules = RuleBook::new(config.load_rule_defaults());
                rules.load(&db).await?;
                let ledger = ViolationLedger::load(db.clone()).await?;
                let exceptions = ExceptionRegistry::load(db.clone()).await?;

                if let Err(e) = scheduler.reconcile().await {
                    error!("Failed to reconcile pending mute/ban expiries: {}", e);
                }

                let automod = AutoMod::new(
                    Arc::new(rules),
                    Arc::new(ledger),
                    Arc::new(exceptions),
                    Arc::new(applier),
                    gateway,
                    bot_id,
                    config.mod_log_channel_id,
                    config.automod_enabled,
                );
                if !config.automod_enabled {
                    info!("Auto-moderation is disabled by configuration");
                }

                if config.register_commands {
                    match config.dev_guild_id {
                        Some(guild_id) => {
                            poise::builtins::register_in_guild(
                                ctx,
                                &framework.options().commands,
                                serenity::GuildId::new(guild_id),
                            )
                            .await?;
                            info!("Registered commands in guild {}", guild_id);
                        }
                        None => {
                            poise::builtins::register_globally(ctx, &framework.options().commands)
                                .await?;
                            info!("Registered commands globally");
                        }
                    }
                }

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                let cache = ContentCache::new(config.message_cache_size);
                Ok(Data {
                    config,
                    db,
                    automod: Arc::new(automod),
                    cache,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn handle_event(event: &serenity::FullEvent, data: &Data) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if new_message.author.bot || new_message.guild_id.is_none() {
                return Ok(());
            }
            data.cache.insert(new_message.id.get(), &new_message.content);

            let inbound = InboundMessage {
                message_id: new_message.id.get(),
                channel_id: new_message.channel_id.get(),
                guild_id: new_message.guild_id.map(|id| id.get()),
                author_id: new_message.author.id.get(),
                author_is_bot: new_message.author.bot,
                content: new_message.content.clone(),
                sent_at: chrono::DateTime::from_timestamp(new_message.timestamp.unix_timestamp(), 0)
                    .unwrap_or_else(chrono::Utc::now),
            };
            data.automod.process_message(&inbound).await;
        }
        serenity::FullEvent::MessageUpdate {
            old_if_available,
            new,
            event,
        } => {
            // Partial updates (embed refreshes) carry no content.
            let Some(content) = new
                .as_ref()
                .map(|m| m.content.clone())
                .or_else(|| event.content.clone())
            else {
                return Ok(());
            };
            let Some(author) = new
                .as_ref()
                .map(|m| m.author.clone())
                .or_else(|| event.author.clone())
            else {
                return Ok(());
            };
            if author.bot || event.guild_id.is_none() {
                return Ok(());
            }

            let cached = data.cache.replace(event.id.get(), &content);
            let previous = old_if_available
                .as_ref()
                .map(|m| m.content.clone())
                .or(cached);

            let sent_at = event
                .edited_timestamp
                .map(|ts| ts.unix_timestamp())
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(chrono::Utc::now);

            let inbound = InboundMessage {
                message_id: event.id.get(),
                channel_id: event.channel_id.get(),
                guild_id: event.guild_id.map(|id| id.get()),
                author_id: author.id.get(),
                author_is_bot: author.bot,
                content,
                sent_at,
            };
            data.automod
                .process_edit(previous.as_deref(), &inbound)
                .await;
        }
        serenity::FullEvent::MessageDelete {
            deleted_message_id, ..
        } => {
            data.cache.remove(deleted_message_id.get());
        }
        _ => {}
    }
    Ok(())
}
