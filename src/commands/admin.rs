use crate::{Context, Error};
use tracing::{info, warn};

/// Stop the bot; pending mute and ban expiries resume on the next start
#[poise::command(slash_command, owners_only, hide_in_help)]
pub async fn shutdown(ctx: Context<'_>) -> Result<(), Error> {
    let pending = match ctx
        .data()
        .db
        .run_blocking(|db| db.list_active_timed_actions())
        .await
    {
        Ok(actions) => actions.len(),
        Err(e) => {
            warn!("Could not count pending expiries before shutdown: {}", e);
            0
        }
    };

    info!(
        "Shutdown requested by {} ({} timed actions pending)",
        ctx.author().id,
        pending
    );
    ctx.say(format!(
        "👋 Stopping. {} timed mute/ban expiries will be reconciled on the next start.",
        pending
    ))
    .await?;
    ctx.framework().shard_manager().shutdown_all().await;
    Ok(())
}
