pub mod automod;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub automod: std::sync::Arc<automod::AutoMod>,
    /// Recent message content, for telling real edits from embed refreshes
    pub cache: cache::ContentCache,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
