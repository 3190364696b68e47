pub mod admin;
pub mod automod;
