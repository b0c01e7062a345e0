pub mod access;
pub mod commands;
pub mod config;
pub mod data;
pub mod duration;
pub mod error;
pub mod grant;
pub mod handlers;
pub mod ledger;
pub mod logging;
pub mod persistence;
pub mod platform;

pub const BOT_NAME: &str = "moderation_warden";
pub const COMMAND_TARGET: &str = "moderation_warden::command";
pub const ERROR_TARGET: &str = "moderation_warden::error";
pub const EVENT_TARGET: &str = "moderation_warden::handlers";
pub const GRANT_TARGET: &str = "moderation_warden::grant";
pub const ACCESS_TARGET: &str = "moderation_warden::access";
pub const CONSOLE_TARGET: &str = "moderation_warden";

pub use data::{Data, DataInner};
pub use error::{ModerationError, ModerationResult};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
