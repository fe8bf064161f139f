use thiserror::Error;

use crate::ports::BoxFuture;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GuildError {
    #[error("guild unavailable: {0}")]
    Unavailable(String),
    #[error("guild request timed out")]
    Timeout,
    #[error("guild rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("guild member not found: {0}")]
    MemberNotFound(String),
}

/// Server the bot operates in. Publishing and badge changes all need it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildContext {
    pub guild_id: String,
    pub badge_role_id: String,
}

/// Resolved announcement target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub channel_id: String,
}

/// Messaging and role management on the chat platform.
pub trait GuildGateway: Send + Sync {
    fn guild_context(&self) -> BoxFuture<'_, Result<Option<GuildContext>, GuildError>>;

    /// Works without a guild context; the channel is looked up directly.
    fn resolve_announce_destination(&self) -> BoxFuture<'_, Result<Destination, GuildError>>;

    fn publish(
        &self,
        destination: &Destination,
        content: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>>;

    fn list_badge_holders(&self, guild: &GuildContext)
    -> BoxFuture<'_, Result<Vec<String>, GuildError>>;

    fn remove_badge(
        &self,
        guild: &GuildContext,
        user_id: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>>;

    fn grant_badge(
        &self,
        guild: &GuildContext,
        user_id: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>>;
}
