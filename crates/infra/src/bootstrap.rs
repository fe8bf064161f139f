//! Backend selection shared by the API and the worker.

use std::sync::Arc;

use anyhow::Context;
use chatrank_domain::cache::InMemoryCacheStore;
use chatrank_domain::ports::cache::CacheStore;
use chatrank_domain::ports::guild::{GuildContext, GuildGateway};
use chatrank_domain::ports::snapshots::SnapshotRepository;
use chatrank_domain::ports::stats::StatsRepository;

use crate::cache::RedisCacheStore;
use crate::config::AppConfig;
use crate::db::{DbConfig, connect_lazy};
use crate::discord::{DiscordConfig, DiscordGateway};
use crate::guild::InMemoryGuildGateway;
use crate::repositories::{
    InMemorySnapshotRepository, InMemoryStatsRepository, PostgresSnapshotRepository,
    PostgresStatsRepository,
};

pub struct Repositories {
    pub stats: Arc<dyn StatsRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
}

pub fn repositories(config: &AppConfig) -> anyhow::Result<Repositories> {
    if !config.uses_postgres() {
        tracing::warn!(backend = %config.data_backend, "using in-memory repositories");
        return Ok(Repositories {
            stats: Arc::new(InMemoryStatsRepository::new(config.reporting_offset())),
            snapshots: Arc::new(InMemorySnapshotRepository::new()),
        });
    }

    let db = DbConfig::from_app_config(config);
    let pool = connect_lazy(&db).context("invalid database configuration")?;
    Ok(Repositories {
        stats: Arc::new(PostgresStatsRepository::new(
            pool.clone(),
            db.timeout,
            config.reporting_offset(),
        )),
        snapshots: Arc::new(PostgresSnapshotRepository::new(pool, db.timeout)),
    })
}

pub async fn cache_store(config: &AppConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    if !config.uses_postgres() {
        return Ok(Arc::new(InMemoryCacheStore::new(config.cache_prefix.clone())));
    }
    let store = RedisCacheStore::connect(
        &config.redis_url,
        config.cache_prefix.clone(),
        config.upstream_timeout(),
    )
    .await
    .context("failed to connect to redis")?;
    Ok(Arc::new(store))
}

pub fn guild_gateway(config: &AppConfig) -> Arc<dyn GuildGateway> {
    let discord = DiscordConfig::from_app_config(config);
    if discord.is_configured() {
        return Arc::new(DiscordGateway::new(discord));
    }
    tracing::warn!("no bot token configured; announcements stay in memory");
    let context = (!discord.guild_id.is_empty()).then(|| GuildContext {
        guild_id: discord.guild_id.clone(),
        badge_role_id: discord.badge_role_id.clone(),
    });
    let announce = (!discord.announce_channel_id.is_empty()).then(|| discord.announce_channel_id.clone());
    Arc::new(InMemoryGuildGateway::new(context, announce))
}
