use std::sync::Arc;

use chatrank_domain::access::AccessGate;
use chatrank_domain::clock::{Clock, system_clock};
use chatrank_domain::error::DomainError;
use chatrank_domain::ports::cache::CacheStore;
use chatrank_domain::ports::guild::GuildGateway;
use chatrank_domain::ports::snapshots::SnapshotRepository;
use chatrank_domain::ports::stats::StatsRepository;
use chatrank_domain::rate_limit::RateLimiter;
use chatrank_domain::response_cache::ResponseCache;
use chatrank_domain::rollover::RolloverService;
use chatrank_domain::snapshots::SnapshotService;
use chatrank_domain::stats::StatsService;
use chatrank_infra::bootstrap;
use chatrank_infra::config::AppConfig;
use time::OffsetDateTime;

/// External collaborators the API is wired against.
pub struct Backends {
    pub stats: Arc<dyn StatsRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub cache: Arc<dyn CacheStore>,
    pub guild: Arc<dyn GuildGateway>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub gate: AccessGate,
    pub response_cache: ResponseCache,
    pub stats: StatsService,
    pub snapshots: SnapshotService,
    pub rollover: RolloverService,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let repositories = bootstrap::repositories(&config)?;
        let cache = bootstrap::cache_store(&config).await?;
        let guild = bootstrap::guild_gateway(&config);
        Ok(Self::with_backends(
            config,
            Backends {
                stats: repositories.stats,
                snapshots: repositories.snapshots,
                cache,
                guild,
                clock: system_clock(),
            },
        ))
    }

    pub fn with_backends(config: AppConfig, backends: Backends) -> Self {
        let limiter = RateLimiter::new(
            backends.cache.clone(),
            backends.clock.clone(),
            config.rate_limit(),
        );
        let gate = AccessGate::new(config.access_policy(), limiter);
        let response_cache = ResponseCache::new(backends.cache.clone(), config.freshness());
        let stats = StatsService::new(backends.stats.clone());
        let snapshots = SnapshotService::new(backends.snapshots, response_cache.clone());
        let rollover = RolloverService::new(
            backends.stats,
            backends.guild,
            backends.cache,
            backends.clock.clone(),
            config.rollover(),
        );
        Self {
            config,
            gate,
            response_cache,
            stats,
            snapshots,
            rollover,
            clock: backends.clock,
        }
    }

    pub fn now(&self) -> Result<OffsetDateTime, DomainError> {
        let nanos = i128::from(self.clock.now_ms()) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(DomainError::upstream)
    }
}
