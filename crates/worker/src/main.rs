mod observability;
mod scheduler;

use chatrank_domain::clock::system_clock;
use chatrank_domain::rollover::RolloverService;
use chatrank_infra::{bootstrap, config::AppConfig, logging::init_tracing};
use tracing::info;

use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "chatrank-worker")?;
    observability::init_metrics()?;

    let repositories = bootstrap::repositories(&config)?;
    let claims = bootstrap::cache_store(&config).await?;
    let guild = bootstrap::guild_gateway(&config);
    let rollover = RolloverService::new(
        repositories.stats,
        guild,
        claims,
        system_clock(),
        config.rollover(),
    );

    info!(
        trigger_hour = config.rollover_trigger_hour,
        trigger_minute = config.rollover_trigger_minute,
        utc_offset_hours = config.rollover_utc_offset_hours,
        "worker starting"
    );
    Scheduler::new(rollover).run(shutdown_signal()).await?;
    info!("worker shutdown");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
