use std::future::Future;
use std::time::Instant;

use chatrank_domain::DomainResult;
use chatrank_domain::rollover::{RolloverService, next_fire_at};
use tracing::{error, info, warn};

use crate::observability;

/// Wakes once a day at the configured local time and ticks the rollover.
pub struct Scheduler {
    rollover: RolloverService,
}

impl Scheduler {
    pub fn new(rollover: RolloverService) -> Self {
        Self { rollover }
    }

    /// Runs until `shutdown` resolves. A tick already in progress is allowed
    /// to finish first.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> DomainResult<()> {
        tokio::pin!(shutdown);
        let config = self.rollover.config();
        loop {
            let now = self.rollover.now()?;
            let fire_at = next_fire_at(now, config.trigger_time, config.reporting_offset);
            let wait = (fire_at - now).unsigned_abs();
            observability::set_next_fire(fire_at.unix_timestamp());
            info!(fire_at = %fire_at, wait_secs = wait.as_secs(), "next rollover check scheduled");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }

            self.fire().await;
        }
    }

    /// One scheduled check. Failures are logged and the loop carries on.
    pub async fn fire(&self) {
        let started = Instant::now();
        match self.rollover.tick().await {
            Ok(report) => {
                let outcome = report.outcome();
                if outcome == "degraded" {
                    warn!(outcome, "rollover finished without a badge holder");
                } else {
                    info!(outcome, "rollover check finished");
                }
                observability::register_rotation_failures(&report);
                observability::register_rollover_run(
                    outcome,
                    started.elapsed().as_secs_f64() * 1000.0,
                );
            }
            Err(err) => {
                error!(error = %err, "rollover check failed");
                observability::register_rollover_run(
                    "failed",
                    started.elapsed().as_secs_f64() * 1000.0,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chatrank_domain::cache::InMemoryCacheStore;
    use chatrank_domain::clock::Clock;
    use chatrank_domain::ports::guild::GuildContext;
    use chatrank_domain::rollover::RolloverConfig;
    use chatrank_infra::guild::InMemoryGuildGateway;
    use chatrank_infra::repositories::{InMemoryStatsRepository, MessageRecord, UserRecord};
    use time::macros::{datetime, offset};
    use time::OffsetDateTime;
    use tokio::sync::oneshot;

    use super::*;

    /// Wall clock that follows tokio's (paused) timer.
    struct TokioClock {
        base_ms: i64,
        started: tokio::time::Instant,
    }

    impl TokioClock {
        fn at(at: OffsetDateTime) -> Self {
            Self {
                base_ms: (at.unix_timestamp_nanos() / 1_000_000) as i64,
                started: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now_ms(&self) -> i64 {
            self.base_ms + self.started.elapsed().as_millis() as i64
        }
    }

    fn service(clock: Arc<dyn Clock>) -> (RolloverService, InMemoryGuildGateway) {
        let stats = InMemoryStatsRepository::new(offset!(+9));
        stats.upsert_user(UserRecord {
            user_id: 1001,
            display_name: Some("Alice".into()),
            username: Some("alice".into()),
            avatar_url: None,
        });
        stats.insert_message(MessageRecord {
            user_id: 1001,
            channel_id: 10,
            guild_id: 500,
            created_at: datetime!(2025-03-20 10:00 UTC),
            char_count: 5,
            is_bot: false,
        });
        let guild = InMemoryGuildGateway::new(
            Some(GuildContext {
                guild_id: "500".into(),
                badge_role_id: "600".into(),
            }),
            Some("700".into()),
        );
        let claims = Arc::new(InMemoryCacheStore::with_clock("test", clock.clone()));
        let config = RolloverConfig {
            reporting_offset: offset!(+9),
            ..RolloverConfig::default()
        };
        let rollover =
            RolloverService::new(Arc::new(stats), Arc::new(guild.clone()), claims, clock, config);
        (rollover, guild)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_local_midnight_on_month_boundary() {
        // 23:59 local on March 31st.
        let clock = Arc::new(TokioClock::at(datetime!(2025-03-31 14:59 UTC)));
        let (rollover, guild) = service(clock);
        let scheduler = Scheduler::new(rollover);
        let (stop, stopped) = oneshot::channel::<()>();

        let run = tokio::spawn(async move {
            scheduler
                .run(async {
                    let _ = stopped.await;
                })
                .await
        });

        for _ in 0..10 {
            if !guild.published().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let published = guild.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].1.starts_with("# 2025/03 message ranking"));
        assert_eq!(guild.holders(), vec!["1001".to_string()]);

        let _ = stop.send(());
        run.await.expect("join").expect("scheduler");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_promptly_while_waiting() {
        let clock = Arc::new(TokioClock::at(datetime!(2025-03-10 03:00 UTC)));
        let (rollover, guild) = service(clock);
        let scheduler = Scheduler::new(rollover);

        scheduler.run(async {}).await.expect("scheduler");
        assert!(guild.published().is_empty());
    }

    #[tokio::test]
    async fn fire_outside_boundary_publishes_nothing() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::at(datetime!(2025-03-10 03:00 UTC)));
        let (rollover, guild) = service(clock);
        Scheduler::new(rollover).fire().await;
        assert!(guild.published().is_empty());
    }
}
