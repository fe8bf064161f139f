use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chatrank_domain::DomainResult;
use chatrank_domain::cache::InMemoryCacheStore;
use chatrank_domain::clock::ManualClock;
use chatrank_domain::error::DomainError;
use chatrank_domain::period::{TimeRange, YearMonth};
use chatrank_domain::ports::BoxFuture;
use chatrank_domain::ports::guild::{Destination, GuildContext, GuildError, GuildGateway};
use chatrank_domain::ports::stats::StatsRepository;
use chatrank_domain::rollover::{RolloverConfig, RolloverReport, RolloverService, SkipReason};
use chatrank_domain::stats::{
    ActivityAnalysis, ChannelInfo, ChannelShare, DailyCount, DailyUserCount, HeatmapCell,
    RankingRow, StatsFilter, UserSummary,
};
use time::macros::{datetime, offset};

#[derive(Default)]
struct FakeStats {
    rows: Vec<RankingRow>,
    fail: bool,
    ranking_calls: Mutex<Vec<(TimeRange, StatsFilter)>>,
}

impl StatsRepository for FakeStats {
    fn channels(&self) -> BoxFuture<'_, DomainResult<Vec<ChannelInfo>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn ranking(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<RankingRow>>> {
        let filter = filter.clone();
        Box::pin(async move {
            self.ranking_calls.lock().unwrap().push((range, filter));
            if self.fail {
                return Err(DomainError::Upstream("query timed out".into()));
            }
            Ok(self.rows.iter().take(limit).cloned().collect())
        })
    }

    fn daily_totals(
        &self,
        _range: TimeRange,
        _filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<DailyCount>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn daily_user_counts(
        &self,
        _range: TimeRange,
        _filter: &StatsFilter,
        _user_ids: &[i64],
    ) -> BoxFuture<'_, DomainResult<Vec<DailyUserCount>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn users(&self, _user_ids: &[i64]) -> BoxFuture<'_, DomainResult<Vec<UserSummary>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn heatmap(
        &self,
        _range: TimeRange,
        _filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<HeatmapCell>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn channel_distribution(
        &self,
        _range: TimeRange,
        _limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ChannelShare>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn analysis(
        &self,
        _range: TimeRange,
        _filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<ActivityAnalysis>> {
        Box::pin(async { Ok(ActivityAnalysis::empty()) })
    }

    fn search_users(
        &self,
        _query: &str,
        _limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<UserSummary>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[derive(Default)]
struct FakeGuild {
    holders: Mutex<HashSet<String>>,
    no_guild: bool,
    no_destination: bool,
    fail_listing: bool,
    fail_removal_for: Option<String>,
    fail_grant: bool,
    published: Mutex<Vec<(String, String)>>,
    removal_attempts: Mutex<Vec<String>>,
    grant_attempts: Mutex<Vec<String>>,
}

impl FakeGuild {
    fn with_holders(holders: &[&str]) -> Self {
        Self {
            holders: Mutex::new(holders.iter().map(|h| h.to_string()).collect()),
            ..Self::default()
        }
    }

    fn holders(&self) -> HashSet<String> {
        self.holders.lock().unwrap().clone()
    }

    fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

fn guild_context() -> GuildContext {
    GuildContext {
        guild_id: "42".to_string(),
        badge_role_id: "r1".to_string(),
    }
}

impl GuildGateway for FakeGuild {
    fn guild_context(&self) -> BoxFuture<'_, Result<Option<GuildContext>, GuildError>> {
        Box::pin(async move {
            if self.no_guild {
                return Ok(None);
            }
            Ok(Some(guild_context()))
        })
    }

    fn resolve_announce_destination(&self) -> BoxFuture<'_, Result<Destination, GuildError>> {
        Box::pin(async move {
            if self.no_destination {
                return Err(GuildError::Unavailable("unknown channel".into()));
            }
            Ok(Destination {
                channel_id: "announce".to_string(),
            })
        })
    }

    fn publish(
        &self,
        destination: &Destination,
        content: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let entry = (destination.channel_id.clone(), content.to_string());
        Box::pin(async move {
            self.published.lock().unwrap().push(entry);
            Ok(())
        })
    }

    fn list_badge_holders(
        &self,
        _guild: &GuildContext,
    ) -> BoxFuture<'_, Result<Vec<String>, GuildError>> {
        Box::pin(async move {
            if self.fail_listing {
                return Err(GuildError::Timeout);
            }
            let mut holders: Vec<String> = self.holders().into_iter().collect();
            holders.sort();
            Ok(holders)
        })
    }

    fn remove_badge(
        &self,
        _guild: &GuildContext,
        user_id: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.removal_attempts.lock().unwrap().push(user_id.clone());
            if self.fail_removal_for.as_deref() == Some(user_id.as_str()) {
                return Err(GuildError::Rejected {
                    status: 403,
                    message: "missing permissions".into(),
                });
            }
            self.holders.lock().unwrap().remove(&user_id);
            Ok(())
        })
    }

    fn grant_badge(
        &self,
        _guild: &GuildContext,
        user_id: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.grant_attempts.lock().unwrap().push(user_id.clone());
            if self.fail_grant {
                return Err(GuildError::MemberNotFound(user_id));
            }
            self.holders.lock().unwrap().insert(user_id);
            Ok(())
        })
    }
}

fn row(user_id: &str, count: i64) -> RankingRow {
    RankingRow {
        user_id: user_id.to_string(),
        display_name: format!("user {user_id}"),
        username: format!("user{user_id}"),
        avatar: None,
        message_count: count,
        char_count: count * 5,
    }
}

fn config() -> RolloverConfig {
    RolloverConfig {
        excluded_channel_id: Some(555),
        reporting_offset: offset!(+9),
        web_base_url: "https://stats.example".to_string(),
        ..RolloverConfig::default()
    }
}

struct Harness {
    stats: Arc<FakeStats>,
    guild: Arc<FakeGuild>,
    clock: ManualClock,
    service: RolloverService,
}

fn harness(stats: FakeStats, guild: FakeGuild) -> Harness {
    let stats = Arc::new(stats);
    let guild = Arc::new(guild);
    let clock = ManualClock::new(0);
    let claims = InMemoryCacheStore::with_clock("test", Arc::new(clock.clone()));
    let service = RolloverService::new(
        stats.clone(),
        guild.clone(),
        Arc::new(claims),
        Arc::new(clock.clone()),
        config(),
    );
    Harness {
        stats,
        guild,
        clock,
        service,
    }
}

fn set_now(clock: &ManualClock, at: time::OffsetDateTime) {
    clock.set((at.unix_timestamp_nanos() / 1_000_000) as i64);
}

fn month(year: i32, month: u8) -> YearMonth {
    YearMonth::new(year, month).unwrap()
}

#[tokio::test]
async fn empty_month_publishes_nothing_and_keeps_badges() {
    let h = harness(FakeStats::default(), FakeGuild::with_holders(&["old"]));

    let report = h.service.run_for_month(month(2025, 4), None).await.unwrap();

    assert_eq!(
        report,
        RolloverReport::Empty {
            month: month(2025, 4)
        }
    );
    assert!(h.guild.published().is_empty());
    assert!(h.guild.removal_attempts.lock().unwrap().is_empty());
    assert!(h.guild.grant_attempts.lock().unwrap().is_empty());
    assert_eq!(h.guild.holders(), HashSet::from(["old".to_string()]));
}

#[tokio::test]
async fn grant_proceeds_when_a_removal_fails() {
    let stats = FakeStats {
        rows: vec![row("top", 50), row("second", 40)],
        ..FakeStats::default()
    };
    let guild = FakeGuild {
        fail_removal_for: Some("stuck".to_string()),
        ..FakeGuild::with_holders(&["old", "stuck"])
    };
    let h = harness(stats, guild);

    let report = h.service.run_for_month(month(2025, 4), None).await.unwrap();

    let RolloverReport::Completed {
        top_user_id,
        published,
        rotation: Some(rotation),
        ..
    } = report
    else {
        panic!("expected completed rollover, got {report:?}");
    };
    assert_eq!(top_user_id, "top");
    assert!(published);
    assert_eq!(rotation.failed_removals(), vec!["stuck"]);
    assert!(!rotation.is_degraded());
    assert_eq!(
        h.guild.holders(),
        HashSet::from(["stuck".to_string(), "top".to_string()])
    );
    assert_eq!(*h.guild.grant_attempts.lock().unwrap(), vec!["top".to_string()]);
}

#[tokio::test]
async fn failed_grant_leaves_no_holder() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let guild = FakeGuild {
        fail_grant: true,
        ..FakeGuild::with_holders(&["old"])
    };
    let h = harness(stats, guild);

    let report = h.service.run_for_month(month(2025, 4), None).await.unwrap();

    assert_eq!(report.outcome(), "degraded");
    assert!(h.guild.holders().is_empty());
}

#[tokio::test]
async fn listing_failure_still_grants() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let guild = FakeGuild {
        fail_listing: true,
        ..FakeGuild::with_holders(&["old"])
    };
    let h = harness(stats, guild);

    let report = h.service.run_for_month(month(2025, 4), None).await.unwrap();

    let RolloverReport::Completed {
        rotation: Some(rotation),
        ..
    } = report
    else {
        panic!("expected rotation");
    };
    assert_eq!(rotation.listing_error, Some(GuildError::Timeout));
    assert!(rotation.removals.is_empty());
    assert!(h.guild.holders().contains("top"));
}

#[tokio::test]
async fn unresolved_destination_still_rotates() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let guild = FakeGuild {
        no_destination: true,
        ..FakeGuild::with_holders(&["old"])
    };
    let h = harness(stats, guild);

    let report = h.service.run_for_month(month(2025, 4), None).await.unwrap();

    assert!(matches!(
        report,
        RolloverReport::Completed {
            published: false,
            rotation: Some(_),
            ..
        }
    ));
    assert_eq!(h.guild.holders(), HashSet::from(["top".to_string()]));
}

#[tokio::test]
async fn missing_guild_skips_rotation_but_publishes() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let guild = FakeGuild {
        no_guild: true,
        ..FakeGuild::with_holders(&["old"])
    };
    let h = harness(stats, guild);

    let report = h.service.run_for_month(month(2025, 4), None).await.unwrap();

    assert!(matches!(
        report,
        RolloverReport::Completed {
            published: true,
            rotation: None,
            ..
        }
    ));
    assert_eq!(h.guild.holders(), HashSet::from(["old".to_string()]));
}

#[tokio::test]
async fn ranking_failure_abandons_run() {
    let stats = FakeStats {
        fail: true,
        ..FakeStats::default()
    };
    let h = harness(stats, FakeGuild::with_holders(&["old"]));

    let err = h
        .service
        .run_for_month(month(2025, 4), None)
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::Upstream(_)));
    assert!(h.guild.published().is_empty());
    assert!(h.guild.grant_attempts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn manual_run_uses_override_destination_and_is_repeatable() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let h = harness(stats, FakeGuild::default());
    let target = Destination {
        channel_id: "admin".to_string(),
    };

    h.service
        .run_for_month(month(2024, 12), Some(target.clone()))
        .await
        .unwrap();
    h.service
        .run_for_month(month(2024, 12), Some(target))
        .await
        .unwrap();

    let published = h.guild.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, "admin");
    assert_eq!(published[0], published[1]);
    assert!(published[0].1.contains("/month/2024/12"));
}

#[tokio::test]
async fn tick_ignores_days_other_than_the_first() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let h = harness(stats, FakeGuild::default());
    set_now(&h.clock, datetime!(2025-05-02 0:00 +9));

    let report = h.service.tick().await.unwrap();

    assert_eq!(report, RolloverReport::Skipped(SkipReason::NotBoundary));
    assert!(h.stats.ranking_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn tick_on_boundary_ranks_previous_month_in_reporting_offset() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let h = harness(stats, FakeGuild::default());
    // 15:00 UTC on the last day of the month is already the 1st at +9.
    set_now(&h.clock, datetime!(2025-01-31 15:00 UTC));

    let report = h.service.tick().await.unwrap();

    assert!(matches!(
        report,
        RolloverReport::Completed { month, .. } if month == YearMonth::new(2025, 1).unwrap()
    ));
    let calls = h.stats.ranking_calls.lock().unwrap();
    let (range, filter) = &calls[0];
    assert_eq!(range.start, Some(datetime!(2025-01-01 0:00 +9)));
    assert_eq!(range.end, Some(datetime!(2025-01-31 23:59:59.999999 +9)));
    assert_eq!(filter.excluded_channel_id, Some(555));
    assert_eq!(filter.guild_id, Some(42));
}

#[tokio::test]
async fn ranking_without_guild_context_is_unscoped() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let guild = FakeGuild {
        no_guild: true,
        ..FakeGuild::default()
    };
    let h = harness(stats, guild);

    h.service.run_for_month(month(2025, 2), None).await.unwrap();

    let calls = h.stats.ranking_calls.lock().unwrap();
    assert_eq!(calls[0].1.guild_id, None);
    assert_eq!(calls[0].1.excluded_channel_id, Some(555));
}

#[tokio::test]
async fn second_tick_for_same_month_is_claimed() {
    let stats = FakeStats {
        rows: vec![row("top", 50)],
        ..FakeStats::default()
    };
    let h = harness(stats, FakeGuild::default());
    set_now(&h.clock, datetime!(2025-06-01 0:00 +9));

    h.service.tick().await.unwrap();
    let second = h.service.tick().await.unwrap();

    assert_eq!(second, RolloverReport::Skipped(SkipReason::AlreadyClaimed));
    assert_eq!(h.guild.published().len(), 1);
}
