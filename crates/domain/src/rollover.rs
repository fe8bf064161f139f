//! Monthly leaderboard rollover.
//!
//! The scheduled path ticks once a day at a fixed local time and only acts on
//! the first day of a month, announcing the previous month and rotating the
//! top-rank badge. The manual path runs the same sequence for any month.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use time::{OffsetDateTime, Time, UtcOffset};

use crate::DomainResult;
use crate::badge::{BadgeRotation, RotationReport};
use crate::clock::Clock;
use crate::error::DomainError;
use crate::period::YearMonth;
use crate::ports::cache::CacheStore;
use crate::ports::guild::{Destination, GuildGateway};
use crate::ports::stats::StatsRepository;
use crate::stats::{RankingRow, StatsFilter};

const CLAIM_KEY_PREFIX: &str = "rollover";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolloverConfig {
    pub leaderboard_size: usize,
    pub excluded_channel_id: Option<i64>,
    pub reporting_offset: UtcOffset,
    /// Local wall-clock time of the daily tick.
    pub trigger_time: Time,
    pub web_base_url: String,
    pub claim_ttl: Duration,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            leaderboard_size: 10,
            excluded_channel_id: None,
            reporting_offset: UtcOffset::UTC,
            trigger_time: Time::MIDNIGHT,
            web_base_url: String::new(),
            claim_ttl: Duration::from_secs(40 * 24 * 60 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotBoundary,
    AlreadyClaimed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RolloverReport {
    Skipped(SkipReason),
    /// No qualifying messages; nothing published, badge untouched.
    Empty { month: YearMonth },
    Completed {
        month: YearMonth,
        top_user_id: String,
        published: bool,
        /// `None` when no guild context was available.
        rotation: Option<RotationReport>,
    },
}

impl RolloverReport {
    pub fn outcome(&self) -> &'static str {
        match self {
            RolloverReport::Skipped(SkipReason::NotBoundary) => "not_boundary",
            RolloverReport::Skipped(SkipReason::AlreadyClaimed) => "already_claimed",
            RolloverReport::Empty { .. } => "empty",
            RolloverReport::Completed { rotation: Some(rotation), .. } if rotation.is_degraded() => {
                "degraded"
            }
            RolloverReport::Completed { .. } => "completed",
        }
    }
}

/// Plain-text announcement for a month's leaderboard. Output depends only on
/// the arguments.
pub fn compose_leaderboard(config: &RolloverConfig, month: YearMonth, rows: &[RankingRow]) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "# {}/{:02} message ranking",
        month.year,
        month.month_number()
    );
    if let Some(channel_id) = config.excluded_channel_id {
        let _ = writeln!(text, "-# <#{channel_id}> is not counted");
    }
    for (index, row) in rows.iter().take(config.leaderboard_size).enumerate() {
        let name = if row.display_name.trim().is_empty() {
            format!("<@{}>", row.user_id)
        } else {
            row.display_name.clone()
        };
        let _ = writeln!(
            text,
            "{}. **{}** (<@{}>) - **{}** messages",
            index + 1,
            name,
            row.user_id,
            row.message_count
        );
    }
    if let Some(top) = rows.first() {
        let _ = writeln!(text);
        let _ = writeln!(text, "<@{}> holds the top badge this month", top.user_id);
    }
    let _ = write!(
        text,
        "{}/month/{}/{}",
        config.web_base_url.trim_end_matches('/'),
        month.year,
        month.month_number()
    );
    text
}

/// Next instant strictly after `now` at `trigger` local time.
pub fn next_fire_at(now: OffsetDateTime, trigger: Time, offset: UtcOffset) -> OffsetDateTime {
    let local = now.to_offset(offset);
    let today = local.date().with_time(trigger).assume_offset(offset);
    if today > local {
        today
    } else {
        today + time::Duration::days(1)
    }
}

pub fn claim_key(month: YearMonth) -> String {
    format!("{CLAIM_KEY_PREFIX}:{month}")
}

#[derive(Clone)]
pub struct RolloverService {
    stats: Arc<dyn StatsRepository>,
    guild: Arc<dyn GuildGateway>,
    claims: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    badges: BadgeRotation,
    config: RolloverConfig,
}

impl RolloverService {
    pub fn new(
        stats: Arc<dyn StatsRepository>,
        guild: Arc<dyn GuildGateway>,
        claims: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: RolloverConfig,
    ) -> Self {
        let badges = BadgeRotation::new(guild.clone());
        Self {
            stats,
            guild,
            claims,
            clock,
            badges,
            config,
        }
    }

    pub fn config(&self) -> &RolloverConfig {
        &self.config
    }

    pub fn now(&self) -> DomainResult<OffsetDateTime> {
        let nanos = i128::from(self.clock.now_ms()) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(DomainError::upstream)
    }

    /// Scheduled entry point. Acts only on the first local day of a month and
    /// claims the month first so concurrent workers publish once.
    pub async fn tick(&self) -> DomainResult<RolloverReport> {
        let now = self.now()?.to_offset(self.config.reporting_offset);
        if now.day() != 1 {
            tracing::debug!(date = %now.date(), "not a month boundary");
            return Ok(RolloverReport::Skipped(SkipReason::NotBoundary));
        }

        let month = YearMonth::containing(now).previous();
        let key = claim_key(month);
        match self
            .claims
            .set_if_absent(&key, b"1".to_vec(), self.config.claim_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(month = %month, "rollover already claimed");
                return Ok(RolloverReport::Skipped(SkipReason::AlreadyClaimed));
            }
            Err(err) => {
                tracing::warn!(month = %month, error = %err, "rollover claim failed; running unclaimed");
            }
        }

        self.run_for_month(month, None).await
    }

    /// Ranks `month` within the configured guild, announces it and rotates
    /// the badge. `destination` overrides the configured announcement channel.
    pub async fn run_for_month(
        &self,
        month: YearMonth,
        destination: Option<Destination>,
    ) -> DomainResult<RolloverReport> {
        let range = month.range(self.config.reporting_offset)?;
        let guild = match self.guild.guild_context().await {
            Ok(Some(guild)) => Some(guild),
            Ok(None) => {
                tracing::warn!(month = %month, "guild context unavailable");
                None
            }
            Err(err) => {
                tracing::warn!(month = %month, error = %err, "guild context lookup failed");
                None
            }
        };

        let guild_id = guild.as_ref().and_then(|guild| match guild.guild_id.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(month = %month, guild_id = %guild.guild_id, "guild id is not numeric; ranking all guilds");
                None
            }
        });
        let filter = StatsFilter {
            excluded_channel_id: self.config.excluded_channel_id,
            guild_id,
            ..StatsFilter::default()
        };
        let rows = self
            .stats
            .ranking(range, &filter, self.config.leaderboard_size)
            .await
            .map_err(|err| {
                tracing::error!(month = %month, error = %err, "rollover ranking failed");
                err
            })?;

        let Some(top) = rows.first() else {
            tracing::info!(month = %month, "no messages in month; nothing to announce");
            return Ok(RolloverReport::Empty { month });
        };
        let top_user_id = top.user_id.clone();
        let content = compose_leaderboard(&self.config, month, &rows);

        let destination = match destination {
            Some(destination) => Some(destination),
            None => match self.guild.resolve_announce_destination().await {
                Ok(destination) => Some(destination),
                Err(err) => {
                    tracing::warn!(month = %month, error = %err, "announce destination unavailable");
                    None
                }
            },
        };

        let published = match destination {
            Some(destination) => match self.guild.publish(&destination, &content).await {
                Ok(()) => {
                    tracing::info!(month = %month, channel_id = %destination.channel_id, "leaderboard published");
                    true
                }
                Err(err) => {
                    tracing::warn!(month = %month, error = %err, "leaderboard publish failed");
                    false
                }
            },
            None => false,
        };

        let rotation = match guild {
            Some(guild) => Some(self.badges.rotate(&guild, &top_user_id).await),
            None => {
                tracing::warn!(month = %month, "skipping badge rotation without guild context");
                None
            }
        };

        Ok(RolloverReport::Completed {
            month,
            top_user_id,
            published,
            rotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset, time};

    fn row(user_id: &str, name: &str, count: i64) -> RankingRow {
        RankingRow {
            user_id: user_id.to_string(),
            display_name: name.to_string(),
            username: name.to_lowercase(),
            avatar: None,
            message_count: count,
            char_count: count * 10,
        }
    }

    #[test]
    fn leaderboard_lists_rows_and_links_month() {
        let config = RolloverConfig {
            leaderboard_size: 2,
            excluded_channel_id: Some(99),
            web_base_url: "https://stats.example/".to_string(),
            ..RolloverConfig::default()
        };
        let month = YearMonth::new(2025, 3).unwrap();
        let rows = vec![row("1", "Alice", 30), row("2", "", 20), row("3", "Carol", 10)];
        let text = compose_leaderboard(&config, month, &rows);

        assert!(text.starts_with("# 2025/03 message ranking\n"));
        assert!(text.contains("<#99> is not counted"));
        assert!(text.contains("1. **Alice** (<@1>) - **30** messages"));
        assert!(text.contains("2. **<@2>** (<@2>) - **20** messages"));
        assert!(!text.contains("Carol"));
        assert!(text.contains("<@1> holds the top badge"));
        assert!(text.ends_with("https://stats.example/month/2025/3"));
        assert_eq!(text, compose_leaderboard(&config, month, &rows));
    }

    #[test]
    fn next_fire_is_strictly_in_the_future() {
        let trigger = time!(0:00);
        let now = datetime!(2025-05-31 14:59:59 UTC);
        assert_eq!(
            next_fire_at(now, trigger, offset!(+9)),
            datetime!(2025-06-01 0:00 +9)
        );
        let exactly = datetime!(2025-06-01 0:00 +9);
        assert_eq!(
            next_fire_at(exactly, trigger, offset!(+9)),
            datetime!(2025-06-02 0:00 +9)
        );
    }

    #[test]
    fn claim_key_names_the_month() {
        assert_eq!(claim_key(YearMonth::new(2025, 1).unwrap()), "rollover:2025-01");
    }
}
