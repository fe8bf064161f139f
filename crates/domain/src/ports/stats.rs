use crate::DomainResult;
use crate::period::TimeRange;
use crate::ports::BoxFuture;
use crate::stats::{
    ActivityAnalysis, ChannelInfo, ChannelShare, DailyCount, DailyUserCount, HeatmapCell,
    RankingRow, StatsFilter, UserSummary,
};

/// Read side of the message store. Bot messages never count; rankings and
/// user search additionally skip deleted accounts. Day, weekday and hour
/// buckets are taken in the reporting offset.
pub trait StatsRepository: Send + Sync {
    fn channels(&self) -> BoxFuture<'_, DomainResult<Vec<ChannelInfo>>>;

    /// Rows ordered by message count, descending.
    fn ranking(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<RankingRow>>>;

    fn daily_totals(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<DailyCount>>>;

    fn daily_user_counts(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
        user_ids: &[i64],
    ) -> BoxFuture<'_, DomainResult<Vec<DailyUserCount>>>;

    fn users(&self, user_ids: &[i64]) -> BoxFuture<'_, DomainResult<Vec<UserSummary>>>;

    fn heatmap(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<HeatmapCell>>>;

    fn channel_distribution(
        &self,
        range: TimeRange,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ChannelShare>>>;

    fn analysis(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<ActivityAnalysis>>;

    fn search_users(&self, query: &str, limit: usize)
    -> BoxFuture<'_, DomainResult<Vec<UserSummary>>>;
}
