use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::DomainResult;
use crate::period::TimeRange;
use crate::ports::stats::StatsRepository;

pub const RANKING_LIMIT: usize = 100;
pub const DISTRIBUTION_LIMIT: usize = 10;
pub const SEARCH_LIMIT: usize = 10;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsFilter {
    pub channel_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Channel left out of the aggregate entirely.
    pub excluded_channel_id: Option<i64>,
    /// Restricts the aggregate to messages logged in one guild.
    pub guild_id: Option<i64>,
}

impl StatsFilter {
    pub fn channel(channel_id: Option<i64>) -> Self {
        Self {
            channel_id,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub category: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankingRow {
    pub user_id: String,
    pub display_name: String,
    pub username: String,
    pub avatar: Option<String>,
    #[serde(rename = "count")]
    pub message_count: i64,
    pub char_count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub user_id: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailyCount {
    pub date: Date,
    pub count: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailyUserCount {
    pub date: Date,
    pub user_id: i64,
    pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyPoint {
    pub date: String,
    pub total: i64,
    /// Per-user counts keyed by user id.
    #[serde(flatten)]
    pub users: BTreeMap<String, i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryUser {
    pub name: Option<String>,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyHistory {
    pub chart_data: Vec<DailyPoint>,
    pub users: BTreeMap<String, HistoryUser>,
    pub top_user_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeatmapCell {
    /// 0 = Sunday.
    pub dow: u8,
    pub hour: u8,
    pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelShare {
    pub name: String,
    pub value: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateCount {
    pub date: String,
    pub count: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DowCount {
    pub dow: u8,
    pub count: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourCount {
    pub hour: u8,
    pub count: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityAnalysis {
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_date: Option<DateCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dow: Option<DowCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hour: Option<HourCount>,
}

impl ActivityAnalysis {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Keeps numeric ids only, deduplicated, in request order.
pub fn parse_user_ids(raw: &[String]) -> Vec<i64> {
    let mut out = Vec::new();
    for value in raw {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(id) = value.parse::<i64>() {
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    out
}

#[derive(Clone)]
pub struct StatsService {
    repository: Arc<dyn StatsRepository>,
}

impl StatsService {
    pub fn new(repository: Arc<dyn StatsRepository>) -> Self {
        Self { repository }
    }

    pub async fn channels(&self) -> DomainResult<Vec<ChannelInfo>> {
        self.repository.channels().await
    }

    pub async fn ranking(&self, range: TimeRange, filter: &StatsFilter) -> DomainResult<Vec<RankingRow>> {
        self.repository.ranking(range, filter, RANKING_LIMIT).await
    }

    /// Daily totals plus per-user series for the top rankers and any
    /// explicitly requested users.
    pub async fn history(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
        extra_user_ids: &[i64],
    ) -> DomainResult<DailyHistory> {
        let totals = self.repository.daily_totals(range, filter).await?;
        let top = self.repository.ranking(range, filter, RANKING_LIMIT).await?;

        let mut target_ids: Vec<i64> = top
            .iter()
            .filter_map(|row| row.user_id.parse::<i64>().ok())
            .collect();
        for id in extra_user_ids {
            if !target_ids.contains(id) {
                target_ids.push(*id);
            }
        }

        let mut points: BTreeMap<Date, DailyPoint> = totals
            .into_iter()
            .map(|day| {
                (
                    day.date,
                    DailyPoint {
                        date: day.date.to_string(),
                        total: day.count,
                        users: BTreeMap::new(),
                    },
                )
            })
            .collect();

        let mut users = BTreeMap::new();
        if !target_ids.is_empty() {
            let per_user = self
                .repository
                .daily_user_counts(range, filter, &target_ids)
                .await?;
            for row in per_user {
                let point = points.entry(row.date).or_insert_with(|| DailyPoint {
                    date: row.date.to_string(),
                    total: 0,
                    users: BTreeMap::new(),
                });
                point.users.insert(row.user_id.to_string(), row.count);
            }

            for user in self.repository.users(&target_ids).await? {
                users.insert(
                    user.user_id.clone(),
                    HistoryUser {
                        name: user.display_name,
                        username: user.username,
                        avatar: user.avatar,
                    },
                );
            }
        }

        Ok(DailyHistory {
            chart_data: points.into_values().collect(),
            users,
            top_user_id: top.first().map(|row| row.user_id.clone()),
        })
    }

    pub async fn heatmap(&self, range: TimeRange, filter: &StatsFilter) -> DomainResult<Vec<HeatmapCell>> {
        self.repository.heatmap(range, filter).await
    }

    pub async fn channel_distribution(&self, range: TimeRange) -> DomainResult<Vec<ChannelShare>> {
        self.repository
            .channel_distribution(range, DISTRIBUTION_LIMIT)
            .await
    }

    pub async fn analysis(&self, range: TimeRange, filter: &StatsFilter) -> DomainResult<ActivityAnalysis> {
        self.repository.analysis(range, filter).await
    }

    pub async fn search_users(&self, query: &str) -> DomainResult<Vec<UserSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.repository.search_users(query, SEARCH_LIMIT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_user_ids_skips_non_numeric_and_duplicates() {
        let raw = vec![
            "42".to_string(),
            "abc".to_string(),
            " 7 ".to_string(),
            "42".to_string(),
            "-3".to_string(),
        ];
        assert_eq!(parse_user_ids(&raw), vec![42, 7]);
    }

    #[test]
    fn empty_analysis_serializes_total_only() {
        let value = serde_json::to_value(ActivityAnalysis::empty()).unwrap();
        assert_eq!(value, serde_json::json!({ "total": 0 }));
    }

    #[test]
    fn daily_point_flattens_user_counts() {
        let mut users = BTreeMap::new();
        users.insert("42".to_string(), 3);
        let point = DailyPoint {
            date: "2025-01-02".to_string(),
            total: 5,
            users,
        };
        assert_eq!(
            serde_json::to_value(point).unwrap(),
            serde_json::json!({ "date": "2025-01-02", "total": 5, "42": 3 })
        );
    }
}
