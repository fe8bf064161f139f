use axum::Json;
use axum::extract::{Path, Query, RawQuery, State};
use axum::response::Response;
use chatrank_domain::period::{TimeRange, YearMonth};
use chatrank_domain::response_cache::{CacheKey, Freshness};
use chatrank_domain::stats::{StatsFilter, UserSummary};
use serde::Deserialize;
use time::OffsetDateTime;

use super::cached_json;
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{self, StatsQuery};

/// Calendar month window plus the TTL class it earns.
struct MonthScope {
    month: YearMonth,
    range: TimeRange,
    freshness: Freshness,
}

impl MonthScope {
    fn resolve(state: &AppState, year: &str, month: &str) -> Result<Self, ApiError> {
        let month = validation::year_month(year, month)?;
        let range = month.range(state.config.reporting_offset())?;
        let freshness = state.response_cache.policy().for_month(month, state.now()?);
        Ok(Self {
            month,
            range,
            freshness,
        })
    }
}

/// All-time window up to an optional cutoff.
struct TotalScope {
    end: Option<OffsetDateTime>,
    range: TimeRange,
    freshness: Freshness,
}

impl TotalScope {
    fn resolve(state: &AppState, query: &StatsQuery) -> Result<Self, ApiError> {
        let end = query.end_date()?;
        let freshness = state.response_cache.policy().for_cutoff(end);
        Ok(Self {
            end,
            range: TimeRange::until(end),
            freshness,
        })
    }
}

fn user_set(ids: &[i64]) -> Option<&[i64]> {
    (!ids.is_empty()).then_some(ids)
}

pub(super) async fn channels(State(state): State<AppState>) -> Result<Response, ApiError> {
    let key = CacheKey::new("channels");
    let cached = state
        .response_cache
        .serve(&key, Freshness::Static, || state.stats.channels())
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn ranking_monthly(
    State(state): State<AppState>,
    Path((year, month)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let scope = MonthScope::resolve(&state, &year, &month)?;
    let channel_id = StatsQuery::parse(raw.as_deref()).channel_id()?;
    let key = CacheKey::new("ranking_monthly")
        .param_month(scope.month)
        .param("channel_id", channel_id);
    let filter = StatsFilter::channel(channel_id);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.ranking(scope.range, &filter)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn ranking_total(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let query = StatsQuery::parse(raw.as_deref());
    let channel_id = query.channel_id()?;
    let scope = TotalScope::resolve(&state, &query)?;
    let key = CacheKey::new("ranking_total")
        .param("channel_id", channel_id)
        .param_instant("end_date", scope.end);
    let filter = StatsFilter::channel(channel_id);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.ranking(scope.range, &filter)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn history_monthly(
    State(state): State<AppState>,
    Path((year, month)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let scope = MonthScope::resolve(&state, &year, &month)?;
    let query = StatsQuery::parse(raw.as_deref());
    let channel_id = query.channel_id()?;
    let user_ids = query.user_ids();
    let key = CacheKey::new("history_monthly")
        .param_month(scope.month)
        .param("channel_id", channel_id)
        .param_set("user_id", user_set(&user_ids));
    let filter = StatsFilter::channel(channel_id);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.history(scope.range, &filter, &user_ids)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn history_total(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let query = StatsQuery::parse(raw.as_deref());
    let channel_id = query.channel_id()?;
    let user_ids = query.user_ids();
    let scope = TotalScope::resolve(&state, &query)?;
    let key = CacheKey::new("history_total")
        .param("channel_id", channel_id)
        .param_set("user_id", user_set(&user_ids))
        .param_instant("end_date", scope.end);
    let filter = StatsFilter::channel(channel_id);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.history(scope.range, &filter, &user_ids)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn heatmap_monthly(
    State(state): State<AppState>,
    Path((year, month)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let scope = MonthScope::resolve(&state, &year, &month)?;
    let channel_id = StatsQuery::parse(raw.as_deref()).channel_id()?;
    let key = CacheKey::new("heatmap_monthly")
        .param_month(scope.month)
        .param("channel_id", channel_id);
    let filter = StatsFilter::channel(channel_id);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.heatmap(scope.range, &filter)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn heatmap_total(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let query = StatsQuery::parse(raw.as_deref());
    let channel_id = query.channel_id()?;
    let scope = TotalScope::resolve(&state, &query)?;
    let key = CacheKey::new("heatmap_total")
        .param("channel_id", channel_id)
        .param_instant("end_date", scope.end);
    let filter = StatsFilter::channel(channel_id);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.heatmap(scope.range, &filter)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn distribution_monthly(
    State(state): State<AppState>,
    Path((year, month)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let scope = MonthScope::resolve(&state, &year, &month)?;
    let key = CacheKey::new("channels_distribution_monthly").param_month(scope.month);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.channel_distribution(scope.range)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn distribution_total(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let query = StatsQuery::parse(raw.as_deref());
    let scope = TotalScope::resolve(&state, &query)?;
    let key =
        CacheKey::new("channels_distribution_total").param_instant("end_date", scope.end);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.channel_distribution(scope.range)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn analysis_monthly(
    State(state): State<AppState>,
    Path((year, month)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let scope = MonthScope::resolve(&state, &year, &month)?;
    let query = StatsQuery::parse(raw.as_deref());
    let filter = StatsFilter {
        channel_id: query.channel_id()?,
        user_id: query.user_id()?,
        ..StatsFilter::default()
    };
    let key = CacheKey::new("analysis_monthly")
        .param_month(scope.month)
        .param("channel_id", filter.channel_id)
        .param("user_id", filter.user_id);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.analysis(scope.range, &filter)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

pub(super) async fn analysis_total(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let query = StatsQuery::parse(raw.as_deref());
    let filter = StatsFilter {
        channel_id: query.channel_id()?,
        user_id: query.user_id()?,
        ..StatsFilter::default()
    };
    let scope = TotalScope::resolve(&state, &query)?;
    let key = CacheKey::new("analysis_total")
        .param("channel_id", filter.channel_id)
        .param("user_id", filter.user_id)
        .param_instant("end_date", scope.end);
    let cached = state
        .response_cache
        .serve(&key, scope.freshness, || {
            state.stats.analysis(scope.range, &filter)
        })
        .await?;
    Ok(cached_json(key.endpoint(), cached))
}

#[derive(Debug, Deserialize)]
pub(super) struct SearchParams {
    #[serde(default)]
    q: String,
}

/// Uncached: results follow the user table directly.
pub(super) async fn search_users(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    Ok(Json(state.stats.search_users(&params.q).await?))
}
