use axum::Json;
use axum::extract::{Path, Query, State};
use chatrank_domain::ports::guild::Destination;
use chatrank_domain::rollover::RolloverReport;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::observability;
use crate::state::AppState;
use crate::validation;

#[derive(Debug, Default, Deserialize)]
pub(super) struct RolloverParams {
    /// Announce here instead of the configured channel.
    channel_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct RolloverResponse {
    month: String,
    outcome: &'static str,
    top_user_id: Option<String>,
    published: bool,
    badge_rotated: Option<bool>,
    failed_removals: Vec<String>,
    errors: Vec<String>,
}

impl RolloverResponse {
    fn from_report(month: String, report: &RolloverReport) -> Self {
        let mut response = Self {
            month,
            outcome: report.outcome(),
            top_user_id: None,
            published: false,
            badge_rotated: None,
            failed_removals: Vec::new(),
            errors: Vec::new(),
        };
        if let RolloverReport::Completed {
            top_user_id,
            published,
            rotation,
            ..
        } = report
        {
            response.top_user_id = Some(top_user_id.clone());
            response.published = *published;
            if let Some(rotation) = rotation {
                response.badge_rotated = Some(!rotation.is_degraded());
                response.failed_removals = rotation
                    .failed_removals()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                response.errors.extend(rotation.listing_error.iter().map(ToString::to_string));
                response
                    .errors
                    .extend(rotation.removals.iter().filter_map(|(_, outcome)| {
                        outcome.as_ref().err().map(ToString::to_string)
                    }));
                if let Err(err) = &rotation.grant {
                    response.errors.push(err.to_string());
                }
            }
        }
        response
    }
}

/// Re-runs the month's announcement and badge rotation. Never claims the
/// month, so it can be repeated after a partial failure.
pub(super) async fn rollover(
    State(state): State<AppState>,
    Path((year, month)): Path<(String, String)>,
    Query(params): Query<RolloverParams>,
) -> Result<Json<RolloverResponse>, ApiError> {
    let month = validation::year_month(&year, &month)?;
    let destination = params
        .channel_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(|channel_id| {
            if channel_id.bytes().all(|b| b.is_ascii_digit()) {
                Ok(Destination { channel_id })
            } else {
                Err(ApiError::Validation("channel_id must be numeric".into()))
            }
        })
        .transpose()?;

    tracing::info!(month = %month, override_destination = destination.is_some(), "manual rollover requested");
    let report = state.rollover.run_for_month(month, destination).await?;
    observability::register_manual_rollover(report.outcome());
    Ok(Json(RolloverResponse::from_report(month.to_string(), &report)))
}
