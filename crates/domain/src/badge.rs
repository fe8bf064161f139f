//! Exclusive top-rank badge rotation.
//!
//! Removal and grant are independent steps against the chat platform. Each
//! removal outcome is kept in the report; none of them stops the grant. A
//! failed grant leaves the badge with no holder until the next rotation.

use std::sync::Arc;

use crate::ports::guild::{GuildContext, GuildError, GuildGateway};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationReport {
    pub new_holder: String,
    /// Set when the current holders could not be listed.
    pub listing_error: Option<GuildError>,
    pub removals: Vec<(String, Result<(), GuildError>)>,
    pub grant: Result<(), GuildError>,
}

impl RotationReport {
    /// Grant failed; nobody holds the badge now.
    pub fn is_degraded(&self) -> bool {
        self.grant.is_err()
    }

    pub fn failed_removals(&self) -> Vec<&str> {
        self.removals
            .iter()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(holder, _)| holder.as_str())
            .collect()
    }
}

#[derive(Clone)]
pub struct BadgeRotation {
    gateway: Arc<dyn GuildGateway>,
}

impl BadgeRotation {
    pub fn new(gateway: Arc<dyn GuildGateway>) -> Self {
        Self { gateway }
    }

    pub async fn rotate(&self, guild: &GuildContext, new_top: &str) -> RotationReport {
        let (holders, listing_error) = match self.gateway.list_badge_holders(guild).await {
            Ok(holders) => (holders, None),
            Err(err) => {
                tracing::warn!(error = %err, "listing badge holders failed; skipping removal");
                (Vec::new(), Some(err))
            }
        };

        let mut removals = Vec::with_capacity(holders.len());
        for holder in holders {
            let outcome = self.gateway.remove_badge(guild, &holder).await;
            match &outcome {
                Ok(()) => tracing::info!(user_id = %holder, "badge removed"),
                Err(err) => tracing::warn!(user_id = %holder, error = %err, "badge removal failed"),
            }
            removals.push((holder, outcome));
        }

        let grant = self.gateway.grant_badge(guild, new_top).await;
        match &grant {
            Ok(()) => tracing::info!(user_id = new_top, "badge granted"),
            Err(err) => tracing::error!(
                user_id = new_top,
                error = %err,
                "badge grant failed; badge has no holder"
            ),
        }

        RotationReport {
            new_holder: new_top.to_string(),
            listing_error,
            removals,
            grant,
        }
    }
}
