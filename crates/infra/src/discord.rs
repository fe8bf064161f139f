//! Chat-platform REST client for announcements and the badge role.

use std::time::Duration;

use chatrank_domain::ports::BoxFuture;
use chatrank_domain::ports::guild::{Destination, GuildContext, GuildError, GuildGateway};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::config::AppConfig;

const MEMBER_PAGE_SIZE: usize = 1000;
const MAX_MEMBER_PAGES: usize = 100;
/// Message length accepted by the platform.
const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub api_base: String,
    pub bot_token: String,
    pub guild_id: String,
    pub announce_channel_id: String,
    pub badge_role_id: String,
    pub timeout: Duration,
}

impl DiscordConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_base: config.discord_api_base.trim_end_matches('/').to_string(),
            bot_token: config.discord_bot_token.trim().to_string(),
            guild_id: config.guild_id.trim().to_string(),
            announce_channel_id: config.announce_channel_id.trim().to_string(),
            badge_role_id: config.badge_role_id.trim().to_string(),
            timeout: config.upstream_timeout(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct MemberUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Member {
    user: MemberUser,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DiscordGateway {
    http: reqwest::Client,
    config: DiscordConfig,
}

impl DiscordGateway {
    pub fn new(config: DiscordConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, GuildError> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header("authorization", format!("Bot {}", self.config.bot_token))
            .header("accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(GuildError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> GuildError {
    if err.is_timeout() {
        GuildError::Timeout
    } else {
        GuildError::Unavailable(err.to_string())
    }
}

fn member_not_found(err: GuildError, user_id: &str) -> GuildError {
    match err {
        GuildError::Rejected { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            GuildError::MemberNotFound(user_id.to_string())
        }
        other => other,
    }
}

/// Cuts `content` to the platform limit on a char boundary.
pub fn clip_content(content: &str) -> &str {
    match content.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((index, _)) => &content[..index],
        None => content,
    }
}

impl GuildGateway for DiscordGateway {
    fn guild_context(&self) -> BoxFuture<'_, Result<Option<GuildContext>, GuildError>> {
        Box::pin(async move {
            if self.config.guild_id.is_empty() || self.config.badge_role_id.is_empty() {
                return Ok(None);
            }
            let path = format!("guilds/{}", self.config.guild_id);
            match self.send(Method::GET, &path, &[], None).await {
                Ok(_) => Ok(Some(GuildContext {
                    guild_id: self.config.guild_id.clone(),
                    badge_role_id: self.config.badge_role_id.clone(),
                })),
                Err(GuildError::Rejected { status, .. })
                    if status == StatusCode::NOT_FOUND.as_u16() =>
                {
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        })
    }

    fn resolve_announce_destination(&self) -> BoxFuture<'_, Result<Destination, GuildError>> {
        Box::pin(async move {
            if self.config.announce_channel_id.is_empty() {
                return Err(GuildError::Unavailable(
                    "announce channel is not configured".into(),
                ));
            }
            let path = format!("channels/{}", self.config.announce_channel_id);
            self.send(Method::GET, &path, &[], None).await?;
            Ok(Destination {
                channel_id: self.config.announce_channel_id.clone(),
            })
        })
    }

    fn publish(
        &self,
        destination: &Destination,
        content: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let path = format!("channels/{}/messages", destination.channel_id);
        let body = json!({
            "content": clip_content(content),
            "allowed_mentions": { "parse": [] },
        });
        Box::pin(async move {
            self.send(Method::POST, &path, &[], Some(body)).await?;
            Ok(())
        })
    }

    fn list_badge_holders(
        &self,
        guild: &GuildContext,
    ) -> BoxFuture<'_, Result<Vec<String>, GuildError>> {
        let guild = guild.clone();
        Box::pin(async move {
            let path = format!("guilds/{}/members", guild.guild_id);
            let mut holders = Vec::new();
            let mut after = "0".to_string();
            for _ in 0..MAX_MEMBER_PAGES {
                let query = [
                    ("limit", MEMBER_PAGE_SIZE.to_string()),
                    ("after", after.clone()),
                ];
                let page: Vec<Member> = self
                    .send(Method::GET, &path, &query, None)
                    .await?
                    .json()
                    .await
                    .map_err(|err| GuildError::Unavailable(err.to_string()))?;
                let Some(last) = page.last() else {
                    break;
                };
                after = last.user.id.clone();
                let full_page = page.len() >= MEMBER_PAGE_SIZE;
                holders.extend(
                    page.into_iter()
                        .filter(|member| member.roles.contains(&guild.badge_role_id))
                        .map(|member| member.user.id),
                );
                if !full_page {
                    break;
                }
            }
            Ok(holders)
        })
    }

    fn remove_badge(
        &self,
        guild: &GuildContext,
        user_id: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let path = format!(
            "guilds/{}/members/{}/roles/{}",
            guild.guild_id, user_id, guild.badge_role_id
        );
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.send(Method::DELETE, &path, &[], None)
                .await
                .map_err(|err| member_not_found(err, &user_id))?;
            Ok(())
        })
    }

    fn grant_badge(
        &self,
        guild: &GuildContext,
        user_id: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let path = format!(
            "guilds/{}/members/{}/roles/{}",
            guild.guild_id, user_id, guild.badge_role_id
        );
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.send(Method::PUT, &path, &[], None)
                .await
                .map_err(|err| member_not_found(err, &user_id))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_char_boundaries() {
        let long = "é".repeat(MAX_CONTENT_CHARS + 5);
        assert_eq!(clip_content(&long).chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(clip_content("short"), "short");
    }

    #[test]
    fn not_found_maps_to_missing_member() {
        let err = GuildError::Rejected {
            status: 404,
            message: "Unknown Member".into(),
        };
        assert_eq!(
            member_not_found(err, "42"),
            GuildError::MemberNotFound("42".into())
        );
        assert_eq!(
            member_not_found(GuildError::Timeout, "42"),
            GuildError::Timeout
        );
    }
}
