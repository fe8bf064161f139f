use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chatrank_domain::ports::BoxFuture;
use chatrank_domain::ports::guild::{Destination, GuildContext, GuildError, GuildGateway};

#[derive(Default)]
struct GuildState {
    holders: BTreeSet<String>,
    published: Vec<(String, String)>,
}

/// Guild stand-in used when no bot token is configured. Announcements and
/// badge changes are kept in memory and logged.
#[derive(Clone)]
pub struct InMemoryGuildGateway {
    context: Option<GuildContext>,
    announce_channel_id: Option<String>,
    state: Arc<Mutex<GuildState>>,
}

impl InMemoryGuildGateway {
    pub fn new(context: Option<GuildContext>, announce_channel_id: Option<String>) -> Self {
        Self {
            context,
            announce_channel_id,
            state: Arc::new(Mutex::new(GuildState::default())),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, GuildState>, GuildError> {
        self.state
            .lock()
            .map_err(|_| GuildError::Unavailable("in-memory guild lock poisoned".into()))
    }

    pub fn holders(&self) -> Vec<String> {
        self.state()
            .map(|state| state.holders.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state()
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    pub fn seed_holder(&self, user_id: &str) {
        if let Ok(mut state) = self.state() {
            state.holders.insert(user_id.to_string());
        }
    }
}

impl GuildGateway for InMemoryGuildGateway {
    fn guild_context(&self) -> BoxFuture<'_, Result<Option<GuildContext>, GuildError>> {
        Box::pin(async move { Ok(self.context.clone()) })
    }

    fn resolve_announce_destination(&self) -> BoxFuture<'_, Result<Destination, GuildError>> {
        Box::pin(async move {
            self.announce_channel_id
                .clone()
                .map(|channel_id| Destination { channel_id })
                .ok_or_else(|| GuildError::Unavailable("announce channel is not configured".into()))
        })
    }

    fn publish(
        &self,
        destination: &Destination,
        content: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let entry = (destination.channel_id.clone(), content.to_string());
        Box::pin(async move {
            tracing::info!(channel_id = %entry.0, chars = entry.1.len(), "recording announcement");
            self.state()?.published.push(entry);
            Ok(())
        })
    }

    fn list_badge_holders(
        &self,
        _guild: &GuildContext,
    ) -> BoxFuture<'_, Result<Vec<String>, GuildError>> {
        Box::pin(async move { Ok(self.state()?.holders.iter().cloned().collect()) })
    }

    fn remove_badge(
        &self,
        _guild: &GuildContext,
        user_id: &str,
    ) -> BoxFuture<'_, Result<(), GuildError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.state()?.holders.remove(&user_id);
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
            self.state()?.holders.insert(user_id);
            Ok(())
        })
    }
}
