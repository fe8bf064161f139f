//! Weak-signal trust classification and the admission gate in front of every
//! route.

use subtle::ConstantTimeEq;
use url::Url;

use crate::rate_limit::{ClientIdentity, RateDecision, RateLimiter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustTier {
    TrustedBot,
    TrustedWebsite,
    Untrusted,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::TrustedBot => "trusted_bot",
            TrustTier::TrustedWebsite => "trusted_website",
            TrustTier::Untrusted => "untrusted",
        }
    }

    pub fn is_trusted(&self) -> bool {
        !matches!(self, TrustTier::Untrusted)
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    pub api_secret: String,
    /// Exact origins, e.g. `https://example.org`.
    pub allowed_origins: Vec<String>,
    /// Host suffixes, e.g. `.pages.dev`. An origin must be https to match one.
    pub allowed_origin_suffixes: Vec<String>,
    /// Paths served to untrusted callers.
    pub public_paths: Vec<String>,
}

impl AccessPolicy {
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|public| public == path)
    }

    fn secret_matches(&self, presented: &str) -> bool {
        if self.api_secret.is_empty() {
            return false;
        }
        presented
            .as_bytes()
            .ct_eq(self.api_secret.as_bytes())
            .into()
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim().trim_end_matches('/');
        if origin.is_empty() {
            return false;
        }
        if self
            .allowed_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/') == origin)
        {
            return true;
        }
        self.matches_suffix(origin)
    }

    fn matches_suffix(&self, origin: &str) -> bool {
        let Ok(parsed) = Url::parse(origin) else {
            return false;
        };
        if parsed.scheme() != "https" {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.allowed_origin_suffixes.iter().any(|suffix| {
            let suffix = suffix.trim();
            !suffix.is_empty() && host.len() > suffix.len() && host.ends_with(suffix)
        })
    }

    /// A referer counts when its host carries an allow-listed domain: the
    /// host of an allowed origin (or a subdomain of it), or a configured
    /// suffix. Scheme and port are not compared.
    fn referer_allowed(&self, referer: &str) -> bool {
        let Ok(parsed) = Url::parse(referer.trim()) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let listed_domain = self.allowed_origins.iter().any(|origin| {
            Url::parse(origin.trim())
                .ok()
                .and_then(|allowed| allowed.host_str().map(str::to_ascii_lowercase))
                .is_some_and(|domain| {
                    host == domain
                        || host
                            .strip_suffix(domain.as_str())
                            .is_some_and(|rest| rest.ends_with('.'))
                })
        });
        listed_domain
            || self.allowed_origin_suffixes.iter().any(|suffix| {
                let suffix = suffix.trim().to_ascii_lowercase();
                !suffix.is_empty() && host.len() > suffix.len() && host.ends_with(&suffix)
            })
    }
}

/// Header values relevant to classification, already decoded as text.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestSignals<'a> {
    pub api_key: Option<&'a str>,
    pub origin: Option<&'a str>,
    pub referer: Option<&'a str>,
}

pub fn classify(policy: &AccessPolicy, signals: &RequestSignals<'_>) -> TrustTier {
    if signals
        .api_key
        .is_some_and(|key| policy.secret_matches(key))
    {
        return TrustTier::TrustedBot;
    }
    if signals
        .origin
        .is_some_and(|origin| policy.origin_allowed(origin))
    {
        return TrustTier::TrustedWebsite;
    }
    if signals
        .referer
        .is_some_and(|referer| policy.referer_allowed(referer))
    {
        return TrustTier::TrustedWebsite;
    }
    TrustTier::Untrusted
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    AccessDenied,
    RateLimited,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::AccessDenied => "access_denied",
            Rejection::RateLimited => "rate_limited",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub tier: TrustTier,
}

#[derive(Clone)]
pub struct AccessGate {
    policy: AccessPolicy,
    limiter: RateLimiter,
}

impl AccessGate {
    pub fn new(policy: AccessPolicy, limiter: RateLimiter) -> Self {
        Self { policy, limiter }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Untrusted callers are turned away except on public paths. Every caller
    /// that gets past that check is counted, trusted bot included.
    ///
    /// A failing counter store admits the request.
    pub async fn admit(
        &self,
        path: &str,
        signals: &RequestSignals<'_>,
        identity: &ClientIdentity,
    ) -> Result<Admission, Rejection> {
        let tier = classify(&self.policy, signals);
        if !tier.is_trusted() && !self.policy.is_public_path(path) {
            tracing::info!(identity = %identity, path, "rejecting untrusted caller");
            return Err(Rejection::AccessDenied);
        }

        match self.limiter.check(identity).await {
            Ok(RateDecision::Admitted { .. }) => Ok(Admission { tier }),
            Ok(RateDecision::Blocked { .. }) => Err(Rejection::RateLimited),
            Err(err) => {
                tracing::warn!(
                    identity = %identity,
                    path,
                    error = %err,
                    "rate limiter store failed; admitting request"
                );
                Ok(Admission { tier })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AccessPolicy {
        AccessPolicy {
            api_secret: "s3cret".to_string(),
            allowed_origins: vec![
                "https://ymkw.top".to_string(),
                "http://localhost:4321".to_string(),
            ],
            allowed_origin_suffixes: vec![".pages.dev".to_string()],
            public_paths: vec!["/docs".to_string(), "/health".to_string()],
        }
    }

    fn signals<'a>(
        api_key: Option<&'a str>,
        origin: Option<&'a str>,
        referer: Option<&'a str>,
    ) -> RequestSignals<'a> {
        RequestSignals {
            api_key,
            origin,
            referer,
        }
    }

    #[test]
    fn secret_header_marks_trusted_bot() {
        let tier = classify(&policy(), &signals(Some("s3cret"), None, None));
        assert_eq!(tier, TrustTier::TrustedBot);
    }

    #[test]
    fn wrong_secret_is_untrusted() {
        let tier = classify(&policy(), &signals(Some("s3cre"), None, None));
        assert_eq!(tier, TrustTier::Untrusted);
    }

    #[test]
    fn empty_configured_secret_never_matches() {
        let mut policy = policy();
        policy.api_secret.clear();
        assert_eq!(
            classify(&policy, &signals(Some(""), None, None)),
            TrustTier::Untrusted
        );
    }

    #[test]
    fn exact_origin_marks_trusted_website() {
        let tier = classify(&policy(), &signals(None, Some("https://ymkw.top"), None));
        assert_eq!(tier, TrustTier::TrustedWebsite);
    }

    #[test]
    fn wildcard_suffix_requires_https_subdomain() {
        let policy = policy();
        assert_eq!(
            classify(&policy, &signals(None, Some("https://preview.pages.dev"), None)),
            TrustTier::TrustedWebsite
        );
        assert_eq!(
            classify(&policy, &signals(None, Some("http://preview.pages.dev"), None)),
            TrustTier::Untrusted
        );
        assert_eq!(
            classify(&policy, &signals(None, Some("https://evil.pages.dev.example"), None)),
            TrustTier::Untrusted
        );
    }

    #[test]
    fn referer_falls_back_to_its_origin() {
        let policy = policy();
        assert_eq!(
            classify(
                &policy,
                &signals(None, None, Some("https://ymkw.top/month/2025/1"))
            ),
            TrustTier::TrustedWebsite
        );
        assert_eq!(
            classify(
                &policy,
                &signals(None, None, Some("https://evil.example/?https://ymkw.top"))
            ),
            TrustTier::Untrusted
        );
    }

    #[test]
    fn referer_matches_on_domain_regardless_of_scheme_or_port() {
        let policy = policy();
        for referer in [
            "http://ymkw.top/month/2025/1",
            "https://ymkw.top:8443/month/2025/1",
            "https://www.ymkw.top/",
            "http://preview.pages.dev/channels",
        ] {
            assert_eq!(
                classify(&policy, &signals(None, None, Some(referer))),
                TrustTier::TrustedWebsite,
                "{referer}"
            );
        }
        for referer in [
            "https://notymkw.top/",
            "https://ymkw.top.evil.example/",
            "not a url",
        ] {
            assert_eq!(
                classify(&policy, &signals(None, None, Some(referer))),
                TrustTier::Untrusted,
                "{referer}"
            );
        }
    }

    #[test]
    fn no_signals_is_untrusted() {
        assert_eq!(
            classify(&policy(), &RequestSignals::default()),
            TrustTier::Untrusted
        );
    }
}
