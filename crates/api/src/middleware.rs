use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chatrank_domain::access::{Admission, RequestSignals, TrustTier};
use chatrank_domain::rate_limit::ClientIdentity;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

use crate::error::ApiError;
use crate::observability;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string();
        let value = HeaderValue::from_str(&id).ok()?;
        Some(RequestId::new(value))
    }
}

pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http().make_span_with(RequestSpan)
}

#[derive(Clone, Default)]
pub(crate) struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let request_id_header = HeaderName::from_static("x-request-id");
        let request_id = req
            .headers()
            .get(&request_id_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id
        )
    }
}

pub fn set_request_id_layer() -> SetRequestIdLayer<UuidRequestId> {
    SetRequestIdLayer::x_request_id(UuidRequestId)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

pub fn timeout_layer() -> TimeoutLayer {
    TimeoutLayer::new(Duration::from_secs(30))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Caller identity for rate limiting: the configured proxy header, then the
/// peer address.
pub(crate) fn client_identity(req: &Request<Body>, ip_header: &str) -> ClientIdentity {
    if let Some(forwarded) = header_str(req.headers(), ip_header) {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return ClientIdentity::new(first);
        }
    }
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => ClientIdentity::new(addr.ip().to_string()),
        None => ClientIdentity::new("unknown"),
    }
}

/// Classifies the caller, enforces the rate limit and records the admitted
/// tier for downstream handlers.
pub async fn access_gate_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let identity = client_identity(&req, &state.config.client_ip_header);
    let path = req.uri().path().to_string();
    let headers = req.headers();
    let signals = RequestSignals {
        api_key: header_str(headers, API_KEY_HEADER),
        origin: header_str(headers, header::ORIGIN.as_str()),
        referer: header_str(headers, header::REFERER.as_str()),
    };

    let decision = state.gate.admit(&path, &signals, &identity).await;
    match decision {
        Ok(admission) => {
            req.extensions_mut().insert(admission);
            next.run(req).await
        }
        Err(rejection) => {
            tracing::warn!(identity = %identity, path = %path, reason = rejection.as_str(), "request rejected");
            observability::register_gate_rejection(rejection.as_str());
            ApiError::from(rejection).into_response()
        }
    }
}

pub async fn require_trusted_bot_middleware(req: Request<Body>, next: Next) -> Response {
    let trusted_bot = req
        .extensions()
        .get::<Admission>()
        .map(|admission| admission.tier == TrustTier::TrustedBot)
        .unwrap_or(false);
    if trusted_bot {
        next.run(req).await
    } else {
        observability::register_gate_rejection("not_trusted_bot");
        ApiError::AccessDenied.into_response()
    }
}

pub async fn metrics_layer(req: Request<Body>, next: Next) -> Response {
    let start = std::time::Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let response = next.run(req).await;
    let status = response.status();
    observability::register_http_request(&method, &route, status, start.elapsed());
    response
}
