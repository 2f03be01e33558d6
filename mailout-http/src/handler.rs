use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, header},
};
use mailout_common::{address::is_valid_email, incoming};
use mailout_delivery::{RateLimiter, RequestInfo, Submission};
use tokio::sync::mpsc;

use crate::{error::HttpError, reply::Reply};

/// Shared state behind the submission endpoint.
#[derive(Debug, Clone)]
pub struct AppState {
    limiter: Arc<RateLimiter>,
    queue: mpsc::Sender<Submission>,
    max_body_bytes: usize,
}

impl AppState {
    pub const fn new(
        limiter: Arc<RateLimiter>,
        queue: mpsc::Sender<Submission>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            limiter,
            queue,
            max_body_bytes,
        }
    }
}

/// Accept one form POST and hand it to the session worker.
///
/// Checks run in a fixed order and the first failure answers the request:
/// method, rate limit, form decoding, submitter address, then enqueue.
pub async fn submit(State(state): State<AppState>, request: Request) -> Result<Reply, HttpError> {
    if request.method() != Method::POST {
        return Err(HttpError::MethodNotAllowed(request.method().clone()));
    }

    let admission = state.limiter.admit().await;
    if !admission.allowed {
        incoming!(
            level = WARN,
            remaining = admission.remaining,
            "Submission rejected by rate limiter"
        );
        return Err(HttpError::RateLimited(admission));
    }

    let (parts, body) = request.into_parts();
    let request_info = request_info(
        &parts.headers,
        parts.uri.path(),
        parts.extensions.get::<ConnectInfo<SocketAddr>>(),
    );
    let fields = read_form(body, state.max_body_bytes).await?;
    let submission = Submission::new(fields, request_info);

    if !is_valid_email(submission.email()) {
        return Err(HttpError::InvalidEmail(submission.email().to_string()));
    }

    incoming!(
        level = INFO,
        remote = %submission.request().remote_addr,
        email = %submission.email(),
        "Accepted submission"
    );

    state
        .queue
        .send(submission)
        .await
        .map_err(|_| HttpError::QueueClosed)?;

    Ok(Reply::ok())
}

/// Any path other than the endpoint.
pub async fn not_found() -> HttpError {
    HttpError::NotFound
}

async fn read_form(body: Body, limit: usize) -> Result<Vec<(String, String)>, HttpError> {
    let bytes = to_bytes(body, limit)
        .await
        .map_err(|e| HttpError::MalformedForm(e.to_string()))?;

    check_escapes(&bytes)?;

    serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes)
        .map_err(|e| HttpError::MalformedForm(e.to_string()))
}

/// `application/x-www-form-urlencoded` decoding passes a stray `%` through
/// untouched; reject it instead.
fn check_escapes(body: &[u8]) -> Result<(), HttpError> {
    let mut rest = body;
    while let Some(at) = rest.iter().position(|&b| b == b'%') {
        match rest.get(at + 1..at + 3) {
            Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                rest = &rest[at + 3..];
            }
            _ => {
                return Err(HttpError::MalformedForm(format!(
                    "invalid percent-encoding at byte {}",
                    body.len() - rest.len() + at
                )));
            }
        }
    }

    Ok(())
}

fn request_info(
    headers: &HeaderMap,
    path: &str,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> RequestInfo {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    RequestInfo {
        remote_addr: peer.map(|ConnectInfo(addr)| addr.to_string()).unwrap_or_default(),
        user_agent: header_value(header::USER_AGENT),
        host: header_value(header::HOST),
        path: path.to_string(),
    }
}
