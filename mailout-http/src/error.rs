//! Error types for the submission endpoint

use axum::{
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use mailout_delivery::Admission;
use thiserror::Error;

use crate::reply::Reply;

/// Errors that can occur while starting or running the listener
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("Failed to bind submission server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// The listener failed while serving
    #[error("Submission server error: {0}")]
    ServerError(String),
}

/// Reasons a submission is turned away, each mapped to a status code
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("Too many requests, retry in {} seconds", retry_after_secs(.0))]
    RateLimited(Admission),

    #[error("Malformed form: {0}")]
    MalformedForm(String),

    #[error("Invalid email address: {0:?}")]
    InvalidEmail(String),

    #[error("Not found")]
    NotFound,

    #[error("Service is shutting down")]
    QueueClosed,
}

impl HttpError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::MalformedForm(_) => StatusCode::BAD_REQUEST,
            Self::InvalidEmail(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Whole seconds until the next token, rounded up.
fn retry_after_secs(admission: &Admission) -> u64 {
    let retry = admission.retry_after;
    retry.as_secs() + u64::from(retry.subsec_nanos() > 0)
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = Reply::error(status, self.to_string()).into_response();
        let headers = response.headers_mut();

        match &self {
            Self::MethodNotAllowed(_) => {
                headers.insert(header::ALLOW, HeaderValue::from_static("POST"));
            }
            Self::RateLimited(admission) => {
                headers.insert("x-rate-limit-limit", admission.limit.into());
                headers.insert("x-rate-limit-remaining", admission.remaining.into());
                headers.insert("x-rate-limit-reset", retry_after_secs(admission).into());
            }
            _ => {}
        }

        response
    }
}
