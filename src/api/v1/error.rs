use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    if let Some(failure) = err.find::<ApiFailure>() {
        let json = warp::reply::json(&ApiResponse::<()>::err(failure.clone()));
        Ok(warp::reply::with_status(json, failure.status()))
    } else {
        let json = warp::reply::json(&ApiResponse::<()>::err(ApiFailure {
            code: ApiErrorCode::InternalError,
            message: format!("Unhandled error: {:?}", err),
            connect_url: None,
        }));
        Ok(warp::reply::with_status(
            json,
            StatusCode::INTERNAL_SERVER_ERROR,
        ))
    }
}

#[derive(Debug, Clone, Copy, Error, Serialize)]
pub enum ApiErrorCode {
    #[error("Credential fields do not match the broker protocol")]
    InvalidCredential,
    #[error("Unknown broker")]
    UnknownBroker,
    #[error("Login state mismatch; restart the login")]
    StateMismatch,
    #[error("A login for this account is already in progress")]
    LoginInProgress,
    #[error("Broker upstream unavailable")]
    UpstreamUnavailable,
    #[error("Broker rejected the authentication")]
    AuthRejected,
    #[error("Re-authentication required")]
    ReauthRequired,
    #[error("No session or registration for this account")]
    SessionNotFound,
    #[error("Internal error")]
    InternalError,
}

/// What a failed request answers with: a stable code, a human message, and
/// for re-auth cases the login path that resumes the flow.
#[derive(Debug, Clone, Serialize)]
pub struct ApiFailure {
    pub code: ApiErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_url: Option<String>,
}

impl ApiFailure {
    pub fn status(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::InvalidCredential
            | ApiErrorCode::UnknownBroker
            | ApiErrorCode::StateMismatch => StatusCode::BAD_REQUEST,
            ApiErrorCode::LoginInProgress => StatusCode::CONFLICT,
            ApiErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ApiErrorCode::AuthRejected | ApiErrorCode::ReauthRequired => StatusCode::UNAUTHORIZED,
            ApiErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn unknown_broker(name: &str) -> Self {
        ApiFailure {
            code: ApiErrorCode::UnknownBroker,
            message: format!("Unknown broker: {name}"),
            connect_url: None,
        }
    }

    pub fn unknown_operation(name: &str) -> Self {
        ApiFailure {
            code: ApiErrorCode::SessionNotFound,
            message: format!("Unknown operation: {name}"),
            connect_url: None,
        }
    }
}

impl reject::Reject for ApiFailure {}

impl From<BrokerError> for ApiFailure {
    fn from(error: BrokerError) -> Self {
        let code = match &error {
            BrokerError::InvalidCredential { .. } => ApiErrorCode::InvalidCredential,
            BrokerError::UnknownBroker(_) => ApiErrorCode::UnknownBroker,
            BrokerError::StateMismatch => ApiErrorCode::StateMismatch,
            BrokerError::LoginInProgress => ApiErrorCode::LoginInProgress,
            BrokerError::UpstreamUnavailable { .. } => ApiErrorCode::UpstreamUnavailable,
            BrokerError::AuthRejected { .. } => ApiErrorCode::AuthRejected,
            BrokerError::ReauthRequired { .. } => ApiErrorCode::ReauthRequired,
            BrokerError::SessionNotFound => ApiErrorCode::SessionNotFound,
            BrokerError::Store(cause) | BrokerError::Internal(cause) => {
                warn!("Internal error: {cause}");
                ApiErrorCode::InternalError
            }
        };
        let connect_url = match &error {
            BrokerError::ReauthRequired { connect_url } => connect_url.clone(),
            _ => None,
        };
        let message = match code {
            ApiErrorCode::InternalError => code.to_string(),
            _ => error.to_string(),
        };
        ApiFailure {
            code,
            message,
            connect_url,
        }
    }
}
