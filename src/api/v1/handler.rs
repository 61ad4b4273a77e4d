use super::error::*;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::BrokerOp;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use warp::{self, reject};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiFailure>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(failure: ApiFailure) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(failure),
        }
    }
}

fn parse_broker(name: &str) -> Result<Broker, warp::Rejection> {
    Broker::from_str(name).map_err(|_| reject::custom(ApiFailure::unknown_broker(name)))
}

fn parse_op(name: &str) -> Result<BrokerOp, warp::Rejection> {
    BrokerOp::from_str(name).map_err(|_| reject::custom(ApiFailure::unknown_operation(name)))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub client_id: Option<String>,
    #[serde(alias = "direct_access_token")]
    pub access_token: Option<String>,
    #[serde(alias = "totp_secret")]
    pub totp_seed: Option<String>,
    #[serde(alias = "login_password")]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub broker: Broker,
    pub user_id: String,
}

pub async fn register(
    broker: String,
    body: RegisterRequest,
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let broker = parse_broker(&broker)?;
    let credential = Credential {
        broker,
        external_user_id: body.user_id.clone().into(),
        api_key: body.api_key,
        api_secret: body.api_secret,
        client_id: body.client_id,
        direct_access_token: body.access_token,
        totp_seed: body.totp_seed,
        login_password: body.password,
    };
    manager
        .register_credential(credential)
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(RegisterResponse {
        broker,
        user_id: body.user_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub user_id: String,
}

pub async fn login(
    broker: String,
    query: LoginQuery,
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let broker = parse_broker(&broker)?;
    let key = SessionKey::new(broker, query.user_id);
    let result = manager
        .start_login(&key)
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(result)))
}

/// One query shape for every protocol's callback: the OAuth leg sends
/// request_token + state, the consent leg sends tokenId, and the
/// upstream's spelling of tokenId varies.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub user_id: String,
    pub request_token: Option<String>,
    #[serde(alias = "tokenId", alias = "tokenid")]
    pub token_id: Option<String>,
    pub state: Option<String>,
}

pub async fn callback(
    broker: String,
    query: CallbackQuery,
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let broker = parse_broker(&broker)?;
    let key = SessionKey::new(broker, query.user_id);
    let callback = LoginCallback {
        request_token: query.request_token,
        consent_token: query.token_id,
        state: query.state,
    };
    let session = manager
        .complete_login(&key, callback)
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(session)))
}

pub async fn status(
    broker: String,
    user_id: String,
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let broker = parse_broker(&broker)?;
    let key = SessionKey::new(broker, user_id);
    let status = manager
        .status(&key)
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(status)))
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub broker: Broker,
    pub user_id: String,
}

pub async fn disconnect(
    broker: String,
    user_id: String,
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let broker = parse_broker(&broker)?;
    let key = SessionKey::new(broker, user_id.clone());
    manager
        .disconnect(&key)
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(DisconnectResponse {
        broker,
        user_id,
    })))
}

pub async fn resync(
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let report = manager
        .resync()
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(report)))
}

pub async fn totp_preview(
    broker: String,
    user_id: String,
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let broker = parse_broker(&broker)?;
    let key = SessionKey::new(broker, user_id);
    let preview = manager
        .totp_preview(&key)
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(preview)))
}

pub async fn list_sessions(
    manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let sessions = manager
        .list_sessions()
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(sessions)))
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub user_id: String,
}

pub async fn broker_data(
    broker: String,
    op: String,
    query: DataQuery,
    api: Arc<dyn BrokerApi>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let broker = parse_broker(&broker)?;
    let op = parse_op(&op)?;
    let key = SessionKey::new(broker, query.user_id);
    let data = api
        .call(&key, op)
        .await
        .map_err(ApiFailure::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(data)))
}
