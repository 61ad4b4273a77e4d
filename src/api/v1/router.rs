use super::handler;
use super::handler::{CallbackQuery, DataQuery, LoginQuery};
use crate::server::Server;
use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let register = warp::post()
        .and(warp::path("register"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with(server.session_manager.clone()))
        .and_then(handler::register);

    let login = warp::get()
        .and(warp::path("login"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::query::<LoginQuery>())
        .and(with(server.session_manager.clone()))
        .and_then(handler::login);

    let callback = warp::get()
        .and(warp::path("callback"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::query::<CallbackQuery>())
        .and(with(server.session_manager.clone()))
        .and_then(handler::callback);

    let status = warp::get()
        .and(warp::path("status"))
        .and(warp::path::param::<String>())
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(with(server.session_manager.clone()))
        .and_then(handler::status);

    let disconnect = warp::post()
        .and(warp::path("disconnect"))
        .and(warp::path::param::<String>())
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(with(server.session_manager.clone()))
        .and_then(handler::disconnect);

    let resync = warp::post()
        .and(warp::path("admin"))
        .and(warp::path("resync"))
        .and(warp::path::end())
        .and(with(server.session_manager.clone()))
        .and_then(handler::resync);

    let totp = warp::get()
        .and(warp::path("totp"))
        .and(warp::path::param::<String>())
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(with(server.session_manager.clone()))
        .and_then(handler::totp_preview);

    let sessions = warp::get()
        .and(warp::path("sessions"))
        .and(warp::path::end())
        .and(with(server.session_manager.clone()))
        .and_then(handler::list_sessions);

    // Catch-all data route; keep it last so the named prefixes win.
    let data = warp::get()
        .and(warp::path::param::<String>())
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::query::<DataQuery>())
        .and(with(server.broker_api.clone()))
        .and_then(handler::broker_data);

    register
        .or(login)
        .or(callback)
        .or(status)
        .or(disconnect)
        .or(resync)
        .or(totp)
        .or(sessions)
        .or(data)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}
