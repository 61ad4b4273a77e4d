mod consent_gateway_http;
mod oauth_gateway_http;
mod totp_gateway_http;
mod util;

pub use consent_gateway_http::*;
pub use oauth_gateway_http::*;
pub use totp_gateway_http::*;
