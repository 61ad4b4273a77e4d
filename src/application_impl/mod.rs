mod broker_api_impl;
mod partner_consent_driver;
mod password_totp_driver;
mod redirect_oauth_driver;
mod session_manager_impl;

pub mod totp;

pub use broker_api_impl::*;
pub use partner_consent_driver::*;
pub use password_totp_driver::*;
pub use redirect_oauth_driver::*;
pub use session_manager_impl::*;
