mod broker;
mod credential;
mod session;

pub use broker::*;
pub use credential::*;
pub use session::*;
