// store

mod session_cache;

pub use session_cache::*;

// repo

mod credential_repo;
mod session_repo;

pub use credential_repo::*;
pub use session_repo::*;

// upstream

mod upstream;

pub use upstream::*;
