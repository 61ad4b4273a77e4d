mod credential_repo_memory;
mod session_cache_memory;
mod session_repo_memory;
mod upstream_fake;

pub use credential_repo_memory::*;
pub use session_cache_memory::*;
pub use session_repo_memory::*;
pub use upstream_fake::*;
