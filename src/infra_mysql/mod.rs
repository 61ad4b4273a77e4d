mod credential_repo_mysql;
mod session_repo_mysql;

pub use credential_repo_mysql::*;
pub use session_repo_mysql::*;
