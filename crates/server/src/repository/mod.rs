pub mod mutations;
pub mod storage;

pub use mutations::{CreateRepositoryInput, create_repository_raw, grant_access_raw};
pub use storage::RepositoryStorage;
