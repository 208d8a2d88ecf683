pub mod password;
pub mod store;

pub use store::{NewUser, SqliteAccessStore};
