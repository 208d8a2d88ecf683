//! Authentication and authorization gate for git routes.

pub mod gate;
pub mod resolver;
pub mod store;

pub use gate::{AccessRequest, Authorized, ResolvedIdentity, authorize, has_pusher, requested_mode};
pub use resolver::{Credential, Identity, IdentityResolver, Resolution};
pub use store::{AccessMode, AccessStore, AccessToken, Account, RepositoryRecord, Unit, token_digest};
