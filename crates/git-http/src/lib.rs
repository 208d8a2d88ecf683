//! Git Smart/Dumb HTTP gateway.
//!
//! Requests under a repository path are matched against an ordered route
//! table, pass the access gate, and are then either proxied into a
//! stateless-RPC `git` subprocess or served as static repository files.

pub mod advertise;
pub mod auth;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod files;
pub mod pkt;
pub mod process;
pub mod repo;
pub mod routes;
pub mod rpc;
pub mod service;
pub mod settings;
pub mod state;

pub use dispatch::router;
pub use errors::GitHttpError;
pub use process::{GitBackend, GitCli};
pub use settings::{GatewaySettings, IdentitySource};
pub use state::{GatewayState, GitHttpState};
