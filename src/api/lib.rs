//! Crate serving the coordinator's control-plane API
#[macro_use]
extern crate tracing;

pub mod error;
pub use error::Error;

pub mod api_server;
pub mod helpers;
pub mod router;
pub mod types;

pub use api_server::CoordinatorApiServer;
