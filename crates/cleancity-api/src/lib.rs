//! CleanCity API crate - axum HTTP server, JSON-RPC tool server and the
//! shared operations both surfaces call.

pub mod error;
pub mod handlers;
pub mod params;
pub mod rate_limit;
pub mod routes;
pub mod rpc;
pub mod state;
pub mod tools;
pub mod workflow;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
