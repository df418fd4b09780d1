//! API module
//!
//! HTTP API endpoints, extractors and middleware.

pub mod extractors;
pub mod middleware;
pub mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
