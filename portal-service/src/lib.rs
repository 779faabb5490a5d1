pub mod auth;
pub mod config;
pub mod error;
pub mod forecast;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod sinks;
pub mod sources;
pub mod state;
pub mod transform;
pub mod views;

pub use pipeline::{Envelope, Pipeline};
pub use state::AppState;
