pub mod config;
mod http_layers;
mod jobs_routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub(self) use jobs_routes::jobs_routes;
pub use jobs_routes::ErrorResponse;
pub use server::{make_app, run_server};
