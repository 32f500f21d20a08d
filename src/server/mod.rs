mod activity_routes;
pub mod config;
mod conflict_routes;
mod http_layers;
mod import_routes;
mod job_routes;
mod lesson_routes;
pub mod metrics;
mod responses;
pub mod server;
pub(self) mod session;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use session::HEADER_USER_ID_KEY;
pub use state::ServerState;
