pub mod config;
pub mod credential;
mod http_layers;
mod invoke_routes;
pub mod metrics;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub use invoke_routes::{status_code_for, REQUEST_ID_HEADER};
pub use server::{make_app, run_server};
