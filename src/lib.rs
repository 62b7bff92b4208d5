pub mod audit;
pub mod browser;
pub mod config;
pub mod devices;
pub mod error;
pub mod logs;
pub mod port;
pub mod screenshot;
pub mod server;
pub mod timeouts;
pub mod utils;

pub use config::{Config, ServerConfig, Settings};
pub use error::BridgeError;
pub use server::Server;

pub type Result<T> = std::result::Result<T, BridgeError>;
