pub mod chrome;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod js_templates;
pub mod output;
pub mod server;
pub mod timeouts;

pub use config::{Config, ServerConfig};
pub use error::{ErrorCode, TabError};

pub type Result<T> = std::result::Result<T, TabError>;
