pub mod connection;

pub use connection::{DaemonClient, is_daemon_running};
