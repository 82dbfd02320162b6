pub mod adapter;
pub mod daemon;
pub mod ipc;
pub mod protocol;

pub use daemon::{Daemon, DaemonConfig, default_socket_path};
pub use ipc::IpcServer;
pub use protocol::{Request, Response};
