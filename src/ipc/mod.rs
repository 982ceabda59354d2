// IPC module - Communication between client and daemon

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;

pub use client::{IpcClient, DEFAULT_SOCKET_PATH};
pub use handler::CommandHandler;
pub use protocol::{Command, DaemonCommand, DaemonStatus, Request, Response, ResponseData};
pub use server::IpcServer;
