// Library exports for the mlinzi supervisor

pub mod alert;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod ipc;
pub mod logging;
pub mod process;
pub mod state;
pub mod supervisor;
pub mod update;

pub use error::{MlinziError, Result};
pub use supervisor::Supervisor;
