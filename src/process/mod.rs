// Process module - worker process handles, lifecycle states and resource sampling

pub mod handle;
pub mod monitor;
pub mod state;

pub use handle::{parse_signal, ProcessExit, ProcessHandle};
pub use monitor::{ResourceMonitor, ResourceSample};
pub use state::WorkerState;
