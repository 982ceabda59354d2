// Health module - probes, the scanner and the registry of latest verdicts

pub mod probe;
pub mod registry;
pub mod scanner;
pub mod worker;

pub use probe::{DependencyProbe, Probe, ProbeReport};
pub use registry::{ComponentKind, HealthMetrics, HealthRecord, HealthRegistry, HealthStatus};
pub use scanner::{HealthScanner, ScanTarget};
pub use worker::{ActivityReport, Liveness, WorkerProbe, WorkerSource, WorkerView};
