use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Point-in-time resource usage of a worker process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// Resource monitor for worker processes
pub struct ResourceMonitor {
    system: System,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Sample CPU and memory usage for a single process
    ///
    /// # Returns
    /// * `Some(ResourceSample)` - Process exists
    /// * `None` - Process is gone
    pub fn sample(&mut self, pid: u32) -> Option<ResourceSample> {
        let sys_pid = Pid::from_u32(pid);

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        self.system.process(sys_pid).map(|process| ResourceSample {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
        })
    }

    /// Check if a process is still present in the process table
    pub fn is_process_alive(&mut self, pid: u32) -> bool {
        self.sample(pid).is_some()
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
