//! Best-effort resident memory sampling.
//!
//! Workers share the host process, so the sample is the process resident
//! set at the moment an attempt completes.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Samples the resident memory of the current process.
pub struct MemorySampler {
    pid: Pid,
    system: Mutex<System>,
}

impl MemorySampler {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory()),
        );

        Self {
            pid,
            system: Mutex::new(system),
        }
    }

    /// Returns resident memory in bytes, or `None` if the platform does not
    /// expose it.
    pub fn sample(&self) -> Option<u64> {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        system
            .process(self.pid)
            .map(|process| process.memory())
            .filter(|bytes| *bytes > 0)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
