//! Worker memory introspection.

use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, System};

/// Reports the worker's memory against its configured limit.
///
/// - total: resident memory of this process
/// - max: the configured limit, or physical memory when none was given
/// - free: headroom between the two
#[derive(Debug)]
pub struct MemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    limit_bytes: Option<u64>,
}

impl MemoryProbe {
    /// Probe for the current process with an optional limit in MiB.
    #[must_use]
    pub fn new(limit_mb: Option<u64>) -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            limit_bytes: limit_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
        }
    }

    /// Resident memory of this process, in bytes.
    #[must_use]
    pub fn total_memory(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map_or(0, sysinfo::Process::memory)
    }

    /// Memory limit, in bytes.
    #[must_use]
    pub fn max_memory(&self) -> u64 {
        if let Some(limit) = self.limit_bytes {
            return limit;
        }
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        system.total_memory()
    }

    /// Headroom below the limit, in bytes.
    #[must_use]
    pub fn free_memory(&self) -> u64 {
        self.max_memory().saturating_sub(self.total_memory())
    }
}
