/*
 *     Copyright 2025 The Kepler Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use kepler_governor_core::{Error, Result};
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

/// Represents CPU and memory statistics for a process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStats {
    /// CPU usage percentage of the process (0.0 - 100.0 per core).
    pub cpu_percent: f64,

    /// Resident set size of the process in bytes.
    pub memory_bytes: u64,
}

/// ProcessProbe reads CPU and memory statistics for a single process.
///
/// The probe keeps its [System] between reads, CPU usage is derived from the
/// delta between two successive refreshes.
#[derive(Debug)]
pub struct ProcessProbe {
    /// Pid of the probed process.
    pid: Pid,

    /// System holds the refreshed process table.
    system: System,
}

impl ProcessProbe {
    /// new returns a new ProcessProbe for the given pid.
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_u32(pid),
            system: System::new_with_specifics(Self::refresh_kind()),
        }
    }

    /// probe refreshes and returns the process statistics.
    pub fn probe(&mut self) -> Result<ProcessStats> {
        self.system.refresh_specifics(Self::refresh_kind());

        let process = self
            .system
            .process(self.pid)
            .ok_or(Error::ProcessNotFound(self.pid.as_u32()))?;

        Ok(ProcessStats {
            cpu_percent: process.cpu_usage() as f64,
            memory_bytes: process.memory(),
        })
    }

    /// refresh_kind returns the refresh kind covering process CPU and memory.
    fn refresh_kind() -> RefreshKind {
        RefreshKind::new().with_processes(ProcessRefreshKind::new().with_cpu().with_memory())
    }
}
