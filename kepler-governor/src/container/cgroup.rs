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

use super::Container;
use cgroups_rs::fs::cpu::CpuController;
use cgroups_rs::fs::memory::MemController;
use cgroups_rs::fs::{hierarchies, Cgroup};
use cgroups_rs::CgroupPid;
use kepler_governor_core::{
    error::{ErrorType, OrErr},
    Error, Result,
};
use tracing::info;

/// CGROUP_NAME is the cgroup created for the governed process.
const CGROUP_NAME: &str = "kepler-governor";

/// DEFAULT_CFS_PERIOD is the CFS scheduler period in microseconds.
const DEFAULT_CFS_PERIOD: u64 = 100_000;

/// CPU_RATE_UNITS_PER_PERCENT is the granularity of the CPU rate control,
/// expressed in 1/100ths of a percent of one CPU.
const CPU_RATE_UNITS_PER_PERCENT: u64 = 100;

/// CgroupContainer is the Linux kernel container, a cgroup holding the
/// governed process and its children under shared CPU and memory ceilings.
pub struct CgroupContainer {
    /// cgroup is the kernel cgroup handle.
    cgroup: Cgroup,
}

impl CgroupContainer {
    /// new creates the cgroup and attaches the given process to it.
    pub fn new(pid: u32) -> Result<Self> {
        let cgroup = Cgroup::new(hierarchies::auto(), CGROUP_NAME)
            .or_context(ErrorType::ContainerError, "create cgroup")?;
        cgroup
            .add_task_by_tgid(CgroupPid::from(pid as u64))
            .or_context(ErrorType::ContainerError, "attach process")?;

        info!("attached pid {} to cgroup {}", pid, CGROUP_NAME);
        Ok(Self { cgroup })
    }
}

impl Container for CgroupContainer {
    fn is_enforcing(&self) -> bool {
        true
    }

    fn set_cpu_limit(&self, percent: u8) -> Result<()> {
        let controller = self
            .cgroup
            .controller_of::<CpuController>()
            .ok_or_else(|| Error::Unsupported("cgroup cpu controller".to_string()))?;

        // The rate control is expressed in 1/100ths of a percent, mapped onto
        // a CFS quota against the default period.
        let rate = percent as u64 * CPU_RATE_UNITS_PER_PERCENT;
        let quota = DEFAULT_CFS_PERIOD * rate / (100 * CPU_RATE_UNITS_PER_PERCENT);

        controller
            .set_cfs_period(DEFAULT_CFS_PERIOD)
            .or_err(ErrorType::ContainerError)?;
        controller
            .set_cfs_quota(quota as i64)
            .or_err(ErrorType::ContainerError)?;
        Ok(())
    }

    fn set_memory_limit(&self, bytes: u64) -> Result<()> {
        let controller = self
            .cgroup
            .controller_of::<MemController>()
            .ok_or_else(|| Error::Unsupported("cgroup memory controller".to_string()))?;

        controller
            .set_limit(bytes as i64)
            .or_err(ErrorType::ContainerError)?;
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        self.cgroup.delete().or_err(ErrorType::ContainerError)?;
        info!("cgroup {} deleted", CGROUP_NAME);
        Ok(())
    }
}
