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

use kepler_governor_core::Result;
use std::sync::Arc;

#[cfg(target_os = "linux")]
pub mod cgroup;

/// Container is the kernel grouping primitive that enforces hard resource
/// ceilings on the governed process and its children. The concrete
/// implementation is selected once at startup, callers never branch on the
/// platform per call.
pub trait Container: Send + Sync {
    /// is_enforcing returns true if the container can actually enforce
    /// limits, false for the no-op fallback.
    fn is_enforcing(&self) -> bool;

    /// set_cpu_limit caps the CPU utilization of the container, in percent
    /// of one full CPU.
    fn set_cpu_limit(&self, percent: u8) -> Result<()>;

    /// set_memory_limit caps the memory usage of the container, in bytes.
    fn set_memory_limit(&self, bytes: u64) -> Result<()>;

    /// terminate releases the container and any processes grouped under it.
    fn terminate(&self) -> Result<()>;
}

/// NoopContainer is the fallback for platforms without a kernel container
/// primitive. Enforcement degrades to priority adjustment and heap
/// reclamation only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopContainer;

impl Container for NoopContainer {
    fn is_enforcing(&self) -> bool {
        false
    }

    fn set_cpu_limit(&self, _percent: u8) -> Result<()> {
        Ok(())
    }

    fn set_memory_limit(&self, _bytes: u64) -> Result<()> {
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        Ok(())
    }
}

/// new_container creates the platform container and attaches the given
/// process to it. Creation failure is recorded once and degrades to the
/// no-op container for the process lifetime.
#[allow(unused_variables)]
pub fn new_container(pid: u32) -> Arc<dyn Container> {
    #[cfg(target_os = "linux")]
    {
        match cgroup::CgroupContainer::new(pid) {
            Ok(container) => return Arc::new(container),
            Err(err) => {
                tracing::warn!(
                    "create cgroup for pid {} failed, falling back to priority-only enforcement: {}",
                    pid, err
                );
            }
        }
    }

    Arc::new(NoopContainer)
}
