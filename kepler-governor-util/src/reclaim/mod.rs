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

/// trim_heap asks the allocator to return freed heap pages to the OS,
/// shrinking the resident working set of the current process.
pub fn trim_heap() -> Result<()> {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // malloc_trim returns 1 if memory was actually released.
        let released = unsafe { libc::malloc_trim(0) };
        tracing::debug!("malloc_trim released memory: {}", released == 1);
        return Ok(());
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        use kepler_governor_core::Error;
        Err(Error::Unsupported("heap trim".to_string()))
    }
}
