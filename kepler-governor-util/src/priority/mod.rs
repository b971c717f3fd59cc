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

/// NORMAL_NICENESS is the default scheduling priority of a process.
pub const NORMAL_NICENESS: i32 = 0;

/// BELOW_NORMAL_NICENESS is the below-normal priority applied while a
/// ceiling is configured or breached.
pub const BELOW_NORMAL_NICENESS: i32 = 10;

/// MAX_NICENESS is the lowest scheduling priority on POSIX systems.
pub const MAX_NICENESS: i32 = 19;

/// step_down returns the niceness one step lower in priority than the given
/// value, clamped at [MAX_NICENESS].
pub fn step_down(niceness: i32) -> i32 {
    (niceness + 1).min(MAX_NICENESS)
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
mod imp {
    use kepler_governor_core::Result;

    #[cfg(target_os = "linux")]
    fn errno_ptr() -> *mut libc::c_int {
        unsafe { libc::__errno_location() }
    }

    #[cfg(target_os = "macos")]
    fn errno_ptr() -> *mut libc::c_int {
        unsafe { libc::__error() }
    }

    /// niceness returns the scheduling priority of the current process.
    pub fn niceness() -> Result<i32> {
        // getpriority can legitimately return -1, so errno must be cleared
        // before the call to distinguish it from a failure.
        unsafe { *errno_ptr() = 0 };
        let priority = unsafe { libc::getpriority(libc::PRIO_PROCESS as _, 0 as _) };
        if priority == -1 && unsafe { *errno_ptr() } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        Ok(priority)
    }

    /// set_niceness sets the scheduling priority of the current process.
    pub fn set_niceness(niceness: i32) -> Result<()> {
        if unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0 as _, niceness as _) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        Ok(())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod imp {
    use kepler_governor_core::{Error, Result};

    /// niceness returns the scheduling priority of the current process.
    pub fn niceness() -> Result<i32> {
        Err(Error::Unsupported("process priority".to_string()))
    }

    /// set_niceness sets the scheduling priority of the current process.
    pub fn set_niceness(_niceness: i32) -> Result<()> {
        Err(Error::Unsupported("process priority".to_string()))
    }
}

/// niceness returns the scheduling priority of the current process. A higher
/// value means a lower priority.
pub fn niceness() -> Result<i32> {
    imp::niceness()
}

/// set_niceness sets the scheduling priority of the current process. Raising
/// priority back up usually needs elevated privileges, callers are expected
/// to treat failures as non-fatal.
pub fn set_niceness(niceness: i32) -> Result<()> {
    imp::set_niceness(niceness)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_down_moves_one_notch() {
        assert_eq!(step_down(NORMAL_NICENESS), 1);
        assert_eq!(step_down(BELOW_NORMAL_NICENESS), 11);
    }

    #[test]
    fn step_down_clamps_at_max() {
        assert_eq!(step_down(18), MAX_NICENESS);
        assert_eq!(step_down(MAX_NICENESS), MAX_NICENESS);
        assert_eq!(step_down(25), MAX_NICENESS);
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn niceness_is_readable() {
        let niceness = niceness().unwrap();
        assert!((-20..=MAX_NICENESS).contains(&niceness));
    }
}
