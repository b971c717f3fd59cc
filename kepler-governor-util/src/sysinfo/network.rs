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

use sysinfo::Networks;

/// Represents cumulative host-wide network counters, summed over all
/// interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    /// Total bytes transmitted since boot.
    pub bytes_sent: u64,

    /// Total bytes received since boot.
    pub bytes_recv: u64,
}

/// NetworkProbe reads host-wide network counters.
pub struct NetworkProbe {
    /// Networks holds the refreshed interface list.
    networks: Networks,
}

impl NetworkProbe {
    /// new returns a new NetworkProbe.
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }

    /// probe refreshes and returns the cumulative counters. Reading the
    /// counters cannot fail, interfaces that disappear simply stop
    /// contributing to the totals.
    pub fn probe(&mut self) -> NetworkCounters {
        self.networks.refresh();

        let mut counters = NetworkCounters::default();
        for (_, data) in &self.networks {
            counters.bytes_sent += data.total_transmitted();
            counters.bytes_recv += data.total_received();
        }

        counters
    }
}

/// Default implements the Default trait.
impl Default for NetworkProbe {
    /// Returns a new default NetworkProbe.
    fn default() -> Self {
        Self::new()
    }
}
