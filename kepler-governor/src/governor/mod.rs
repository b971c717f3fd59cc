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

use crate::container::Container;
use crate::shutdown;
use kepler_governor_config::governord::Config;
use kepler_governor_core::Result;
use kepler_governor_util::priority;
use kepler_governor_util::reclaim;
use kepler_governor_util::sysinfo::network::{NetworkCounters, NetworkProbe};
use kepler_governor_util::sysinfo::process::ProcessProbe;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

/// BYTES_PER_MB is the number of bytes in a megabyte.
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// ResourceLimits is the set of administrator-configured ceilings. An unset
/// field means the resource is unlimited; zero is a valid, meaningful
/// ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimits {
    /// Cpu percent is the ceiling on process CPU utilization.
    pub cpu_percent: Option<u8>,

    /// Memory bytes is the ceiling on resident set size.
    pub memory_bytes: Option<u64>,

    /// Network bytes per sec is the ceiling on outbound byte rate. It is the
    /// only channel through which the bandwidth limiter learns the cap.
    pub network_bytes_per_sec: Option<u64>,
}

/// SharedLimits is the guarded limits value shared between the
/// administrative setters, the enforcer task and the bandwidth limiter.
pub type SharedLimits = Arc<RwLock<ResourceLimits>>;

/// UsageSample is one tick of observed resource usage, published for the
/// hosting shell once per sample interval and never persisted.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSample {
    /// CPU usage percentage of the process.
    pub cpu_percent: f64,

    /// Resident set size of the process in megabytes.
    pub memory_mb: f64,

    /// Host-wide outbound rate in megabytes per second.
    pub network_sent_mbps: f64,

    /// Host-wide inbound rate in megabytes per second.
    pub network_recv_mbps: f64,
}

/// EnforcementAction is one corrective action decided by an enforcement
/// pass. Actions are recomputed from scratch each tick, there is no
/// persistent violation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementAction {
    /// Ask the allocator to return freed heap pages to the OS.
    ReclaimMemory,

    /// Drop the process to below-normal scheduling priority.
    LowerPriority,

    /// Move the process one niceness step toward the POSIX maximum.
    StepDownPriority,

    /// Bring the process back to normal scheduling priority.
    RestorePriority,
}

/// enforcement_actions compares one usage sample against the configured
/// ceilings and returns the corrective actions for this tick. Unset ceilings
/// never contribute an action.
pub(crate) fn enforcement_actions(
    limits: &ResourceLimits,
    sample: &UsageSample,
    symmetric_priority_restore: bool,
) -> Vec<EnforcementAction> {
    let mut actions = Vec::new();

    if let Some(limit) = limits.memory_bytes {
        if sample.memory_mb * BYTES_PER_MB > limit as f64 {
            actions.push(EnforcementAction::ReclaimMemory);
            actions.push(EnforcementAction::LowerPriority);
        } else {
            actions.push(EnforcementAction::RestorePriority);
        }
    }

    if let Some(limit) = limits.cpu_percent {
        if sample.cpu_percent > limit as f64 {
            actions.push(EnforcementAction::StepDownPriority);
        } else if symmetric_priority_restore
            && !actions.contains(&EnforcementAction::RestorePriority)
        {
            actions.push(EnforcementAction::RestorePriority);
        }
    }

    actions
}

/// network_rates converts two successive cumulative counters and the
/// wall-clock interval between them into byte rates per second.
pub(crate) fn network_rates(
    last: &NetworkCounters,
    current: &NetworkCounters,
    elapsed: Duration,
) -> (f64, f64) {
    let elapsed = elapsed.as_secs_f64();
    if elapsed <= 0.0 {
        return (0.0, 0.0);
    }

    (
        current.bytes_sent.saturating_sub(last.bytes_sent) as f64 / elapsed,
        current.bytes_recv.saturating_sub(last.bytes_recv) as f64 / elapsed,
    )
}

/// ResourceGovernor observes and bounds the CPU, memory and network
/// consumption of one process. Hard caps are delegated to the kernel
/// container when the platform provides one, with scheduling priority and
/// heap reclamation as the software fallback.
pub struct ResourceGovernor {
    /// config is the configuration of governord.
    config: Arc<Config>,

    /// limits is the guarded ceilings value shared with the bandwidth
    /// limiter.
    limits: SharedLimits,

    /// container is the kernel container for the governed process.
    container: Arc<dyn Container>,

    /// sample_tx publishes the latest usage sample.
    sample_tx: watch::Sender<UsageSample>,

    /// shutdown is used to shutdown the governor tasks.
    shutdown: shutdown::Shutdown,

    /// _shutdown_complete is used to notify that the governor is shutdown.
    _shutdown_complete: mpsc::UnboundedSender<()>,
}

impl ResourceGovernor {
    /// new creates a new ResourceGovernor seeded with the configured
    /// ceilings.
    pub fn new(
        config: Arc<Config>,
        container: Arc<dyn Container>,
        shutdown: shutdown::Shutdown,
        shutdown_complete_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        let (sample_tx, _) = watch::channel(UsageSample::default());
        let governor = Self {
            config: config.clone(),
            limits: Arc::new(RwLock::new(ResourceLimits::default())),
            container,
            sample_tx,
            shutdown,
            _shutdown_complete: shutdown_complete_tx,
        };

        // Seed the ceilings from the configuration.
        governor.set_cpu_limit(config.limits.cpu_percent);
        governor.set_memory_limit(config.limits.memory_mb);
        governor.set_network_limit(config.limits.network_kbps);
        governor
    }

    /// limits returns the shared ceilings value, read by the bandwidth
    /// limiter.
    pub fn limits(&self) -> SharedLimits {
        self.limits.clone()
    }

    /// subscribe returns a receiver of the published usage samples.
    pub fn subscribe(&self) -> watch::Receiver<UsageSample> {
        self.sample_tx.subscribe()
    }

    /// set_cpu_limit stores the CPU ceiling and applies it to the container
    /// when one is available, otherwise lowers process priority one notch as
    /// an approximation. It never fails the caller, a rejected OS call is
    /// logged and the ceiling stays recorded for the enforcer.
    #[instrument(skip_all)]
    pub fn set_cpu_limit(&self, percent: Option<u8>) {
        self.limits
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cpu_percent = percent;

        let Some(percent) = percent else {
            info!("cpu limit cleared");
            return;
        };

        if self.container.is_enforcing() {
            if let Err(err) = self.container.set_cpu_limit(percent) {
                error!("set container cpu limit failed: {}", err);
            }
        } else if let Err(err) = priority::set_niceness(priority::BELOW_NORMAL_NICENESS) {
            warn!("adjust process priority failed: {}", err);
        }

        info!("cpu limit set to {}%", percent);
    }

    /// set_memory_limit stores the memory ceiling in bytes and applies it to
    /// the container when one is available. Process priority is lowered
    /// independently as a behavioral proxy. Same never-fail contract as
    /// [Self::set_cpu_limit].
    #[instrument(skip_all)]
    pub fn set_memory_limit(&self, mb: Option<u64>) {
        let bytes = mb.map(|mb| mb * 1024 * 1024);
        self.limits
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .memory_bytes = bytes;

        let Some(bytes) = bytes else {
            info!("memory limit cleared");
            return;
        };

        if self.container.is_enforcing() {
            if let Err(err) = self.container.set_memory_limit(bytes) {
                error!("set container memory limit failed: {}", err);
            }
        }

        if let Err(err) = priority::set_niceness(priority::BELOW_NORMAL_NICENESS) {
            warn!("adjust process priority failed: {}", err);
        }

        info!("memory limit set to {}MB", bytes / 1024 / 1024);
    }

    /// set_network_limit converts the ceiling from kilobits per second to
    /// bytes per second and stores it for the bandwidth limiter.
    #[instrument(skip_all)]
    pub fn set_network_limit(&self, kbps: Option<u64>) {
        let bytes_per_sec = kbps.map(|kbps| kbps * 1024 / 8);
        self.limits
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .network_bytes_per_sec = bytes_per_sec;

        match kbps {
            Some(kbps) => info!("network limit set to {} kbps", kbps),
            None => info!("network limit cleared"),
        }
    }

    /// run_sampler runs the usage sampler, one sample per configured
    /// interval. A failed read logs and skips the tick, the previous sample
    /// stays published and the loop never dies.
    pub async fn run_sampler(&self) {
        // Clone the shutdown channel.
        let mut shutdown = self.shutdown.clone();

        // Probes keep OS state between reads, rates are derived from the
        // delta against the previous tick.
        let mut process_probe = ProcessProbe::new(std::process::id());
        let mut network_probe = NetworkProbe::new();
        let mut last_counters = network_probe.probe();
        let mut last_time = Instant::now();

        let mut interval = tokio::time::interval(self.config.monitor.sample_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sample(&mut process_probe, &mut network_probe, last_counters, last_time) {
                        Ok((counters, time)) => {
                            last_counters = counters;
                            last_time = time;
                        }
                        Err(err) => {
                            error!("sample resource usage failed: {}", err);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("usage sampler shutting down");
                    return
                }
            }
        }
    }

    /// sample reads the process and host counters, derives rates against the
    /// previous tick and publishes a new usage sample.
    #[instrument(skip_all)]
    fn sample(
        &self,
        process_probe: &mut ProcessProbe,
        network_probe: &mut NetworkProbe,
        last_counters: NetworkCounters,
        last_time: Instant,
    ) -> Result<(NetworkCounters, Instant)> {
        let stats = process_probe.probe()?;
        let counters = network_probe.probe();
        let now = Instant::now();

        let (sent_rate, recv_rate) =
            network_rates(&last_counters, &counters, now.duration_since(last_time));

        let sample = UsageSample {
            cpu_percent: stats.cpu_percent,
            memory_mb: stats.memory_bytes as f64 / BYTES_PER_MB,
            network_sent_mbps: sent_rate / BYTES_PER_MB,
            network_recv_mbps: recv_rate / BYTES_PER_MB,
        };

        debug!(
            "sampled cpu: {:.1}%, memory: {:.1}MB, network: up {:.2}MB/s down {:.2}MB/s",
            sample.cpu_percent, sample.memory_mb, sample.network_sent_mbps, sample.network_recv_mbps
        );
        self.sample_tx.send_replace(sample);
        Ok((counters, now))
    }

    /// run_enforcer runs the limit enforcer, one pass per configured
    /// interval, comparing the last published sample against the ceilings.
    pub async fn run_enforcer(&self) {
        // Clone the shutdown channel.
        let mut shutdown = self.shutdown.clone();

        let mut sample_rx = self.sample_tx.subscribe();
        let mut interval = tokio::time::interval(self.config.monitor.enforce_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let sample = *sample_rx.borrow_and_update();
                    self.enforce(&sample);
                }
                _ = shutdown.recv() => {
                    info!("limit enforcer shutting down");
                    return
                }
            }
        }
    }

    /// enforce applies the corrective actions for one tick. A rejected OS
    /// call is logged and retried on the next tick, never propagated.
    #[instrument(skip_all)]
    fn enforce(&self, sample: &UsageSample) {
        let limits = *self.limits.read().unwrap_or_else(PoisonError::into_inner);
        for action in enforcement_actions(
            &limits,
            sample,
            self.config.monitor.symmetric_priority_restore,
        ) {
            if let Err(err) = self.apply(action, &limits, sample) {
                warn!("enforcement action {:?} failed: {}", action, err);
            }
        }
    }

    /// apply performs one corrective action against the OS.
    fn apply(
        &self,
        action: EnforcementAction,
        limits: &ResourceLimits,
        sample: &UsageSample,
    ) -> Result<()> {
        match action {
            EnforcementAction::ReclaimMemory => {
                warn!(
                    "memory usage ({:.2}MB) exceeded limit ({}MB)",
                    sample.memory_mb,
                    limits.memory_bytes.unwrap_or_default() / 1024 / 1024
                );
                reclaim::trim_heap()
            }
            EnforcementAction::LowerPriority => {
                let niceness = priority::niceness()?;
                if niceness < priority::BELOW_NORMAL_NICENESS {
                    priority::set_niceness(priority::BELOW_NORMAL_NICENESS)?;
                    info!(
                        "lowered process priority to niceness {}",
                        priority::BELOW_NORMAL_NICENESS
                    );
                }
                Ok(())
            }
            EnforcementAction::StepDownPriority => {
                warn!(
                    "cpu usage ({:.1}%) exceeded limit ({}%)",
                    sample.cpu_percent,
                    limits.cpu_percent.unwrap_or_default()
                );
                let niceness = priority::niceness()?;
                let next = priority::step_down(niceness);
                if next != niceness {
                    priority::set_niceness(next)?;
                    info!("lowered process priority to niceness {}", next);
                }
                Ok(())
            }
            EnforcementAction::RestorePriority => {
                let niceness = priority::niceness()?;
                if niceness > priority::NORMAL_NICENESS {
                    priority::set_niceness(priority::NORMAL_NICENESS)?;
                    info!("restored normal process priority");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::NoopContainer;
    use kepler_governor_config::governord::Config;

    fn new_governor(config: Config) -> ResourceGovernor {
        let (shutdown_complete_tx, _shutdown_complete_rx) = mpsc::unbounded_channel();
        ResourceGovernor::new(
            Arc::new(config),
            Arc::new(NoopContainer),
            shutdown::Shutdown::default(),
            shutdown_complete_tx,
        )
    }

    #[test]
    fn set_network_limit_converts_to_bytes_per_sec() {
        let governor = new_governor(Config::default());

        governor.set_network_limit(Some(8000));
        let limits = *governor.limits().read().unwrap();
        assert_eq!(limits.network_bytes_per_sec, Some(8000 * 1024 / 8));

        governor.set_network_limit(None);
        let limits = *governor.limits().read().unwrap();
        assert_eq!(limits.network_bytes_per_sec, None);
    }

    #[test]
    fn set_memory_limit_converts_to_bytes() {
        let governor = new_governor(Config::default());

        governor.set_memory_limit(Some(2048));
        let limits = *governor.limits().read().unwrap();
        assert_eq!(limits.memory_bytes, Some(2048 * 1024 * 1024));
    }

    #[test]
    fn zero_network_limit_is_recorded() {
        let governor = new_governor(Config::default());

        governor.set_network_limit(Some(0));
        let limits = *governor.limits().read().unwrap();
        assert_eq!(limits.network_bytes_per_sec, Some(0));
    }

    #[test]
    fn limits_seeded_from_config() {
        let mut config = Config::default();
        config.limits.cpu_percent = Some(50);
        config.limits.memory_mb = Some(1024);
        config.limits.network_kbps = Some(4000);

        let governor = new_governor(config);
        let limits = *governor.limits().read().unwrap();
        assert_eq!(limits.cpu_percent, Some(50));
        assert_eq!(limits.memory_bytes, Some(1024 * 1024 * 1024));
        assert_eq!(limits.network_bytes_per_sec, Some(4000 * 128));
    }

    #[test]
    fn unlimited_ceilings_never_trigger_actions() {
        let limits = ResourceLimits::default();
        let sample = UsageSample {
            cpu_percent: 100.0,
            memory_mb: 32768.0,
            ..Default::default()
        };

        assert!(enforcement_actions(&limits, &sample, false).is_empty());
        assert!(enforcement_actions(&limits, &sample, true).is_empty());
    }

    #[test]
    fn memory_breach_triggers_reclaim_and_priority() {
        let limits = ResourceLimits {
            memory_bytes: Some(512 * 1024 * 1024),
            ..Default::default()
        };
        let sample = UsageSample {
            memory_mb: 600.0,
            ..Default::default()
        };

        assert_eq!(
            enforcement_actions(&limits, &sample, false),
            vec![
                EnforcementAction::ReclaimMemory,
                EnforcementAction::LowerPriority
            ]
        );
    }

    #[test]
    fn memory_recovery_restores_priority() {
        let limits = ResourceLimits {
            memory_bytes: Some(512 * 1024 * 1024),
            ..Default::default()
        };
        let sample = UsageSample {
            memory_mb: 100.0,
            ..Default::default()
        };

        assert_eq!(
            enforcement_actions(&limits, &sample, false),
            vec![EnforcementAction::RestorePriority]
        );
    }

    #[test]
    fn cpu_breach_steps_priority_down() {
        let limits = ResourceLimits {
            cpu_percent: Some(50),
            ..Default::default()
        };
        let sample = UsageSample {
            cpu_percent: 80.0,
            ..Default::default()
        };

        assert_eq!(
            enforcement_actions(&limits, &sample, false),
            vec![EnforcementAction::StepDownPriority]
        );
    }

    #[test]
    fn cpu_recovery_restores_priority_only_when_symmetric() {
        let limits = ResourceLimits {
            cpu_percent: Some(50),
            ..Default::default()
        };
        let sample = UsageSample {
            cpu_percent: 10.0,
            ..Default::default()
        };

        assert!(enforcement_actions(&limits, &sample, false).is_empty());
        assert_eq!(
            enforcement_actions(&limits, &sample, true),
            vec![EnforcementAction::RestorePriority]
        );
    }

    #[test]
    fn restore_priority_is_not_duplicated() {
        let limits = ResourceLimits {
            cpu_percent: Some(50),
            memory_bytes: Some(512 * 1024 * 1024),
            ..Default::default()
        };
        let sample = UsageSample {
            cpu_percent: 10.0,
            memory_mb: 100.0,
            ..Default::default()
        };

        assert_eq!(
            enforcement_actions(&limits, &sample, true),
            vec![EnforcementAction::RestorePriority]
        );
    }

    #[test]
    fn zero_ceilings_always_enforce() {
        let limits = ResourceLimits {
            cpu_percent: Some(0),
            memory_bytes: Some(0),
            ..Default::default()
        };
        let sample = UsageSample {
            cpu_percent: 1.0,
            memory_mb: 1.0,
            ..Default::default()
        };

        let actions = enforcement_actions(&limits, &sample, false);
        assert!(actions.contains(&EnforcementAction::ReclaimMemory));
        assert!(actions.contains(&EnforcementAction::StepDownPriority));
    }

    #[test]
    fn network_rates_from_counter_deltas() {
        let last = NetworkCounters {
            bytes_sent: 1000,
            bytes_recv: 2000,
        };
        let current = NetworkCounters {
            bytes_sent: 3000,
            bytes_recv: 6000,
        };

        let (sent, recv) = network_rates(&last, &current, Duration::from_secs(2));
        assert_eq!(sent, 1000.0);
        assert_eq!(recv, 2000.0);
    }

    #[test]
    fn network_rates_tolerate_counter_reset() {
        let last = NetworkCounters {
            bytes_sent: 5000,
            bytes_recv: 5000,
        };
        let current = NetworkCounters {
            bytes_sent: 1000,
            bytes_recv: 1000,
        };

        let (sent, recv) = network_rates(&last, &current, Duration::from_secs(1));
        assert_eq!(sent, 0.0);
        assert_eq!(recv, 0.0);
    }

    #[test]
    fn network_rates_zero_elapsed() {
        let counters = NetworkCounters {
            bytes_sent: 1000,
            bytes_recv: 1000,
        };

        let (sent, recv) = network_rates(&counters, &counters, Duration::ZERO);
        assert_eq!(sent, 0.0);
        assert_eq!(recv, 0.0);
    }

    #[test]
    fn usage_sample_serializes_camel_case() {
        let sample = UsageSample {
            cpu_percent: 12.5,
            memory_mb: 256.0,
            network_sent_mbps: 1.0,
            network_recv_mbps: 2.0,
        };

        let value = serde_json::to_value(sample).unwrap();
        assert_eq!(value["cpuPercent"], 12.5);
        assert_eq!(value["memoryMb"], 256.0);
        assert_eq!(value["networkSentMbps"], 1.0);
        assert_eq!(value["networkRecvMbps"], 2.0);
    }
}
