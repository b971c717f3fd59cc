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

use kepler_governor_core::{
    error::{ErrorType, OrErr},
    Result,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::instrument;
use validator::Validate;

/// NAME is the name of governord.
pub const NAME: &str = "governord";

/// Returns the default config path for governord.
#[inline]
pub fn default_governord_config_path() -> PathBuf {
    crate::default_config_dir().join("governord.yaml")
}

/// Returns the default log directory for governord.
#[inline]
pub fn default_governord_log_dir() -> PathBuf {
    crate::default_log_dir().join(NAME)
}

/// Returns the default interval between two usage samples.
#[inline]
fn default_monitor_sample_interval() -> Duration {
    Duration::from_millis(1000)
}

/// Returns the default interval between two enforcement passes.
#[inline]
fn default_monitor_enforce_interval() -> Duration {
    Duration::from_millis(500)
}

/// Returns the default sliding window used for bandwidth accounting.
#[inline]
fn default_limiter_window() -> Duration {
    Duration::from_millis(1000)
}

/// Returns the default port of the stats server.
#[inline]
fn default_stats_server_port() -> u16 {
    4007
}

/// Limits is the resource ceiling configuration for governord. An unset field
/// means the resource is unlimited; zero is a valid ceiling.
#[derive(Debug, Clone, Copy, Default, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Limits {
    /// Cpu percent is the ceiling on process CPU utilization, in [0, 100].
    #[validate(range(max = 100))]
    pub cpu_percent: Option<u8>,

    /// Memory mb is the ceiling on resident set size, in megabytes.
    #[validate(range(max = 32768))]
    pub memory_mb: Option<u64>,

    /// Network kbps is the ceiling on outbound byte rate, in kilobits per second.
    #[validate(range(max = 1_000_000))]
    pub network_kbps: Option<u64>,
}

/// Monitor is the monitor configuration for governord.
#[derive(Debug, Clone, Copy, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Monitor {
    /// Sample interval is the interval between two usage samples.
    #[serde(
        default = "default_monitor_sample_interval",
        with = "humantime_serde"
    )]
    pub sample_interval: Duration,

    /// Enforce interval is the interval between two enforcement passes.
    #[serde(
        default = "default_monitor_enforce_interval",
        with = "humantime_serde"
    )]
    pub enforce_interval: Duration,

    /// Symmetric priority restore also restores normal scheduling priority when
    /// CPU usage drops back under its ceiling, not only when memory recovers.
    pub symmetric_priority_restore: bool,
}

/// Monitor implements Default.
impl Default for Monitor {
    fn default() -> Self {
        Self {
            sample_interval: default_monitor_sample_interval(),
            enforce_interval: default_monitor_enforce_interval(),
            symmetric_priority_restore: false,
        }
    }
}

/// Limiter is the bandwidth limiter configuration for governord.
#[derive(Debug, Clone, Copy, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Limiter {
    /// Window is the sliding window used for bandwidth accounting.
    #[serde(default = "default_limiter_window", with = "humantime_serde")]
    pub window: Duration,
}

/// Limiter implements Default.
impl Default for Limiter {
    fn default() -> Self {
        Self {
            window: default_limiter_window(),
        }
    }
}

/// StatsServer is the stats server configuration for governord.
#[derive(Debug, Clone, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsServer {
    /// IP is the listen ip of the stats server.
    pub ip: Option<IpAddr>,

    /// Port is the listen port of the stats server.
    #[serde(default = "default_stats_server_port")]
    pub port: u16,
}

/// StatsServer implements Default.
impl Default for StatsServer {
    fn default() -> Self {
        Self {
            ip: None,
            port: default_stats_server_port(),
        }
    }
}

/// Stats is the stats configuration for governord.
#[derive(Debug, Clone, Default, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Stats {
    /// Server is the stats server configuration for governord.
    #[validate]
    pub server: StatsServer,
}

/// Network is the network configuration for governord.
#[derive(Debug, Clone, Copy, Default, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Network {
    /// Enable ipv6 makes the stats server listen on the IPv6 loopback address.
    pub enable_ipv6: bool,
}

/// Config is the configuration for governord.
#[derive(Debug, Clone, Default, Validate, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Limits is the resource ceiling configuration for governord.
    #[validate]
    pub limits: Limits,

    /// Monitor is the monitor configuration for governord.
    #[validate]
    pub monitor: Monitor,

    /// Limiter is the bandwidth limiter configuration for governord.
    #[validate]
    pub limiter: Limiter,

    /// Stats is the stats configuration for governord.
    #[validate]
    pub stats: Stats,

    /// Network is the network configuration for governord.
    #[validate]
    pub network: Network,
}

impl Config {
    /// Load the configuration from file. A missing file yields the defaults,
    /// so the daemon can start without any configuration.
    #[instrument(skip_all)]
    pub async fn load(path: &PathBuf) -> Result<Config> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            serde_yaml::from_str(&content).or_err(ErrorType::ConfigError)?
        } else {
            Config::default()
        };

        // Convert configuration.
        config.convert();

        // Validate configuration.
        config.validate().or_err(ErrorType::ValidationError)?;
        Ok(config)
    }

    /// Convert converts the configuration.
    #[instrument(skip_all)]
    fn convert(&mut self) {
        // Convert stats server listen ip.
        if self.stats.server.ip.is_none() {
            self.stats.server.ip = if self.network.enable_ipv6 {
                Some(Ipv6Addr::LOCALHOST.into())
            } else {
                Some(Ipv4Addr::LOCALHOST.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn deserialize_limits_correctly() {
        let json_data = r#"
        {
            "cpuPercent": 50,
            "memoryMb": 2048,
            "networkKbps": 8000
        }"#;

        let limits: Limits = serde_json::from_str(json_data).unwrap();
        assert_eq!(limits.cpu_percent, Some(50));
        assert_eq!(limits.memory_mb, Some(2048));
        assert_eq!(limits.network_kbps, Some(8000));
    }

    #[test]
    fn deserialize_monitor_correctly() {
        let json_data = r#"
        {
            "sampleInterval": "2s",
            "enforceInterval": "250ms",
            "symmetricPriorityRestore": true
        }"#;

        let monitor: Monitor = serde_json::from_str(json_data).unwrap();
        assert_eq!(monitor.sample_interval, Duration::from_secs(2));
        assert_eq!(monitor.enforce_interval, Duration::from_millis(250));
        assert!(monitor.symmetric_priority_restore);
    }

    #[test]
    fn limits_default() {
        let limits = Limits::default();
        assert!(limits.cpu_percent.is_none());
        assert!(limits.memory_mb.is_none());
        assert!(limits.network_kbps.is_none());
    }

    #[test]
    fn monitor_default() {
        let monitor = Monitor::default();
        assert_eq!(monitor.sample_interval, default_monitor_sample_interval());
        assert_eq!(monitor.enforce_interval, default_monitor_enforce_interval());
        assert!(!monitor.symmetric_priority_restore);
    }

    #[test]
    fn stats_server_default() {
        let server = StatsServer::default();
        assert!(server.ip.is_none());
        assert_eq!(server.port, default_stats_server_port());
    }

    #[test]
    fn zero_ceilings_are_valid() {
        let json_data = r#"
        {
            "cpuPercent": 0,
            "memoryMb": 0,
            "networkKbps": 0
        }"#;

        let limits: Limits = serde_json::from_str(json_data).unwrap();
        assert_eq!(limits.cpu_percent, Some(0));
        assert_eq!(limits.memory_mb, Some(0));
        assert_eq!(limits.network_kbps, Some(0));
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_ceilings() {
        let limits = Limits {
            cpu_percent: None,
            memory_mb: Some(40960),
            network_kbps: None,
        };
        assert!(limits.validate().is_err());

        let limits = Limits {
            cpu_percent: None,
            memory_mb: None,
            network_kbps: Some(2_000_000),
        };
        assert!(limits.validate().is_err());
    }

    #[tokio::test]
    async fn load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
limits:
  cpuPercent: 25
  memoryMb: 1024
  networkKbps: 4000
monitor:
  sampleInterval: 1s
  enforceInterval: 500ms
stats:
  server:
    port: 4107
"#
        )
        .unwrap();

        let config = Config::load(&file.path().to_path_buf()).await.unwrap();
        assert_eq!(config.limits.cpu_percent, Some(25));
        assert_eq!(config.limits.memory_mb, Some(1024));
        assert_eq!(config.limits.network_kbps, Some(4000));
        assert_eq!(config.stats.server.port, 4107);
        assert!(config.stats.server.ip.is_some());
    }

    #[tokio::test]
    async fn load_missing_config_uses_defaults() {
        let config = Config::load(&PathBuf::from("/nonexistent/governord.yaml"))
            .await
            .unwrap();
        assert!(config.limits.cpu_percent.is_none());
        assert_eq!(config.limiter.window, default_limiter_window());
    }
}
