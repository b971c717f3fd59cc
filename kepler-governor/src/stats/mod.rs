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

use crate::governor::UsageSample;
use crate::limiter::BandwidthLimiter;
use crate::shutdown;
use http::Method;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use url::Url;
use warp::{Filter, Rejection, Reply};

/// ThrottleQueryParams identifies the outbound request to admit.
#[derive(Deserialize, Serialize)]
pub struct ThrottleQueryParams {
    /// url is the URL of the outbound request.
    pub url: String,

    /// method is the HTTP method of the outbound request.
    #[serde(default = "default_throttle_method")]
    pub method: String,
}

/// Returns the default method of a throttled request.
fn default_throttle_method() -> String {
    Method::GET.to_string()
}

/// ThrottleReply reports the delay that was applied before admission.
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleReply {
    /// delay_seconds is how long the request was held.
    pub delay_seconds: f64,
}

/// Stats is the stats server. It serves the latest usage sample to the
/// hosting shell and admits the shell's outbound requests through the
/// bandwidth limiter.
#[derive(Debug)]
pub struct Stats {
    /// addr is the address of the stats server.
    addr: SocketAddr,

    /// sample_rx holds the latest published usage sample.
    sample_rx: watch::Receiver<UsageSample>,

    /// limiter admits outbound requests under the network ceiling.
    limiter: Arc<BandwidthLimiter>,

    /// shutdown is used to shutdown the stats server.
    shutdown: shutdown::Shutdown,

    /// _shutdown_complete is used to notify the stats server is shutdown.
    _shutdown_complete: mpsc::UnboundedSender<()>,
}

/// Stats implements the stats server.
impl Stats {
    /// new creates a new Stats.
    pub fn new(
        addr: SocketAddr,
        sample_rx: watch::Receiver<UsageSample>,
        limiter: Arc<BandwidthLimiter>,
        shutdown: shutdown::Shutdown,
        shutdown_complete_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            addr,
            sample_rx,
            limiter,
            shutdown,
            _shutdown_complete: shutdown_complete_tx,
        }
    }

    /// run starts the stats server.
    pub async fn run(&self) {
        // Clone the shutdown channel.
        let mut shutdown = self.shutdown.clone();

        // Create the usage route.
        let sample_rx = self.sample_rx.clone();
        let usage_route = warp::path!("api" / "v1" / "usage")
            .and(warp::get())
            .and(warp::any().map(move || sample_rx.clone()))
            .and_then(Self::usage_handler);

        // Create the throttle route.
        let limiter = self.limiter.clone();
        let throttle_route = warp::path!("api" / "v1" / "throttle")
            .and(warp::get())
            .and(warp::query::<ThrottleQueryParams>())
            .and(warp::any().map(move || limiter.clone()))
            .and_then(Self::throttle_handler);

        // Start the stats server and wait for it to finish.
        info!("stats server listening on {}", self.addr);
        tokio::select! {
            _ = warp::serve(usage_route.or(throttle_route)).run(self.addr) => {
                // Stats server ended.
                info!("stats server ended");
            }
            _ = shutdown.recv() => {
                // Stats server shutting down with signals.
                info!("stats server shutting down");
            }
        }
    }

    /// usage_handler replies with the latest usage sample as JSON.
    async fn usage_handler(
        sample_rx: watch::Receiver<UsageSample>,
    ) -> Result<impl Reply, Infallible> {
        let sample = *sample_rx.borrow();
        Ok(warp::reply::json(&sample))
    }

    /// throttle_handler holds the request under the bandwidth limiter and
    /// replies with the applied delay once it may proceed.
    async fn throttle_handler(
        query_params: ThrottleQueryParams,
        limiter: Arc<BandwidthLimiter>,
    ) -> Result<impl Reply, Rejection> {
        let url = Url::parse(&query_params.url).map_err(|err| {
            error!("invalid throttle url {}: {}", query_params.url, err);
            warp::reject::reject()
        })?;

        let method = Method::from_bytes(query_params.method.as_bytes()).map_err(|err| {
            error!("invalid throttle method {}: {}", query_params.method, err);
            warp::reject::reject()
        })?;

        let delay = limiter.on_request(&method, &url).await;
        Ok(warp::reply::json(&ThrottleReply {
            delay_seconds: delay.as_secs_f64(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::ResourceLimits;
    use std::sync::RwLock;

    fn new_limiter(network_bytes_per_sec: Option<u64>) -> Arc<BandwidthLimiter> {
        let limits = Arc::new(RwLock::new(ResourceLimits {
            network_bytes_per_sec,
            ..Default::default()
        }));
        Arc::new(BandwidthLimiter::new(
            limits,
            std::time::Duration::from_millis(1000),
        ))
    }

    async fn body_json(reply: impl Reply) -> serde_json::Value {
        let response = reply.into_response();
        assert_eq!(response.status().as_u16(), 200);

        let body = warp::hyper::body::to_bytes(response.into_body())
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn usage_handler_serves_latest_sample() {
        let (sample_tx, sample_rx) = watch::channel(UsageSample::default());
        sample_tx.send_replace(UsageSample {
            cpu_percent: 42.0,
            memory_mb: 128.0,
            network_sent_mbps: 0.5,
            network_recv_mbps: 1.5,
        });

        let reply = Stats::usage_handler(sample_rx).await.unwrap();
        let value = body_json(reply).await;
        assert_eq!(value["cpuPercent"], 42.0);
        assert_eq!(value["memoryMb"], 128.0);
    }

    #[tokio::test]
    async fn throttle_handler_admits_unlimited_immediately() {
        let reply = Stats::throttle_handler(
            ThrottleQueryParams {
                url: "https://example.com/a.mp4".to_string(),
                method: default_throttle_method(),
            },
            new_limiter(None),
        )
        .await
        .unwrap();

        let value = body_json(reply).await;
        assert_eq!(value["delaySeconds"], 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_handler_reports_applied_delay() {
        let reply = Stats::throttle_handler(
            ThrottleQueryParams {
                url: "https://example.com/a.jpg".to_string(),
                method: default_throttle_method(),
            },
            new_limiter(Some(8000)),
        )
        .await
        .unwrap();

        // (512000 - 8000) / 8000 = 63 seconds.
        let value = body_json(reply).await;
        assert_eq!(value["delaySeconds"], 63.0);
    }

    #[tokio::test]
    async fn throttle_handler_rejects_invalid_url() {
        let result = Stats::throttle_handler(
            ThrottleQueryParams {
                url: "not a url".to_string(),
                method: default_throttle_method(),
            },
            new_limiter(None),
        )
        .await;

        assert!(result.is_err());
    }
}
