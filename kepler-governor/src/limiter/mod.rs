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

use crate::governor::SharedLimits;
use bytesize::ByteSize;
use http::Method;
use std::collections::VecDeque;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

/// IMAGE_SUFFIXES are the URL suffixes estimated as image downloads.
const IMAGE_SUFFIXES: [&str; 4] = [".jpg", ".jpeg", ".png", ".gif"];

/// VIDEO_SUFFIXES are the URL suffixes estimated as video downloads.
const VIDEO_SUFFIXES: [&str; 3] = [".mp4", ".webm", ".m3u8"];

/// AUDIO_SUFFIXES are the URL suffixes estimated as audio downloads.
const AUDIO_SUFFIXES: [&str; 2] = [".mp3", ".wav"];

/// ASSET_SUFFIXES are the URL suffixes estimated as page assets.
const ASSET_SUFFIXES: [&str; 2] = [".css", ".js"];

/// estimate_request_size returns the estimated byte cost of a request from
/// its method and URL suffix, first match wins. The default cases make the
/// estimation total, it never fails.
pub(crate) fn estimate_request_size(method: &Method, url: &Url) -> u64 {
    let path = url.path().to_ascii_lowercase();
    if *method == Method::GET {
        if IMAGE_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            ByteSize::kib(500).as_u64()
        } else if VIDEO_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            ByteSize::mib(2).as_u64()
        } else if AUDIO_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            ByteSize::mib(1).as_u64()
        } else if ASSET_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            ByteSize::kib(50).as_u64()
        } else {
            ByteSize::kib(100).as_u64()
        }
    } else if *method == Method::POST {
        ByteSize::kib(200).as_u64()
    } else {
        ByteSize::kib(50).as_u64()
    }
}

/// compute_delay returns how long a request of the given size must wait for
/// the window's instantaneous rate to fall back under the limit, assuming no
/// further requests arrive. A zero limit cannot be waited out, the request
/// is admitted immediately.
pub(crate) fn compute_delay(current_bandwidth: f64, size: u64, limit: u64) -> Duration {
    if limit == 0 {
        return Duration::ZERO;
    }

    let projected = current_bandwidth + size as f64;
    let limit = limit as f64;
    if projected <= limit {
        return Duration::ZERO;
    }

    Duration::from_secs_f64((projected - limit) / limit)
}

/// RequestRecord is one admitted request inside the sliding window.
#[derive(Debug, Clone, Copy)]
struct RequestRecord {
    /// admitted_at is when the request entered the limiter.
    admitted_at: Instant,

    /// size is the estimated byte cost of the request.
    size: u64,
}

/// BandwidthLimiter approximates a target outbound byte rate by delaying,
/// never rejecting, requests. The ceiling is read from the shared limits
/// value owned by the governor, there is no direct call between the two.
#[derive(Debug)]
pub struct BandwidthLimiter {
    /// limits is the guarded ceilings value shared with the governor.
    limits: SharedLimits,

    /// window is the length of the sliding rate window.
    window: Duration,

    /// records is the sliding window of recently admitted requests, oldest
    /// first.
    records: Mutex<VecDeque<RequestRecord>>,
}

impl BandwidthLimiter {
    /// new creates a new BandwidthLimiter over the given shared limits.
    pub fn new(limits: SharedLimits, window: Duration) -> Self {
        Self {
            limits,
            window,
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// on_request blocks the caller until the request may proceed and
    /// returns the delay that was applied. Requests are always admitted,
    /// with no recording and no delay when the network ceiling is unset.
    #[instrument(skip_all, fields(method = %method, url = %url))]
    pub async fn on_request(&self, method: &Method, url: &Url) -> Duration {
        let Some(limit) = self
            .limits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .network_bytes_per_sec
        else {
            return Duration::ZERO;
        };

        let size = estimate_request_size(method, url);
        let now = Instant::now();

        // The record is appended under the lock before sleeping so that
        // concurrent requests see each other's cost, the sleep itself
        // happens outside the lock.
        let delay = {
            let mut records = self.records.lock().await;
            Self::purge(&mut records, now, self.window);

            let current_bandwidth = Self::bandwidth(&records, self.window);
            let delay = compute_delay(current_bandwidth, size, limit);

            records.push_back(RequestRecord {
                admitted_at: now,
                size,
            });
            delay
        };

        if !delay.is_zero() {
            debug!("throttling request for {:?}", delay);
            tokio::time::sleep(delay).await;
        }

        delay
    }

    /// current_bandwidth returns the instantaneous byte rate of the sliding
    /// window after purging expired records.
    pub async fn current_bandwidth(&self) -> f64 {
        let mut records = self.records.lock().await;
        Self::purge(&mut records, Instant::now(), self.window);
        Self::bandwidth(&records, self.window)
    }

    /// purge drops all records at or past the window's age. Records are
    /// ordered by admission time, so only the front needs inspecting.
    fn purge(records: &mut VecDeque<RequestRecord>, now: Instant, window: Duration) {
        while let Some(record) = records.front() {
            if now.duration_since(record.admitted_at) < window {
                break;
            }

            records.pop_front();
        }
    }

    /// bandwidth sums the window's request sizes, normalized to bytes per
    /// second.
    fn bandwidth(records: &VecDeque<RequestRecord>, window: Duration) -> f64 {
        let total: u64 = records.iter().map(|record| record.size).sum();
        total as f64 / window.as_secs_f64()
    }
}
