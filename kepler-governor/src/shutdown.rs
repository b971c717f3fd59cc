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

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::info;

/// Shutdown coordinates graceful teardown of the daemon tasks. One handle is
/// cloned into every task; triggering any handle wakes them all, and each
/// handle remembers the signal so repeated waits return immediately.
#[derive(Debug)]
pub struct Shutdown {
    /// seen is true once this handle has observed the shutdown signal.
    seen: bool,

    /// sender fans the shutdown signal out to every handle.
    sender: broadcast::Sender<()>,

    /// receiver is this handle's subscription to the shutdown signal.
    receiver: broadcast::Receiver<()>,
}

impl Shutdown {
    /// new creates a new Shutdown.
    pub fn new() -> Shutdown {
        let (sender, receiver) = broadcast::channel(1);
        Self {
            seen: false,
            sender,
            receiver,
        }
    }

    /// trigger sends the shutdown signal to every handle.
    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }

    /// recv waits until the shutdown signal has been observed.
    pub async fn recv(&mut self) {
        if self.seen {
            return;
        }

        let _ = self.receiver.recv().await;
        self.seen = true;
    }
}

/// Default implements the Default trait.
impl Default for Shutdown {
    /// default returns a new default Shutdown.
    fn default() -> Self {
        Self::new()
    }
}

/// Clone implements the Clone trait. Each clone gets its own subscription so
/// handles wait independently.
impl Clone for Shutdown {
    /// clone returns a new Shutdown.
    fn clone(&self) -> Self {
        let sender = self.sender.clone();
        let receiver = self.sender.subscribe();
        Self {
            seen: self.seen,
            sender,
            receiver,
        }
    }
}

/// shutdown_signal resolves when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).unwrap();
    let mut sigterm = signal(SignalKind::terminate()).unwrap();

    tokio::select! {
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        },
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_every_clone() {
        let shutdown = Shutdown::new();
        let mut first = shutdown.clone();
        let mut second = shutdown.clone();

        shutdown.trigger();
        first.recv().await;
        second.recv().await;

        // A handle that has seen the signal resolves again immediately.
        first.recv().await;
    }
}
