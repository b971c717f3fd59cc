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

use clap::Parser;
use kepler_governor::container;
use kepler_governor::governor::ResourceGovernor;
use kepler_governor::limiter::BandwidthLimiter;
use kepler_governor::shutdown;
use kepler_governor::stats::Stats;
use kepler_governor::tracing::init_tracing;
use kepler_governor_config::governord;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, Level};

#[derive(Debug, Parser)]
#[command(
    name = governord::NAME,
    author,
    version,
    about = "governord is the resource governance daemon of the Kepler browser shell",
    long_about = "A resource governance daemon that keeps the browser shell within administrator-configured \
    CPU, memory and network ceilings. It samples process and host usage once per second, enforces the \
    ceilings twice per second through scheduling priority, heap reclamation and kernel containers, and \
    serves the latest usage sample over HTTP for the shell's display."
)]
struct Args {
    #[arg(
        short = 'c',
        long = "config",
        default_value_os_t = governord::default_governord_config_path(),
        help = "Specify config file to use")
    ]
    config: PathBuf,

    #[arg(
        short = 'l',
        long,
        default_value = "info",
        help = "Specify the logging level [trace, debug, info, warn, error]"
    )]
    log_level: Level,

    #[arg(
        long,
        default_value_os_t = governord::default_governord_log_dir(),
        help = "Specify the log directory"
    )]
    log_dir: PathBuf,

    #[arg(
        long,
        default_value_t = 24,
        help = "Specify the max number of log files"
    )]
    log_max_files: usize,

    #[arg(
        long = "verbose",
        default_value_t = false,
        help = "Specify whether to print log"
    )]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Parse command line arguments.
    let args = Args::parse();

    // Load config.
    let config = governord::Config::load(&args.config).await.map_err(|err| {
        eprintln!("load config failed: {}", err);
        err
    })?;
    let config = Arc::new(config);

    // Initialize tracing.
    let _guards = init_tracing(
        governord::NAME,
        &args.log_dir,
        args.log_level,
        args.log_max_files,
        args.verbose,
    );

    // Initialize the kernel container for the current process.
    let container = container::new_container(std::process::id());

    // Initialize channel for graceful shutdown.
    let shutdown = shutdown::Shutdown::default();
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::unbounded_channel();

    // Initialize resource governor.
    let governor = ResourceGovernor::new(
        config.clone(),
        container.clone(),
        shutdown.clone(),
        shutdown_complete_tx.clone(),
    );
    let governor = Arc::new(governor);

    // Initialize bandwidth limiter.
    let limiter = BandwidthLimiter::new(governor.limits(), config.limiter.window);
    let limiter = Arc::new(limiter);

    // Initialize stats server.
    let stats = Stats::new(
        SocketAddr::new(config.stats.server.ip.unwrap(), config.stats.server.port),
        governor.subscribe(),
        limiter,
        shutdown.clone(),
        shutdown_complete_tx.clone(),
    );

    // Log governord started pid.
    info!("governord started at pid {}", std::process::id());

    // Wait for tasks to exit or shutdown signal.
    let sampler = governor.clone();
    let enforcer = governor.clone();
    tokio::select! {
        _ = tokio::spawn(async move { sampler.run_sampler().await }) => {
            info!("usage sampler exited");
        },

        _ = tokio::spawn(async move { enforcer.run_enforcer().await }) => {
            info!("limit enforcer exited");
        },

        _ = tokio::spawn(async move { stats.run().await }) => {
            info!("stats server exited");
        },

        _ = shutdown::shutdown_signal() => {},
    }

    // Trigger shutdown signal to other tasks.
    shutdown.trigger();

    // Release the kernel container and any processes grouped under it.
    if let Err(err) = container.terminate() {
        error!("terminate container failed: {}", err);
    }

    // Drop shutdown_complete_rx to wait for the other tasks to exit.
    drop(shutdown_complete_tx);

    // Wait for the other tasks to exit.
    let _ = shutdown_complete_rx.recv().await;

    Ok(())
}
