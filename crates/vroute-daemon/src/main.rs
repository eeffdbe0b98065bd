//! vroute daemon - virtual device → physical output routing with per-process volume
//!
//! Startup order:
//! 1. Volume server (clients can register as soon as the socket exists)
//! 2. Audio router on the configured sink
//! 3. Gain sync worker, if a `gain_pid` is configured
//!
//! Ctrl-C stops everything in reverse order.
//!
//! ## Command line flags
//!
//! - `--sink <NAME>`: physical output device
//! - `--source <NAME>`: virtual input device
//! - `--config <PATH>`: config file to load instead of the default
//! - `--gain-pid <PID>`: follow this process's registered volume
//! - `--no-router`: run the volume server only
//! - `--write-config`: save the effective config and exit

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use config::{Args, DaemonConfig, USAGE};
use vroute_core::audio::CpalBackend;
use vroute_core::config::{default_config_path, load_config, load_config_strict, save_config};
use vroute_core::router::AudioRouter;
use vroute_ipc::{GainSync, IpcServer};

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config: DaemonConfig = if args.config.is_some() {
        load_config_strict(&config_path)?
    } else {
        load_config(&config_path)
    };
    args.apply(&mut config);

    if args.write_config {
        save_config(&config, &config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    log::info!("vroute {} starting up", env!("CARGO_PKG_VERSION"));

    // 1. Volume server
    let server = IpcServer::start(&config.ipc).context("Failed to start volume server")?;
    log::info!("Volume server listening on {:?}", server.socket_path());

    // 2. Router
    let router = if args.no_router {
        log::info!("Router disabled (--no-router), serving volume control only");
        None
    } else {
        let Some(sink) = config.sink_device.as_deref() else {
            bail!("No sink device configured (use --sink <NAME> or --no-router)");
        };
        let router = Arc::new(AudioRouter::new(
            Arc::new(CpalBackend::new()),
            config.router.clone(),
        ));
        router
            .start(sink)
            .with_context(|| format!("Failed to route audio to {}", sink))?;
        Some(router)
    };

    // 3. Gain sync
    let gain_sync = match (&router, config.gain_pid) {
        (Some(router), Some(pid)) => Some(
            GainSync::spawn(
                config.ipc.clone(),
                pid,
                router.gain(),
                Duration::from_millis(config.gain_poll_ms.max(1)),
            )
            .context("Failed to start gain sync")?,
        ),
        (None, Some(pid)) => {
            log::warn!("gain_pid {} ignored: router is disabled", pid);
            None
        }
        _ => None,
    };

    wait_for_ctrl_c()?;
    log::info!("Shutting down");

    if let Some(gain_sync) = gain_sync {
        gain_sync.stop();
    }
    if let Some(router) = router {
        router.stop();
        let stats = router.get_stats();
        log::info!(
            "Router totals: {} frames, {} underruns, {} overruns",
            stats.frames_transferred,
            stats.underrun_count,
            stats.overrun_count
        );
    }
    let stats = server.stats();
    server.stop();
    log::info!(
        "Volume server totals: {} messages, {} error replies, {} protocol errors",
        stats.messages_handled,
        stats.error_replies,
        stats.protocol_errors
    );

    Ok(())
}

fn wait_for_ctrl_c() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl-C")
}
