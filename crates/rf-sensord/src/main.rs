//! rf-sensord: headless spectrum-monitoring daemon
//!
//! Wires the engine to its environment: endpoint and codec settings from
//! env (with a local `.env` fallback), logging to stderr, SIGINT/SIGTERM
//! for graceful shutdown. The RF front-end USB driver plugs in through
//! `rf_engine::SdrDevice`; without one attached the daemon runs the
//! built-in simulated front-end so the whole control/PSD/audio path can be
//! exercised end to end.
//!
//! Exit codes: 0 on graceful shutdown, 1 on unrecoverable control-plane
//! init failure.

use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;

use rf_audio::OpusStreamConfig;
use rf_engine::{DEFAULT_CONTROL_ENDPOINT, Engine, EngineOptions, SimulatedFrontEnd};

/// Loads `KEY=VALUE` lines from a local `.env` file for any key not
/// already present in the process environment. Runs before any thread is
/// spawned, which keeps the `set_var` below sound.
fn load_dotenv_fallback() {
    let Ok(contents) = fs::read_to_string(".env") else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if !key.is_empty() && env::var_os(key).is_none() {
                // Single-threaded here; nothing can race this write.
                unsafe { env::set_var(key, value.trim()) };
            }
        }
    }
}

fn init_logging() {
    let verbose = env::var("VERBOSE")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn run() -> anyhow::Result<()> {
    let endpoint =
        env::var("IPC_ADDR").unwrap_or_else(|_| DEFAULT_CONTROL_ENDPOINT.to_string());

    let options = EngineOptions {
        control_endpoint: endpoint.clone(),
        opus: OpusStreamConfig::from_env(),
        ..EngineOptions::default()
    };

    log::info!(
        "[RF] Starting engine: control {endpoint}, audio sink {}:{}",
        options.opus.host,
        options.opus.port
    );

    // Loopback front-end: a tone 100 kHz above the tuned center, paced at
    // real time. A hardware USB driver replaces this box at integration.
    let tone_offset = env::var("SIM_TONE_OFFSET_HZ")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100_000.0);
    let device = SimulatedFrontEnd::new(tone_offset, Duration::from_millis(1));

    let antenna_hook = Box::new(|port: u8| {
        log::info!("[RF] Antenna port {port} selected");
    });

    let engine =
        Engine::new(Box::new(device), antenna_hook, options).context("engine init failed")?;

    let running = engine.running_flag();
    ctrlc::set_handler(move || {
        log::info!("[RF] Shutdown requested");
        running.store(false, Ordering::Relaxed);
    })
    .context("signal handler install failed")?;

    engine.run();
    log::info!("[RF] Shutdown complete");
    Ok(())
}

fn main() -> ExitCode {
    load_dotenv_fallback();
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[RF] Fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
