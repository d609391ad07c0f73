//! Engine assembly
//!
//! Owns the rings, the control plane, the shared snapshot state and the
//! orchestrator. The control callback is the only config writer; the
//! orchestrator is the only config reader. Everything is torn down in
//! `run`'s epilogue when the master flag drops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use rf_audio::{AudioControl, OpusStreamConfig};
use rf_core::{RfResult, parse_desired_config};

use crate::control::{ControlPlane, MessageCallback};
use crate::device::SdrDevice;
use crate::orchestrator::{AntennaHook, Orchestrator, Shared};
use crate::ring::{AUDIO_RING_BYTES, IngestionRing, MAIN_RING_BYTES};

/// Default control endpoint (overridden by `IPC_ADDR`).
pub const DEFAULT_CONTROL_ENDPOINT: &str = "ipc:///tmp/rf_engine";

/// Tunables of the engine; defaults match the documented behavior, tests
/// shrink the timing knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub control_endpoint: String,
    pub main_ring_bytes: usize,
    pub audio_ring_bytes: usize,
    /// Device closes after this long in Idle with no new config.
    pub idle_timeout: Duration,
    /// Idle/acquisition poll period.
    pub poll_interval: Duration,
    /// Acquisition watchdog: polls before escalating to recovery.
    pub acquisition_timeout_polls: u32,
    /// Synthesizer settle time after a retune.
    pub retune_settle: Duration,
    /// Spacing between recovery open attempts.
    pub recovery_retry_delay: Duration,
    pub opus: OpusStreamConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            control_endpoint: DEFAULT_CONTROL_ENDPOINT.to_string(),
            main_ring_bytes: MAIN_RING_BYTES,
            audio_ring_bytes: AUDIO_RING_BYTES,
            idle_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(10),
            acquisition_timeout_polls: 500,
            retune_settle: Duration::from_millis(150),
            recovery_retry_delay: Duration::from_secs(1),
            opus: OpusStreamConfig::default(),
        }
    }
}

/// The assembled engine. `run` blocks the calling thread until shutdown.
pub struct Engine {
    shared: Arc<Shared>,
    control: Arc<ControlPlane>,
    orchestrator: Orchestrator,
}

impl Engine {
    /// Builds rings and shared state, starts the control listener, wires
    /// the orchestrator. Fails only on control-plane init (bad endpoint).
    pub fn new(
        device: Box<dyn SdrDevice>,
        antenna_hook: AntennaHook,
        options: EngineOptions,
    ) -> RfResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared {
            main_ring: Arc::new(IngestionRing::new(options.main_ring_bytes)),
            audio_ring: Arc::new(IngestionRing::new(options.audio_ring_bytes)),
            audio_control: Arc::new(AudioControl::new()),
            pending: Mutex::new(None),
            config_received: AtomicBool::new(false),
            running,
        });

        let cb_shared = Arc::clone(&shared);
        let callback: MessageCallback = Arc::new(move |document: &str| {
            match parse_desired_config(document) {
                Ok(config) => {
                    *cb_shared.pending.lock() = Some(config);
                    cb_shared.config_received.store(true, Ordering::Release);
                }
                Err(e) => {
                    // Leave the previous config untouched.
                    log::error!("[CTRL] Malformed config document: {e}");
                }
            }
        });

        let control = Arc::new(ControlPlane::start(&options.control_endpoint, callback)?);
        let orchestrator = Orchestrator::new(
            Arc::clone(&shared),
            Arc::clone(&control),
            device,
            antenna_hook,
            options,
        );

        Ok(Self {
            shared,
            control,
            orchestrator,
        })
    }

    /// Master flag; signal handlers flip this to stop `run`.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.running)
    }

    /// Runs the orchestrator on the calling thread until the master flag
    /// drops, then closes the control plane.
    pub fn run(mut self) {
        self.orchestrator.run();
        self.control.close();
    }
}
