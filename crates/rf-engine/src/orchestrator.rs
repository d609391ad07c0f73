//! Acquisition orchestrator
//!
//! One state machine, one thread, one cycle at a time:
//!
//! Idle -> PreparingHardware -> Acquiring -> Processing -> Idle
//!                \-> Recovering (device failure or starvation) -> Idle
//!
//! The control callback publishes a `DesiredConfig` snapshot under the
//! config mutex and raises `config_received`; this thread consumes it,
//! lazily retunes the device, waits for one acquisition of bytes, runs the
//! DSP chain and ships the result. Identical back-to-back configs (the
//! controller heartbeat) touch nothing, so running audio never glitches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use rf_audio::{AudioControl, AudioSource, AudioWorker, OpusStreamConfig, sleep_cancelable};
use rf_core::{DerivedConfig, DesiredConfig, PsdResult, RfMode, PsdMethod, SdrParams};
use rf_dsp::chan_filter::ChannelMaskFilter;
use rf_dsp::{SpectralConfig, iq, pfb, welch};

use crate::control::ControlPlane;
use crate::device::{SampleSink, SdrDevice};
use crate::engine::EngineOptions;
use crate::ring::IngestionRing;

/// Open retries per recovery round before backing off for another round.
const RECOVERY_ATTEMPTS: u32 = 3;

/// Side-effect hook invoked with the requested antenna port each cycle.
pub type AntennaHook = Box<dyn FnMut(u8) + Send>;

/// State shared between the control callback, the RF producer, the audio
/// worker and the orchestrator thread.
pub struct Shared {
    pub main_ring: Arc<IngestionRing>,
    pub audio_ring: Arc<IngestionRing>,
    pub audio_control: Arc<AudioControl>,
    pub pending: Mutex<Option<DesiredConfig>>,
    pub config_received: AtomicBool,
    pub running: Arc<AtomicBool>,
}

enum State {
    Idle,
    Prepare(Box<(DesiredConfig, DerivedConfig)>),
    Acquire(Box<(DesiredConfig, DerivedConfig)>),
    Process(Box<(DesiredConfig, DerivedConfig)>),
    Recover,
}

/// The engine's main loop; owns the device handle and the channel-filter
/// shape cache (both confined to this thread).
pub struct Orchestrator {
    shared: Arc<Shared>,
    control: Arc<ControlPlane>,
    device: Box<dyn SdrDevice>,
    sink: SampleSink,
    antenna_hook: AntennaHook,
    opus_cfg: OpusStreamConfig,
    options: EngineOptions,
    chan_filter: ChannelMaskFilter,
    hardware: Option<SdrParams>,
    audio_worker: Option<AudioWorker>,
    last_activity: Instant,
}

impl Orchestrator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        control: Arc<ControlPlane>,
        device: Box<dyn SdrDevice>,
        antenna_hook: AntennaHook,
        options: EngineOptions,
    ) -> Self {
        let main_ring = Arc::clone(&shared.main_ring);
        let audio_ring = Arc::clone(&shared.audio_ring);
        let audio_control = Arc::clone(&shared.audio_control);

        // RF callback: copy into the main ring, duplicate into the audio
        // ring while audio is active, return immediately.
        let sink: SampleSink = Arc::new(move |bytes: &[u8]| {
            main_ring.write(bytes);
            if audio_control.enabled() {
                audio_ring.write(bytes);
            }
        });

        let opus_cfg = options.opus.clone();
        Self {
            shared,
            control,
            device,
            sink,
            antenna_hook,
            opus_cfg,
            options,
            chan_filter: ChannelMaskFilter::new(),
            hardware: None,
            audio_worker: None,
            last_activity: Instant::now(),
        }
    }

    fn running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Runs until the master flag drops, then tears everything down.
    pub fn run(&mut self) {
        let mut state = State::Idle;
        log::info!("[RF] Orchestrator started");

        while self.running() {
            state = match state {
                State::Idle => self.step_idle(),
                State::Prepare(ctx) => self.step_prepare(*ctx),
                State::Acquire(ctx) => self.step_acquire(*ctx),
                State::Process(ctx) => self.step_process(*ctx),
                State::Recover => self.step_recover(),
            };
        }

        if let Some(mut worker) = self.audio_worker.take() {
            worker.stop();
        }
        self.device.stop_rx();
        self.device.close();
        log::info!("[RF] Orchestrator stopped");
    }

    fn step_idle(&mut self) -> State {
        if self.shared.config_received.swap(false, Ordering::AcqRel) {
            let snapshot = self.shared.pending.lock().clone();
            if let Some(desired) = snapshot {
                let derived = DerivedConfig::from_desired(&desired);
                log::info!(
                    "[RF] Config: mode {:?}, method {:?}, fc {} Hz, fs {} Hz, rbw {} Hz -> nperseg {}, noverlap {}, {} bytes/cycle",
                    desired.mode,
                    desired.psd_method,
                    desired.center_freq_hz,
                    desired.sample_rate_hz,
                    desired.rbw_hz,
                    derived.nperseg,
                    derived.noverlap,
                    derived.acquisition_bytes
                );
                self.last_activity = Instant::now();
                return State::Prepare(Box::new((desired, derived)));
            }
        }

        if self.device.is_open() && self.last_activity.elapsed() >= self.options.idle_timeout {
            log::info!(
                "[RF] Idle for {:?}; closing device",
                self.options.idle_timeout
            );
            self.device.stop_rx();
            self.device.close();
            self.hardware = None;
        }

        thread::sleep(self.options.poll_interval);
        State::Idle
    }

    fn step_prepare(&mut self, ctx: (DesiredConfig, DerivedConfig)) -> State {
        let (desired, derived) = ctx;

        if !self.device.is_open() {
            if let Err(e) = self.device.open() {
                log::error!("[RECOVERY] Device open failed: {e}");
                return State::Recover;
            }
        }

        let params = desired.sdr_params();
        if params.needs_retune(self.hardware.as_ref()) {
            if let Err(e) = self.device.apply(&params) {
                log::error!("[RECOVERY] Device apply failed: {e}");
                return State::Recover;
            }
            self.hardware = Some(params);

            // Let the synthesizer settle, then drop every pre-tune byte.
            thread::sleep(self.options.retune_settle);
            self.shared.main_ring.reset();
            self.shared.audio_ring.reset();
            self.shared.audio_control.bump_epoch();
            log::debug!("[RF] Retuned; rings reset");
        } else {
            log::debug!("[RF] Identical hardware state; retune skipped");
        }

        (self.antenna_hook)(desired.antenna_port);

        self.shared.audio_control.set_mode(desired.mode);
        self.shared
            .audio_control
            .set_sample_rate_hz(desired.sample_rate_hz);
        self.shared
            .audio_control
            .set_enabled(desired.mode.is_audio());

        if desired.mode.is_audio() && self.audio_worker.is_none() {
            let source: Arc<dyn AudioSource> = Arc::clone(&self.shared.audio_ring) as _;
            self.audio_worker = Some(AudioWorker::spawn(
                source,
                Arc::clone(&self.shared.audio_control),
                self.opus_cfg.clone(),
            ));
        }

        if !self.device.is_streaming() {
            if let Err(e) = self.device.start_rx(Arc::clone(&self.sink)) {
                log::error!("[RECOVERY] RX start failed: {e}");
                return State::Recover;
            }
        }

        State::Acquire(Box::new((desired, derived)))
    }

    fn step_acquire(&mut self, ctx: (DesiredConfig, DerivedConfig)) -> State {
        let needed = ctx.1.acquisition_bytes;

        for _ in 0..self.options.acquisition_timeout_polls {
            if !self.running() {
                return State::Idle;
            }
            if self.shared.main_ring.available() >= needed {
                return State::Process(Box::new(ctx));
            }
            thread::sleep(self.options.poll_interval);
        }

        log::error!("[RECOVERY] Acquisition starved ({needed} bytes never arrived)");
        State::Recover
    }

    fn step_process(&mut self, ctx: (DesiredConfig, DerivedConfig)) -> State {
        let (desired, derived) = ctx;

        let mut raw = vec![0u8; derived.acquisition_bytes];
        let got = self.shared.main_ring.read(&mut raw);
        if got < derived.acquisition_bytes {
            log::error!(
                "[RECOVERY] Short read from ring: {got} of {} bytes",
                derived.acquisition_bytes
            );
            return State::Recover;
        }

        let mut samples = iq::iq_from_bytes(&raw);
        drop(raw);
        iq::compensate_iq(&mut samples);

        if desired.filter_enabled {
            if let Some(range) = desired.filter_range {
                if let Err(e) = self.chan_filter.apply_in_place(
                    &mut samples,
                    range,
                    desired.center_freq_hz,
                    desired.sample_rate_hz,
                ) {
                    log::warn!("[RF] Channel filter skipped: {e}");
                }
            }
        }

        let spectral = SpectralConfig::new(&desired, &derived);
        let output = match desired.psd_method {
            PsdMethod::Welch => welch::welch_psd(&samples, &spectral),
            PsdMethod::Pfb => pfb::pfb_psd(&samples, &spectral),
        };

        let mut result = PsdResult::new(
            desired.span_start_hz().round() as u64,
            desired.span_end_hz().round() as u64,
            output.pxx_dbm,
        );
        match desired.mode {
            RfMode::Fm => result.excursion_hz = Some(self.shared.audio_control.excursion_hz()),
            RfMode::Am => result.depth = Some(self.shared.audio_control.depth_percent()),
            RfMode::Psd => {}
        }

        match result.to_json() {
            Ok(json) => {
                if !self.control.send(&json) {
                    log::debug!("[RF] Result dropped; controller not draining");
                }
            }
            Err(e) => log::error!("[RF] Result serialization failed: {e}"),
        }

        self.last_activity = Instant::now();
        State::Idle
    }

    fn step_recover(&mut self) -> State {
        self.device.stop_rx();
        self.device.close();
        self.hardware = None;

        for attempt in 1..=RECOVERY_ATTEMPTS {
            if !self.running() {
                return State::Idle;
            }
            sleep_cancelable(
                self.options.recovery_retry_delay.as_millis() as u64,
                &self.shared.running,
            );
            match self.device.open() {
                Ok(()) => {
                    log::info!("[RECOVERY] Device reopened on attempt {attempt}");
                    return State::Idle;
                }
                Err(e) => {
                    log::warn!(
                        "[RECOVERY] Open attempt {attempt}/{RECOVERY_ATTEMPTS} failed: {e}"
                    );
                }
            }
        }

        // Stay in recovery; back off one more delay before the next round.
        sleep_cancelable(
            self.options.recovery_retry_delay.as_millis() as u64,
            &self.shared.running,
        );
        State::Recover
    }
}
