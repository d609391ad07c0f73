//! Audio worker
//!
//! One thread, independent of acquisition pacing: drain a chunk from the
//! audio ring, narrow it with the channel cascade, demodulate per the
//! published mode, accumulate exact codec frames, encode and send. Every
//! transport failure tears the connection down and reconnects; nothing in
//! here can take the process out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rf_core::{AUDIO_CHUNK_SAMPLES, AUDIO_SAMPLE_RATE, RfMode};
use rf_dsp::iq;
use rf_dsp::{AmDemodulator, AmDepthTracker, FmDemodulator, FmDeviationTracker, IqChannelFilter};

use crate::net::{ensure_connected_with_retry, sleep_cancelable};
use crate::opus::{OpusStreamConfig, OpusTransmitter};

/// Poll interval while waiting for a chunk.
const CHUNK_POLL: Duration = Duration::from_millis(10);

/// Back-off after a failed send before reconnecting.
const SEND_FAIL_BACKOFF_MS: u64 = 1000;

/// Channel bandwidth ahead of the FM discriminator.
const FM_CHANNEL_BW_HZ: f64 = 200_000.0;

/// Channel bandwidth ahead of the AM detector.
const AM_CHANNEL_BW_HZ: f64 = 20_000.0;

/// Butterworth order of the channel cascade.
const CHANNEL_FILTER_ORDER: usize = 6;

/// De-emphasis time constant in microseconds.
const FM_DEEMPHASIS_US: u32 = 75;

/// Byte supplier for the worker; implemented by the engine's audio ring.
pub trait AudioSource: Send + Sync {
    /// Bytes ready to read.
    fn available(&self) -> usize;
    /// Reads up to `dst.len()` bytes, returning how many were copied.
    fn read(&self, dst: &mut [u8]) -> usize;
}

/// Atomic snapshot shared between the orchestrator and the audio worker.
///
/// f64 values travel as bit patterns in `AtomicU64`; the epoch counter is
/// bumped on every retune so the worker can drop cross-epoch state.
pub struct AudioControl {
    enabled: AtomicBool,
    mode: AtomicU8,
    fs_hz_bits: AtomicU64,
    epoch: AtomicU64,
    excursion_hz_bits: AtomicU64,
    depth_percent_bits: AtomicU64,
}

impl Default for AudioControl {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioControl {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            mode: AtomicU8::new(Self::encode_mode(RfMode::Psd)),
            fs_hz_bits: AtomicU64::new(2_000_000f64.to_bits()),
            epoch: AtomicU64::new(0),
            excursion_hz_bits: AtomicU64::new(0f64.to_bits()),
            depth_percent_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn encode_mode(mode: RfMode) -> u8 {
        match mode {
            RfMode::Psd => 0,
            RfMode::Fm => 1,
            RfMode::Am => 2,
        }
    }

    fn decode_mode(raw: u8) -> RfMode {
        match raw {
            1 => RfMode::Fm,
            2 => RfMode::Am,
            _ => RfMode::Psd,
        }
    }

    /// True while the producer duplicates RF bytes into the audio ring.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn mode(&self) -> RfMode {
        Self::decode_mode(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: RfMode) {
        self.mode.store(Self::encode_mode(mode), Ordering::Relaxed);
    }

    pub fn sample_rate_hz(&self) -> f64 {
        f64::from_bits(self.fs_hz_bits.load(Ordering::Relaxed))
    }

    pub fn set_sample_rate_hz(&self, fs: f64) {
        self.fs_hz_bits.store(fs.to_bits(), Ordering::Relaxed);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Called by the orchestrator after a retune; the worker resets its
    /// demodulators and frame accumulator when it observes the change.
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn excursion_hz(&self) -> f64 {
        f64::from_bits(self.excursion_hz_bits.load(Ordering::Relaxed))
    }

    pub fn depth_percent(&self) -> f64 {
        f64::from_bits(self.depth_percent_bits.load(Ordering::Relaxed))
    }

    fn publish_excursion_hz(&self, value: f64) {
        self.excursion_hz_bits
            .store(value.to_bits(), Ordering::Relaxed);
    }

    fn publish_depth_percent(&self, value: f64) {
        self.depth_percent_bits
            .store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Handle to the running worker; stopping joins the thread.
pub struct AudioWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    pub fn spawn(
        source: Arc<dyn AudioSource>,
        control: Arc<AudioControl>,
        cfg: OpusStreamConfig,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("audio-worker".into())
            .spawn(move || run_worker(source, control, cfg, thread_flag))
            .expect("spawning the audio worker cannot fail");

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Requests shutdown and joins. Bounded by one poll interval plus one
    /// socket timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Demodulator state bundle for one `{mode, fs}` configuration.
struct DemodState {
    filter: IqChannelFilter,
    fm: FmDemodulator,
    am: AmDemodulator,
    fm_dev: FmDeviationTracker,
    am_depth: AmDepthTracker,
}

impl DemodState {
    fn new(mode: RfMode, fs: f64) -> Self {
        let bw = match mode {
            RfMode::Am => AM_CHANNEL_BW_HZ,
            _ => FM_CHANNEL_BW_HZ,
        };
        Self {
            filter: IqChannelFilter::new(fs, bw, CHANNEL_FILTER_ORDER, true),
            fm: FmDemodulator::new(fs, AUDIO_SAMPLE_RATE, FM_DEEMPHASIS_US),
            am: AmDemodulator::new(fs, AUDIO_SAMPLE_RATE),
            fm_dev: FmDeviationTracker::default(),
            am_depth: AmDepthTracker::new(AUDIO_SAMPLE_RATE),
        }
    }
}

fn run_worker(
    source: Arc<dyn AudioSource>,
    control: Arc<AudioControl>,
    cfg: OpusStreamConfig,
    running: Arc<AtomicBool>,
) {
    let chunk_bytes = AUDIO_CHUNK_SAMPLES * 2;
    let frame_samples = cfg.frame_samples();

    let mut tx: Option<OpusTransmitter> = None;
    let mut state: Option<DemodState> = None;
    let mut active_mode = RfMode::Psd;
    let mut active_fs = 0.0f64;
    let mut active_epoch = control.epoch();
    let mut frame_buf: Vec<i16> = Vec::with_capacity(frame_samples * 4);
    let mut raw = vec![0u8; chunk_bytes];

    log::info!("[AUDIO] Worker started (chunk {chunk_bytes} bytes, frame {frame_samples} samples)");

    'outer: while running.load(Ordering::Relaxed) {
        if tx.is_none() {
            match ensure_connected_with_retry(&cfg, &running) {
                Some(connected) => tx = Some(connected),
                None => break,
            }
        }

        while running.load(Ordering::Relaxed) && source.available() < chunk_bytes {
            thread::sleep(CHUNK_POLL);
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }

        let got = source.read(&mut raw);
        if got < chunk_bytes {
            // Ring was reset underneath us (retune); drop the partial chunk.
            continue;
        }

        let mode = control.mode();
        let fs = control.sample_rate_hz();
        let epoch = control.epoch();

        let config_changed =
            mode != active_mode || fs != active_fs || epoch != active_epoch || state.is_none();
        if config_changed {
            if mode.is_audio() && fs > 0.0 {
                state = Some(DemodState::new(mode, fs));
            } else {
                state = None;
            }
            frame_buf.clear();
            active_mode = mode;
            active_fs = fs;
            active_epoch = epoch;
            log::debug!("[AUDIO] Demodulator reconfigured: mode {mode:?}, fs {fs} Hz");
            // The chunk in hand may straddle the epoch boundary; drop it so
            // no pre-tune sample lands in a post-tune frame.
            continue;
        }

        let Some(demod) = state.as_mut() else {
            continue;
        };

        let mut samples = iq::iq_from_bytes(&raw);
        demod.filter.apply_in_place(&mut samples);

        match mode {
            RfMode::Fm => {
                demod.fm.process(&samples, &mut frame_buf, &mut demod.fm_dev);
                control.publish_excursion_hz(demod.fm_dev.ema_hz());
            }
            RfMode::Am => {
                demod.am.process(&samples, &mut frame_buf, &mut demod.am_depth);
                control.publish_depth_percent(demod.am_depth.depth_percent());
            }
            RfMode::Psd => continue,
        }

        while frame_buf.len() >= frame_samples {
            let Some(sender) = tx.as_mut() else { break };
            let frame: Vec<i16> = frame_buf.drain(..frame_samples).collect();
            if let Err(e) = sender.send_frame(&frame) {
                log::warn!("[AUDIO] Send failed ({e}); reconnecting");
                tx = None;
                frame_buf.clear();
                sleep_cancelable(SEND_FAIL_BACKOFF_MS, &running);
                continue 'outer;
            }
        }
    }

    log::info!("[AUDIO] Worker stopped");
}
