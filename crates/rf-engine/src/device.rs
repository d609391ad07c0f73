//! SDR hardware seam
//!
//! The orchestrator owns the device through `SdrDevice`; the USB front-end
//! driver lives outside this crate and implements the trait. A simulated
//! front-end ships here for loopback bring-up and for the recovery and
//! retune test scenarios (it can be scripted to fail opens).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rf_core::{RfError, RfResult, SdrParams};

/// Destination of the RF callback: the engine's ring-duplication closure.
/// Implementations must copy and return quickly.
pub type SampleSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Hardware contract used by the orchestrator. All calls happen on the
/// orchestrator thread; only the RX callback runs elsewhere.
pub trait SdrDevice: Send {
    /// Opens the device. Called again after recovery.
    fn open(&mut self) -> RfResult<()>;

    fn is_open(&self) -> bool;

    /// Applies the full parameter set (gains, rate, ppm-corrected tune).
    fn apply(&mut self, params: &SdrParams) -> RfResult<()>;

    /// Starts the RX stream; the device invokes `sink` from its own worker
    /// with interleaved signed-8-bit I/Q bytes.
    fn start_rx(&mut self, sink: SampleSink) -> RfResult<()>;

    fn is_streaming(&self) -> bool;

    /// Stops the RX stream. Best-effort; used on recovery and shutdown.
    fn stop_rx(&mut self);

    /// Closes the device. Best-effort.
    fn close(&mut self);
}

/// Counters exposed by the simulated front-end for scenario assertions.
#[derive(Debug, Default)]
pub struct SimStats {
    pub opens: AtomicUsize,
    pub applies: AtomicUsize,
    pub open_failures_left: AtomicUsize,
}

/// Deterministic front-end: a complex tone at a fixed baseband offset plus
/// a faint deterministic dither, generated in paced bursts.
pub struct SimulatedFrontEnd {
    stats: Arc<SimStats>,
    open: bool,
    params: Option<SdrParams>,
    tone_offset_hz: f64,
    tone_amplitude: f64,
    burst_interval: Duration,
    rx_running: Arc<AtomicBool>,
    fs_bits: Arc<AtomicU64>,
    rx_thread: Option<JoinHandle<()>>,
}

impl SimulatedFrontEnd {
    /// `tone_offset_hz` is relative to the tuned center; each burst carries
    /// one millisecond of signal, so `burst_interval` = 1 ms paces the
    /// stream at real time.
    pub fn new(tone_offset_hz: f64, burst_interval: Duration) -> Self {
        Self {
            stats: Arc::new(SimStats::default()),
            open: false,
            params: None,
            tone_offset_hz,
            tone_amplitude: 0.6,
            burst_interval,
            rx_running: Arc::new(AtomicBool::new(false)),
            fs_bits: Arc::new(AtomicU64::new(2_000_000f64.to_bits())),
            rx_thread: None,
        }
    }

    /// Scripts the next `n` open attempts to fail (recovery scenarios).
    pub fn fail_next_opens(&self, n: usize) {
        self.stats.open_failures_left.store(n, Ordering::Relaxed);
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }
}

impl SdrDevice for SimulatedFrontEnd {
    fn open(&mut self) -> RfResult<()> {
        self.stats.opens.fetch_add(1, Ordering::Relaxed);
        let failures = self.stats.open_failures_left.load(Ordering::Relaxed);
        if failures > 0 {
            self.stats
                .open_failures_left
                .store(failures - 1, Ordering::Relaxed);
            return Err(RfError::Device("simulated open failure".into()));
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn apply(&mut self, params: &SdrParams) -> RfResult<()> {
        if !self.open {
            return Err(RfError::Device("apply on closed device".into()));
        }
        log::info!(
            "[HAL] Target: {} Hz | PPM: {} | Tuning to: {} Hz",
            params.center_freq_hz,
            params.ppm_error,
            params.corrected_freq_hz()
        );
        self.stats.applies.fetch_add(1, Ordering::Relaxed);
        self.fs_bits
            .store(params.sample_rate_hz.to_bits(), Ordering::Relaxed);
        self.params = Some(*params);
        Ok(())
    }

    fn start_rx(&mut self, sink: SampleSink) -> RfResult<()> {
        if !self.open {
            return Err(RfError::Device("start_rx on closed device".into()));
        }
        if self.is_streaming() {
            return Ok(());
        }

        self.rx_running.store(true, Ordering::Relaxed);
        let running = Arc::clone(&self.rx_running);
        let fs_bits = Arc::clone(&self.fs_bits);
        let offset = self.tone_offset_hz;
        let amplitude = self.tone_amplitude;
        let interval = self.burst_interval;

        let handle = thread::Builder::new()
            .name("sim-frontend".into())
            .spawn(move || {
                let mut phase = 0.0f64;
                let mut dither = 0x2545_F491u32;
                while running.load(Ordering::Relaxed) {
                    let fs = f64::from_bits(fs_bits.load(Ordering::Relaxed)).max(1.0);
                    // One millisecond of signal per burst.
                    let pairs = (fs / 1000.0) as usize;
                    let step = 2.0 * std::f64::consts::PI * offset / fs;
                    phase = phase.rem_euclid(2.0 * std::f64::consts::PI);

                    let mut bytes = Vec::with_capacity(pairs * 2);
                    for _ in 0..pairs {
                        phase += step;
                        // xorshift dither, +-1 LSB
                        dither ^= dither << 13;
                        dither ^= dither >> 17;
                        dither ^= dither << 5;
                        let d = ((dither & 3) as f64 - 1.5) / 127.0;

                        let i = (phase.cos() * amplitude + d) * 127.0;
                        let q = (phase.sin() * amplitude + d) * 127.0;
                        bytes.push(i.clamp(-128.0, 127.0) as i8 as u8);
                        bytes.push(q.clamp(-128.0, 127.0) as i8 as u8);
                    }

                    sink(&bytes);
                    thread::sleep(interval);
                }
            })
            .map_err(|e| RfError::Device(format!("rx thread spawn: {e}")))?;

        self.rx_thread = Some(handle);
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.rx_thread.is_some()
    }

    fn stop_rx(&mut self) {
        self.rx_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
    }

    fn close(&mut self) {
        self.stop_rx();
        self.open = false;
    }
}

impl Drop for SimulatedFrontEnd {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn params() -> SdrParams {
        SdrParams {
            center_freq_hz: 100_000_000,
            sample_rate_hz: 400_000.0,
            lna_gain: 16,
            vga_gain: 20,
            amp_enabled: false,
            ppm_error: 0,
        }
    }

    #[test]
    fn test_open_failure_script() {
        let mut dev = SimulatedFrontEnd::new(50_000.0, Duration::from_millis(1));
        dev.fail_next_opens(2);
        assert!(dev.open().is_err());
        assert!(dev.open().is_err());
        assert!(dev.open().is_ok());
        assert_eq!(dev.stats().opens.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_apply_requires_open() {
        let mut dev = SimulatedFrontEnd::new(50_000.0, Duration::from_millis(1));
        assert!(dev.apply(&params()).is_err());
        dev.open().unwrap();
        assert!(dev.apply(&params()).is_ok());
        assert_eq!(dev.stats().applies.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rx_delivers_bytes() {
        let mut dev = SimulatedFrontEnd::new(50_000.0, Duration::from_millis(1));
        dev.open().unwrap();
        dev.apply(&params()).unwrap();

        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink_copy = Arc::clone(&collected);
        let sink: SampleSink = Arc::new(move |bytes| {
            sink_copy.lock().extend_from_slice(bytes);
        });

        dev.start_rx(sink).unwrap();
        assert!(dev.is_streaming());
        thread::sleep(Duration::from_millis(50));
        dev.stop_rx();

        let bytes = collected.lock();
        // 1 ms bursts of 400 pairs: tens of bursts in 50 ms.
        assert!(bytes.len() >= 400 * 2 * 10, "only {} bytes", bytes.len());
        assert_eq!(bytes.len() % 2, 0);
    }
}
