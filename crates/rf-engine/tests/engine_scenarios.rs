//! End-to-end engine scenarios against the simulated front-end.
//!
//! Each test plays controller: it binds the control endpoint, starts the
//! engine on a background thread, feeds it config documents and reads the
//! result documents back. Timing knobs are shrunk so the full suite stays
//! in CI-friendly territory.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rf_engine::{Engine, EngineOptions, SimStats, SimulatedFrontEnd};

const SCENARIO_PSD: &str = concat!(
    "{\"rf_mode\":\"psd\",\"center_freq_hz\":100000000,",
    "\"sample_rate_hz\":2000000,\"rbw_hz\":10000,\"overlap\":0.5,",
    "\"window\":\"hann\",\"lna_gain\":16,\"vga_gain\":20,",
    "\"antenna_amp\":false,\"antenna_port\":1}"
);

struct Harness {
    running: Arc<AtomicBool>,
    engine_thread: Option<JoinHandle<()>>,
    conn: UnixStream,
    reader: BufReader<UnixStream>,
    stats: Arc<SimStats>,
    socket_path: PathBuf,
}

impl Harness {
    fn start(fail_opens: usize, tone_offset_hz: f64, mut options: EngineOptions) -> Self {
        let socket_path = std::env::temp_dir().join(format!(
            "rf-engine-test-{}-{:x}.sock",
            std::process::id(),
            rand_bits()
        ));
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path).expect("bind control endpoint");

        options.control_endpoint = format!("ipc://{}", socket_path.display());

        let device = SimulatedFrontEnd::new(tone_offset_hz, Duration::from_millis(1));
        device.fail_next_opens(fail_opens);
        let stats = device.stats();

        let engine = Engine::new(Box::new(device), Box::new(|_port| {}), options)
            .expect("engine init");
        let running = engine.running_flag();
        let engine_thread = Some(thread::spawn(move || engine.run()));

        let (conn, _) = listener.accept().expect("engine connects");
        conn.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let reader = BufReader::new(conn.try_clone().unwrap());

        Self {
            running,
            engine_thread,
            conn,
            reader,
            stats,
            socket_path,
        }
    }

    fn options_for_tests() -> EngineOptions {
        EngineOptions {
            main_ring_bytes: 8 * 1024 * 1024,
            idle_timeout: Duration::from_secs(60),
            retune_settle: Duration::from_millis(20),
            recovery_retry_delay: Duration::from_millis(200),
            ..EngineOptions::default()
        }
    }

    fn send_config(&mut self, json: &str) {
        self.conn.write_all(json.as_bytes()).unwrap();
        self.conn.write_all(b"\n").unwrap();
    }

    fn read_result(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        let deadline = Instant::now() + timeout;
        let mut line = String::new();
        while Instant::now() < deadline {
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    if line.ends_with('\n') {
                        return serde_json::from_str(line.trim()).ok();
                    }
                }
                Err(_) => continue, // read timeout; poll again
            }
        }
        None
    }

    fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.engine_thread.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn rand_bits() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos() as u64
}

#[test]
fn scenario_psd_cold_start() {
    let mut harness = Harness::start(0, 50_000.0, Harness::options_for_tests());
    harness.send_config(SCENARIO_PSD);

    let result = harness
        .read_result(Duration::from_secs(15))
        .expect("one PSD result");

    assert_eq!(result["start_freq_hz"], 99_000_000u64);
    assert_eq!(result["end_freq_hz"], 101_000_000u64);

    let pxx = result["Pxx"].as_array().expect("Pxx array");
    assert_eq!(pxx.len(), 512); // ceil-pow2 of 1.5 * 200

    // The simulated tone sits 50 kHz above center: bin (50k + 1M) / df.
    let peak = pxx
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.as_f64().unwrap().total_cmp(&b.1.as_f64().unwrap()))
        .map(|(i, _)| i)
        .unwrap();
    let expected = ((50_000.0 + 1_000_000.0) / (2_000_000.0 / 512.0)) as isize;
    assert!(
        (peak as isize - expected).abs() <= 2,
        "peak bin {peak}, expected ~{expected}"
    );

    // PSD-only results carry no demodulation metric.
    assert!(result.get("excursion_hz").is_none());
    assert!(result.get("depth").is_none());

    harness.stop();
}

#[test]
fn scenario_lazy_retune() {
    let mut harness = Harness::start(0, 50_000.0, Harness::options_for_tests());

    harness.send_config(SCENARIO_PSD);
    harness
        .read_result(Duration::from_secs(15))
        .expect("first result");

    harness.send_config(SCENARIO_PSD);
    harness
        .read_result(Duration::from_secs(15))
        .expect("second result");

    // Identical config: exactly one tune event across both cycles.
    assert_eq!(harness.stats.applies.load(Ordering::Relaxed), 1);
    assert_eq!(harness.stats.opens.load(Ordering::Relaxed), 1);

    harness.stop();
}

#[test]
fn scenario_mode_switch_to_fm_streams_audio() {
    let audio_sink = TcpListener::bind("127.0.0.1:0").unwrap();
    let audio_port = audio_sink.local_addr().unwrap().port();

    let sink_thread = thread::spawn(move || {
        let (mut conn, _) = audio_sink.accept().unwrap();
        let mut header = [0u8; 16];
        conn.read_exact(&mut header).unwrap();
        let magic = u32::from_be_bytes(header[0..4].try_into().unwrap());
        let seq = u32::from_be_bytes(header[4..8].try_into().unwrap());
        let sample_rate = u32::from_be_bytes(header[8..12].try_into().unwrap());
        let payload_len = u16::from_be_bytes(header[14..16].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; payload_len];
        conn.read_exact(&mut payload).unwrap();
        (magic, seq, sample_rate, payload_len)
    });

    let mut options = Harness::options_for_tests();
    options.opus.host = "127.0.0.1".into();
    options.opus.port = audio_port;
    let mut harness = Harness::start(0, 50_000.0, options);

    let fm_config = concat!(
        "{\"rf_mode\":\"fm\",\"center_freq_hz\":100000000,",
        "\"sample_rate_hz\":480000,\"rbw_hz\":10000,\"overlap\":0.5,",
        "\"window\":\"hann\",\"lna_gain\":16,\"vga_gain\":20,",
        "\"antenna_amp\":false,\"antenna_port\":1}"
    );
    harness.send_config(fm_config);

    let result = harness
        .read_result(Duration::from_secs(15))
        .expect("FM result");

    let (magic, seq, sample_rate, payload_len) = sink_thread.join().unwrap();
    assert_eq!(magic, 0x4F50_5530);
    assert_eq!(seq, 0);
    assert_eq!(sample_rate, 48_000);
    assert!(payload_len > 0);

    // The simulated carrier rides 50 kHz off center; the discriminator
    // reports that as the smoothed excursion.
    let excursion = result["excursion_hz"].as_f64().expect("excursion present");
    assert!(
        (excursion - 50_000.0).abs() < 5_000.0,
        "excursion {excursion}"
    );
    assert!(result.get("depth").is_none());

    harness.stop();
}

#[test]
fn scenario_idle_shutdown_forces_full_reapply() {
    let mut options = Harness::options_for_tests();
    options.idle_timeout = Duration::from_millis(500);
    let mut harness = Harness::start(0, 50_000.0, options);

    harness.send_config(SCENARIO_PSD);
    harness
        .read_result(Duration::from_secs(15))
        .expect("first result");
    assert_eq!(harness.stats.applies.load(Ordering::Relaxed), 1);

    // Stay silent past the idle timeout; the device closes and hardware
    // state clears, so the same config now re-applies in full.
    thread::sleep(Duration::from_millis(1200));

    harness.send_config(SCENARIO_PSD);
    harness
        .read_result(Duration::from_secs(15))
        .expect("post-idle result");

    assert_eq!(harness.stats.opens.load(Ordering::Relaxed), 2);
    assert_eq!(harness.stats.applies.load(Ordering::Relaxed), 2);

    harness.stop();
}

#[test]
fn scenario_recovery_from_open_failures() {
    let mut harness = Harness::start(2, 50_000.0, Harness::options_for_tests());

    // First config dies in PreparingHardware; recovery retries until the
    // scripted failures are exhausted, then the config must be re-sent.
    harness.send_config(SCENARIO_PSD);
    thread::sleep(Duration::from_secs(2));
    assert!(harness.stats.opens.load(Ordering::Relaxed) >= 3);

    harness.send_config(SCENARIO_PSD);
    let result = harness
        .read_result(Duration::from_secs(15))
        .expect("result after recovery");
    assert_eq!(result["Pxx"].as_array().unwrap().len(), 512);

    harness.stop();
}

#[test]
fn scenario_pfb_method_selected() {
    let mut harness = Harness::start(0, 50_000.0, Harness::options_for_tests());

    let pfb_config = concat!(
        "{\"rf_mode\":\"psd\",\"method_psd\":\"pfb\",\"center_freq_hz\":100000000,",
        "\"sample_rate_hz\":2000000,\"rbw_hz\":10000,\"overlap\":0.5,",
        "\"window\":\"hann\",\"lna_gain\":16,\"vga_gain\":20,",
        "\"antenna_amp\":false,\"antenna_port\":1}"
    );
    harness.send_config(pfb_config);

    let result = harness
        .read_result(Duration::from_secs(15))
        .expect("PFB result");
    let pxx = result["Pxx"].as_array().expect("Pxx array");
    assert_eq!(pxx.len(), 512);

    // The channelizer pins the tone the same way Welch does.
    let peak = pxx
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.as_f64().unwrap().total_cmp(&b.1.as_f64().unwrap()))
        .map(|(i, _)| i)
        .unwrap();
    let expected = ((50_000.0 + 1_000_000.0) / (2_000_000.0 / 512.0)) as isize;
    assert!(
        (peak as isize - expected).abs() <= 2,
        "peak bin {peak}, expected ~{expected}"
    );

    harness.stop();
}

#[test]
fn scenario_am_mode_reports_depth() {
    let audio_sink = TcpListener::bind("127.0.0.1:0").unwrap();
    let audio_port = audio_sink.local_addr().unwrap().port();

    let sink_thread = thread::spawn(move || {
        let (mut conn, _) = audio_sink.accept().unwrap();
        let mut header = [0u8; 16];
        conn.read_exact(&mut header).unwrap();
        let magic = u32::from_be_bytes(header[0..4].try_into().unwrap());
        let seq = u32::from_be_bytes(header[4..8].try_into().unwrap());
        (magic, seq)
    });

    let mut options = Harness::options_for_tests();
    options.opus.host = "127.0.0.1".into();
    options.opus.port = audio_port;
    // Keep the carrier inside the 20 kHz AM channel cascade.
    let mut harness = Harness::start(0, 5_000.0, options);

    let am_config = concat!(
        "{\"rf_mode\":\"am\",\"center_freq_hz\":100000000,",
        "\"sample_rate_hz\":480000,\"rbw_hz\":10000,\"overlap\":0.5,",
        "\"window\":\"hann\",\"lna_gain\":16,\"vga_gain\":20,",
        "\"antenna_amp\":false,\"antenna_port\":1}"
    );
    harness.send_config(am_config);

    let result = harness
        .read_result(Duration::from_secs(15))
        .expect("AM result");

    let (magic, seq) = sink_thread.join().unwrap();
    assert_eq!(magic, 0x4F50_5530);
    assert_eq!(seq, 0);

    // The simulated carrier is unmodulated: depth is present and near zero.
    let depth = result["depth"].as_f64().expect("depth present");
    assert!(depth < 5.0, "depth {depth}");
    assert!(result.get("excursion_hz").is_none());

    harness.stop();
}

#[test]
fn scenario_malformed_config_is_ignored() {
    let mut harness = Harness::start(0, 50_000.0, Harness::options_for_tests());

    harness.send_config("{this is not json");
    assert!(harness.read_result(Duration::from_secs(2)).is_none());

    harness.send_config(SCENARIO_PSD);
    assert!(harness.read_result(Duration::from_secs(15)).is_some());
    assert_eq!(harness.stats.applies.load(Ordering::Relaxed), 1);

    harness.stop();
}
