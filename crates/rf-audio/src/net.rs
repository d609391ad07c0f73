//! Audio sink transport
//!
//! Blocking TCP with keep-alive and short send/recv timeouts so a dead
//! peer surfaces within ~1.5 s instead of wedging the worker. Rust ignores
//! SIGPIPE process-wide, so a closed peer shows up as a write error here,
//! never as a signal.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Socket, TcpKeepalive, Type};

use crate::opus::{OpusStreamConfig, OpusTransmitter};

/// Send/recv timeout on the audio socket.
const SOCKET_TIMEOUT: Duration = Duration::from_millis(1500);

/// Seconds of idle before keep-alive probing starts.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(10);

/// Interval between keep-alive probes.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

/// Failed probes before the connection is declared dead.
#[cfg(not(windows))]
const KEEPALIVE_RETRIES: u32 = 3;

/// Back-off between reconnect attempts.
const RECONNECT_DELAY_MS: u64 = 1000;

/// Granularity of cancelable sleeps.
const SLEEP_STEP_MS: u64 = 100;

/// Connects to the audio sink with keep-alive and timeouts applied.
/// Tries every resolved address before giving up.
pub fn connect_audio_sink(host: &str, port: u16) -> io::Result<TcpStream> {
    let addrs = (host, port).to_socket_addrs()?;
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address resolved");

    for addr in addrs {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = match Socket::new(domain, Type::STREAM, None) {
            Ok(s) => s,
            Err(e) => {
                last_err = e;
                continue;
            }
        };

        let keepalive = TcpKeepalive::new()
            .with_time(KEEPALIVE_IDLE)
            .with_interval(KEEPALIVE_INTERVAL);
        #[cfg(not(windows))]
        let keepalive = keepalive.with_retries(KEEPALIVE_RETRIES);

        let _ = socket.set_tcp_keepalive(&keepalive);
        let _ = socket.set_read_timeout(Some(SOCKET_TIMEOUT));
        let _ = socket.set_write_timeout(Some(SOCKET_TIMEOUT));

        match socket.connect(&addr.into()) {
            Ok(()) => return Ok(socket.into()),
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}

/// Writes the whole buffer, retrying interrupted and short writes. A
/// timeout or peer close is an error and the caller reconnects.
pub fn send_all(stream: &mut TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match stream.write(&buf[sent..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "peer closed while sending",
                ));
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Sleeps up to `total_ms`, waking every 100 ms to honor a cancellation.
pub fn sleep_cancelable(total_ms: u64, running: &AtomicBool) {
    let mut left = total_ms;
    while left > 0 && running.load(Ordering::Relaxed) {
        let step = left.min(SLEEP_STEP_MS);
        thread::sleep(Duration::from_millis(step));
        left -= step;
    }
}

/// Blocks until a transmitter is connected or the worker is told to stop.
/// Returns `None` only on cancellation.
pub fn ensure_connected_with_retry(
    cfg: &OpusStreamConfig,
    running: &Arc<AtomicBool>,
) -> Option<OpusTransmitter> {
    while running.load(Ordering::Relaxed) {
        match connect_audio_sink(&cfg.host, cfg.port)
            .map_err(rf_core::RfError::from)
            .and_then(|stream| OpusTransmitter::new(stream, cfg))
        {
            Ok(tx) => {
                log::info!(
                    "[AUDIO] Connected to {}:{} (sr={} ch={} frame_ms={} bitrate={} vbr={} cplx={})",
                    cfg.host,
                    cfg.port,
                    cfg.sample_rate,
                    cfg.channels,
                    cfg.frame_ms,
                    cfg.bitrate,
                    cfg.vbr,
                    cfg.complexity
                );
                return Some(tx);
            }
            Err(e) => {
                log::warn!(
                    "[AUDIO] Waiting for sink at {}:{} ({e})",
                    cfg.host,
                    cfg.port
                );
                sleep_cancelable(RECONNECT_DELAY_MS, running);
            }
        }
    }
    None
}
