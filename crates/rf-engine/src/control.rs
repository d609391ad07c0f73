//! Control plane
//!
//! Point-to-point JSON message channel with the controller. The engine is
//! the connecting side; endpoints select the transport by scheme:
//! `ipc:///path` (Unix domain socket) or `tcp://host:port`. One compact
//! JSON document per line restores the message framing a queueing bus
//! would provide.
//!
//! The listener thread blocks on receive with a ~1 s timeout so shutdown
//! is always observed; reconnection backs off from 100 ms to 1 s and
//! retries forever. Sends are best-effort and never stall the DSP loop: a
//! send that cannot complete promptly tears the connection down silently
//! and lets the listener re-establish it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use rf_core::{RfError, RfResult};

/// Receive timeout; bounds shutdown latency.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on how long one outbound document may stall the caller.
const SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Initial reconnect interval.
const RECONNECT_IVL: Duration = Duration::from_millis(100);

/// Reconnect interval ceiling.
const RECONNECT_IVL_MAX: Duration = Duration::from_secs(1);

/// Callback invoked with each received JSON document (one per message).
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
enum Endpoint {
    Ipc(PathBuf),
    Tcp(String),
}

impl Endpoint {
    fn parse(endpoint: &str) -> RfResult<Self> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(RfError::Control(format!("empty ipc path: {endpoint}")));
            }
            Ok(Self::Ipc(PathBuf::from(path)))
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(RfError::Control(format!("empty tcp address: {endpoint}")));
            }
            Ok(Self::Tcp(addr.to_string()))
        } else {
            Err(RfError::Control(format!(
                "unsupported control endpoint: {endpoint}"
            )))
        }
    }
}

enum ControlStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl ControlStream {
    fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Ipc(path) => UnixStream::connect(path).map(Self::Unix),
            Endpoint::Tcp(addr) => TcpStream::connect(addr.as_str()).map(Self::Tcp),
        }
    }

    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Unix(s) => s.try_clone().map(Self::Unix),
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
        }
    }

    fn set_timeouts(&self) -> io::Result<()> {
        match self {
            Self::Unix(s) => {
                s.set_read_timeout(Some(RECV_TIMEOUT))?;
                s.set_write_timeout(Some(SEND_TIMEOUT))
            }
            Self::Tcp(s) => {
                s.set_read_timeout(Some(RECV_TIMEOUT))?;
                s.set_write_timeout(Some(SEND_TIMEOUT))
            }
        }
    }

    fn shutdown(&self) {
        match self {
            Self::Unix(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Self::Tcp(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Read for ControlStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for ControlStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Bidirectional control channel; owns the listener thread.
pub struct ControlPlane {
    running: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<ControlStream>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ControlPlane {
    /// Parses the endpoint and launches the listener. Endpoint parse
    /// failure is the unrecoverable init error of this subsystem.
    pub fn start(endpoint: &str, on_message: MessageCallback) -> RfResult<Self> {
        let parsed = Endpoint::parse(endpoint)?;
        let running = Arc::new(AtomicBool::new(true));
        let sender: Arc<Mutex<Option<ControlStream>>> = Arc::new(Mutex::new(None));

        let thread_running = Arc::clone(&running);
        let thread_sender = Arc::clone(&sender);
        let endpoint_desc = endpoint.to_string();

        let handle = thread::Builder::new()
            .name("control-listener".into())
            .spawn(move || {
                listener_loop(parsed, endpoint_desc, on_message, thread_running, thread_sender)
            })
            .map_err(|e| RfError::Control(format!("listener spawn: {e}")))?;

        Ok(Self {
            running,
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Best-effort transmit of one document. Returns false when the
    /// channel is down or the peer is not draining; the message is simply
    /// dropped in that case.
    pub fn send(&self, payload: &str) -> bool {
        let mut guard = self.sender.lock();
        let Some(stream) = guard.as_mut() else {
            return false;
        };

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload.as_bytes());
        framed.push(b'\n');

        match stream.write_all(&framed) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[CTRL] Outbound document dropped ({e})");
                stream.shutdown();
                *guard = None;
                false
            }
        }
    }

    /// Flips the running flag, joins the listener and closes the socket.
    pub fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(stream) = self.sender.lock().take() {
            stream.shutdown();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.close();
    }
}

fn listener_loop(
    endpoint: Endpoint,
    endpoint_desc: String,
    on_message: MessageCallback,
    running: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<ControlStream>>>,
) {
    let mut backoff = RECONNECT_IVL;
    let mut connect_logged = false;

    while running.load(Ordering::Relaxed) {
        let stream = match ControlStream::connect(&endpoint) {
            Ok(s) => s,
            Err(e) => {
                if !connect_logged {
                    log::debug!("[CTRL] Connect to {endpoint_desc} queued ({e})");
                    connect_logged = true;
                }
                thread::sleep(backoff);
                backoff = (backoff * 2).min(RECONNECT_IVL_MAX);
                continue;
            }
        };

        if stream.set_timeouts().is_err() {
            continue;
        }
        match stream.try_clone() {
            Ok(clone) => *sender.lock() = Some(clone),
            Err(e) => {
                log::warn!("[CTRL] Clone for sender failed ({e})");
                continue;
            }
        }

        log::info!("[CTRL] Connected to {endpoint_desc}");
        backoff = RECONNECT_IVL;
        connect_logged = false;

        let mut reader = BufReader::new(stream);
        let mut pending = String::new();

        while running.load(Ordering::Relaxed) {
            match reader.read_line(&mut pending) {
                Ok(0) => {
                    log::info!("[CTRL] Peer closed; reconnecting");
                    break;
                }
                Ok(_) => {
                    if pending.ends_with('\n') {
                        let document = pending.trim();
                        if !document.is_empty() {
                            on_message(document);
                        }
                        pending.clear();
                    }
                }
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    log::warn!("[CTRL] Recv error: {e}");
                    break;
                }
            }
        }

        *sender.lock() = None;
    }
}
