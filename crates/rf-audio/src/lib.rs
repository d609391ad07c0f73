//! rf-audio: Demodulated audio delivery
//!
//! Everything between demodulated PCM and the remote audio sink:
//! - `opus` - Opus encoder wrapper and the framed wire format
//! - `net` - TCP transport with keep-alive, timeouts and retry
//! - `pipeline` - the audio worker thread driving chunk demodulation
//!
//! The worker never blocks the acquisition side: it drains its own ring,
//! owns its own socket, and every failure path ends in reconnect, not
//! panic.

mod net;
mod opus;
mod pipeline;

pub use net::{connect_audio_sink, send_all, sleep_cancelable};
pub use opus::{OPUS_FRAME_MAGIC, OPUS_HEADER_LEN, OpusStreamConfig, OpusTransmitter};
pub use pipeline::{AudioControl, AudioSource, AudioWorker};
