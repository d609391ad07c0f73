//! Opus encoding and the framed audio wire format
//!
//! Each encoded frame is preceded by a packed 16-byte header in network
//! byte order so the receiver can resynchronize and detect loss:
//!
//! | field       | bytes | value                       |
//! |-------------|-------|-----------------------------|
//! | magic       | 4     | `0x4F505530` ("OPU0")       |
//! | seq         | 4     | increments per frame        |
//! | sample_rate | 4     | e.g. 48000                  |
//! | channels    | 2     | 1                           |
//! | payload_len | 2     | encoded bytes that follow   |

use std::env;
use std::net::TcpStream;

use audiopus::coder::Encoder;
use audiopus::{Application, Bitrate, Channels, SampleRate};

use rf_core::{AUDIO_SAMPLE_RATE, RfError, RfResult};

use crate::net::send_all;

/// Frame magic, "OPU0".
pub const OPUS_FRAME_MAGIC: u32 = 0x4F50_5530;

/// Packed header size on the wire.
pub const OPUS_HEADER_LEN: usize = 16;

/// Upper bound for one encoded frame.
const MAX_PAYLOAD: usize = 1500;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9000;
const DEFAULT_FRAME_MS: u32 = 20;
const DEFAULT_BITRATE: i32 = 32_000;
const DEFAULT_COMPLEXITY: u8 = 5;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Stream configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct OpusStreamConfig {
    pub host: String,
    pub port: u16,
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate: i32,
    pub complexity: u8,
    pub vbr: bool,
    pub frame_ms: u32,
}

impl Default for OpusStreamConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: 1,
            bitrate: DEFAULT_BITRATE,
            complexity: DEFAULT_COMPLEXITY,
            vbr: false,
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

impl OpusStreamConfig {
    /// Defaults overridden by `AUDIO_TCP_HOST`, `AUDIO_TCP_PORT`,
    /// `OPUS_FRAME_MS`, `OPUS_BITRATE`, `OPUS_COMPLEXITY`, `OPUS_VBR`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        match env::var("AUDIO_TCP_HOST") {
            Ok(host) if !host.is_empty() => cfg.host = host,
            _ => {}
        }
        match env_parse::<u16>("AUDIO_TCP_PORT") {
            Some(port) if port > 0 => cfg.port = port,
            _ => {}
        }
        match env_parse::<u32>("OPUS_FRAME_MS") {
            Some(frame_ms) if frame_ms > 0 => cfg.frame_ms = frame_ms,
            _ => {}
        }
        match env_parse::<i32>("OPUS_BITRATE") {
            Some(bitrate) if bitrate > 0 => cfg.bitrate = bitrate,
            _ => {}
        }
        if let Some(complexity) = env_parse::<u8>("OPUS_COMPLEXITY") {
            cfg.complexity = complexity.min(10);
        }
        if let Some(vbr) = env_parse::<i32>("OPUS_VBR") {
            cfg.vbr = vbr != 0;
        }
        cfg
    }

    /// PCM samples per encoded frame.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Builds the packed 16-byte header.
pub fn encode_frame_header(
    seq: u32,
    sample_rate: u32,
    channels: u16,
    payload_len: u16,
) -> [u8; OPUS_HEADER_LEN] {
    let mut header = [0u8; OPUS_HEADER_LEN];
    header[0..4].copy_from_slice(&OPUS_FRAME_MAGIC.to_be_bytes());
    header[4..8].copy_from_slice(&seq.to_be_bytes());
    header[8..12].copy_from_slice(&sample_rate.to_be_bytes());
    header[12..14].copy_from_slice(&channels.to_be_bytes());
    header[14..16].copy_from_slice(&payload_len.to_be_bytes());
    header
}

/// Connected encoder + socket. Dropping it closes the connection.
pub struct OpusTransmitter {
    stream: TcpStream,
    encoder: Encoder,
    seq: u32,
    sample_rate: u32,
    channels: u8,
    payload_buf: Vec<u8>,
}

impl OpusTransmitter {
    /// Wraps an already-connected stream with a configured encoder.
    pub fn new(stream: TcpStream, cfg: &OpusStreamConfig) -> RfResult<Self> {
        let sample_rate = match cfg.sample_rate {
            8000 => SampleRate::Hz8000,
            12000 => SampleRate::Hz12000,
            16000 => SampleRate::Hz16000,
            24000 => SampleRate::Hz24000,
            48000 => SampleRate::Hz48000,
            other => {
                return Err(RfError::Audio(format!(
                    "unsupported Opus sample rate {other}"
                )));
            }
        };
        let channels = match cfg.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => return Err(RfError::Audio(format!("unsupported channel count {other}"))),
        };

        let mut encoder = Encoder::new(sample_rate, channels, Application::Audio)
            .map_err(|e| RfError::Audio(format!("encoder init: {e}")))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(cfg.bitrate))
            .map_err(|e| RfError::Audio(format!("set bitrate: {e}")))?;
        encoder
            .set_complexity(cfg.complexity)
            .map_err(|e| RfError::Audio(format!("set complexity: {e}")))?;
        encoder
            .set_vbr(cfg.vbr)
            .map_err(|e| RfError::Audio(format!("set vbr: {e}")))?;

        Ok(Self {
            stream,
            encoder,
            seq: 0,
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            payload_buf: vec![0u8; MAX_PAYLOAD],
        })
    }

    /// Next sequence number to be sent.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Encodes one exact frame of PCM and sends header + payload. The
    /// sequence number advances only on a successful encode, so the wire
    /// never skips a value.
    pub fn send_frame(&mut self, pcm: &[i16]) -> RfResult<()> {
        let n = self
            .encoder
            .encode(pcm, &mut self.payload_buf)
            .map_err(|e| RfError::Audio(format!("opus encode: {e}")))?;

        let header = encode_frame_header(self.seq, self.sample_rate, self.channels as u16, n as u16);
        self.seq = self.seq.wrapping_add(1);

        send_all(&mut self.stream, &header)?;
        send_all(&mut self.stream, &self.payload_buf[..n])?;
        Ok(())
    }
}
