//! rf-engine: Acquisition engine for the spectrum-monitoring sensor
//!
//! Binds the front-end byte stream to the DSP and delivery crates:
//! - `ring` - mutex-guarded ingestion rings (main + audio)
//! - `device` - the SDR hardware seam and a simulated front-end
//! - `control` - PAIR-style JSON control plane over ipc/tcp endpoints
//! - `orchestrator` - the per-cycle acquisition state machine
//! - `engine` - assembly of rings, control plane, producer and workers

mod control;
mod device;
mod engine;
mod orchestrator;
mod ring;

pub use control::{ControlPlane, MessageCallback};
pub use device::{SampleSink, SdrDevice, SimStats, SimulatedFrontEnd};
pub use engine::{DEFAULT_CONTROL_ENDPOINT, Engine, EngineOptions};
pub use orchestrator::{AntennaHook, Orchestrator};
pub use ring::{AUDIO_RING_BYTES, IngestionRing, MAIN_RING_BYTES};
