//! rf-dsp: Signal processing for the spectrum-monitoring engine
//!
//! Block processors shared by the PSD and audio paths:
//! - `window` - analysis window generation and the Kaiser prototype
//! - `spectrum` - FFT-shift, dBm scaling, frequency axis helpers
//! - `welch` - segment-averaged periodogram estimator
//! - `pfb` - polyphase filter bank estimator
//! - `iq` - byte-stream loading and IQ imbalance compensation
//! - `chan_filter` - two-stage frequency-domain channel mask
//! - `biquad` - RBJ low-pass sections and the one-pole DC blocker
//! - `iir` - Butterworth channel filter cascade on I/Q
//! - `fm` - FM discriminator with de-emphasis and deviation metrics
//! - `am` - AM envelope demodulator with CIC decimation and RMS AGC

pub mod am;
pub mod biquad;
pub mod chan_filter;
pub mod fm;
pub mod iir;
pub mod iq;
pub mod pfb;
pub mod spectrum;
pub mod welch;
pub mod window;

pub use am::{AmDemodulator, AmDepthTracker};
pub use biquad::{Biquad, BiquadCoeffs, DcBlocker};
pub use chan_filter::{ChannelMaskFilter, SpectralRegion};
pub use fm::{FmDemodulator, FmDeviationTracker};
pub use iir::IqChannelFilter;
pub use spectrum::{PsdOutput, SpectralConfig};
