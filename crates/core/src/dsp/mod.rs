//! Sample-level processing primitives used as stages of the signal chain.
//!
//! Stages are block based: parameters are read once per block and the
//! buffers are processed in place.

mod biquad;
mod compressor;
mod convolver;
mod delay;
mod shaper;

pub use biquad::{Biquad, FilterKind};
pub use compressor::Compressor;
pub use convolver::{synthesize_impulse, Convolver, IMPULSE_SECONDS};
pub use delay::{FractionalDelay, HaasNetwork};
pub use shaper::WaveShaper;
