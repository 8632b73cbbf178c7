//! DSP nodes - pure Rust signal processing for the audio graph.
//!
//! Every node here is plain sample-pushing code with no platform ties, so
//! the same processing runs under WASM in the browser demo and natively in
//! tests.

pub mod analyser;
pub mod buffer;
pub mod convolver;
pub mod gain;
pub mod impulse;
