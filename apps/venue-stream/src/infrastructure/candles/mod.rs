//! Synthesized Candles
//!
//! Trade-driven candle construction for venues without a native candle push.

mod synthesizer;

pub use synthesizer::{CandleSynthesizer, SynthesizerError};
