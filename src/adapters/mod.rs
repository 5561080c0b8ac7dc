//! Adapter implementations for the provider port.
//!
//! - `live/`: real Gemini and Fal.ai clients
//! - `recording/`: wrap a live adapter and record calls to a cassette
//! - `replaying/`: serve recorded calls from a cassette

pub mod live;
pub mod recording;
pub mod replaying;
