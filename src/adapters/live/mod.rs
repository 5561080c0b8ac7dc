//! Live adapters that talk to the real provider APIs.

pub mod fal;
pub mod gemini;

pub use fal::FalProvider;
pub use gemini::GeminiProvider;
