//! Data model types.

mod destination;
mod latency;
mod sample;
mod status;

pub use destination::*;
pub use latency::*;
pub use sample::*;
pub use status::*;
