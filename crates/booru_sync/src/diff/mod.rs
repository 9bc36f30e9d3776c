//! Difference detection between remote records and local posts.

mod difference;
mod engine;
mod noise;

pub use difference::Difference;
pub use engine::{DiffEngine, DiffError, diff_snapshots};
pub use noise::{DEFAULT_NOISE_MARKERS, NoiseFilter};
