//! Stream utilities

mod frames;

pub use frames::{Frames, FramesExt};
