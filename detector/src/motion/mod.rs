//! Frame-differencing motion detection.
//!
//! A frame is reduced to a blurred grayscale image, compared with the
//! previous one, thresholded and dilated into a mask, split into connected
//! regions, and finally run through a cooldown gate that decides whether the
//! frame is worth capturing.

pub mod annotate;
pub mod difference;
pub mod frame;
pub mod gate;
pub mod pipeline;
pub mod preprocess;
pub mod regions;

pub use frame::Frame;
pub use pipeline::MotionPipeline;
pub use regions::Region;
