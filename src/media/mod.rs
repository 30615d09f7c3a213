//! Media primitives shared by the handler, workers and encoders

pub mod frame;

pub use frame::{AudioFrame, PixelFormat, Resolution, VideoFrame};
