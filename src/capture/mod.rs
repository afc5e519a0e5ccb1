// src/capture/mod.rs
// Capture pipeline: frame decoding, rolling window, pulse stream,
// alignment, BLE link session, serial reader and gated inference.
pub mod align;
pub mod classify;
pub mod error;
pub mod frame;
pub mod link;
pub mod pulse;
pub mod serial;
pub mod window;

pub use align::{align, AlignedSnapshot};
pub use classify::{
    Classifier, EnergyClassifier, InferenceGate, MotionLabel, WindowExtractor, WindowFill,
};
pub use error::CaptureError;
pub use frame::{decode_frames, RawFrame, ScaleConfig, FRAME_SIZE};
pub use link::{LinkSession, LinkState, LinkStats, SessionEvent};
pub use pulse::{PulseEvent, PulseStream};
pub use serial::PulseReader;
pub use window::{AccelSample, SampleWindow, WindowSnapshot};
