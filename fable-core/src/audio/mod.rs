//! Audio types, format conversion, and device access.

pub mod convert;
pub mod device;
pub mod types;

pub use device::{AudioDevice, MockAudioDevice};
pub use types::Utterance;

#[cfg(feature = "device")]
pub use device::CpalDevice;
