//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{AudioBackend, CpalBackend};
pub use buffer::{AudioFrame, PlaybackSegment};
pub use capture::{CapturePipeline, CpalMicrophone, MicrophoneStream};
pub use device::{list_devices, AudioDevice, AudioDeviceInfo};
pub use playback::CpalPlayback;
pub use scheduler::{PlaybackDevice, PlaybackHandle, PlaybackScheduler, ScheduledSegment, SourceId};
