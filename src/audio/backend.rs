//! Hardware acquisition seam used by the session controller

use tokio::sync::mpsc;

use crate::audio::capture::{CpalMicrophone, MicrophoneStream};
use crate::audio::device;
use crate::audio::playback::CpalPlayback;
use crate::audio::scheduler::{PlaybackDevice, SourceId};
use crate::config::AudioConfig;
use crate::error::{AudioError, Resource};

/// Where an open device reports stream faults after acquisition
pub type FaultSender = mpsc::UnboundedSender<(Resource, AudioError)>;

/// Opens the microphone and speaker for one session.
///
/// Both calls may block on the hardware; the controller runs them on the
/// blocking pool.
pub trait AudioBackend: Clone + Send + Sync + 'static {
    type Microphone: MicrophoneStream + 'static;
    type Output: PlaybackDevice + 'static;

    fn open_microphone(
        &self,
        config: &AudioConfig,
        faults: FaultSender,
    ) -> Result<Self::Microphone, AudioError>;

    fn open_output(
        &self,
        config: &AudioConfig,
        completions: mpsc::UnboundedSender<SourceId>,
        faults: FaultSender,
    ) -> Result<Self::Output, AudioError>;
}

/// System audio through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    type Microphone = CpalMicrophone;
    type Output = CpalPlayback;

    fn open_microphone(
        &self,
        config: &AudioConfig,
        faults: FaultSender,
    ) -> Result<Self::Microphone, AudioError> {
        let device = match config.input_device.as_deref() {
            Some(id) => device::get_device_by_id(id)?,
            None => device::get_default_input_device()?,
        };
        CpalMicrophone::open(device, config.input_sample_rate, config.capture_block_size, faults)
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        completions: mpsc::UnboundedSender<SourceId>,
        faults: FaultSender,
    ) -> Result<Self::Output, AudioError> {
        let device = match config.output_device.as_deref() {
            Some(id) => device::get_device_by_id(id)?,
            None => device::get_default_output_device()?,
        };
        CpalPlayback::open(device, config.output_sample_rate, completions, faults)
    }
}
