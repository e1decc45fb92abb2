//! In-memory audio devices for tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::backend::{AudioBackend, FaultSender};
use crate::audio::buffer::PlaybackSegment;
use crate::audio::capture::{BlockCallback, MicrophoneStream};
use crate::audio::scheduler::{PlaybackDevice, PlaybackHandle, SourceId};
use crate::config::AudioConfig;
use crate::error::{AudioError, Resource};

#[derive(Default)]
struct ClockState {
    now: f64,
    scheduled: Vec<(SourceId, f64, f64)>,
    stopped: Vec<SourceId>,
    fail_next: bool,
    completions: Option<mpsc::UnboundedSender<SourceId>>,
}

/// Output device whose clock only moves when the test says so
#[derive(Clone, Default)]
pub(crate) struct ManualClockDevice {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, now: f64) {
        self.state.lock().now = now;
    }

    pub fn fail_next_schedule(&self) {
        self.state.lock().fail_next = true;
    }

    pub fn scheduled_starts(&self) -> Vec<f64> {
        self.state.lock().scheduled.iter().map(|s| s.1).collect()
    }

    /// `(start, end)` of every scheduled source
    pub fn scheduled_intervals(&self) -> Vec<(f64, f64)> {
        self.state
            .lock()
            .scheduled
            .iter()
            .map(|&(_, start, duration)| (start, start + duration))
            .collect()
    }

    pub fn scheduled_ids(&self) -> Vec<SourceId> {
        self.state.lock().scheduled.iter().map(|s| s.0).collect()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        let mut ids = self.state.lock().stopped.clone();
        ids.sort_unstable();
        ids
    }

    /// Report natural completion of `id`
    pub fn finish(&self, id: SourceId) {
        if let Some(tx) = self.state.lock().completions.as_ref() {
            let _ = tx.send(id);
        }
    }

    fn attach(&self, completions: mpsc::UnboundedSender<SourceId>) {
        self.state.lock().completions = Some(completions);
    }
}

pub(crate) struct ManualHandle {
    id: SourceId,
    state: Arc<Mutex<ClockState>>,
}

impl PlaybackHandle for ManualHandle {
    fn stop(&mut self) {
        self.state.lock().stopped.push(self.id);
    }
}

impl PlaybackDevice for ManualClockDevice {
    type Handle = ManualHandle;

    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn schedule(
        &mut self,
        id: SourceId,
        segment: PlaybackSegment,
        start: f64,
    ) -> Result<Self::Handle, AudioError> {
        let mut state = self.state.lock();
        if state.fail_next {
            state.fail_next = false;
            return Err(AudioError::Closed);
        }
        state.scheduled.push((id, start, segment.duration()));
        Ok(ManualHandle {
            id,
            state: self.state.clone(),
        })
    }
}

/// Test-side control over a fake microphone
#[derive(Clone, Default)]
pub(crate) struct MicControl {
    sink: Arc<Mutex<Option<BlockCallback>>>,
    released: Arc<AtomicBool>,
    opened: Arc<AtomicBool>,
    faults: Arc<Mutex<Option<FaultSender>>>,
}

impl MicControl {
    /// Deliver one block as if the hardware produced it
    pub fn push_block(&self, data: &[f32]) -> bool {
        match self.sink.lock().as_mut() {
            Some(on_block) => {
                on_block(data);
                true
            }
            None => false,
        }
    }

    /// Raise a stream fault as if the device went away
    pub fn fail(&self, reason: &str) -> bool {
        match self.faults.lock().as_ref() {
            Some(tx) => tx
                .send((Resource::Microphone, AudioError::StreamError(reason.to_string())))
                .is_ok(),
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn was_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeMicrophone {
    control: MicControl,
}

impl MicrophoneStream for FakeMicrophone {
    fn start(&mut self, on_block: BlockCallback) -> Result<(), AudioError> {
        if self.is_released() {
            return Err(AudioError::Closed);
        }
        *self.control.sink.lock() = Some(on_block);
        Ok(())
    }

    fn release(&mut self) {
        self.control.sink.lock().take();
        self.control.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.control.is_released()
    }
}

impl Drop for FakeMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

/// Backend handing out the fakes above
#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    pub mic: MicControl,
    pub output: ManualClockDevice,
    pub deny_microphone: bool,
    pub fail_output: bool,
}

impl AudioBackend for FakeBackend {
    type Microphone = FakeMicrophone;
    type Output = ManualClockDevice;

    fn open_microphone(
        &self,
        _config: &AudioConfig,
        faults: FaultSender,
    ) -> Result<Self::Microphone, AudioError> {
        if self.deny_microphone {
            return Err(AudioError::PermissionDenied(
                "microphone access was denied".to_string(),
            ));
        }
        self.mic.opened.store(true, Ordering::SeqCst);
        self.mic.released.store(false, Ordering::SeqCst);
        *self.mic.faults.lock() = Some(faults);
        Ok(FakeMicrophone {
            control: self.mic.clone(),
        })
    }

    fn open_output(
        &self,
        _config: &AudioConfig,
        completions: mpsc::UnboundedSender<SourceId>,
        _faults: FaultSender,
    ) -> Result<Self::Output, AudioError> {
        if self.fail_output {
            return Err(AudioError::DeviceNotFound("no speaker".to_string()));
        }
        self.output.attach(completions);
        Ok(self.output.clone())
    }
}
