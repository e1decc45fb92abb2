//! Speaker output
//!
//! `CpalPlayback` mixes scheduled sources into a cpal output stream. The
//! output clock is the number of frames the stream has rendered, so it only
//! moves while the hardware is consuming audio.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::audio::backend::FaultSender;
use crate::audio::buffer::PlaybackSegment;
use crate::audio::device::{self, AudioDevice};
use crate::audio::scheduler::{PlaybackDevice, PlaybackHandle, SourceId};
use crate::error::{AudioError, Resource};

/// A source waiting for, or in the middle of, playback
struct Voice {
    id: SourceId,
    start_frame: u64,
    channels: usize,
    samples: Vec<f32>,
}

impl Voice {
    fn frames(&self) -> u64 {
        (self.samples.len() / self.channels) as u64
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.frames()
    }
}

struct Shared {
    voices: Mutex<Vec<Voice>>,
    frames_rendered: AtomicU64,
}

impl Shared {
    /// Mix every voice overlapping this buffer into `out`
    fn render(&self, out: &mut [f32], out_channels: usize, completions: &mpsc::UnboundedSender<SourceId>) {
        out.fill(0.0);

        let base = self.frames_rendered.load(Ordering::Acquire);
        let frames = (out.len() / out_channels) as u64;
        let end = base + frames;

        let mut voices = self.voices.lock();
        for voice in voices.iter() {
            let from = voice.start_frame.max(base);
            let to = voice.end_frame().min(end);
            for pos in from..to {
                let dst = (pos - base) as usize * out_channels;
                let src = (pos - voice.start_frame) as usize * voice.channels;
                for ch in 0..out_channels {
                    out[dst + ch] += voice.samples[src + ch.min(voice.channels - 1)];
                }
            }
        }

        voices.retain(|voice| {
            let finished = voice.end_frame() <= end;
            if finished {
                let _ = completions.send(voice.id);
            }
            !finished
        });
        drop(voices);

        self.frames_rendered.store(end, Ordering::Release);
    }
}

/// Stop right over one voice
pub struct CpalSourceHandle {
    id: SourceId,
    shared: Arc<Shared>,
}

impl PlaybackHandle for CpalSourceHandle {
    fn stop(&mut self) {
        let id = self.id;
        self.shared.voices.lock().retain(|voice| voice.id != id);
    }
}

/// cpal-backed output device
pub struct CpalPlayback {
    device_name: String,
    sample_rate: u32,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    config: StreamConfig,
}

impl CpalPlayback {
    /// Open the device and start rendering silence.
    ///
    /// Finished sources are reported on `completions`, stream faults on
    /// `faults`.
    pub fn open(
        device: AudioDevice,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SourceId>,
        faults: FaultSender,
    ) -> Result<Self, AudioError> {
        let config = device::output_stream_config(&device, sample_rate)?;
        let device_name = device.name.clone();

        let shared = Arc::new(Shared {
            voices: Mutex::new(Vec::new()),
            frames_rendered: AtomicU64::new(0),
        });
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let shared_for_stream = shared.clone();
        let stream_config = config.clone();
        let out_channels = config.channels.max(1) as usize;

        let handle = thread::Builder::new()
            .name("playback-speaker".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        shared_for_stream.render(data, out_channels, &completions);
                    },
                    move |err| {
                        tracing::error!("Playback stream error: {}", err);
                        let _ = faults.send((Resource::PlaybackDevice, device::map_stream_error(err)));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(device::map_build_error(e)));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(std::time::Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut playback = Self {
            device_name,
            sample_rate,
            shared,
            running,
            thread_handle: Some(handle),
            config,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    "Speaker \"{}\" open: {}Hz, {} channel(s)",
                    playback.device_name,
                    playback.sample_rate,
                    playback.config.channels
                );
                Ok(playback)
            }
            Ok(Err(e)) => {
                playback.close();
                Err(e)
            }
            Err(_) => {
                playback.close();
                Err(AudioError::StreamError("playback thread exited".to_string()))
            }
        }
    }

    /// Stop the output stream and drop all pending voices
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shared.voices.lock().clear();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Speaker \"{}\" closed", self.device_name);
        }
    }
}

impl PlaybackDevice for CpalPlayback {
    type Handle = CpalSourceHandle;

    fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(
        &mut self,
        id: SourceId,
        segment: PlaybackSegment,
        start: f64,
    ) -> Result<Self::Handle, AudioError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(AudioError::Closed);
        }
        if segment.sample_rate != self.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "segment at {}Hz on a {}Hz output",
                segment.sample_rate, self.sample_rate
            )));
        }

        let start_frame = (start * self.sample_rate as f64).round().max(0.0) as u64;
        self.shared.voices.lock().push(Voice {
            id,
            start_frame,
            channels: segment.channels.max(1) as usize,
            samples: segment.samples,
        });

        Ok(CpalSourceHandle {
            id,
            shared: self.shared.clone(),
        })
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}
