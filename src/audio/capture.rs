//! Microphone capture
//!
//! The capture device runs on its own thread and hands fixed-size blocks of
//! float samples to whatever sink is attached. `CapturePipeline` is that
//! sink: it converts each block to 16-bit PCM, encodes it and forwards the
//! chunk, one chunk per hardware callback, in production order.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::backend::FaultSender;
use crate::audio::buffer::AudioFrame;
use crate::audio::device::{self, AudioDevice};
use crate::codec::pcm::{self, EncodedChunk};
use crate::error::{AudioError, Resource};

/// Receives every full capture block
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// An acquired microphone.
///
/// Blocks flow only after `start`. Dropping the stream must release the
/// hardware just like `release` does.
pub trait MicrophoneStream: Send {
    /// Attach the block sink
    fn start(&mut self, on_block: BlockCallback) -> Result<(), AudioError>;

    /// Stop delivering blocks and free the device. Idempotent.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Converts capture blocks into encoded chunks
pub struct CapturePipeline {
    sample_rate: u32,
    channels: u16,
    sequence: Arc<AtomicU32>,
    chunks_forwarded: Arc<AtomicU64>,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sequence: Arc::new(AtomicU32::new(0)),
            chunks_forwarded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Begin forwarding `stream`'s blocks to `on_chunk`.
    ///
    /// There is no stop call; forwarding ends when the owner releases the
    /// stream.
    pub fn start<S, F>(&self, stream: &mut S, on_chunk: F) -> Result<(), AudioError>
    where
        S: MicrophoneStream + ?Sized,
        F: FnMut(EncodedChunk) + Send + 'static,
    {
        self.sequence.store(0, Ordering::SeqCst);
        self.chunks_forwarded.store(0, Ordering::SeqCst);

        tracing::debug!(
            "Capture pipeline forwarding at {}Hz, {} channel(s)",
            self.sample_rate,
            self.channels
        );
        stream.start(Box::new(self.block_handler(on_chunk)))
    }

    /// Build the per-block conversion closure
    pub fn block_handler<F>(&self, mut on_chunk: F) -> impl FnMut(&[f32]) + Send + 'static
    where
        F: FnMut(EncodedChunk) + Send + 'static,
    {
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let sequence = self.sequence.clone();
        let chunks_forwarded = self.chunks_forwarded.clone();

        move |data: &[f32]| {
            let seq = sequence.fetch_add(1, Ordering::Relaxed);
            let frame = AudioFrame::from_float(data, sample_rate, channels, seq);
            let chunk = pcm::encode(&frame.samples, frame.sample_rate);
            chunks_forwarded.fetch_add(1, Ordering::Relaxed);
            on_chunk(chunk);
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get total chunks handed to the sink
    pub fn chunks_forwarded(&self) -> u64 {
        self.chunks_forwarded.load(Ordering::Relaxed)
    }
}

type SharedSink = Arc<Mutex<Option<BlockCallback>>>;

/// cpal-backed microphone
pub struct CpalMicrophone {
    device_name: String,
    running: Arc<AtomicBool>,
    sink: SharedSink,
    thread_handle: Option<JoinHandle<()>>,
    config: StreamConfig,
}

impl CpalMicrophone {
    /// Open the device and start the hardware stream.
    ///
    /// Blocks until the stream is playing, so permission and format problems
    /// surface here rather than after the session has gone live. Faults the
    /// running stream raises later go to `faults`.
    pub fn open(
        device: AudioDevice,
        sample_rate: u32,
        block_size: usize,
        faults: FaultSender,
    ) -> Result<Self, AudioError> {
        let config = device::input_stream_config(&device, sample_rate)?;
        let device_name = device.name.clone();

        let running = Arc::new(AtomicBool::new(true));
        let sink: SharedSink = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let sink_for_stream = sink.clone();
        let stream_config = config.clone();
        let device_channels = config.channels.max(1) as usize;

        let handle = thread::Builder::new()
            .name("capture-mic".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut block: Vec<f32> = Vec::with_capacity(block_size);

                let stream = cpal_device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        for frame in data.chunks(device_channels) {
                            // Downmix to mono
                            let sample = frame.iter().sum::<f32>() / frame.len() as f32;
                            block.push(sample);

                            if block.len() >= block_size {
                                if let Some(on_block) = sink_for_stream.lock().as_mut() {
                                    on_block(block.as_slice());
                                }
                                block.clear();
                            }
                        }
                    },
                    move |err| {
                        tracing::error!("Capture stream error: {}", err);
                        let _ = faults.send((Resource::Microphone, device::map_stream_error(err)));
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

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(std::time::Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut mic = Self {
            device_name,
            running,
            sink,
            thread_handle: Some(handle),
            config,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    "Microphone \"{}\" open: {}Hz, {} channel(s), {} samples/block",
                    mic.device_name,
                    mic.config.sample_rate.0,
                    mic.config.channels,
                    block_size
                );
                Ok(mic)
            }
            Ok(Err(e)) => {
                mic.release();
                Err(e)
            }
            Err(_) => {
                mic.release();
                Err(AudioError::StreamError("capture thread exited".to_string()))
            }
        }
    }

}

impl MicrophoneStream for CpalMicrophone {
    fn start(&mut self, on_block: BlockCallback) -> Result<(), AudioError> {
        if self.is_released() {
            return Err(AudioError::Closed);
        }
        *self.sink.lock() = Some(on_block);
        Ok(())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.sink.lock().take();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Microphone \"{}\" released", self.device_name);
        }
    }

    fn is_released(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Replays canned blocks on `start`
    struct ScriptedMic {
        blocks: Vec<Vec<f32>>,
        released: bool,
    }

    impl MicrophoneStream for ScriptedMic {
        fn start(&mut self, mut on_block: BlockCallback) -> Result<(), AudioError> {
            for block in &self.blocks {
                on_block(block.as_slice());
            }
            Ok(())
        }

        fn release(&mut self) {
            self.released = true;
        }

        fn is_released(&self) -> bool {
            self.released
        }
    }

    #[test]
    fn test_pipeline_forwards_each_block_in_order() {
        let mut mic = ScriptedMic {
            blocks: vec![vec![0.5; 4096], vec![-0.25; 4096], vec![0.0; 4096]],
            released: false,
        };
        let pipeline = CapturePipeline::new(16000, 1);
        let (tx, rx) = mpsc::channel();

        pipeline
            .start(&mut mic, move |chunk| tx.send(chunk).unwrap())
            .unwrap();

        let chunks: Vec<EncodedChunk> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(pipeline.chunks_forwarded(), 3);

        let first = pcm::decode(&chunks[0]).unwrap();
        assert_eq!(first.len(), 4096);
        assert!(first.iter().all(|&s| s == 16384));

        let second = pcm::decode(&chunks[1]).unwrap();
        assert!(second.iter().all(|&s| s == -8192));

        for chunk in &chunks {
            assert_eq!(chunk.mime_type.sample_rate, Some(16000));
        }
    }

    #[test]
    fn test_block_handler_counts() {
        let pipeline = CapturePipeline::new(16000, 1);
        let mut handler = pipeline.block_handler(|chunk| {
            assert_eq!(pcm::decode(&chunk).unwrap().len(), 4);
        });
        handler(&[0.1f32, 0.2, 0.3, 0.4][..]);
        handler(&[0.0f32; 4][..]);
        assert_eq!(pipeline.chunks_forwarded(), 2);
    }

    #[test]
    fn test_cpal_microphone_open() {
        // Only meaningful on machines with an input device
        if let Ok(device) = device::get_default_input_device() {
            let (faults, _fault_rx) = tokio::sync::mpsc::unbounded_channel();
            if let Ok(mut mic) = CpalMicrophone::open(device, 16000, 4096, faults) {
                assert!(!mic.is_released());
                mic.release();
                assert!(mic.is_released());
            }
        }
    }
}
