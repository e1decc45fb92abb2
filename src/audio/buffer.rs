//! Audio data carried between the pipeline stages
//!
//! `AudioFrame` is one capture block on its way to the codec.
//! `PlaybackSegment` is one decoded block on its way to the speaker.

use crate::codec::pcm;

/// One block of captured 16-bit samples
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved samples (mono in practice)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Frame sequence number within a capture run
    pub sequence: u32,
}

impl AudioFrame {
    /// Convert a block of float samples from the capture device
    pub fn from_float(data: &[f32], sample_rate: u32, channels: u16, sequence: u32) -> Self {
        Self {
            samples: pcm::float_to_pcm16(data),
            sample_rate,
            channels,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / self.sample_rate.max(1) as u64
    }
}

/// A decoded buffer ready to be scheduled on the output clock
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    /// Interleaved float samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlaybackSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Build a segment from decoded 16-bit samples
    pub fn from_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        Self::new(pcm::pcm16_to_float(samples), sample_rate, channels)
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration in seconds of output clock time
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_float() {
        let frame = AudioFrame::from_float(&[0.5; 4096], 16000, 1, 7);
        assert_eq!(frame.samples.len(), 4096);
        assert_eq!(frame.samples[0], 16384);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.duration_us(), 256_000);
    }

    #[test]
    fn test_segment_duration() {
        let segment = PlaybackSegment::from_pcm16(&vec![0i16; 12000], 24000, 1);
        assert_eq!(segment.frames(), 12000);
        assert!((segment.duration() - 0.5).abs() < f64::EPSILON);

        let stereo = PlaybackSegment::new(vec![0.0; 48000], 24000, 2);
        assert!((stereo.duration() - 1.0).abs() < f64::EPSILON);
    }
}
