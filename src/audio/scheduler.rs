//! Gapless playback scheduling
//!
//! Segments are placed back to back on the device's output clock in the
//! order they arrive. Each segment starts at
//! `max(next_start_time, now)`, and `next_start_time` advances by the
//! segment's duration as soon as it is scheduled, so bursts of arrivals queue
//! up behind each other instead of overlapping. A stalled stream simply
//! resumes at "now", leaving an implicit silence.
//!
//! Every scheduled source stays in the active set until the device reports
//! that it finished. An interruption stops everything in the set and rewinds
//! `next_start_time` to zero.

use std::collections::HashMap;

use crate::audio::buffer::PlaybackSegment;
use crate::codec::pcm::{self, EncodedChunk};
use crate::error::AudioError;

/// Identifies one scheduled source for its whole lifetime
pub type SourceId = u64;

/// Cancellation right over one scheduled source
pub trait PlaybackHandle: Send {
    /// Stop immediately. Must be safe after natural completion.
    fn stop(&mut self);
}

/// Output device contract required by the scheduler.
///
/// Implementations report a source's id on their completion channel once it
/// finishes playing naturally. Stopped sources are not reported.
pub trait PlaybackDevice: Send {
    type Handle: PlaybackHandle;

    /// Current output clock time in seconds
    fn current_time(&self) -> f64;

    /// Play `segment` starting at `start` seconds on the output clock
    fn schedule(
        &mut self,
        id: SourceId,
        segment: PlaybackSegment,
        start: f64,
    ) -> Result<Self::Handle, AudioError>;
}

/// Placement of one segment on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledSegment {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub completed: u64,
    pub dropped: u64,
    pub interruptions: u64,
}

/// Owns the output clock cursor and the set of sources still playing
pub struct PlaybackScheduler<D: PlaybackDevice> {
    device: D,
    sample_rate: u32,
    channels: u16,
    next_start_time: f64,
    active: HashMap<SourceId, D::Handle>,
    next_id: SourceId,
    stats: SchedulerStats,
}

impl<D: PlaybackDevice> PlaybackScheduler<D> {
    pub fn new(device: D, sample_rate: u32, channels: u16) -> Self {
        Self {
            device,
            sample_rate,
            channels,
            next_start_time: 0.0,
            active: HashMap::new(),
            next_id: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Decode an inbound chunk and schedule it.
    ///
    /// A chunk that fails to decode is dropped whole; the error is returned
    /// so the caller can log it, and scheduler state is left untouched.
    pub fn enqueue(&mut self, chunk: &EncodedChunk) -> crate::Result<ScheduledSegment> {
        let samples = match pcm::decode(chunk) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.dropped += 1;
                return Err(e.into());
            }
        };

        if let Some(rate) = chunk.mime_type.sample_rate {
            if rate != self.sample_rate {
                tracing::debug!(
                    "Chunk declares {}Hz, playing at fixed {}Hz",
                    rate,
                    self.sample_rate
                );
            }
        }

        let segment = PlaybackSegment::from_pcm16(&samples, self.sample_rate, self.channels);
        match self.schedule(segment) {
            Ok(scheduled) => Ok(scheduled),
            Err(e) => {
                self.stats.dropped += 1;
                Err(e.into())
            }
        }
    }

    /// Schedule an already decoded segment right after the previous one
    pub fn schedule(&mut self, segment: PlaybackSegment) -> Result<ScheduledSegment, AudioError> {
        let now = self.device.current_time();
        let start = self.next_start_time.max(now);
        let duration = segment.duration();
        let id = self.next_id;

        let handle = self.device.schedule(id, segment, start)?;

        self.next_id += 1;
        self.next_start_time = start + duration;
        self.active.insert(id, handle);
        self.stats.scheduled += 1;

        tracing::trace!(
            "Scheduled source {} at {:.3}s for {:.3}s ({} active)",
            id,
            start,
            duration,
            self.active.len()
        );

        Ok(ScheduledSegment { id, start, duration })
    }

    /// Forget a source the device reported as finished.
    ///
    /// Returns false for sources that were already stopped or unknown.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        if self.active.remove(&id).is_some() {
            self.stats.completed += 1;
            true
        } else {
            false
        }
    }

    /// Handle a server interruption: stop every active source and restart
    /// the output cursor. Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        self.stats.interruptions += 1;
        let stopped = self.stop_all();
        tracing::debug!("Interrupted playback, stopped {} source(s)", stopped);
        stopped
    }

    /// Stop and discard every active source
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.active.len();
        for (_, mut handle) in self.active.drain() {
            handle.stop();
        }
        self.next_start_time = 0.0;
        stopped
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: SourceId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}

impl<D: PlaybackDevice> Drop for PlaybackScheduler<D> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::ManualClockDevice;
    use proptest::prelude::*;

    const RATE: u32 = 24000;

    fn segment_secs(secs: f64) -> PlaybackSegment {
        let frames = (secs * RATE as f64).round() as usize;
        PlaybackSegment::new(vec![0.0; frames], RATE, 1)
    }

    #[test]
    fn test_back_to_back_arrivals() {
        let device = ManualClockDevice::new();
        let mut scheduler = PlaybackScheduler::new(device.clone(), RATE, 1);

        let a = scheduler.schedule(segment_secs(1.0)).unwrap();
        let b = scheduler.schedule(segment_secs(0.5)).unwrap();
        let c = scheduler.schedule(segment_secs(2.0)).unwrap();

        assert_eq!(a.start, 0.0);
        assert_eq!(b.start, 1.0);
        assert_eq!(c.start, 1.5);
        assert_eq!(scheduler.next_start_time(), 3.5);
        assert_eq!(scheduler.active_count(), 3);
        assert_eq!(device.scheduled_starts(), vec![0.0, 1.0, 1.5]);
    }

    #[test]
    fn test_stalled_stream_resumes_at_now() {
        let device = ManualClockDevice::new();
        let mut scheduler = PlaybackScheduler::new(device.clone(), RATE, 1);

        scheduler.schedule(segment_secs(1.0)).unwrap();
        device.set_time(4.0);

        let late = scheduler.schedule(segment_secs(0.5)).unwrap();
        assert_eq!(late.start, 4.0);
        assert_eq!(scheduler.next_start_time(), 4.5);
    }

    #[test]
    fn test_interruption_resets_state() {
        let device = ManualClockDevice::new();
        let mut scheduler = PlaybackScheduler::new(device.clone(), RATE, 1);

        let a = scheduler.schedule(segment_secs(1.0)).unwrap();
        let b = scheduler.schedule(segment_secs(0.5)).unwrap();
        let c = scheduler.schedule(segment_secs(2.0)).unwrap();

        // First segment played out; the other two are still playing
        device.set_time(1.2);
        assert!(scheduler.on_source_ended(a.id));
        assert_eq!(scheduler.active_count(), 2);

        assert_eq!(scheduler.interrupt(), 2);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(device.stopped(), {
            let mut ids = vec![b.id, c.id];
            ids.sort_unstable();
            ids
        });

        let next = scheduler.schedule(segment_secs(0.25)).unwrap();
        assert_eq!(next.start, 1.2);
        assert_eq!(scheduler.stats().interruptions, 1);
    }

    #[test]
    fn test_completion_of_stopped_source_is_ignored() {
        let device = ManualClockDevice::new();
        let mut scheduler = PlaybackScheduler::new(device, RATE, 1);

        let a = scheduler.schedule(segment_secs(1.0)).unwrap();
        scheduler.interrupt();

        assert!(!scheduler.on_source_ended(a.id));
        assert!(!scheduler.is_active(a.id));
        assert_eq!(scheduler.stats().completed, 0);
    }

    #[test]
    fn test_enqueue_decodes_chunk() {
        let device = ManualClockDevice::new();
        let mut scheduler = PlaybackScheduler::new(device, RATE, 1);

        let chunk = pcm::encode(&vec![1000i16; 12000], RATE);
        let scheduled = scheduler.enqueue(&chunk).unwrap();
        assert!((scheduled.duration - 0.5).abs() < 1e-9);
        assert_eq!(scheduler.stats().scheduled, 1);
    }

    #[test]
    fn test_malformed_chunk_is_dropped_whole() {
        let device = ManualClockDevice::new();
        let mut scheduler = PlaybackScheduler::new(device.clone(), RATE, 1);
        scheduler.schedule(segment_secs(1.0)).unwrap();

        let odd = EncodedChunk::new(pcm::MediaType::pcm(RATE), pcm::encode_bytes(&[1, 2, 3]));
        assert!(scheduler.enqueue(&odd).is_err());

        let garbage = EncodedChunk::new(pcm::MediaType::pcm(RATE), "%%%".to_string());
        assert!(scheduler.enqueue(&garbage).is_err());

        assert_eq!(scheduler.stats().dropped, 2);
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.next_start_time(), 1.0);
        assert_eq!(device.scheduled_starts().len(), 1);
    }

    #[test]
    fn test_device_failure_does_not_advance_clock() {
        let device = ManualClockDevice::new();
        let mut scheduler = PlaybackScheduler::new(device.clone(), RATE, 1);

        device.fail_next_schedule();
        assert!(scheduler.schedule(segment_secs(1.0)).is_err());
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_drop_stops_active_sources() {
        let device = ManualClockDevice::new();
        {
            let mut scheduler = PlaybackScheduler::new(device.clone(), RATE, 1);
            scheduler.schedule(segment_secs(1.0)).unwrap();
            scheduler.schedule(segment_secs(1.0)).unwrap();
        }
        assert_eq!(device.stopped().len(), 2);
    }

    proptest! {
        #[test]
        fn prop_gapless_monotonic_non_overlapping(
            steps in proptest::collection::vec((1usize..48000, 0u32..3000), 1..40)
        ) {
            let device = ManualClockDevice::new();
            let mut scheduler = PlaybackScheduler::new(device.clone(), RATE, 1);
            let mut previous: Option<ScheduledSegment> = None;
            let mut last_next_start = scheduler.next_start_time();
            let mut now = 0.0f64;

            for (frames, advance_ms) in steps {
                now += advance_ms as f64 / 1000.0;
                device.set_time(now);

                let scheduled = scheduler
                    .schedule(PlaybackSegment::new(vec![0.0; frames], RATE, 1))
                    .unwrap();

                prop_assert!(scheduled.start >= now);
                if let Some(prev) = previous {
                    prop_assert!(scheduled.start >= prev.end());
                }
                prop_assert!(scheduler.next_start_time() >= last_next_start);

                last_next_start = scheduler.next_start_time();
                previous = Some(scheduled);
            }

            let mut intervals = device.scheduled_intervals();
            intervals.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            for pair in intervals.windows(2) {
                prop_assert!(pair[1].0 >= pair[0].1);
            }
        }
    }
}
