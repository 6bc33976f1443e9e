//! Gapless playback scheduling over a [`PlaybackSink`].
//!
//! Each inbound chunk starts at the scheduling cursor, or at the device's "now" if the
//! cursor has fallen behind, and the cursor then advances by the chunk's duration.

use std::collections::HashSet;

use super::device::{BufferId, PlaybackBuffer, PlaybackSink};
use crate::error::{Result, VoiceError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSpan {
    pub id: BufferId,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    sample_rate: u32,
    next_start_time: f64,
    scheduled: HashSet<BufferId>,
    next_id: BufferId,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            next_start_time: 0.0,
            scheduled: HashSet::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Schedule one chunk of samples after everything already queued.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> Result<ScheduledSpan> {
        if self.closed {
            return Err(VoiceError::PlaybackUnavailable("playback closed".into()));
        }
        if samples.is_empty() {
            return Err(VoiceError::PlaybackDecodeFailed("empty audio frame".into()));
        }

        let now = self.sink.now();
        let start = if self.next_start_time > now {
            self.next_start_time
        } else {
            now
        };

        self.next_id += 1;
        let buffer = PlaybackBuffer {
            id: self.next_id,
            sample_rate: self.sample_rate,
            samples,
        };
        let id = buffer.id;
        let end = start + buffer.duration();

        self.sink.schedule(buffer, start)?;
        self.next_start_time = end;
        self.scheduled.insert(id);

        log::debug!("Scheduled buffer {} at {:.3}s..{:.3}s", id, start, end);
        Ok(ScheduledSpan { id, start, end })
    }

    /// Record a natural completion. Returns true when this drained the scheduled set.
    ///
    /// Unknown ids (already stopped by an interruption) are ignored.
    pub fn finish(&mut self, id: BufferId) -> bool {
        self.scheduled.remove(&id) && self.scheduled.is_empty()
    }

    /// Stop everything queued and pull the cursor back to the device clock.
    ///
    /// Returns how many buffers were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.scheduled.len();
        for id in self.scheduled.drain() {
            self.sink.stop(id);
        }
        self.next_start_time = if self.closed { 0.0 } else { self.sink.now() };
        stopped
    }

    /// Stop all buffers and release the output device. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.interrupt();
        self.closed = true;
        self.next_start_time = 0.0;
        self.sink.close()
    }

    pub fn is_speaking(&self) -> bool {
        !self.scheduled.is_empty()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}
