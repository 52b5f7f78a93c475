use std::time::Instant;

use super::rtcp::{JITTER_PLACEHOLDER, ReceiverReport};

/// Receive statistics for one media stream over one report window.
///
/// Reset when playback starts and after every emitted receiver report.
/// The lowest sequence number is the first non-zero one of the window,
/// even if a smaller one arrives later out of order. A genuine sequence
/// number 0 looks the same as "nothing seen yet".
#[derive(Debug, Clone)]
pub struct MediaStats {
    count: u32,
    min_seq: u32,
    max_seq: u32,
    last_timestamp: u32,
    ssrc: u32,
    window_start: Instant,
}

impl MediaStats {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            min_seq: 0,
            max_seq: 0,
            last_timestamp: 0,
            ssrc: 0,
            window_start: now,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    pub fn update(&mut self, timestamp: u32, seq: u16, ssrc: u32) {
        let seq = u32::from(seq);
        self.ssrc = ssrc;
        self.count += 1;
        if self.min_seq == 0 {
            self.min_seq = seq;
        }
        if seq > self.max_seq {
            self.max_seq = seq;
        }
        self.last_timestamp = timestamp;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn min_seq(&self) -> u32 {
        self.min_seq
    }

    pub fn max_seq(&self) -> u32 {
        self.max_seq
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Report for the current window.
    ///
    /// `fraction lost = 255 * count / (max - min)` truncated to its 8-bit
    /// field, or 0xFF when the range is empty. `cumulative lost = max - min - count`.
    pub fn receiver_report(&self, reporter_ssrc: u32, now: Instant) -> ReceiverReport {
        let range = self.max_seq.saturating_sub(self.min_seq);
        let fraction_lost = if range > 0 {
            (255 * u64::from(self.count) / u64::from(range)) as u8
        } else {
            0xFF
        };
        let cumulative_lost = i64::from(self.max_seq) - i64::from(self.min_seq) - i64::from(self.count);
        let elapsed = now.saturating_duration_since(self.window_start).as_millis();

        ReceiverReport {
            reporter_ssrc,
            source_ssrc: self.ssrc,
            fraction_lost,
            cumulative_lost: cumulative_lost.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
            highest_sequence: self.max_seq,
            jitter: JITTER_PLACEHOLDER,
            last_sr: self.last_timestamp,
            delay_since_last_sr: u32::try_from(elapsed).unwrap_or(u32::MAX),
        }
    }
}
