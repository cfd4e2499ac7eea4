// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bookkeeping of the segments that are sent but not yet acknowledged.

use std::collections::VecDeque;
use std::time::Instant;

use smallvec::SmallVec;

/// Per-segment state recorded at transmission for delivery rate estimation.
///
/// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.1.2>.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateSampleState {
    /// P.delivered: C.delivered when the segment was sent.
    pub delivered: u64,

    /// P.delivered_time: C.delivered_time when the segment was sent.
    pub delivered_time: Option<Instant>,

    /// P.first_sent_time: C.first_sent_time when the segment was sent.
    pub first_sent_time: Option<Instant>,

    /// P.is_app_limited: whether C.app_limited was set when the segment was sent.
    pub is_app_limited: bool,
}

/// A sent segment which is tracked until acknowledged.
#[derive(Debug, Clone, Copy)]
pub struct SentSegment {
    /// Sequence number of the first byte.
    pub seq: u64,

    /// Segment size in bytes.
    pub size: u64,

    /// The time the segment was (re)transmitted.
    pub time_sent: Instant,

    /// Whether the segment was declared lost and no longer counts in flight.
    pub lost: bool,

    /// Delivery rate state recorded at transmission.
    pub rate_state: RateSampleState,
}

impl SentSegment {
    pub fn new(seq: u64, size: u64, time_sent: Instant) -> Self {
        Self {
            seq,
            size,
            time_sent,
            lost: false,
            rate_state: RateSampleState::default(),
        }
    }

    /// Sequence number one past the last byte.
    pub fn end(&self) -> u64 {
        self.seq.saturating_add(self.size)
    }
}

/// Acknowledged segments of a single ACK.
pub type AckedSegments = SmallVec<[SentSegment; 8]>;

/// Outstanding segments ordered by sequence number.
#[derive(Debug, Default)]
pub struct SentSegments {
    segments: VecDeque<SentSegment>,
}

impl SentSegments {
    /// Sequence number one past the highest byte sent so far.
    pub fn next_seq(&self) -> Option<u64> {
        self.segments.back().map(|s| s.end())
    }

    /// Whether a transmission starting at `seq` resends tracked data.
    pub fn is_retransmission(&self, seq: u64) -> bool {
        self.next_seq().map_or(false, |next| seq < next)
    }

    /// Track a new segment.
    pub fn push(&mut self, segment: SentSegment) {
        self.segments.push_back(segment);
    }

    /// Iterate over the tracked segments overlapping `[start, end)`.
    pub fn range_mut(
        &mut self,
        start: u64,
        end: u64,
    ) -> impl Iterator<Item = &mut SentSegment> + '_ {
        self.segments
            .iter_mut()
            .filter(move |s| s.seq < end && s.end() > start)
    }

    /// Mark every tracked segment lost and return the bytes which left flight.
    pub fn mark_all_lost(&mut self) -> u64 {
        let mut lost = 0;
        for s in self.segments.iter_mut().filter(|s| !s.lost) {
            s.lost = true;
            lost += s.size;
        }
        lost
    }

    /// Remove the segments acknowledged by `[start, end)`.
    ///
    /// A segment fully covered by the range is removed. A segment whose head
    /// is covered is trimmed and the acknowledged head is returned.
    pub fn on_ack(&mut self, start: u64, end: u64) -> AckedSegments {
        let mut acked = AckedSegments::new();
        if start >= end {
            return acked;
        }

        self.segments.retain_mut(|s| {
            if s.seq < start || s.seq >= end {
                return true;
            }
            if s.end() <= end {
                acked.push(*s);
                return false;
            }

            let mut head = *s;
            head.size = end - s.seq;
            s.seq = end;
            s.size -= head.size;
            acked.push(head);
            true
        });

        acked
    }

    /// Number of tracked segments.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(segments: &mut SentSegments, seq: u64, size: u64, now: Instant) {
        segments.push(SentSegment::new(seq, size, now));
    }

    #[test]
    fn sent_segments_ack() {
        let mut segments = SentSegments::default();
        let now = Instant::now();
        assert!(segments.is_empty());
        assert_eq!(segments.next_seq(), None);

        for i in 0..4 {
            sent(&mut segments, i * 100, 100, now);
        }
        assert_eq!(segments.len(), 4);
        assert_eq!(segments.next_seq(), Some(400));
        assert!(segments.is_retransmission(100));
        assert!(!segments.is_retransmission(400));

        // Cumulative ack of the first two segments.
        let acked = segments.on_ack(0, 200);
        assert_eq!(acked.len(), 2);
        assert_eq!(acked.iter().map(|s| s.size).sum::<u64>(), 200);
        assert_eq!(segments.len(), 2);

        // Selective ack of the last segment.
        let acked = segments.on_ack(300, 400);
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].seq, 300);
        assert_eq!(segments.len(), 1);

        // Empty range.
        assert!(segments.on_ack(200, 200).is_empty());
    }

    #[test]
    fn sent_segments_partial_ack() {
        let mut segments = SentSegments::default();
        let now = Instant::now();
        sent(&mut segments, 0, 1000, now);

        let acked = segments.on_ack(0, 400);
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].seq, 0);
        assert_eq!(acked[0].size, 400);
        assert_eq!(segments.len(), 1);

        // An ack starting in the middle of a segment acks nothing.
        assert!(segments.on_ack(500, 1000).is_empty());

        let acked = segments.on_ack(400, 1000);
        assert_eq!(acked[0].size, 600);
        assert!(segments.is_empty());
    }

    #[test]
    fn sent_segments_lost() {
        let mut segments = SentSegments::default();
        let now = Instant::now();
        for i in 0..5 {
            sent(&mut segments, i * 100, 100, now);
        }

        assert_eq!(segments.range_mut(150, 250).count(), 2);
        for s in segments.range_mut(0, 100) {
            s.lost = true;
        }
        assert_eq!(segments.mark_all_lost(), 400);
        assert_eq!(segments.mark_all_lost(), 0);
    }
}
