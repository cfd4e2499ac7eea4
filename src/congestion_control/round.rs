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

/// Round trip counter for tracking packet-timed round trips which starts
/// at the transmission of some segment, and then end at the ack of that segment.
///
/// Rounds are measured against delivered data instead of wall clock time,
/// so the BtlBw filter window stays meaningful under variable RTT and
/// app-limited periods.
///
/// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.1.1.3.
#[derive(Debug, Default)]
pub struct RoundTripCounter {
    /// BBR.round_count: Count of packet-timed round trips.
    round_count: u64,

    /// BBR.round_start: A boolean that BBR sets to true once per packet-
    /// timed round trip, on ACKs that advance BBR.round_count.
    is_round_start: bool,

    /// BBR.next_round_delivered: packet.delivered value denoting the end of
    /// a packet-timed round trip.
    next_round_delivered: u64,
}

impl RoundTripCounter {
    /// Update the round on an ACK.
    ///
    /// `packet_delivered` is the largest P.delivered of the segments
    /// delivered by the ACK and `total_delivered` is C.delivered after the
    /// ACK was processed. Return true if a new round starts.
    pub fn on_ack(&mut self, packet_delivered: u64, total_delivered: u64) -> bool {
        if packet_delivered >= self.next_round_delivered {
            self.next_round_delivered = total_delivered;
            self.round_count += 1;
            self.is_round_start = true;
        } else {
            self.is_round_start = false;
        }

        self.is_round_start
    }

    /// Clear the round start flag on an ACK that delivered nothing.
    pub fn on_empty_ack(&mut self) {
        self.is_round_start = false;
    }

    /// End the current round once everything delivered so far is acked.
    pub fn set_round_end(&mut self, total_delivered: u64) {
        self.next_round_delivered = self.next_round_delivered.max(total_delivered);
    }

    pub fn round_count(&self) -> u64 {
        self.round_count
    }

    pub fn is_round_start(&self) -> bool {
        self.is_round_start
    }

    #[cfg(test)]
    pub fn next_round_delivered(&self) -> u64 {
        self.next_round_delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_counting() {
        let mut round = RoundTripCounter::default();
        assert_eq!(round.round_count(), 0);
        assert!(!round.is_round_start());

        // The first ack always starts a round.
        assert!(round.on_ack(0, 1000));
        assert_eq!(round.round_count(), 1);
        assert_eq!(round.next_round_delivered(), 1000);

        // Segments sent before the round end don't start a new round.
        assert!(!round.on_ack(500, 2000));
        assert!(!round.is_round_start());
        assert_eq!(round.round_count(), 1);

        assert!(round.on_ack(1000, 3000));
        assert_eq!(round.round_count(), 2);
        assert_eq!(round.next_round_delivered(), 3000);

        round.on_empty_ack();
        assert!(!round.is_round_start());
        assert_eq!(round.round_count(), 2);
    }

    #[test]
    fn round_end_only_extends() {
        let mut round = RoundTripCounter::default();
        round.on_ack(0, 1000);

        round.set_round_end(5000);
        assert_eq!(round.next_round_delivered(), 5000);
        assert!(!round.on_ack(4000, 6000));

        round.set_round_end(100);
        assert_eq!(round.next_round_delivered(), 5000);
        assert!(round.on_ack(5000, 7000));
    }
}
