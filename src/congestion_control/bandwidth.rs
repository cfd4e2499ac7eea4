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

use super::delivery_rate::RateSample;
use super::round::RoundTripCounter;
use super::windowed_filter::WindowedMaxFilter;

/// Estimator of BBR.BtlBw, the bottleneck bandwidth available to the flow,
/// from the maximum delivery rate sample over the trailing round trips.
///
/// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.1.1.
#[derive(Debug)]
pub struct BandwidthEstimator {
    /// Counter of packet-timed round trips, the time axis of the filter.
    round: RoundTripCounter,

    /// BBR.BtlBwFilter: The max filter used to estimate BBR.BtlBw.
    filter: WindowedMaxFilter,

    /// BBR.BtlBw in bytes per second.
    btlbw: u64,
}

impl BandwidthEstimator {
    pub fn new(filter_len: u64) -> Self {
        Self {
            round: RoundTripCounter::default(),
            filter: WindowedMaxFilter::new(filter_len),
            btlbw: 0,
        }
    }

    /// For every ACK, update the round and then the BBR.BtlBw estimate.
    ///
    /// `packet_delivered` is the largest P.delivered of the segments the
    /// ACK delivered, or None if it delivered nothing.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.1.1.5.
    pub fn on_ack(
        &mut self,
        packet_delivered: Option<u64>,
        total_delivered: u64,
        sample: Option<&RateSample>,
    ) {
        match packet_delivered {
            Some(delivered) => {
                self.round.on_ack(delivered, total_delivered);
            }
            None => self.round.on_empty_ack(),
        }

        let sample = match sample {
            Some(sample) => sample,
            None => return,
        };

        // An app-limited sample only shows how fast the application sent,
        // so it may raise the estimate but never lower it.
        if sample.delivery_rate >= self.btlbw || !sample.is_app_limited {
            self.btlbw = self
                .filter
                .update(sample.delivery_rate, self.round.round_count());
        }
    }

    /// End the current round once everything delivered so far is acked.
    pub fn set_round_end(&mut self, total_delivered: u64) {
        self.round.set_round_end(total_delivered);
    }

    pub fn btlbw(&self) -> u64 {
        self.btlbw
    }

    pub fn round_count(&self) -> u64 {
        self.round.round_count()
    }

    pub fn is_round_start(&self) -> bool {
        self.round.is_round_start()
    }

    #[cfg(test)]
    pub fn next_round_delivered(&self) -> u64 {
        self.round.next_round_delivered()
    }
}
