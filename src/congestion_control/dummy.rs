// Copyright (c) 2024 The TQUIC Authors.
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

#![allow(unused_variables)]

use std::time::Duration;
use std::time::Instant;

use super::CongestionController;
use super::CongestionStats;
use super::ControlOutputs;

/// Dummy is a simple congestion controller with a static congestion window.
/// It is intended to be used for testing and experiments.
#[derive(Debug)]
pub struct Dummy {
    /// Congestion window in bytes.
    cwnd: u64,

    /// Max segment size in bytes.
    max_segment_size: u64,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl Dummy {
    pub fn new(initial_cwnd: u64, max_segment_size: u64) -> Self {
        Self {
            cwnd: initial_cwnd,
            max_segment_size,
            stats: Default::default(),
        }
    }
}

impl CongestionController for Dummy {
    fn name(&self) -> &str {
        "DUMMY"
    }

    fn on_data_sent(&mut self, now: Instant, seq: u64, bytes: u64) {
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_add(bytes);
        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(bytes);
    }

    fn on_data_acked(
        &mut self,
        now: Instant,
        first_seq_acked: u64,
        acked_bytes: u64,
        rtt: Option<Duration>,
        app_limited: bool,
    ) -> ControlOutputs {
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(acked_bytes);
        self.stats.bytes_acked_in_total =
            self.stats.bytes_acked_in_total.saturating_add(acked_bytes);
        self.control_outputs()
    }

    fn on_segment_retransmitted(&mut self, now: Instant, from_seq: u64, to_seq: u64) {
        self.stats.bytes_lost_in_total = self
            .stats
            .bytes_lost_in_total
            .saturating_add(self.stats.bytes_in_flight);
        self.stats.bytes_in_flight = 0;
    }

    fn on_congestion_event(&mut self, now: Instant, seq: u64, lost_bytes: u64) {
        self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(lost_bytes);
        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(lost_bytes);
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn send_quantum(&self) -> u64 {
        self.max_segment_size
    }

    fn initial_window(&self) -> u64 {
        self.cwnd
    }

    fn minimal_window(&self) -> u64 {
        self.cwnd
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}
