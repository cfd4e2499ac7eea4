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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use strum_macros::EnumIter;

use crate::CongestionConfig;
use crate::Error;
use crate::Result;
pub use bbr::Bbr;
pub use bbr::BbrConfig;
pub use bbr::BbrSnapshot;
pub use dummy::Dummy;
pub use phase::BbrState;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, EnumIter)]
pub enum CongestionControlAlgorithm {
    /// BBR uses recent measurements of a transport connection's delivery rate
    /// and round-trip time to build an explicit model of the network path.
    /// The model is then used to control data transmission speed and the
    /// maximum volume of data allowed in flight in the network at any time.
    #[default]
    Bbr,

    /// Dummy keeps a static congestion window and never paces. It is
    /// intended to be used for testing and experiments.
    Dummy,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("bbr") {
            Ok(CongestionControlAlgorithm::Bbr)
        } else if algor.eq_ignore_ascii_case("dummy") {
            Ok(CongestionControlAlgorithm::Dummy)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CongestionStats {
    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Total bytes sent in slow start.
    pub bytes_sent_in_slow_start: u64,

    /// Total bytes acked in slow start.
    pub bytes_acked_in_slow_start: u64,

    /// Total bytes lost in slow start.
    pub bytes_lost_in_slow_start: u64,

    /// Total bytes sent.
    pub bytes_sent_in_total: u64,

    /// Total bytes acked.
    pub bytes_acked_in_total: u64,

    /// Total bytes lost.
    pub bytes_lost_in_total: u64,
}

/// Control parameters produced by processing an acknowledgment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlOutputs {
    /// Pacing rate in bytes per second, if the algorithm paces.
    pub pacing_rate: Option<u64>,

    /// The maximum size of a data aggregate scheduled and transmitted
    /// together, in bytes.
    pub send_quantum: u64,

    /// Congestion window in bytes.
    pub cwnd: u64,
}

/// Congestion control interfaces shared by different algorithms.
///
/// The reliability engine calls the handlers one at a time for a flow. The
/// controller never sends data or arms timers by itself.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback after `bytes` starting at sequence number `seq` were sent.
    fn on_data_sent(&mut self, now: Instant, seq: u64, bytes: u64);

    /// Callback after the byte range `[first_seq_acked, first_seq_acked +
    /// acked_bytes)` was acknowledged. It runs the full model and control
    /// update and returns the control parameters to apply.
    fn on_data_acked(
        &mut self,
        now: Instant,
        first_seq_acked: u64,
        acked_bytes: u64,
        rtt: Option<Duration>,
        app_limited: bool,
    ) -> ControlOutputs;

    /// Callback after the range `[from_seq, to_seq)` was retransmitted by the
    /// retransmission timer. All data in flight is considered lost.
    fn on_segment_retransmitted(&mut self, now: Instant, from_seq: u64, to_seq: u64);

    /// Congestion event: `lost_bytes` starting at `seq` were declared lost
    /// by fast retransmit.
    fn on_congestion_event(&mut self, now: Instant, seq: u64, lost_bytes: u64) {}

    /// Check if in slow start.
    fn in_slow_start(&self) -> bool {
        false
    }

    /// Check if data sent at `sent_time` belongs to the current recovery
    /// episode.
    fn in_recovery(&self, sent_time: Instant) -> bool {
        false
    }

    /// Current congestion window.
    fn congestion_window(&self) -> u64;

    /// Current pacing rate estimated by Congestion Control Algorithm (CCA).
    /// If CCA does not estimate pacing rate, return None.
    fn pacing_rate(&self) -> Option<u64> {
        None
    }

    /// Current send quantum.
    fn send_quantum(&self) -> u64;

    /// Initial congestion window.
    fn initial_window(&self) -> u64;

    /// Minimal congestion window.
    fn minimal_window(&self) -> u64;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;

    /// The current control parameters.
    fn control_outputs(&self) -> ControlOutputs {
        ControlOutputs {
            pacing_rate: self.pacing_rate(),
            send_quantum: self.send_quantum(),
            cwnd: self.congestion_window(),
        }
    }
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

impl From<&CongestionConfig> for BbrConfig {
    fn from(conf: &CongestionConfig) -> Self {
        let max_segment_size = conf.max_segment_size as u64;
        let mut bbr_conf = BbrConfig::new(
            conf.min_congestion_window.saturating_mul(max_segment_size),
            conf.initial_congestion_window.saturating_mul(max_segment_size),
            Some(conf.initial_rtt),
            max_segment_size,
        );
        bbr_conf.set_btlbw_filter_len(conf.bbr_btlbw_filter_len);
        bbr_conf.set_rtprop_filter_len(conf.bbr_rtprop_filter_len);
        bbr_conf.set_probe_rtt_duration(conf.bbr_probe_rtt_duration);
        if let Some(seed) = conf.bbr_gain_cycle_seed {
            bbr_conf.set_gain_cycle_seed(seed);
        }
        bbr_conf
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &CongestionConfig) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Bbr => Box::new(Bbr::new(BbrConfig::from(conf))),
        CongestionControlAlgorithm::Dummy => {
            let max_segment_size = conf.max_segment_size as u64;
            let initial_cwnd = conf
                .initial_congestion_window
                .saturating_mul(max_segment_size);
            Box::new(Dummy::new(initial_cwnd, max_segment_size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn congestion_control_name() {
        let cases = [
            ("bbr", Ok(CongestionControlAlgorithm::Bbr)),
            ("Bbr", Ok(CongestionControlAlgorithm::Bbr)),
            ("BBR", Ok(CongestionControlAlgorithm::Bbr)),
            ("dummy", Ok(CongestionControlAlgorithm::Dummy)),
            ("DUMMY", Ok(CongestionControlAlgorithm::Dummy)),
            ("cubic", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(CongestionControlAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn congestion_control_build() {
        let mut conf = CongestionConfig {
            max_segment_size: 1000,
            bbr_gain_cycle_seed: Some(7),
            ..CongestionConfig::default()
        };

        for algor in CongestionControlAlgorithm::iter() {
            conf.congestion_control_algorithm = algor;
            let cc = build_congestion_controller(&conf);
            assert_eq!(cc.initial_window(), 10 * 1000);
            assert_eq!(cc.congestion_window(), 10 * 1000);
            assert_eq!(cc.stats().bytes_in_flight, 0);

            let name = format!("{:?}", algor).to_uppercase();
            assert_eq!(cc.name(), name);
        }
    }

    #[test]
    fn congestion_control_outputs() {
        let conf = CongestionConfig::default();
        let mut cc = build_congestion_controller(&conf);
        let now = Instant::now();
        let mss = conf.max_segment_size as u64;

        cc.on_data_sent(now, 0, mss);
        let out = cc.on_data_acked(
            now + Duration::from_millis(20),
            0,
            mss,
            Some(Duration::from_millis(20)),
            false,
        );
        assert_eq!(out, cc.control_outputs());
        assert!(out.pacing_rate.is_some());
        assert_eq!(cc.stats().bytes_acked_in_total, mss);
    }
}

mod bandwidth;
mod bbr;
mod delivery_rate;
mod dummy;
mod full_pipe;
mod phase;
mod round;
mod rtprop;
mod sent_segment;
mod windowed_filter;
