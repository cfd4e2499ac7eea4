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

//! bbrflow is a per-flow implementation of the BBR congestion control
//! algorithm, driven entirely by discrete transport events.
//!
//! The crate neither sends packets nor owns timers. The owning transport
//! (the reliability engine) notifies the controller when data is sent,
//! acknowledged, lost or retransmitted, and applies the control outputs
//! it gets back: a pacing rate, a send quantum and a congestion window.
//!
//! ## Get started
//!
//! ```
//! use std::time::{Duration, Instant};
//! use bbrflow::Config;
//!
//! let config = Config::new();
//! let mut cc = config.build_controller()?;
//!
//! let now = Instant::now();
//! cc.on_data_sent(now, 0, 1460);
//!
//! let now = now + Duration::from_millis(50);
//! let out = cc.on_data_acked(now, 0, 1460, Some(Duration::from_millis(50)), false);
//! assert!(out.cwnd >= cc.minimal_window());
//! # Ok::<(), bbrflow::Error>(())
//! ```
//!
//! All byte quantities are in bytes and all rates in bytes per second.

use std::cmp;
use std::time::Duration;

/// The default maximum segment size in bytes.
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 1460;

/// The smallest maximum segment size accepted by the configuration.
pub const MIN_MAX_SEGMENT_SIZE: usize = 536;

/// Clock granularity assumed for configured durations.
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// The initial RTT used before a real RTT is measured.
const INITIAL_RTT: Duration = Duration::from_millis(333);

/// The default initial congestion window in packets.
const DEFAULT_INITIAL_CONGESTION_WINDOW: u64 = 10;

/// The default minimal congestion window in packets (BBRMinPipeCwnd).
const DEFAULT_MIN_CONGESTION_WINDOW: u64 = 4;

/// The default length of the BBR.BtlBw max filter in round trips.
const DEFAULT_BTLBW_FILTER_LEN: u64 = 10;

/// The default length of the BBR.RTprop filter.
const DEFAULT_RTPROP_FILTER_LEN: Duration = Duration::from_secs(10);

/// The default minimum duration of the BBR ProbeRTT state.
const DEFAULT_PROBE_RTT_DURATION: Duration = Duration::from_millis(200);

/// A specialized [`Result`] type for bbrflow operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about congestion control for a single flow.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct CongestionConfig {
    /// The congestion control algorithm used for the flow.
    pub congestion_control_algorithm: CongestionControlAlgorithm,

    /// The maximum segment size of the flow in bytes.
    pub max_segment_size: usize,

    /// The minimal congestion window in packets.
    pub min_congestion_window: u64,

    /// The initial congestion window in packets.
    pub initial_congestion_window: u64,

    /// The initial rtt, used before real rtt is estimated.
    pub initial_rtt: Duration,

    /// The length of the BBR BtlBw max filter in round trips.
    pub bbr_btlbw_filter_len: u64,

    /// The length of the BBR RTprop filter.
    pub bbr_rtprop_filter_len: Duration,

    /// The minimum duration for BBR ProbeRTT state.
    pub bbr_probe_rtt_duration: Duration,

    /// Seed for the ProbeBW gain cycle randomization. A random seed is used
    /// if it is not set.
    pub bbr_gain_cycle_seed: Option<u64>,
}

impl Default for CongestionConfig {
    fn default() -> CongestionConfig {
        CongestionConfig {
            congestion_control_algorithm: CongestionControlAlgorithm::Bbr,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            min_congestion_window: DEFAULT_MIN_CONGESTION_WINDOW,
            initial_congestion_window: DEFAULT_INITIAL_CONGESTION_WINDOW,
            initial_rtt: INITIAL_RTT,
            bbr_btlbw_filter_len: DEFAULT_BTLBW_FILTER_LEN,
            bbr_rtprop_filter_len: DEFAULT_RTPROP_FILTER_LEN,
            bbr_probe_rtt_duration: DEFAULT_PROBE_RTT_DURATION,
            bbr_gain_cycle_seed: None,
        }
    }
}

/// Configurations for creating flow congestion controllers.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Congestion control configurations.
    congestion: CongestionConfig,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the congestion control algorithm used by new flows.
    /// The default value is BBR.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion.congestion_control_algorithm = cca;
    }

    /// Set the maximum segment size in bytes. Values smaller than `536`
    /// are raised to `536`. The default value is `1460`.
    pub fn set_max_segment_size(&mut self, v: usize) {
        self.congestion.max_segment_size = cmp::max(v, MIN_MAX_SEGMENT_SIZE);
    }

    /// Set the initial congestion window in packets.
    /// The default value is 10.
    pub fn set_initial_congestion_window(&mut self, packets: u64) {
        self.congestion.initial_congestion_window = packets;
    }

    /// Set the minimal congestion window in packets. It is also the BBR
    /// minimum pipe floor. The default value is 4.
    pub fn set_min_congestion_window(&mut self, packets: u64) {
        self.congestion.min_congestion_window = packets;
    }

    /// Set the initial RTT in milliseconds. The default value is 333ms.
    pub fn set_initial_rtt(&mut self, millis: u64) {
        self.congestion.initial_rtt = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the length of the BBR BtlBw max filter in round trips.
    /// The default value is 10.
    pub fn set_bbr_btlbw_filter_len(&mut self, rounds: u64) {
        self.congestion.bbr_btlbw_filter_len = cmp::max(rounds, 1);
    }

    /// Set the length of the BBR RTprop filter window in milliseconds.
    /// The default value is 10000 milliseconds.
    pub fn set_bbr_rtprop_filter_len(&mut self, millis: u64) {
        self.congestion.bbr_rtprop_filter_len =
            cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the minimum duration for BBR ProbeRTT state in milliseconds.
    /// The default value is 200 milliseconds.
    pub fn set_bbr_probe_rtt_duration(&mut self, millis: u64) {
        self.congestion.bbr_probe_rtt_duration =
            cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the seed of the ProbeBW gain cycle randomization, which makes the
    /// controller fully deterministic.
    pub fn set_bbr_gain_cycle_seed(&mut self, seed: u64) {
        self.congestion.bbr_gain_cycle_seed = Some(seed);
    }

    /// Return the congestion control configurations.
    pub fn congestion(&self) -> &CongestionConfig {
        &self.congestion
    }

    /// Check that the configured windows are consistent.
    pub fn validate(&self) -> Result<()> {
        let c = &self.congestion;
        if c.min_congestion_window == 0 {
            return Err(Error::InvalidConfig("min_congestion_window is zero".into()));
        }
        if c.initial_congestion_window < c.min_congestion_window {
            return Err(Error::InvalidConfig(format!(
                "initial_congestion_window {} < min_congestion_window {}",
                c.initial_congestion_window, c.min_congestion_window
            )));
        }
        Ok(())
    }

    /// Build a congestion controller for a new flow.
    pub fn build_controller(&self) -> Result<Box<dyn CongestionController>> {
        self.validate()?;
        Ok(build_congestion_controller(&self.congestion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .format_timestamp_millis()
            .is_test(true)
            .init();
    }

    #[test]
    fn initial_rtt() {
        let mut config = Config::new();

        config.set_initial_rtt(0);
        assert_eq!(config.congestion.initial_rtt, TIMER_GRANULARITY);

        config.set_initial_rtt(100);
        assert_eq!(config.congestion.initial_rtt, Duration::from_millis(100));
    }

    #[test]
    fn max_segment_size() {
        let mut config = Config::new();
        assert_eq!(config.congestion.max_segment_size, DEFAULT_MAX_SEGMENT_SIZE);

        config.set_max_segment_size(100);
        assert_eq!(config.congestion.max_segment_size, MIN_MAX_SEGMENT_SIZE);

        config.set_max_segment_size(9000);
        assert_eq!(config.congestion.max_segment_size, 9000);
    }

    #[test]
    fn bbr_filters() {
        let mut config = Config::new();
        assert_eq!(config.congestion.bbr_btlbw_filter_len, 10);
        assert_eq!(
            config.congestion.bbr_rtprop_filter_len,
            Duration::from_secs(10)
        );
        assert_eq!(
            config.congestion.bbr_probe_rtt_duration,
            Duration::from_millis(200)
        );

        config.set_bbr_btlbw_filter_len(0);
        assert_eq!(config.congestion.bbr_btlbw_filter_len, 1);

        config.set_bbr_rtprop_filter_len(0);
        assert_eq!(config.congestion.bbr_rtprop_filter_len, TIMER_GRANULARITY);

        config.set_bbr_probe_rtt_duration(500);
        assert_eq!(
            config.congestion.bbr_probe_rtt_duration,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn validate() -> Result<()> {
        let mut config = Config::new();
        config.validate()?;

        config.set_min_congestion_window(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.set_min_congestion_window(20);
        assert!(config.build_controller().is_err());

        config.set_initial_congestion_window(32);
        let cc = config.build_controller()?;
        assert_eq!(cc.name(), "BBR");
        assert_eq!(cc.minimal_window(), 20 * DEFAULT_MAX_SEGMENT_SIZE as u64);
        assert_eq!(cc.initial_window(), 32 * DEFAULT_MAX_SEGMENT_SIZE as u64);

        Ok(())
    }
}

pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::Bbr;
pub use crate::congestion_control::BbrConfig;
pub use crate::congestion_control::BbrSnapshot;
pub use crate::congestion_control::BbrState;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionStats;
pub use crate::congestion_control::ControlOutputs;
pub use crate::congestion_control::Dummy;
pub use crate::error::Error;

#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

pub mod error;
