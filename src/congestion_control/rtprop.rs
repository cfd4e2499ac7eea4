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

use std::time::Duration;
use std::time::Instant;

/// Estimator of BBR.RTprop, the two-way round-trip propagation delay of the
/// path, with a staleness timeout which forces BBR to re-probe.
///
/// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.1.2.3.
#[derive(Debug)]
pub struct RtpropEstimator {
    /// BBR.RTprop: the minimum recent round-trip delay sample, or None if
    /// no sample was taken yet.
    rtprop: Option<Duration>,

    /// BBR.rtprop_stamp: The wall clock time at which the current BBR.RTProp
    /// sample was obtained.
    rtprop_stamp: Option<Instant>,

    /// BBR.rtprop_expired: A boolean recording whether the BBR.RTprop has
    /// expired and is due for a refresh with an application idle period or a
    /// transition into ProbeRTT state.
    is_expired: bool,

    /// RTpropFilterLen: the time after which an estimate is stale.
    filter_len: Duration,
}

impl RtpropEstimator {
    pub fn new(filter_len: Duration) -> Self {
        Self {
            rtprop: None,
            rtprop_stamp: None,
            is_expired: false,
            filter_len,
        }
    }

    /// Update the estimate on an ACK, with the RTT sample if the ACK
    /// provided one. Return true if the estimate was replaced.
    pub fn update(&mut self, sample: Option<Duration>, now: Instant) -> bool {
        self.is_expired = self
            .rtprop_stamp
            .map_or(false, |stamp| now.saturating_duration_since(stamp) > self.filter_len);

        let sample = match sample {
            Some(rtt) => rtt,
            None => return false,
        };

        let is_lower = self.rtprop.map_or(true, |rtprop| sample <= rtprop);
        if is_lower || self.is_expired {
            self.rtprop = Some(sample);
            self.rtprop_stamp = Some(now);
            return true;
        }

        false
    }

    /// Restart the staleness timer without a new sample, after the RTprop
    /// was re-probed.
    pub fn refresh(&mut self, now: Instant) {
        if self.rtprop.is_some() {
            self.rtprop_stamp = Some(now);
        }
    }

    pub fn rtprop(&self) -> Option<Duration> {
        self.rtprop
    }

    #[cfg(test)]
    pub fn rtprop_stamp(&self) -> Option<Instant> {
        self.rtprop_stamp
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired
    }
}
