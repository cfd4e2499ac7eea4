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

/// Bandwidth growth rate before pipe got filled.
const BTLBW_GROWTH_RATE: f64 = 0.25;

/// Max count of full bandwidth reached, before pipe is supposed to be filled.
/// This three-round threshold was validated by YouTube experimental data.
const FULL_BW_COUNT_THRESHOLD: u64 = 3;

/// Full pipe estimator, used mainly during Startup mode.
///
/// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.2.2.
#[derive(Debug, Default)]
pub struct FullPipeEstimator {
    /// BBR.filled_pipe: A boolean that records whether BBR estimates that it
    /// has ever fully utilized its available bandwidth ("filled the pipe").
    is_filled_pipe: bool,

    /// Baseline level delivery rate for full pipe estimator.
    full_bw: u64,

    /// The number of round for full pipe estimator without much growth.
    full_bw_count: u64,
}

impl FullPipeEstimator {
    /// Estimate whether the pipe is full by looking for a plateau in the
    /// BBR.BtlBw estimate. Return true if the pipe got filled by this call.
    pub fn check_full_pipe(&mut self, btlbw: u64, is_round_start: bool, is_app_limited: bool) -> bool {
        // no need to check for a full pipe now
        if self.is_filled_pipe || !is_round_start || is_app_limited {
            return false;
        }

        // BBR.BtlBw still growing?
        if btlbw as f64 >= self.full_bw as f64 * (1.0 + BTLBW_GROWTH_RATE) {
            // record new baseline level
            self.full_bw = btlbw;
            self.full_bw_count = 0;
            return false;
        }

        // another round w/o much growth
        self.full_bw_count += 1;

        // BBR waits three rounds in order to have solid evidence that the
        // sender is not detecting a delivery-rate plateau that was temporarily
        // imposed by the receive window.
        if self.full_bw_count >= FULL_BW_COUNT_THRESHOLD {
            self.is_filled_pipe = true;
            return true;
        }

        false
    }

    pub fn is_filled_pipe(&self) -> bool {
        self.is_filled_pipe
    }

    #[cfg(test)]
    pub fn full_bw(&self) -> u64 {
        self.full_bw
    }

    #[cfg(test)]
    pub fn full_bw_count(&self) -> u64 {
        self.full_bw_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pipe_after_three_rounds() {
        let mut fp = FullPipeEstimator::default();

        // Growth >= 25% records a new baseline.
        assert!(!fp.check_full_pipe(1000, true, false));
        assert_eq!(fp.full_bw(), 1000);
        assert!(!fp.check_full_pipe(1250, true, false));
        assert_eq!(fp.full_bw(), 1250);
        assert_eq!(fp.full_bw_count(), 0);

        assert!(!fp.check_full_pipe(1500, true, false));
        assert_eq!(fp.full_bw_count(), 1);
        assert!(!fp.check_full_pipe(1500, true, false));
        assert_eq!(fp.full_bw_count(), 2);
        assert!(fp.check_full_pipe(1500, true, false));
        assert!(fp.is_filled_pipe());
        assert_eq!(fp.full_bw_count(), 3);
    }

    #[test]
    fn full_pipe_growth_resets_count() {
        let mut fp = FullPipeEstimator::default();
        fp.check_full_pipe(1000, true, false);
        fp.check_full_pipe(1000, true, false);
        fp.check_full_pipe(1000, true, false);
        assert_eq!(fp.full_bw_count(), 2);

        fp.check_full_pipe(2000, true, false);
        assert_eq!(fp.full_bw_count(), 0);
        assert_eq!(fp.full_bw(), 2000);
        assert!(!fp.is_filled_pipe());
    }

    #[test]
    fn full_pipe_skipped() {
        let mut fp = FullPipeEstimator::default();
        fp.check_full_pipe(1000, true, false);

        // Not a round start, or an app-limited sample.
        for _ in 0..5 {
            assert!(!fp.check_full_pipe(1000, false, false));
            assert!(!fp.check_full_pipe(1000, true, true));
        }
        assert_eq!(fp.full_bw_count(), 0);
    }

    #[test]
    fn full_pipe_latch_is_idempotent() {
        let mut fp = FullPipeEstimator::default();
        for _ in 0..4 {
            fp.check_full_pipe(1000, true, false);
        }
        assert!(fp.is_filled_pipe());
        let (full_bw, count) = (fp.full_bw(), fp.full_bw_count());

        for bw in [0, 1000, 100_000] {
            assert!(!fp.check_full_pipe(bw, true, false));
            assert!(fp.is_filled_pipe());
            assert_eq!(fp.full_bw(), full_bw);
            assert_eq!(fp.full_bw_count(), count);
        }
    }
}
