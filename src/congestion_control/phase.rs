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

//! BBR states and their gains.
//!
//! A state always comes with its pacing and cwnd gains. They are switched
//! together as one [`Phase`] and never set one at a time.

use std::time::Instant;

use rand::Rng;
use serde::Serialize;
use strum_macros::EnumIter;
use strum_macros::IntoStaticStr;

/// The static discount factor of 2.89 is chosen to allow the sending rate to
/// double each round trip in Startup.
pub const HIGH_GAIN: f64 = 2.89;

/// The number of phases in the BBR ProbeBW gain cycle.
pub const GAIN_CYCLE_LEN: usize = 8;

/// Pacing gain cycle rotation.
pub const PACING_GAIN_CYCLE: [f64; GAIN_CYCLE_LEN] = [1.25, 0.75, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];

/// Cwnd gain of ProbeBW, which tolerates delayed and stretched acks.
pub const PROBE_BW_CWND_GAIN: f64 = 2.0;

/// BBR State Transition Diagram.
///
/// ```text
///             |
///             V
///    +---> STARTUP  ----+
///    |        |         |
///    |        V         |
///    |      DRAIN   ----+
///    |        |         |
///    |        V         |
///    +---> PROBE_BW ----+
///    |      ^    |      |
///    |      |    |      |
///    |      +----+      |
///    |                  |
///    +---- PROBE_RTT <--+
/// ```
///
/// See <https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control-00#section-3.4>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumIter, IntoStaticStr)]
pub enum BbrState {
    /// Ramp up sending rate rapidly to fill pipe.
    Startup,

    /// Drain any queue created during startup.
    Drain,

    /// Cruise with pacing rate cycled around the bottleneck bandwidth.
    ProbeBW,

    /// Probe the minimum round trip time with a minimal window.
    ProbeRTT,
}

/// A BBR state together with the gains it runs with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Phase {
    /// BBR.state
    pub state: BbrState,

    /// BBR.pacing_gain: The dynamic gain factor used to scale BBR.BtlBw to
    /// produce BBR.pacing_rate.
    pub pacing_gain: f64,

    /// BBR.cwnd_gain: The dynamic gain factor used to scale the estimated BDP
    /// to produce a congestion window (cwnd).
    pub cwnd_gain: f64,
}

impl Phase {
    pub fn startup() -> Self {
        Self {
            state: BbrState::Startup,
            pacing_gain: HIGH_GAIN,
            cwnd_gain: HIGH_GAIN,
        }
    }

    /// Drain uses the inverse of the Startup gain to empty the queue in one
    /// round, while keeping the Startup cwnd gain.
    pub fn drain() -> Self {
        Self {
            state: BbrState::Drain,
            pacing_gain: 1.0 / HIGH_GAIN,
            cwnd_gain: HIGH_GAIN,
        }
    }

    pub fn probe_bw(cycle_index: usize) -> Self {
        Self {
            state: BbrState::ProbeBW,
            pacing_gain: PACING_GAIN_CYCLE[cycle_index % GAIN_CYCLE_LEN],
            cwnd_gain: PROBE_BW_CWND_GAIN,
        }
    }

    pub fn probe_rtt() -> Self {
        Self {
            state: BbrState::ProbeRTT,
            pacing_gain: 1.0,
            cwnd_gain: 1.0,
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::startup()
    }
}

/// Position in the ProbeBW gain cycle.
#[derive(Debug, Clone, Copy)]
pub struct GainCycle {
    /// BBR.cycle_index: The current index into the gain cycle.
    index: usize,

    /// BBR.cycle_stamp: The time the current phase started.
    stamp: Instant,
}

impl GainCycle {
    pub fn new(now: Instant) -> Self {
        Self {
            index: 0,
            stamp: now,
        }
    }

    /// Start a new cycle at a random phase and return it.
    ///
    /// The phase with a gain below 1 is never picked first, so a flow that
    /// just left Drain or ProbeRTT does not undershoot.
    pub fn start<R: Rng>(&mut self, now: Instant, rng: &mut R) -> Phase {
        self.index = GAIN_CYCLE_LEN - 1 - rng.gen_range(0..GAIN_CYCLE_LEN - 1);
        self.advance(now)
    }

    /// Move to the next phase of the cycle and return it.
    pub fn advance(&mut self, now: Instant) -> Phase {
        self.stamp = now;
        self.index = (self.index + 1) % GAIN_CYCLE_LEN;
        Phase::probe_bw(self.index)
    }

    /// The phase at the current index.
    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        Phase::probe_bw(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn stamp(&self) -> Instant {
        self.stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::time::Duration;
    use strum::IntoEnumIterator;

    #[test]
    fn phase_gains() {
        for state in BbrState::iter() {
            let phase = match state {
                BbrState::Startup => Phase::startup(),
                BbrState::Drain => Phase::drain(),
                BbrState::ProbeBW => Phase::probe_bw(2),
                BbrState::ProbeRTT => Phase::probe_rtt(),
            };
            assert_eq!(phase.state, state);
            assert!(phase.pacing_gain > 0.0);
            assert!(phase.cwnd_gain >= 1.0);
        }

        assert_eq!(Phase::default(), Phase::startup());
        assert_eq!(Phase::startup().pacing_gain, HIGH_GAIN);
        assert!((Phase::drain().pacing_gain * HIGH_GAIN - 1.0).abs() < 1e-9);
        assert_eq!(Phase::probe_rtt().cwnd_gain, 1.0);

        let name: &'static str = BbrState::ProbeRTT.into();
        assert_eq!(name, "ProbeRTT");
    }

    #[test]
    fn phase_cycle_exactness() {
        let now = Instant::now();
        let mut cycle = GainCycle::new(now);

        let mut gains = vec![cycle.phase().pacing_gain];
        for i in 1..(3 * GAIN_CYCLE_LEN) {
            let t = now + Duration::from_millis(i as u64);
            let phase = cycle.advance(t);
            assert_eq!(phase.state, BbrState::ProbeBW);
            assert_eq!(phase.cwnd_gain, PROBE_BW_CWND_GAIN);
            assert_eq!(cycle.stamp(), t);
            gains.push(phase.pacing_gain);
        }

        for chunk in gains.chunks(GAIN_CYCLE_LEN) {
            assert_eq!(chunk, [1.25, 0.75, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        }
    }

    #[test]
    fn phase_cycle_random_start() {
        let now = Instant::now();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut seen = [false; GAIN_CYCLE_LEN];

        for _ in 0..1000 {
            let mut cycle = GainCycle::new(now);
            let phase = cycle.start(now, &mut rng);
            assert_ne!(cycle.index(), 1);
            assert_eq!(phase.pacing_gain, PACING_GAIN_CYCLE[cycle.index()]);
            seen[cycle.index()] = true;
        }

        // Every phase but the drain phase can come first.
        assert_eq!(seen, [true, false, true, true, true, true, true, true]);
    }
}
