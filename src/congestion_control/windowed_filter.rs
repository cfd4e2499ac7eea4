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

//! A windowed max filter over packet-timed round trips.
//!
//! The filter keeps one slot per round in a ring buffer of `window` slots,
//! so it returns the exact maximum of the samples taken in the trailing
//! `window` rounds. Samples from rounds which left the window are ignored
//! and overwritten by newer rounds.

#[derive(Debug, Copy, Clone)]
struct WindowedSample {
    /// Round trip count.
    round: u64,

    /// Sample value.
    value: u64,
}

#[derive(Debug)]
pub struct WindowedMaxFilter {
    /// The number of round trips covered by the filter.
    window: u64,

    /// Best sample of each round, indexed by `round % window`.
    samples: Vec<Option<WindowedSample>>,

    /// The latest round which provided a sample.
    latest_round: u64,

    /// The max value over the window.
    best: u64,
}

impl WindowedMaxFilter {
    pub fn new(window: u64) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: vec![None; window as usize],
            latest_round: 0,
            best: 0,
        }
    }

    /// Window size in round trips.
    #[cfg(test)]
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Record a sample taken in `round` and return the max over the trailing
    /// window.
    ///
    /// Rounds must be non-decreasing. A sample from a round older than the
    /// latest one is dropped.
    pub fn update(&mut self, value: u64, round: u64) -> u64 {
        if round < self.latest_round {
            return self.best;
        }
        self.latest_round = round;

        let slot = &mut self.samples[(round % self.window) as usize];
        match slot {
            Some(s) if s.round == round => s.value = s.value.max(value),
            _ => *slot = Some(WindowedSample { round, value }),
        }

        self.best = self
            .samples
            .iter()
            .flatten()
            .filter(|s| round - s.round < self.window)
            .map(|s| s.value)
            .max()
            .unwrap_or(0);

        self.best
    }

    /// Get the max value.
    #[cfg(test)]
    pub fn get(&self) -> u64 {
        self.best
    }
}

impl Default for WindowedMaxFilter {
    fn default() -> Self {
        // The default window for BBR is 10 round trips
        Self::new(10)
    }
}
