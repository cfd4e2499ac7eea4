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

//! BBR Congestion Control.
//!
//! BBR uses recent measurements of a transport connection's delivery rate
//! and round-trip time to build an explicit model that includes both the
//! maximum recent bandwidth available to that connection, and its
//! minimum recent round-trip delay.  BBR then uses this model to control
//! both how fast it sends data and the maximum amount of data it allows
//! in flight in the network at any time.
//!
//! See <https://datatracker.ietf.org/doc/html/draft-cardwell-iccrg-bbr-congestion-control-00>.

use std::time::Duration;
use std::time::Instant;

use log::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use super::bandwidth::BandwidthEstimator;
use super::delivery_rate::DeliveryRateEstimator;
use super::delivery_rate::RateSample;
use super::full_pipe::FullPipeEstimator;
use super::phase::BbrState;
use super::phase::GainCycle;
use super::phase::Phase;
use super::rtprop::RtpropEstimator;
use super::sent_segment::SentSegment;
use super::sent_segment::SentSegments;
use super::CongestionController;
use super::CongestionStats;
use super::ControlOutputs;

/// BBR configurable parameters.
#[derive(Debug, Clone)]
pub struct BbrConfig {
    /// Minimal congestion window in bytes (BBRMinPipeCwnd).
    min_cwnd: u64,

    /// Initial congestion window in bytes.
    initial_cwnd: u64,

    /// Initial Smoothed rtt.
    initial_rtt: Option<Duration>,

    /// Max segment size in bytes.
    max_segment_size: u64,

    /// BtlBwFilterLen: the length of the BBR.BtlBw max filter window in
    /// packet-timed round trips.
    btlbw_filter_len: u64,

    /// RTpropFilterLen: the length of the RTProp min filter window.
    rtprop_filter_len: Duration,

    /// ProbeRTTDuration: the minimum duration for which ProbeRTT state holds
    /// inflight to BBRMinPipeCwnd or fewer bytes.
    probe_rtt_duration: Duration,

    /// Seed of the gain cycling randomization.
    gain_cycle_seed: Option<u64>,
}

impl BbrConfig {
    pub fn new(
        min_cwnd: u64,
        initial_cwnd: u64,
        initial_rtt: Option<Duration>,
        max_segment_size: u64,
    ) -> Self {
        Self {
            min_cwnd,
            initial_cwnd,
            initial_rtt,
            max_segment_size,
            ..Self::default()
        }
    }

    /// Set the length of the BBR.BtlBw max filter in round trips.
    pub fn set_btlbw_filter_len(&mut self, rounds: u64) {
        self.btlbw_filter_len = rounds.max(1);
    }

    /// Set the length of the BBR.RTprop filter.
    pub fn set_rtprop_filter_len(&mut self, len: Duration) {
        self.rtprop_filter_len = len;
    }

    /// Set the minimum duration of the ProbeRTT state.
    pub fn set_probe_rtt_duration(&mut self, duration: Duration) {
        self.probe_rtt_duration = duration;
    }

    /// Make gain cycling randomization deterministic.
    pub fn set_gain_cycle_seed(&mut self, seed: u64) {
        self.gain_cycle_seed = Some(seed);
    }
}

impl Default for BbrConfig {
    fn default() -> Self {
        let mss = crate::DEFAULT_MAX_SEGMENT_SIZE as u64;
        Self {
            min_cwnd: crate::DEFAULT_MIN_CONGESTION_WINDOW * mss,
            initial_cwnd: crate::DEFAULT_INITIAL_CONGESTION_WINDOW * mss,
            initial_rtt: Some(crate::INITIAL_RTT),
            max_segment_size: mss,
            btlbw_filter_len: crate::DEFAULT_BTLBW_FILTER_LEN,
            rtprop_filter_len: crate::DEFAULT_RTPROP_FILTER_LEN,
            probe_rtt_duration: crate::DEFAULT_PROBE_RTT_DURATION,
            gain_cycle_seed: None,
        }
    }
}

/// Pacing rate threshold for select different send quantum. Default `1.2Mbps`.
const SEND_QUANTUM_THRESHOLD_PACING_RATE: u64 = 1_200_000 / 8;

/// Pacing rate above which the send quantum follows the pacing rate.
/// Default `24Mbps`.
const SEND_QUANTUM_HIGH_THRESHOLD_PACING_RATE: u64 = 24_000_000 / 8;

/// Upper bound of the send quantum in bytes.
const MAX_SEND_QUANTUM: u64 = 64 * 1024;

/// Accumulate information from a single ACK.
#[derive(Debug, Default)]
struct AckState {
    /// Newly marked lost data size in bytes, since the previous ACK.
    newly_lost_bytes: u64,

    /// Newly acked data size in bytes.
    newly_acked_bytes: u64,

    /// The max P.delivered of the acked segments, None if nothing was acked.
    packet_delivered: Option<u64>,

    /// The latest P.sent_time to determine whether exit recovery.
    last_ack_packet_sent_time: Option<Instant>,

    /// The amount of data that was in flight before processing this ACK.
    prior_bytes_in_flight: u64,

    /// Delivery rate sample of this ACK.
    sample: Option<RateSample>,

    /// RTT sample of this ACK.
    rtt: Option<Duration>,

    /// Whether the delivery rate sample of this ACK is app-limited.
    is_app_limited: bool,
}

/// A view of the BBR model and control parameters.
#[derive(Debug, Clone, Serialize)]
pub struct BbrSnapshot {
    /// Current state.
    pub state: BbrState,

    /// Current pacing gain.
    pub pacing_gain: f64,

    /// Current cwnd gain.
    pub cwnd_gain: f64,

    /// Index into the ProbeBW gain cycle.
    pub cycle_index: usize,

    /// Estimated bottleneck bandwidth in bytes per second.
    pub btlbw: u64,

    /// Estimated round-trip propagation time in microseconds, None if
    /// unknown.
    pub rtprop_us: Option<u64>,

    /// Count of packet-timed round trips.
    pub round_count: u64,

    /// Whether the pipe was filled.
    pub filled_pipe: bool,

    /// Pacing rate in bytes per second.
    pub pacing_rate: u64,

    /// Send quantum in bytes.
    pub send_quantum: u64,

    /// Congestion window in bytes.
    pub cwnd: u64,

    /// Target congestion window in bytes.
    pub target_cwnd: u64,

    /// Bytes in flight.
    pub bytes_in_flight: u64,

    /// Total bytes delivered.
    pub delivered: u64,
}

/// BBR Congestion Control Algorithm.
///
/// See draft-cardwell-iccrg-bbr-congestion-control-00.
#[derive(Debug)]
pub struct Bbr {
    /// Configurable parameters.
    config: BbrConfig,

    /// Statistics.
    stats: CongestionStats,

    /// BBR.state with BBR.pacing_gain and BBR.cwnd_gain.
    phase: Phase,

    /// Position in the ProbeBW gain cycle.
    cycle: GainCycle,

    /// Source of gain cycling randomization.
    rng: StdRng,

    /// BBR.pacing_rate: The current pacing rate for a BBR flow, which
    /// controls inter-packet spacing.
    pacing_rate: u64,

    /// BBR.send_quantum: The maximum size of a data aggregate scheduled and
    /// transmitted together.
    send_quantum: u64,

    /// Cwnd: The transport sender's congestion window, which limits the
    /// amount of data in flight.
    cwnd: u64,

    /// The upper bound on the volume of data BBR allows in flight.
    target_cwnd: u64,

    /// Cwnd before loss recovery or ProbeRTT.
    prior_cwnd: u64,

    /// Segments sent and not yet acknowledged.
    segments: SentSegments,

    /// Delivery rate estimator.
    delivery_rate_estimator: DeliveryRateEstimator,

    /// Estimator of BBR.BtlBw.
    bandwidth: BandwidthEstimator,

    /// Estimator of BBR.RTprop.
    rtprop: RtpropEstimator,

    /// Estimator of full pipe.
    full_pipe: FullPipeEstimator,

    /// Timestamp when ProbeRTT state ends.
    probe_rtt_done_stamp: Option<Instant>,

    /// Whether a roundtrip in ProbeRTT state ends.
    probe_rtt_round_done: bool,

    /// Whether in packet conservation mode.
    packet_conservation: bool,

    /// Whether restarting from idle.
    is_idle_restart: bool,

    /// Whether in the recovery mode.
    in_recovery: bool,

    /// Time of the last recovery event starts.
    recovery_epoch_start: Option<Instant>,

    /// Bytes declared lost since the previous ACK.
    lost_since_ack: u64,

    /// Accumulate information from a single ACK.
    ack_state: AckState,
}

impl Bbr {
    pub fn new(config: BbrConfig) -> Self {
        let now = Instant::now();
        let rng = match config.gain_cycle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut bbr = Self {
            stats: Default::default(),
            phase: Phase::startup(),
            cycle: GainCycle::new(now),
            rng,
            pacing_rate: 0,
            send_quantum: config.max_segment_size,
            cwnd: config.initial_cwnd,
            target_cwnd: 0,
            prior_cwnd: 0,
            segments: SentSegments::default(),
            delivery_rate_estimator: DeliveryRateEstimator::new(now),
            bandwidth: BandwidthEstimator::new(config.btlbw_filter_len),
            rtprop: RtpropEstimator::new(config.rtprop_filter_len),
            full_pipe: FullPipeEstimator::default(),
            probe_rtt_done_stamp: None,
            probe_rtt_round_done: false,
            packet_conservation: false,
            is_idle_restart: false,
            in_recovery: false,
            recovery_epoch_start: None,
            lost_since_ack: 0,
            ack_state: AckState::default(),
            config,
        };
        bbr.init();

        bbr
    }

    /// Initialization Steps.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.1.
    fn init(&mut self) {
        self.enter_startup();
        self.init_pacing_rate();
        self.set_send_quantum();
    }

    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.1
    fn init_pacing_rate(&mut self) {
        // When a BBR flow starts it has no BBR.BtlBw estimate. So in this case
        // it sets an initial pacing rate based on the initial congestion window
        // and the initial RTT.
        let srtt = self
            .config
            .initial_rtt
            .unwrap_or(crate::TIMER_GRANULARITY)
            .max(crate::TIMER_GRANULARITY);
        let nominal_bandwidth = self.config.initial_cwnd as f64 / srtt.as_secs_f64();
        self.pacing_rate = (self.phase.pacing_gain * nominal_bandwidth) as u64;
    }

    /// Switch to a new phase. The state and both gains always change together.
    fn transition(&mut self, phase: Phase) {
        if phase.state != self.phase.state {
            debug!(
                "{}. state {:?} -> {:?}, pacing_gain={}, cwnd_gain={}",
                self.name(),
                self.phase.state,
                phase.state,
                phase.pacing_gain,
                phase.cwnd_gain
            );
        }
        self.phase = phase;
    }

    /// Enter the Startup state
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.2.1.
    fn enter_startup(&mut self) {
        // To achieve this rapid probing in the smoothest possible fashion, upon
        // entry into Startup state BBR sets BBR.pacing_gain and BBR.cwnd_gain
        // to BBRHighGain, the minimum gain value that will allow the sending
        // rate to double each round.
        self.transition(Phase::startup());
    }

    /// In Drain, BBR aims to quickly drain any queue created in Startup by
    /// switching to a pacing_gain well below 1.0.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.3.
    fn enter_drain(&mut self) {
        self.transition(Phase::drain());
    }

    /// Enter the ProbeBW state.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.4.3.
    fn enter_probe_bw(&mut self, now: Instant) {
        // Gain Cycling Randomization.
        // To improve mixing and fairness, and to reduce queues when multiple
        // BBR flows share a bottleneck, BBR randomizes the phases of ProbeBW
        // gain cycling by randomly picking an initial phase, from among all but
        // the 3/4 phase, when entering ProbeBW.
        let phase = self.cycle.start(now, &mut self.rng);
        self.transition(phase);
    }

    /// Enter the ProbeRTT state
    fn enter_probe_rtt(&mut self) {
        self.transition(Phase::probe_rtt());
    }

    /// Estimate whether the pipe is full by looking for a plateau in the
    /// BBR.BtlBw estimate.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.2.2.
    fn check_full_pipe(&mut self) {
        if self.full_pipe.check_full_pipe(
            self.bandwidth.btlbw(),
            self.bandwidth.is_round_start(),
            self.ack_state.is_app_limited,
        ) {
            debug!(
                "{}. pipe filled, btlbw={}, round_count={}",
                self.name(),
                self.bandwidth.btlbw(),
                self.bandwidth.round_count()
            );
        }
    }

    /// Is pipe filled.
    pub fn is_filled_pipe(&self) -> bool {
        self.full_pipe.is_filled_pipe()
    }

    /// Is round start.
    pub fn is_round_start(&self) -> bool {
        self.bandwidth.is_round_start()
    }

    /// Current state.
    pub fn state(&self) -> BbrState {
        self.phase.state
    }

    /// BBR.BtlBw in bytes per second.
    pub fn btlbw(&self) -> u64 {
        self.bandwidth.btlbw()
    }

    /// BBR.RTprop, None before the first RTT sample.
    pub fn rtprop(&self) -> Option<Duration> {
        self.rtprop.rtprop()
    }

    /// Take a snapshot of the model and control parameters.
    pub fn snapshot(&self) -> BbrSnapshot {
        BbrSnapshot {
            state: self.phase.state,
            pacing_gain: self.phase.pacing_gain,
            cwnd_gain: self.phase.cwnd_gain,
            cycle_index: self.cycle.index(),
            btlbw: self.bandwidth.btlbw(),
            rtprop_us: self.rtprop.rtprop().map(|r| r.as_micros() as u64),
            round_count: self.bandwidth.round_count(),
            filled_pipe: self.is_filled_pipe(),
            pacing_rate: self.pacing_rate,
            send_quantum: self.send_quantum,
            cwnd: self.cwnd,
            target_cwnd: self.target_cwnd,
            bytes_in_flight: self.stats.bytes_in_flight,
            delivered: self.delivery_rate_estimator.delivered(),
        }
    }

    /// Try to update the pacing rate using the given pacing_gain
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.1.
    fn set_pacing_rate_with_gain(&mut self, pacing_gain: f64) {
        let rate = (pacing_gain * self.bandwidth.btlbw() as f64) as u64;

        // On each data ACK BBR updates its pacing rate to be proportional to
        // BBR.BtlBw, as long as it estimates that it has filled the pipe, or
        // doing so increases the pacing rate.
        if self.is_filled_pipe() || rate > self.pacing_rate {
            self.pacing_rate = rate;
        }
    }

    /// Calculate the target cwnd, which is the upper bound on the volume of data BBR
    /// allows in flight.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.2 Target cwnd.
    fn inflight(&self, gain: f64) -> u64 {
        let rtprop = match self.rtprop.rtprop() {
            Some(rtprop) => rtprop,
            // no valid RTT samples yet
            None => return self.cwnd,
        };

        // The "quanta" term allows enough quanta in flight on the sending
        // and receiving hosts to reach full utilization even in high-throughput
        // environments using offloading mechanisms.
        let quanta = 3 * self.send_quantum;

        // The "estimated_bdp" term allows enough bytes in flight to fully
        // utilize the estimated BDP of the path, by allowing the flow to send
        // at BBR.BtlBw for a duration of BBR.RTprop.
        let estimated_bdp = self.bandwidth.btlbw() as f64 * rtprop.as_secs_f64();

        (gain * estimated_bdp) as u64 + quanta
    }

    /// On each ACK, BBR calculates the BBR.target_cwnd.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.2.
    fn update_target_cwnd(&mut self) {
        self.target_cwnd = self.inflight(self.phase.cwnd_gain);
    }

    /// Check and try to enter or leave Drain state.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.3.
    fn check_drain(&mut self, now: Instant) {
        // In Startup, when the BBR "full pipe" estimator estimates that BBR has
        // filled the pipe, BBR switches to its Drain state.
        if self.phase.state == BbrState::Startup && self.is_filled_pipe() {
            self.enter_drain();
        }

        // In Drain, when the number of bytes in flight matches the estimated
        // BDP, meaning BBR estimates that the queue has been fully drained but
        // the pipe is still full, then BBR leaves Drain and enters ProbeBW.
        if self.phase.state == BbrState::Drain
            && self.stats.bytes_in_flight <= self.inflight(1.0)
        {
            // we estimate queue is drained
            self.enter_probe_bw(now);
        }
    }

    /// Check if it's time to advance to the next gain cycle phase.
    fn check_cycle_phase(&mut self, now: Instant) {
        if self.phase.state == BbrState::ProbeBW && self.is_next_cycle_phase(now) {
            let phase = self.cycle.advance(now);
            self.transition(phase);
        }
    }

    /// Check if it's time to advance to the next gain cycle phase in ProbeBW state.
    fn is_next_cycle_phase(&self, now: Instant) -> bool {
        // Each cycle phase normally lasts for roughly BBR.RTprop.
        let is_full_length = self.rtprop.rtprop().map_or(false, |rtprop| {
            now.saturating_duration_since(self.cycle.stamp()) > rtprop
        });
        let pacing_gain = self.phase.pacing_gain;

        if pacing_gain > 1.0 {
            // Cycle gain = 5/4.
            // It does this until the elapsed time in the phase has
            // been at least BBR.RTprop and either inflight has reached
            // 5/4 * estimated_BDP (which may take longer than BBR.RTprop
            // if BBR.RTprop is low) or some bytes have been lost.
            return is_full_length
                && (self.ack_state.newly_lost_bytes > 0
                    || self.ack_state.prior_bytes_in_flight >= self.inflight(pacing_gain));
        } else if pacing_gain < 1.0 {
            // Cycle gain = 3/4.
            // This phase lasts until either a full BBR.RTprop has elapsed or
            // inflight drops below estimated_BDP.
            return is_full_length || self.ack_state.prior_bytes_in_flight <= self.inflight(1.0);
        }

        // Cycle gain = 1.0, which lasts for roughly BBR.RTprop.
        is_full_length
    }

    /// When restarting from idle, BBR leaves its cwnd as-is and paces
    /// packets at exactly BBR.BtlBw, aiming to return as quickly as possible
    /// to its target operating point of rate balance and a full pipe.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.4.4.
    fn handle_restart_from_idle(&mut self) {
        // If the flow's BBR.state is ProbeBW, and the flow is
        // application-limited, and there are no bytes in flight currently,
        // then at the moment the flow sends one or more segments BBR sets
        // BBR.pacing_rate to exactly BBR.BtlBw.
        if self.stats.bytes_in_flight == 0 && self.delivery_rate_estimator.is_app_limited() {
            self.is_idle_restart = true;

            if self.phase.state == BbrState::ProbeBW {
                self.set_pacing_rate_with_gain(1.0);
            }

            trace!(
                "{}. restart from idle, pacing_rate={}",
                self.name(),
                self.pacing_rate
            );
        }
    }

    /// Remember cwnd.
    ///
    /// It helps remember and restore the last-known good cwnd (the latest cwnd
    /// unmodulated by loss recovery or ProbeRTT)
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.4.
    fn save_cwnd(&mut self) {
        self.prior_cwnd = if !self.in_recovery && self.phase.state != BbrState::ProbeRTT {
            self.cwnd
        } else {
            self.cwnd.max(self.prior_cwnd)
        }
    }

    /// Restore cwnd.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.4.
    fn restore_cwnd(&mut self) {
        self.cwnd = self.cwnd.max(self.prior_cwnd)
    }

    /// Return cwnd for ProbeRTT state.
    fn probe_rtt_cwnd(&self) -> u64 {
        self.config.min_cwnd
    }

    /// Check and try to enter or leave ProbeRTT state.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.3.5.
    fn check_probe_rtt(&mut self, now: Instant) {
        // In any state other than ProbeRTT itself, if the RTProp estimate has
        // not been updated (i.e., by getting a lower RTT measurement) for more
        // than ProbeRTTInterval = 10 seconds, then BBR enters ProbeRTT and
        // reduces the cwnd to a minimal value, BBRMinPipeCwnd (four packets).
        if self.phase.state != BbrState::ProbeRTT
            && self.rtprop.is_expired()
            && !self.is_idle_restart
        {
            // Remember the last-known good cwnd and restore it when exiting probe-rtt.
            self.save_cwnd();
            self.enter_probe_rtt();
            self.probe_rtt_done_stamp = None;

            debug!(
                "{}. enter ProbeRTT, prior_cwnd={}, rtprop={:?}",
                self.name(),
                self.prior_cwnd,
                self.rtprop.rtprop()
            );
        }

        if self.phase.state == BbrState::ProbeRTT {
            self.handle_probe_rtt(now);
        }

        self.is_idle_restart = false;
    }

    /// Process for the ProbeRTT state
    fn handle_probe_rtt(&mut self, now: Instant) {
        // Ignore low rate samples during ProbeRTT. MarkConnectionAppLimited.
        self.delivery_rate_estimator.set_app_limited(true);

        if let Some(probe_rtt_done_stamp) = self.probe_rtt_done_stamp {
            if self.is_round_start() {
                self.probe_rtt_round_done = true;
            }

            // After maintaining BBRMinPipeCwnd or fewer bytes in flight for
            // at least ProbeRTTDuration (200 ms) and one round trip, BBR leaves
            // ProbeRTT.
            if self.probe_rtt_round_done && now >= probe_rtt_done_stamp {
                self.rtprop.refresh(now);
                self.restore_cwnd();
                self.exit_probe_rtt(now);
            }
        } else if self.stats.bytes_in_flight <= self.probe_rtt_cwnd() {
            self.probe_rtt_done_stamp = Some(now + self.config.probe_rtt_duration);
            // ProbeRTT round passed.
            self.probe_rtt_round_done = false;
            self.bandwidth
                .set_round_end(self.delivery_rate_estimator.delivered());
        }
    }

    /// BBR leaves ProbeRTT and transitions to either Startup or ProbeBW,
    /// depending on whether it estimates the pipe was filled already.
    fn exit_probe_rtt(&mut self, now: Instant) {
        debug!("{}. exit ProbeRTT, cwnd={}", self.name(), self.cwnd);

        if self.is_filled_pipe() {
            self.enter_probe_bw(now);
        } else {
            self.enter_startup();
        }
    }

    /// On every ACK, the BBR updates its network path model and state machine
    fn update_model_and_state(&mut self, now: Instant) {
        self.update_btlbw();
        self.check_cycle_phase(now);
        self.check_full_pipe();
        self.check_drain(now);
        self.update_rtprop(now);
        self.check_probe_rtt(now);
    }

    /// BBR adjusts its control parameters to adapt to the updated model.
    fn update_control_parameters(&mut self) {
        self.set_pacing_rate();
        self.set_send_quantum();
        self.set_cwnd();
    }

    /// For every ACK that acknowledges some data as delivered, BBR update the
    /// round and the BBR.BtlBw estimator.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.1.1.5.
    fn update_btlbw(&mut self) {
        self.bandwidth.on_ack(
            self.ack_state.packet_delivered,
            self.delivery_rate_estimator.delivered(),
            self.ack_state.sample.as_ref(),
        );

        // After one round-trip in Fast Recovery, exit the packet conservation mode.
        if self.bandwidth.is_round_start() {
            self.packet_conservation = false;
        }
    }

    /// On every ACK that provides an RTT sample BBR updates the BBR.RTprop
    /// estimator.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.1.2.3.
    fn update_rtprop(&mut self, now: Instant) {
        if self.rtprop.update(self.ack_state.rtt, now) {
            trace!(
                "{}. rtprop updated to {:?}, expired={}",
                self.name(),
                self.rtprop.rtprop(),
                self.rtprop.is_expired()
            );
        }
    }

    /// BBR updates the pacing rate on each ACK as follows.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.1.
    fn set_pacing_rate(&mut self) {
        self.set_pacing_rate_with_gain(self.phase.pacing_gain);
    }

    /// On each ACK, BBR runs BBRSetSendQuantum() to update BBR.send_quantum
    /// as follows.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.2.
    fn set_send_quantum(&mut self) {
        let mss = self.config.max_segment_size;

        self.send_quantum = if self.pacing_rate < SEND_QUANTUM_THRESHOLD_PACING_RATE {
            mss
        } else if self.pacing_rate < SEND_QUANTUM_HIGH_THRESHOLD_PACING_RATE {
            2 * mss
        } else {
            // BBR.send_quantum = min(BBR.pacing_rate * 1ms, 64KBytes)
            (self.pacing_rate / 1000).min(MAX_SEND_QUANTUM)
        };
    }

    /// Upon every ACK in Fast Recovery, run the following steps, which help
    /// ensure packet conservation on the first round of recovery, and sending
    /// at no more than twice the current delivery rate on later rounds of
    /// recovery.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.4.
    fn modulate_cwnd_for_recovery(&mut self) {
        if self.ack_state.newly_lost_bytes > 0 {
            self.cwnd = self
                .cwnd
                .saturating_sub(self.ack_state.newly_lost_bytes)
                .max(self.config.max_segment_size);
        }

        if self.packet_conservation {
            self.cwnd = self.cwnd.max(
                self.stats
                    .bytes_in_flight
                    .saturating_add(self.ack_state.newly_acked_bytes),
            );
        }
    }

    /// To quickly reduce the volume of in-flight data and drain the bottleneck
    /// queue, thereby allowing measurement of BBR.RTprop, BBR bounds the cwnd
    /// to BBRMinPipeCwnd, the minimal value that allows pipelining.
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.5.
    fn modulate_cwnd_for_probe_rtt(&mut self) {
        if self.phase.state == BbrState::ProbeRTT {
            self.cwnd = self.cwnd.min(self.probe_rtt_cwnd());
        }
    }

    /// Adjust the congestion window
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.6
    fn set_cwnd(&mut self) {
        self.update_target_cwnd();
        self.modulate_cwnd_for_recovery();

        if !self.packet_conservation {
            let newly_acked_bytes = self.ack_state.newly_acked_bytes;

            // If BBR has measured enough samples to achieve confidence that it
            // has filled the pipe, then it increases its cwnd based on the
            // number of bytes delivered, while bounding its cwnd to be no
            // larger than the BBR.target_cwnd adapted to the estimated BDP.
            if self.is_filled_pipe() {
                self.cwnd = self
                    .target_cwnd
                    .min(self.cwnd.saturating_add(newly_acked_bytes));
            } else if self.cwnd < self.target_cwnd
                || self.delivery_rate_estimator.delivered() < self.config.initial_cwnd
            {
                // Otherwise, if the cwnd is below the target, or the sender has
                // marked so little data delivered (less than InitialCwnd) that
                // it does not yet judge its BBR.BtlBw estimate and BBR.target_cwnd
                // as useful, then it increases cwnd without bounding it to be
                // below the target.
                self.cwnd = self.cwnd.saturating_add(newly_acked_bytes);
            }
        }

        // Finally, BBR imposes a floor of BBRMinPipeCwnd in order to allow
        // pipelining even with small BDPs.
        self.cwnd = self.cwnd.max(self.config.min_cwnd);

        self.modulate_cwnd_for_probe_rtt();
    }

    /// Enter loss recovery
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.4.
    fn enter_recovery(&mut self, now: Instant) {
        self.save_cwnd();

        self.recovery_epoch_start = Some(now);

        // Upon entering Fast Recovery, set cwnd to the number of bytes still
        // in flight (allowing at least one segment for a fast retransmit):
        self.cwnd = self
            .stats
            .bytes_in_flight
            .saturating_add(self.config.max_segment_size);

        // Note: After one round-trip in Fast Recovery, BBR.packet_conservation
        // will reset to false
        self.packet_conservation = true;
        self.in_recovery = true;

        self.bandwidth
            .set_round_end(self.delivery_rate_estimator.delivered());

        debug!(
            "{}. enter recovery, cwnd={}, prior_cwnd={}",
            self.name(),
            self.cwnd,
            self.prior_cwnd
        );
    }

    /// Exit loss recovery
    ///
    /// See draft-cardwell-iccrg-bbr-congestion-control-00 Section 4.2.3.4.
    fn exit_recovery(&mut self) {
        self.recovery_epoch_start = None;
        self.packet_conservation = false;
        self.in_recovery = false;

        // Upon exiting loss recovery (RTO recovery or Fast Recovery), either by
        // repairing all losses or undoing recovery, BBR restores the best-known
        // cwnd value we had upon entering loss recovery
        self.restore_cwnd();

        debug!("{}. exit recovery, cwnd={}", self.name(), self.cwnd);
    }

    fn begin_ack(&mut self) {
        self.ack_state = AckState {
            newly_lost_bytes: std::mem::take(&mut self.lost_since_ack),
            prior_bytes_in_flight: self.stats.bytes_in_flight,
            ..AckState::default()
        };
        self.delivery_rate_estimator.begin_ack();
    }

    fn on_segment_acked(&mut self, segment: &SentSegment, now: Instant) {
        // Update rate sample by each acked segment.
        self.delivery_rate_estimator.update_rate_sample(segment, now);

        // Update stats. Lost segments already left flight.
        if !segment.lost {
            self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(segment.size);
        }
        self.stats.bytes_acked_in_total = self
            .stats
            .bytes_acked_in_total
            .saturating_add(segment.size);
        if self.in_slow_start() {
            self.stats.bytes_acked_in_slow_start = self
                .stats
                .bytes_acked_in_slow_start
                .saturating_add(segment.size);
        }

        // Update ack state.
        self.ack_state.newly_acked_bytes += segment.size;
        self.ack_state.last_ack_packet_sent_time = Some(
            self.ack_state
                .last_ack_packet_sent_time
                .map_or(segment.time_sent, |t| t.max(segment.time_sent)),
        );

        // Only remember the max P.delivered to determine whether a new round starts.
        self.ack_state.packet_delivered = Some(
            self.ack_state
                .packet_delivered
                .map_or(segment.rate_state.delivered, |d| {
                    d.max(segment.rate_state.delivered)
                }),
        );
    }

    fn end_ack(&mut self, now: Instant, rtt: Option<Duration>, app_limited: bool) {
        // Generate rate sample.
        let sample = self
            .delivery_rate_estimator
            .generate_rate_sample(app_limited)
            .copied();

        // The application ran out of data. Samples are app-limited until
        // everything sent so far is acked.
        if app_limited {
            self.delivery_rate_estimator.set_app_limited(true);
        }

        self.ack_state.sample = sample;
        self.ack_state.is_app_limited = sample.map_or(app_limited, |rs| rs.is_app_limited);
        self.ack_state.rtt = rtt.or_else(|| sample.map(|rs| rs.rtt));

        // Check if exit recovery
        if let Some(sent_time) = self.ack_state.last_ack_packet_sent_time {
            if self.in_recovery && !self.in_recovery(sent_time) {
                self.exit_recovery();
            }
        }

        // Update model and control parameters.
        self.update_model_and_state(now);
        self.update_control_parameters();

        trace!(
            "{}. acked={}, lost={}, delivery_rate={:?}, btlbw={}, rtprop={:?}, state={:?}, \
             pacing_rate={}, send_quantum={}, cwnd={}, bytes_in_flight={}",
            self.name(),
            self.ack_state.newly_acked_bytes,
            self.ack_state.newly_lost_bytes,
            sample.map(|rs| rs.delivery_rate),
            self.bandwidth.btlbw(),
            self.rtprop.rtprop(),
            self.phase.state,
            self.pacing_rate,
            self.send_quantum,
            self.cwnd,
            self.stats.bytes_in_flight
        );
    }
}

impl CongestionController for Bbr {
    fn name(&self) -> &str {
        "BBR"
    }

    fn on_data_sent(&mut self, now: Instant, seq: u64, bytes: u64) {
        if bytes == 0 {
            return;
        }

        self.handle_restart_from_idle();

        if self.segments.is_retransmission(seq) {
            // Resent segments count in flight again and are sampled from the
            // new transmission.
            let end = seq.saturating_add(bytes);
            let mut added = 0;
            for segment in self.segments.range_mut(seq, end) {
                let in_flight = self.stats.bytes_in_flight + added;
                if segment.lost {
                    segment.lost = false;
                    added += segment.size;
                }
                segment.time_sent = now;
                self.delivery_rate_estimator
                    .on_segment_sent(segment, in_flight);
            }
            self.stats.bytes_in_flight += added;
        } else {
            let mut segment = SentSegment::new(seq, bytes, now);
            self.delivery_rate_estimator
                .on_segment_sent(&mut segment, self.stats.bytes_in_flight);
            self.segments.push(segment);
            self.stats.bytes_in_flight += bytes;
        }

        self.stats.bytes_sent_in_total = self.stats.bytes_sent_in_total.saturating_add(bytes);
        if self.in_slow_start() {
            self.stats.bytes_sent_in_slow_start =
                self.stats.bytes_sent_in_slow_start.saturating_add(bytes);
        }

        trace!(
            "{}. sent seq={}, bytes={}, bytes_in_flight={}",
            self.name(),
            seq,
            bytes,
            self.stats.bytes_in_flight
        );
    }

    fn on_data_acked(
        &mut self,
        now: Instant,
        first_seq_acked: u64,
        acked_bytes: u64,
        rtt: Option<Duration>,
        app_limited: bool,
    ) -> ControlOutputs {
        self.begin_ack();

        let acked = self
            .segments
            .on_ack(first_seq_acked, first_seq_acked.saturating_add(acked_bytes));
        for segment in acked.iter() {
            self.on_segment_acked(segment, now);
        }

        self.end_ack(now, rtt, app_limited);
        self.control_outputs()
    }

    fn on_segment_retransmitted(&mut self, now: Instant, from_seq: u64, to_seq: u64) {
        // The retransmission timer fired. Everything in flight is lost.
        let lost_bytes = self.segments.mark_all_lost();
        self.lost_since_ack = self.lost_since_ack.saturating_add(lost_bytes);
        self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(lost_bytes);
        if self.in_slow_start() {
            self.stats.bytes_lost_in_slow_start = self
                .stats
                .bytes_lost_in_slow_start
                .saturating_add(lost_bytes);
        }
        self.stats.bytes_in_flight = 0;

        self.save_cwnd();
        self.cwnd = self.config.max_segment_size;

        self.in_recovery = true;
        self.recovery_epoch_start = Some(now);

        debug!(
            "{}. retransmission timeout, range=[{}, {}), lost={}, prior_cwnd={}",
            self.name(),
            from_seq,
            to_seq,
            lost_bytes,
            self.prior_cwnd
        );
    }

    fn on_congestion_event(&mut self, now: Instant, seq: u64, lost_bytes: u64) {
        let end = seq.saturating_add(lost_bytes);
        let mut newly_lost = 0;
        let mut sent_time: Option<Instant> = None;
        for segment in self.segments.range_mut(seq, end) {
            if !segment.lost {
                segment.lost = true;
                newly_lost += segment.size;
            }
            sent_time = Some(sent_time.map_or(segment.time_sent, |t| t.max(segment.time_sent)));
        }

        self.stats.bytes_in_flight = self.stats.bytes_in_flight.saturating_sub(newly_lost);
        self.stats.bytes_lost_in_total = self.stats.bytes_lost_in_total.saturating_add(newly_lost);
        if self.in_slow_start() {
            self.stats.bytes_lost_in_slow_start = self
                .stats
                .bytes_lost_in_slow_start
                .saturating_add(newly_lost);
        }
        self.lost_since_ack = self.lost_since_ack.saturating_add(newly_lost);

        if let Some(sent_time) = sent_time {
            if !self.in_recovery && !self.in_recovery(sent_time) {
                self.enter_recovery(now);
            }
        }
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn pacing_rate(&self) -> Option<u64> {
        Some(self.pacing_rate)
    }

    fn send_quantum(&self) -> u64 {
        self.send_quantum
    }

    fn initial_window(&self) -> u64 {
        self.config.initial_cwnd
    }

    fn minimal_window(&self) -> u64 {
        self.config.min_cwnd
    }

    fn in_recovery(&self, sent_time: Instant) -> bool {
        self.recovery_epoch_start.map_or(false, |t| sent_time <= t)
    }

    fn in_slow_start(&self) -> bool {
        self.phase.state == BbrState::Startup
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}
