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

//! A generic algorithm for a transport protocol sender to estimate the current
//! delivery rate of its data on the fly.
//!
//! See
//! <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02>.

use std::time::Duration;
use std::time::Instant;

use super::sent_segment::SentSegment;

/// Rate sample output.
///
/// See
/// <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.1.3>.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateSample {
    /// rs.delivery_rate: The delivery rate sample (rs.delivered / rs.interval)
    /// in bytes per second.
    pub delivery_rate: u64,

    /// rs.is_app_limited: The P.is_app_limited from the most recent segment
    /// delivered, or the app-limited flag of the ack itself.
    pub is_app_limited: bool,

    /// rs.interval: The length of the sampling interval.
    pub interval: Duration,

    /// rs.delivered: The amount of data marked as delivered over the sampling interval.
    pub delivered: u64,

    /// rs.prior_delivered: The P.delivered count from the most recent segment delivered.
    pub prior_delivered: u64,

    /// rs.send_elapsed: Send time interval calculated from the most recent segment delivered.
    pub send_elapsed: Duration,

    /// rs.ack_elapsed: ACK time interval calculated from the most recent segment delivered.
    pub ack_elapsed: Duration,

    /// RTT of the most recent segment delivered.
    pub rtt: Duration,
}

/// Delivery rate estimator.
///
/// <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.1.1>.
#[derive(Debug)]
pub struct DeliveryRateEstimator {
    /// C.delivered: The total amount of data in bytes delivered so far over
    /// the lifetime of the flow.
    delivered: u64,

    /// C.delivered_time: The wall clock time when C.delivered was last updated.
    delivered_time: Instant,

    /// C.first_sent_time: If segments are in flight, then this holds the send
    /// time of the segment that was most recently marked as delivered. Else,
    /// if the flow was recently idle, then this holds the send time of most
    /// recently sent segment.
    first_sent_time: Instant,

    /// C.app_limited: The end sequence of the last transmitted segment marked
    /// as application-limited, or 0 if the flow is not currently
    /// application-limited.
    app_limited_until: u64,

    /// Highest sequence number acknowledged, to determine if app-limited
    /// state exits.
    largest_acked_seq: u64,

    /// Sequence number one past the last sent byte.
    last_sent_seq: u64,

    /// The sample of the ack being processed.
    rate_sample: RateSample,

    /// rs.prior_time: The P.delivered_time from the most recent segment
    /// delivered. None if nothing was delivered by the current ack.
    prior_time: Option<Instant>,
}

impl DeliveryRateEstimator {
    pub fn new(now: Instant) -> Self {
        Self {
            delivered: 0,
            delivered_time: now,
            first_sent_time: now,
            app_limited_until: 0,
            largest_acked_seq: 0,
            last_sent_seq: 0,
            rate_sample: RateSample::default(),
            prior_time: None,
        }
    }

    /// Upon each segment transmission.
    /// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.2>.
    pub fn on_segment_sent(&mut self, segment: &mut SentSegment, bytes_in_flight: u64) {
        // no segments in flight yet?
        if bytes_in_flight == 0 {
            self.first_sent_time = segment.time_sent;
            self.delivered_time = segment.time_sent;
        }

        let state = &mut segment.rate_state;
        state.first_sent_time = Some(self.first_sent_time);
        state.delivered_time = Some(self.delivered_time);
        state.delivered = self.delivered;
        state.is_app_limited = self.is_app_limited();

        self.last_sent_seq = self.last_sent_seq.max(segment.end());
    }

    /// Start a new rate sample for an incoming ACK.
    pub fn begin_ack(&mut self) {
        self.rate_sample = RateSample::default();
        self.prior_time = None;
    }

    /// Update rate sampler (rs) when a segment is SACKed or ACKed.
    /// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.3>.
    pub fn update_rate_sample(&mut self, segment: &SentSegment, now: Instant) {
        let state = &segment.rate_state;
        let delivered_time = match state.delivered_time {
            Some(t) => t,
            // Segment was never stamped.
            None => return,
        };

        self.delivered = self.delivered.saturating_add(segment.size);
        self.delivered_time = now;

        // Update info using the newest segment:
        if self.prior_time.is_none() || state.delivered > self.rate_sample.prior_delivered {
            self.rate_sample.prior_delivered = state.delivered;
            self.prior_time = Some(delivered_time);
            self.rate_sample.is_app_limited = state.is_app_limited;
            self.rate_sample.send_elapsed = segment
                .time_sent
                .saturating_duration_since(state.first_sent_time.unwrap_or(segment.time_sent));
            self.rate_sample.ack_elapsed = now.saturating_duration_since(delivered_time);
            self.rate_sample.rtt = now.saturating_duration_since(segment.time_sent);
            self.first_sent_time = segment.time_sent;
        }

        self.largest_acked_seq = self.largest_acked_seq.max(segment.end());
    }

    /// Upon receiving ACK, fill in delivery rate sample rs.
    ///
    /// Return None if nothing was delivered on this ACK or the sampling
    /// interval is zero.
    /// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.3>.
    pub fn generate_rate_sample(&mut self, app_limited: bool) -> Option<&RateSample> {
        // Clear app-limited field if bubble is ACKed and gone.
        if self.is_app_limited() && self.largest_acked_seq > self.app_limited_until {
            self.set_app_limited(false);
        }

        // Nothing delivered on this ACK.
        self.prior_time?;

        self.rate_sample.is_app_limited |= app_limited;

        // Use the longer of the send_elapsed and ack_elapsed.
        self.rate_sample.interval = self
            .rate_sample
            .send_elapsed
            .max(self.rate_sample.ack_elapsed);

        self.rate_sample.delivered = self
            .delivered
            .saturating_sub(self.rate_sample.prior_delivered);

        let interval_us = self.rate_sample.interval.as_micros() as u64;
        if interval_us == 0 {
            return None;
        }

        self.rate_sample.delivery_rate =
            self.rate_sample.delivered.saturating_mul(1_000_000) / interval_us;

        Some(&self.rate_sample)
    }

    /// Set app limited status and record the end of the data sent so far as
    /// the end of app limited mode.
    pub fn set_app_limited(&mut self, is_app_limited: bool) {
        self.app_limited_until = if is_app_limited {
            self.last_sent_seq.max(1)
        } else {
            0
        }
    }

    /// Check if application limited.
    /// See <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02#section-3.4>.
    pub fn is_app_limited(&self) -> bool {
        self.app_limited_until != 0
    }

    /// C.delivered.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(
        estimator: &mut DeliveryRateEstimator,
        seq: u64,
        size: u64,
        now: Instant,
        bytes_in_flight: u64,
    ) -> SentSegment {
        let mut segment = SentSegment::new(seq, size, now);
        estimator.on_segment_sent(&mut segment, bytes_in_flight);
        segment
    }

    #[test]
    fn delivery_rate_sample() {
        let now = Instant::now();
        let mut estimator = DeliveryRateEstimator::new(now);

        let s0 = send(&mut estimator, 0, 1000, now, 0);
        let s1 = send(&mut estimator, 1000, 1000, now, 1000);
        assert_eq!(s0.rate_state.delivered, 0);
        assert_eq!(s1.rate_state.first_sent_time, Some(now));

        let now = now + Duration::from_millis(100);
        estimator.begin_ack();
        estimator.update_rate_sample(&s0, now);
        estimator.update_rate_sample(&s1, now);

        let rs = *estimator.generate_rate_sample(false).unwrap();
        assert_eq!(estimator.delivered(), 2000);
        assert_eq!(rs.delivered, 2000);
        assert_eq!(rs.interval, Duration::from_millis(100));
        assert_eq!(rs.rtt, Duration::from_millis(100));
        assert_eq!(rs.delivery_rate, 20_000);
        assert!(!rs.is_app_limited);
    }

    #[test]
    fn delivery_rate_no_sample() {
        let now = Instant::now();
        let mut estimator = DeliveryRateEstimator::new(now);

        // Nothing delivered.
        estimator.begin_ack();
        assert!(estimator.generate_rate_sample(false).is_none());

        // Zero interval.
        let s0 = send(&mut estimator, 0, 1000, now, 0);
        estimator.begin_ack();
        estimator.update_rate_sample(&s0, now);
        assert!(estimator.generate_rate_sample(false).is_none());
        assert_eq!(estimator.delivered(), 1000);
    }

    #[test]
    fn delivery_rate_app_limited() {
        let now = Instant::now();
        let mut estimator = DeliveryRateEstimator::new(now);
        assert!(!estimator.is_app_limited());

        let s0 = send(&mut estimator, 0, 1000, now, 0);
        estimator.set_app_limited(true);
        assert!(estimator.is_app_limited());
        let s1 = send(&mut estimator, 1000, 1000, now, 1000);
        assert!(!s0.rate_state.is_app_limited);
        assert!(s1.rate_state.is_app_limited);

        // The ack flag alone marks the sample app-limited.
        let now = now + Duration::from_millis(50);
        estimator.begin_ack();
        estimator.update_rate_sample(&s0, now);
        assert!(estimator.generate_rate_sample(true).unwrap().is_app_limited);
        assert!(estimator.is_app_limited());

        // The bubble is acked and gone.
        let now = now + Duration::from_millis(50);
        estimator.begin_ack();
        estimator.update_rate_sample(&s1, now);
        assert!(estimator.generate_rate_sample(false).unwrap().is_app_limited);
        assert!(!estimator.is_app_limited());
    }

    #[test]
    fn delivery_rate_app_limited_from_newest_segment() {
        let t0 = Instant::now();
        let mut estimator = DeliveryRateEstimator::new(t0);

        let s0 = send(&mut estimator, 0, 1000, t0, 0);
        estimator.set_app_limited(true);
        let s1 = send(&mut estimator, 1000, 1000, t0, 1000);
        assert!(s1.rate_state.is_app_limited);

        let t1 = t0 + Duration::from_millis(50);
        estimator.begin_ack();
        estimator.update_rate_sample(&s0, t1);
        estimator.generate_rate_sample(false);

        // The application catches up before the next send.
        estimator.set_app_limited(false);
        let s2 = send(&mut estimator, 2000, 1000, t1, 1000);
        assert_eq!(s2.rate_state.delivered, 1000);
        assert!(!s2.rate_state.is_app_limited);

        // An older app-limited segment in the same ack doesn't taint the
        // sample taken from the newest one.
        let t2 = t1 + Duration::from_millis(50);
        estimator.begin_ack();
        estimator.update_rate_sample(&s1, t2);
        estimator.update_rate_sample(&s2, t2);
        let rs = estimator.generate_rate_sample(false).unwrap();
        assert_eq!(rs.prior_delivered, 1000);
        assert!(!rs.is_app_limited);
    }
}
