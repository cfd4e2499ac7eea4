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

//! A discrete-event simulation of a single flow over a bottleneck link.
//!
//! The link has a fixed bandwidth, a fixed one-way propagation delay and a
//! drop-tail buffer. Every segment is acked on its own. Drops are detected
//! after a reordering delay and reported as congestion events; a silent
//! flow triggers the retransmission timeout.

use std::cmp;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BinaryHeap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use log::debug;
use log::info;
use log::warn;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde_json::json;

use bbrflow::Bbr;
use bbrflow::BbrConfig;
use bbrflow::BbrSnapshot;
use bbrflow::CongestionControlAlgorithm;
use bbrflow::CongestionController;
use bbrflow::Config;
use bbrflow_tools::OutputFormat;
use bbrflow_tools::Result;
use bbrflow_tools::Summary;

/// Smallest step of the simulated clock.
const TICK: Duration = Duration::from_micros(1);

/// Number of later segments that must leave the link before a drop is
/// noticed by the sender.
const REORDERING_THRESHOLD: u32 = 3;

#[derive(Parser, Debug, Clone)]
#[clap(name = "bbr_sim")]
pub struct SimOpt {
    /// Congestion control algorithm.
    #[clap(long, default_value = "BBR")]
    pub congestion_control_algor: CongestionControlAlgorithm,

    /// Bottleneck bandwidth in Mbps.
    #[clap(short, long, default_value = "10", value_name = "MBPS")]
    pub bandwidth: f64,

    /// One-way propagation delay in milliseconds.
    #[clap(long, default_value = "20", value_name = "TIME")]
    pub delay: u64,

    /// Bottleneck buffer size in packets.
    #[clap(long, default_value = "50", value_name = "NUM")]
    pub buffer: usize,

    /// Random loss rate of the link, in [0, 1].
    #[clap(long, default_value = "0", value_name = "RATE")]
    pub loss_rate: f64,

    /// Rate of the application in Mbps. The application is backlogged if it
    /// is not specified.
    #[clap(long, value_name = "MBPS")]
    pub app_rate: Option<f64>,

    /// Simulated duration in seconds.
    #[clap(short, long, default_value = "10", value_name = "TIME")]
    pub duration: u64,

    /// Retransmission timeout in milliseconds.
    #[clap(long, default_value = "1000", value_name = "TIME")]
    pub rto: u64,

    /// Maximum segment size in bytes.
    #[clap(long, default_value = "1460", value_name = "NUM")]
    pub mss: usize,

    /// Initial congestion window in packets.
    #[clap(long, default_value = "10", value_name = "NUM")]
    pub initial_congestion_window: u64,

    /// Minimal congestion window in packets.
    #[clap(long, default_value = "4", value_name = "NUM")]
    pub min_congestion_window: u64,

    /// Seed of the link losses and the BBR gain cycle.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub seed: u64,

    /// Report interval in milliseconds. "0" means only the summary is
    /// printed.
    #[clap(long, default_value = "100", value_name = "TIME")]
    pub report_interval: u64,

    /// Report format.
    #[clap(long, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

/// Simulation events, ordered by time and then by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Event {
    /// The sender may transmit.
    Send,

    /// The ack of the `tx`th transmission of a segment reaches the sender.
    Ack { seq: u64, tx: u32 },

    /// The sender notices the drop of the `tx`th transmission of a segment.
    Loss { seq: u64, tx: u32 },

    /// The retransmission timer expires.
    Timeout,

    /// Print a report.
    Report,
}

/// A segment not acked yet.
#[derive(Debug)]
struct Segment {
    len: u64,

    /// Time of the latest transmission.
    sent_at: Duration,

    /// Number of transmissions.
    tx: u32,

    /// Whether the latest transmission was declared lost.
    lost: bool,
}

/// The controller of the simulated flow.
enum Flow {
    Bbr(Box<Bbr>),
    Other(Box<dyn CongestionController>),
}

impl Flow {
    fn new(config: &Config) -> bbrflow::Result<Self> {
        config.validate()?;
        match config.congestion().congestion_control_algorithm {
            CongestionControlAlgorithm::Bbr => Ok(Flow::Bbr(Box::new(Bbr::new(
                BbrConfig::from(config.congestion()),
            )))),
            _ => Ok(Flow::Other(config.build_controller()?)),
        }
    }

    fn cc(&self) -> &dyn CongestionController {
        match self {
            Flow::Bbr(bbr) => bbr.as_ref(),
            Flow::Other(cc) => cc.as_ref(),
        }
    }

    fn cc_mut(&mut self) -> &mut dyn CongestionController {
        match self {
            Flow::Bbr(bbr) => bbr.as_mut(),
            Flow::Other(cc) => cc.as_mut(),
        }
    }

    fn snapshot(&self) -> Option<BbrSnapshot> {
        match self {
            Flow::Bbr(bbr) => Some(bbr.snapshot()),
            Flow::Other(_) => None,
        }
    }
}

struct Simulator {
    option: SimOpt,

    flow: Flow,

    rng: StdRng,

    /// The instant of simulated time zero.
    start: Instant,

    /// Pending events. The counter keeps events at the same time in FIFO
    /// order.
    events: BinaryHeap<Reverse<(Duration, u64, Event)>>,
    event_count: u64,

    mss: u64,
    delay: Duration,
    rto: Duration,

    /// Link rate in bytes per second.
    link_rate: f64,

    /// Application rate in bytes per second.
    app_rate: Option<f64>,

    /// Time the link finishes sending the queued packets.
    link_free_at: Duration,

    /// Time of the pending send event.
    send_at: Option<Duration>,

    /// Earliest time the pacer allows the next transmission.
    next_send_at: Duration,

    next_seq: u64,
    outstanding: BTreeMap<u64, Segment>,
    retransmits: VecDeque<u64>,
    last_ack_at: Duration,

    delivered: u64,
    retransmitted: u64,
    dropped: u64,
    timeouts: u64,
    rtt_samples: Vec<f64>,

    last_report_at: Duration,
    last_report_delivered: u64,
}

impl Simulator {
    fn new(option: SimOpt) -> Result<Self> {
        let mut config = Config::new();
        config.set_congestion_control_algorithm(option.congestion_control_algor);
        config.set_max_segment_size(option.mss);
        config.set_initial_congestion_window(option.initial_congestion_window);
        config.set_min_congestion_window(option.min_congestion_window);
        config.set_bbr_gain_cycle_seed(option.seed);
        let flow = Flow::new(&config)?;

        Ok(Simulator {
            flow,
            rng: StdRng::seed_from_u64(option.seed),
            start: Instant::now(),
            events: BinaryHeap::new(),
            event_count: 0,
            mss: config.congestion().max_segment_size as u64,
            delay: Duration::from_millis(option.delay),
            rto: Duration::from_millis(option.rto),
            link_rate: option.bandwidth * 1_000_000.0 / 8.0,
            app_rate: option.app_rate.map(|r| r * 1_000_000.0 / 8.0),
            link_free_at: Duration::ZERO,
            send_at: None,
            next_send_at: Duration::ZERO,
            next_seq: 0,
            outstanding: BTreeMap::new(),
            retransmits: VecDeque::new(),
            last_ack_at: Duration::ZERO,
            delivered: 0,
            retransmitted: 0,
            dropped: 0,
            timeouts: 0,
            rtt_samples: Vec::new(),
            last_report_at: Duration::ZERO,
            last_report_delivered: 0,
            option,
        })
    }

    /// Run the simulation until the configured duration.
    fn run(&mut self) {
        let end = Duration::from_secs(self.option.duration);
        info!(
            "simulate {} over {} Mbps, {} ms delay, {} packets buffer, for {:?}",
            self.flow.cc().name(),
            self.option.bandwidth,
            self.option.delay,
            self.option.buffer,
            end
        );

        self.schedule_send(Duration::ZERO);
        self.schedule(self.rto, Event::Timeout);
        if self.option.report_interval > 0 {
            self.schedule(
                Duration::from_millis(self.option.report_interval),
                Event::Report,
            );
        }

        while let Some(Reverse((now, _, event))) = self.events.pop() {
            if now > end {
                break;
            }
            match event {
                Event::Send => {
                    if self.send_at != Some(now) {
                        continue;
                    }
                    self.send_at = None;
                    self.on_send(now);
                }
                Event::Ack { seq, tx } => self.on_ack(now, seq, tx),
                Event::Loss { seq, tx } => self.on_loss(now, seq, tx),
                Event::Timeout => self.on_timeout(now),
                Event::Report => {
                    self.report(now);
                    self.schedule(
                        now + Duration::from_millis(self.option.report_interval),
                        Event::Report,
                    );
                }
            }
        }

        self.summarize(end);
    }

    fn schedule(&mut self, at: Duration, event: Event) {
        self.event_count += 1;
        self.events.push(Reverse((at, self.event_count, event)));
    }

    /// Schedule a send event unless an earlier one is pending.
    fn schedule_send(&mut self, at: Duration) {
        if self.send_at.map_or(true, |t| at < t) {
            self.send_at = Some(at);
            self.schedule(at, Event::Send);
        }
    }

    /// Bytes the application has handed over but not sent yet.
    fn app_available(&self, now: Duration) -> u64 {
        match self.app_rate {
            Some(rate) => ((rate * now.as_secs_f64()) as u64)
                .saturating_sub(self.next_seq),
            None => u64::MAX,
        }
    }

    fn is_app_limited(&self, now: Duration) -> bool {
        self.retransmits.is_empty() && self.app_available(now) < self.mss
    }

    /// Transmit as long as the window, the pacer and the application allow.
    fn on_send(&mut self, now: Duration) {
        loop {
            let cc = self.flow.cc();
            if cc.stats().bytes_in_flight.saturating_add(self.mss) > cc.congestion_window() {
                // Resumed by the next ack.
                return;
            }

            if now < self.next_send_at {
                self.schedule_send(self.next_send_at);
                return;
            }

            let (seq, len) = match self.next_segment(now) {
                Some(v) => v,
                None => return,
            };
            self.transmit(now, seq, len);
        }
    }

    /// Pick a lost segment to retransmit, or new data.
    fn next_segment(&mut self, now: Duration) -> Option<(u64, u64)> {
        while let Some(seq) = self.retransmits.pop_front() {
            match self.outstanding.get(&seq) {
                Some(seg) if seg.lost => return Some((seq, seg.len)),
                _ => continue,
            }
        }

        if self.app_available(now) >= self.mss {
            let seq = self.next_seq;
            self.next_seq += self.mss;
            return Some((seq, self.mss));
        }

        // Wake up when the application has a full segment.
        if let Some(rate) = self.app_rate {
            let ready = Duration::from_secs_f64((self.next_seq + self.mss) as f64 / rate);
            self.schedule_send(cmp::max(ready, now + TICK));
        }
        None
    }

    fn transmit(&mut self, now: Duration, seq: u64, len: u64) {
        self.flow.cc_mut().on_data_sent(self.start + now, seq, len);

        let seg = self.outstanding.entry(seq).or_insert(Segment {
            len,
            sent_at: now,
            tx: 0,
            lost: false,
        });
        seg.tx += 1;
        seg.sent_at = now;
        seg.lost = false;
        let tx = seg.tx;
        if tx > 1 {
            self.retransmitted += len;
        }

        if let Some(rate) = self.flow.cc().pacing_rate() {
            if rate > 0 {
                self.next_send_at = now + Duration::from_secs_f64(len as f64 / rate as f64);
            }
        }

        let tx_time = Duration::from_secs_f64(len as f64 / self.link_rate);
        let backlog = self.link_free_at.saturating_sub(now);
        let queued = backlog.as_secs_f64() / tx_time.as_secs_f64();
        let random_loss = self.option.loss_rate > 0.0 && self.rng.gen_bool(self.option.loss_rate);
        if queued >= self.option.buffer as f64 || random_loss {
            self.dropped += 1;
            let noticed = cmp::max(now, self.link_free_at)
                + tx_time * (REORDERING_THRESHOLD + 1)
                + self.delay * 2;
            debug!("segment {} tx {} dropped, {:.1} queued", seq, tx, queued);
            self.schedule(noticed, Event::Loss { seq, tx });
            return;
        }

        let departure = cmp::max(now, self.link_free_at) + tx_time;
        self.link_free_at = departure;
        self.schedule(departure + self.delay * 2, Event::Ack { seq, tx });
    }

    fn on_ack(&mut self, now: Duration, seq: u64, tx: u32) {
        let seg = match self.outstanding.remove(&seq) {
            Some(seg) => seg,
            None => return,
        };

        // Only the latest transmission gives an unambiguous RTT.
        let rtt = if seg.tx == tx {
            Some(now.saturating_sub(seg.sent_at))
        } else {
            None
        };
        if let Some(rtt) = rtt {
            self.rtt_samples.push(rtt.as_secs_f64() * 1000.0);
        }
        self.delivered += seg.len;
        self.last_ack_at = now;

        let app_limited = self.is_app_limited(now);
        let out = self
            .flow
            .cc_mut()
            .on_data_acked(self.start + now, seq, seg.len, rtt, app_limited);
        debug!(
            "segment {} acked, rtt {:?}, app limited {}, {:?}",
            seq, rtt, app_limited, out
        );

        self.schedule_send(now);
    }

    fn on_loss(&mut self, now: Duration, seq: u64, tx: u32) {
        let len = match self.outstanding.get_mut(&seq) {
            Some(seg) if seg.tx == tx && !seg.lost => {
                seg.lost = true;
                seg.len
            }
            _ => return,
        };

        debug!("segment {} tx {} lost", seq, tx);
        self.flow
            .cc_mut()
            .on_congestion_event(self.start + now, seq, len);
        self.retransmits.push_back(seq);
        self.schedule_send(now);
    }

    fn on_timeout(&mut self, now: Duration) {
        if let Some(&from) = self.outstanding.keys().next() {
            if now.saturating_sub(self.last_ack_at) >= self.rto {
                warn!(
                    "retransmission timeout at {:?}, {} segments outstanding",
                    now,
                    self.outstanding.len()
                );
                self.flow
                    .cc_mut()
                    .on_segment_retransmitted(self.start + now, from, self.next_seq);

                self.retransmits.clear();
                for (seq, seg) in self.outstanding.iter_mut() {
                    seg.lost = true;
                    self.retransmits.push_back(*seq);
                }
                self.timeouts += 1;
                self.last_ack_at = now;
                self.schedule_send(now);
            }
        }

        let next = cmp::max(self.last_ack_at + self.rto, now + TICK);
        self.schedule(next, Event::Timeout);
    }

    fn report(&mut self, now: Duration) {
        let interval = now.saturating_sub(self.last_report_at).as_secs_f64();
        let goodput = if interval > 0.0 {
            (self.delivered - self.last_report_delivered) as f64 * 8.0 / interval / 1e6
        } else {
            0.0
        };
        self.last_report_at = now;
        self.last_report_delivered = self.delivered;

        let cc = self.flow.cc();
        let out = cc.control_outputs();
        let stats = cc.stats();
        let snapshot = self.flow.snapshot();

        match self.option.format {
            OutputFormat::Json => {
                let report = json!({
                    "time_ms": now.as_millis() as u64,
                    "goodput_mbps": goodput,
                    "delivered": self.delivered,
                    "controls": out,
                    "stats": stats,
                    "bbr": snapshot,
                });
                println!("{}", report);
            }
            OutputFormat::Text => {
                let model = match snapshot {
                    Some(s) => format!(
                        " {:?}({:.2}) btlbw {} rtprop {}",
                        s.state,
                        s.pacing_gain,
                        s.btlbw,
                        s.rtprop_us
                            .map_or("-".to_string(), |v| format!("{}us", v))
                    ),
                    None => String::new(),
                };
                println!(
                    "{:>8.3}s goodput {:>8.3} Mbps cwnd {:>9} pacing {:>10} inflight {:>9}{}",
                    now.as_secs_f64(),
                    goodput,
                    out.cwnd,
                    out.pacing_rate.map_or("-".to_string(), |r| r.to_string()),
                    stats.bytes_in_flight,
                    model
                );
            }
        }
    }

    fn summarize(&self, end: Duration) {
        let secs = end.as_secs_f64();
        let goodput = if secs > 0.0 {
            self.delivered as f64 * 8.0 / secs / 1e6
        } else {
            0.0
        };
        let utilization = goodput / self.option.bandwidth;
        let rtt = Summary::new(self.rtt_samples.clone());
        let stats = self.flow.cc().stats();

        match self.option.format {
            OutputFormat::Json => {
                let summary = json!({
                    "summary": {
                        "algor": self.flow.cc().name(),
                        "goodput_mbps": goodput,
                        "utilization": utilization,
                        "delivered": self.delivered,
                        "retransmitted": self.retransmitted,
                        "dropped": self.dropped,
                        "timeouts": self.timeouts,
                        "stats": stats,
                        "rtt_ms": rtt.map(|s| json!({
                            "min": s.min,
                            "max": s.max,
                            "mean": s.mean,
                            "p50": s.p50,
                            "p90": s.p90,
                            "p99": s.p99,
                        })),
                    }
                });
                println!("{}", summary);
            }
            OutputFormat::Text => {
                println!(
                    "{}: goodput {:.3} Mbps, utilization {:.1}%, delivered {} bytes, \
                     retransmitted {} bytes, {} drops, {} timeouts",
                    self.flow.cc().name(),
                    goodput,
                    utilization * 100.0,
                    self.delivered,
                    self.retransmitted,
                    self.dropped,
                    self.timeouts
                );
                if let Some(rtt) = rtt {
                    println!("rtt(ms): {}", rtt);
                }
            }
        }
    }
}

fn parse_option() -> std::result::Result<SimOpt, clap::error::Error> {
    let option = SimOpt::parse();

    if option.bandwidth.is_nan() || option.bandwidth <= 0.0 {
        return Err(SimOpt::command().error(
            ErrorKind::ValueValidation,
            "Bandwidth should be positive",
        ));
    }

    if !(0.0..=1.0).contains(&option.loss_rate) {
        return Err(SimOpt::command().error(
            ErrorKind::ValueValidation,
            "Loss rate should be in [0, 1]",
        ));
    }

    if matches!(option.app_rate, Some(r) if r.is_nan() || r <= 0.0) {
        return Err(SimOpt::command().error(
            ErrorKind::ValueValidation,
            "Application rate should be positive",
        ));
    }

    if option.rto == 0 {
        return Err(SimOpt::command().error(
            ErrorKind::ValueValidation,
            "Retransmission timeout should be positive",
        ));
    }

    Ok(option)
}

fn process_option(option: &SimOpt) -> Result<()> {
    env_logger::builder()
        .target(bbrflow_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    Ok(())
}

fn main() -> Result<()> {
    // Parse simulation option.
    let option = match parse_option() {
        Ok(option) => option,
        Err(e) => e.exit(),
    };

    // Process simulation option.
    process_option(&option)?;

    // Create and run simulator.
    let mut sim = Simulator::new(option)?;
    sim.run();

    Ok(())
}
