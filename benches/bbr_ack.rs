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

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BatchSize;
use criterion::Criterion;

use bbrflow::CongestionControlAlgorithm;
use bbrflow::CongestionController;
use bbrflow::Config;

const MSS: u64 = 1460;

fn new_controller(algor: CongestionControlAlgorithm) -> Box<dyn CongestionController> {
    let mut config = Config::new();
    config.set_congestion_control_algorithm(algor);
    config.set_bbr_gain_cycle_seed(0);
    config.build_controller().unwrap()
}

/// Send `count` segments and ack them one by one, 1ms apart.
fn send_and_ack(cc: &mut dyn CongestionController, start: Instant, count: u64) {
    for i in 0..count {
        cc.on_data_sent(start + Duration::from_micros(i * 100), i * MSS, MSS);
    }
    for i in 0..count {
        let now = start + Duration::from_millis(20 + i);
        cc.on_data_acked(now, i * MSS, MSS, Some(Duration::from_millis(20)), false);
    }
}

pub fn ack_benchmark(c: &mut Criterion) {
    const COUNT: u64 = 1000;

    c.bench_function("bbr send and ack", |b| {
        b.iter_batched(
            || new_controller(CongestionControlAlgorithm::Bbr),
            |mut cc| send_and_ack(cc.as_mut(), Instant::now(), COUNT),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("dummy send and ack", |b| {
        b.iter_batched(
            || new_controller(CongestionControlAlgorithm::Dummy),
            |mut cc| send_and_ack(cc.as_mut(), Instant::now(), COUNT),
            BatchSize::SmallInput,
        )
    });
}

pub fn stretched_ack_benchmark(c: &mut Criterion) {
    const COUNT: u64 = 1000;
    const STRETCH: u64 = 32;

    c.bench_function("bbr stretched ack", |b| {
        b.iter_batched(
            || new_controller(CongestionControlAlgorithm::Bbr),
            |mut cc| {
                let start = Instant::now();
                for i in 0..COUNT {
                    cc.on_data_sent(start, i * MSS, MSS);
                }
                for i in 0..COUNT / STRETCH {
                    let now = start + Duration::from_millis(20 + i);
                    cc.on_data_acked(
                        now,
                        i * STRETCH * MSS,
                        STRETCH * MSS,
                        Some(Duration::from_millis(20)),
                        false,
                    );
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, ack_benchmark, stretched_ack_benchmark);
criterion_main!(benches);
