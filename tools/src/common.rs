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

//! Shared helpers of the bbrflow tools.

use std::fs::File;

use clap::builder::PossibleValue;
use clap::ValueEnum;
use statrs::statistics::Data;
use statrs::statistics::Distribution;
use statrs::statistics::Max;
use statrs::statistics::Min;
use statrs::statistics::OrderStatistics;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Supported report formats.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub enum OutputFormat {
    /// One human readable line per report.
    #[default]
    Text,

    /// One JSON object per line.
    Json,
}

impl ValueEnum for OutputFormat {
    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            Self::Text => PossibleValue::new("text"),
            Self::Json => PossibleValue::new("json"),
        })
    }

    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Text, Self::Json]
    }
}

/// Return the log target: the given file, or stderr if no file is given.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    if let Some(path) = log_file {
        let file = File::create(path)?;
        return Ok(env_logger::Target::Pipe(Box::new(file)));
    }
    Ok(env_logger::Target::Stderr)
}

/// Summary statistics of a series of samples.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl Summary {
    /// Compute the summary of the samples. Return None if there are no
    /// samples.
    pub fn new(samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len();
        let mut s = Data::new(samples);
        Some(Summary {
            count,
            min: s.min(),
            max: s.max(),
            mean: s.mean().unwrap_or_default(),
            std_dev: s.std_dev().unwrap_or_default(),
            p50: s.percentile(50),
            p90: s.percentile(90),
            p99: s.percentile(99),
        })
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} samples, min {:.2}, max {:.2}, mean {:.2}, sd {:.2}, p50 {:.2}, p90 {:.2}, p99 {:.2}",
            self.count,
            self.min,
            self.max,
            self.mean,
            self.std_dev,
            self.p50,
            self.p90,
            self.p99
        )
    }
}
