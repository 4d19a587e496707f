use std::{
    collections::BTreeMap,
    fmt,
    iter::FromIterator,
    path::{Path, PathBuf},
};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing as trc;

/// A throughput metric we chart, with its axis label and panel title
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThroughputMetric {
    pub key: &'static str,
    pub unit_label: &'static str,
    pub title: &'static str,
}

/// The throughput metrics of a lifecycle summary, in chart order
pub static THROUGHPUT_METRICS: &[ThroughputMetric] = &[
    ThroughputMetric {
        key: "total_tokens_per_sec",
        unit_label: "Total Tokens/sec",
        title: "Total Throughput",
    },
    ThroughputMetric {
        key: "input_tokens_per_sec",
        unit_label: "Input Tokens/sec",
        title: "Input Throughput",
    },
    ThroughputMetric {
        key: "output_tokens_per_sec",
        unit_label: "Output Tokens/sec",
        title: "Output Throughput",
    },
    ThroughputMetric {
        key: "requests_per_sec",
        unit_label: "Requests/sec",
        title: "Request Rate",
    },
];

/// Suffix shared by every lifecycle metrics file
static LIFECYCLE_SUFFIX: &str = "_lifecycle_metrics.json";

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Could not parse lifecycle summary: {0}")]
    Json(#[from] serde_json::Error),
}

/// Named numeric measurements for one experiment configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct MetricSet(BTreeMap<String, f64>);

impl MetricSet {
    /// Parse the `successes.throughput` object of a lifecycle summary
    ///
    /// Fields that are not numbers are ignored.
    pub fn from_summary_json(text: &str) -> Result<Self, SummaryError> {
        let summary: LifecycleSummary = serde_json::from_str(text)?;
        Ok(summary
            .successes
            .throughput
            .into_iter()
            .filter_map(|(name, value)| value.as_f64().map(|x| (name, x)))
            .collect())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for MetricSet {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        MetricSet(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[derive(Deserialize)]
struct LifecycleSummary {
    successes: Successes,
}

#[derive(Deserialize)]
struct Successes {
    throughput: serde_json::Map<String, serde_json::Value>,
}

/// A stage of the load-testing pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Metrics aggregated over the whole run
    Summary,
    Numbered(u32),
}

impl Stage {
    /// The summary followed by stages `0..count`
    pub fn all(count: u32) -> Vec<Stage> {
        std::iter::once(Stage::Summary)
            .chain((0..count).map(Stage::Numbered))
            .collect()
    }

    /// Name used as the prefix of lifecycle files and plots
    pub fn prefix(&self) -> String {
        match self {
            Stage::Summary => "summary".to_string(),
            Stage::Numbered(n) => format!("stage_{}", n),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.prefix(), LIFECYCLE_SUFFIX)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

/// Path of the lifecycle metrics file of an experiment stage
pub fn summary_path(results_dir: &Path, experiment_key: &str, stage: Stage) -> PathBuf {
    results_dir.join(experiment_key).join(stage.file_name())
}

/// Load the throughput metrics of one experiment stage
#[trc::instrument(level = "debug", skip(results_dir))]
pub fn load_throughput_metrics(
    results_dir: &Path,
    experiment_key: &str,
    stage: Stage,
) -> eyre::Result<MetricSet> {
    let path = summary_path(results_dir, experiment_key, stage);
    let text = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("Could not read metrics file `{}`", path.display()))?;

    MetricSet::from_summary_json(&text)
        .wrap_err_with(|| format!("Could not parse metrics file `{}`", path.display()))
}

/// An experiment configuration and its metrics for every loaded stage
#[derive(Clone, Debug, PartialEq)]
pub struct Experiment {
    key: String,
    stages: BTreeMap<Stage, MetricSet>,
}

impl Experiment {
    /// Load every stage of the experiment stored under `results_dir/key`
    pub fn load(results_dir: &Path, key: &str, stages: &[Stage]) -> eyre::Result<Self> {
        let stages = stages
            .iter()
            .map(|&stage| Ok((stage, load_throughput_metrics(results_dir, key, stage)?)))
            .collect::<eyre::Result<BTreeMap<_, _>>>()
            .wrap_err_with(|| format!("Could not load experiment `{}`", key))?;

        Ok(Experiment {
            key: key.to_string(),
            stages,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The metrics of a stage, if it was loaded
    pub fn stage(&self, stage: Stage) -> Option<&MetricSet> {
        self.stages.get(&stage)
    }
}
