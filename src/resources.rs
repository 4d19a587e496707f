//! Per-pod resource usage time series.
//!
//! Resource files are CSV with a `pod` column, a `timestamp` column and a
//! single value column whose header names the resource, e.g. `cpu_cores`.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io,
    path::Path,
};

use eyre::WrapErr;
use thiserror::Error;
use tracing as trc;

/// The resource files written by the load-testing harness
pub static DEFAULT_CSV_NAMES: &[&str] = &[
    "cpu_cores.csv",
    "fs_gib.csv",
    "memory_gib.csv",
    "net_in_mib.csv",
    "net_out_mib.csv",
];

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Could not read resource CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Expected columns `pod,timestamp,<value>`, found {found:?}")]
    UnexpectedColumns { found: Vec<String> },
    #[error("Line {line}: `{value}` is not a number")]
    BadValue { line: u64, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: String,
    pub value: f64,
}

/// One resource measured over time for every matching pod
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceSeries {
    value_name: String,
    pods: BTreeMap<String, Vec<Sample>>,
}

impl ResourceSeries {
    /// Open and parse a resource CSV file, keeping only pods starting with
    /// `pod_prefix`
    pub fn load(path: &Path, pod_prefix: &str) -> eyre::Result<Self> {
        let file = File::open(path)
            .wrap_err_with(|| format!("Could not open resource file `{}`", path.display()))?;

        let series = Self::from_reader(file, pod_prefix)
            .wrap_err_with(|| format!("Could not parse resource file `{}`", path.display()))?;

        trc::debug!(
            pods = series.pods.len(),
            value = %series.value_name,
            "Loaded resource series"
        );

        Ok(series)
    }

    pub fn from_reader<R: io::Read>(reader: R, pod_prefix: &str) -> Result<Self, ResourceError> {
        let mut reader = csv::Reader::from_reader(reader);

        let headers = reader.headers()?.clone();
        if headers.len() != 3 || &headers[0] != "pod" || &headers[1] != "timestamp" {
            return Err(ResourceError::UnexpectedColumns {
                found: headers.iter().map(String::from).collect(),
            });
        }
        let value_name = headers[2].to_string();

        let mut pods: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let pod = &record[0];
            if !pod.starts_with(pod_prefix) {
                continue;
            }

            let raw = record[2].trim();
            let value = raw.parse::<f64>().map_err(|_| ResourceError::BadValue {
                line: record.position().map(|p| p.line()).unwrap_or_default(),
                value: raw.to_string(),
            })?;

            pods.entry(pod.to_string()).or_default().push(Sample {
                timestamp: record[1].to_string(),
                value,
            });
        }

        Ok(ResourceSeries { value_name, pods })
    }

    /// Header of the value column
    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    /// Samples grouped by pod, ordered by pod name
    pub fn pods(&self) -> &BTreeMap<String, Vec<Sample>> {
        &self.pods
    }

    /// Human readable value name, e.g. `Cpu Cores` for `cpu_cores`
    pub fn axis_label(&self) -> String {
        title_case(&self.value_name)
    }

    pub fn title(&self) -> String {
        format!("{} Over Time", self.axis_label())
    }

    /// Every distinct timestamp across all pods, in time order
    ///
    /// Timestamps are ordered numerically when they all parse as numbers and
    /// lexically otherwise.
    pub fn timeline(&self) -> Vec<&str> {
        let distinct: BTreeSet<&str> = self
            .pods
            .values()
            .flatten()
            .map(|s| s.timestamp.as_str())
            .collect();
        let mut timeline: Vec<&str> = distinct.into_iter().collect();

        let numeric: Option<Vec<f64>> = timeline.iter().map(|t| t.trim().parse().ok()).collect();
        if let Some(numeric) = numeric {
            let mut paired: Vec<(f64, &str)> = numeric.into_iter().zip(timeline).collect();
            paired.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            timeline = paired.into_iter().map(|(_, t)| t).collect();
        }

        timeline
    }

    /// Smallest and largest value over all pods
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.pods
            .values()
            .flatten()
            .map(|s| s.value)
            .fold(None, |range, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// `net_in_mib` becomes `Net In Mib`
pub fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
