//! Per-stage impact analysis: what gets logged and what gets written next to
//! the impact chart.

use std::{fs::OpenOptions, path::Path};

use eyre::WrapErr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::ImpactDesign,
    delta::CrossImpact,
    metrics::{MetricSet, ThroughputMetric},
};

/// The values of one metric across the four experiments of a design
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct MetricValues {
    pub reference_on: f64,
    pub reference_off: f64,
    pub treatment_on: f64,
    pub treatment_off: f64,
}

impl MetricValues {
    pub fn from_sets(
        name: &str,
        reference_on: &MetricSet,
        reference_off: &MetricSet,
        treatment_on: &MetricSet,
        treatment_off: &MetricSet,
    ) -> Option<Self> {
        Some(MetricValues {
            reference_on: reference_on.get(name)?,
            reference_off: reference_off.get(name)?,
            treatment_on: treatment_on.get(name)?,
            treatment_off: treatment_off.get(name)?,
        })
    }
}

/// One metric's entry in the report
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MetricImpact {
    pub values: MetricValues,
    /// Missing when a zero reference was skipped
    pub impact: Option<CrossImpact>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImpactReport {
    pub stage: String,
    pub reference: String,
    pub treatment: String,
    pub dimension: String,
    pub metrics: IndexMap<String, MetricImpact>,
}

impl ImpactReport {
    pub fn new(stage: &str, design: &ImpactDesign) -> Self {
        ImpactReport {
            stage: stage.to_string(),
            reference: design.reference_label.clone(),
            treatment: design.treatment_label.clone(),
            dimension: design.dimension_label.clone(),
            metrics: IndexMap::new(),
        }
    }

    pub fn write(&self, path: &Path) -> eyre::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("Could not create report `{}`", path.display()))?;
        serde_json::to_writer_pretty(file, self).wrap_err("Could not write report")?;
        Ok(())
    }
}

/// The analysis of one metric as human readable lines
pub fn analysis_lines(
    metric: &ThroughputMetric,
    design: &ImpactDesign,
    values: &MetricValues,
    impact: Option<&CrossImpact>,
) -> Vec<String> {
    let reference = &design.reference_label;
    let treatment = &design.treatment_label;
    let dimension = &design.dimension_label;

    let gap = |result: Option<f64>, pct: Option<f64>| match (result, pct) {
        (Some(gap), Some(pct)) => format!("Gap: {:+.2} ({:+.2}%)", gap, pct),
        _ => "Gap: skipped (zero reference)".to_string(),
    };

    let mut lines = vec![
        format!("{}:", metric.title),
        format!(
            "  W/O {} - {}: {:.2} | {}: {:.2} | {}",
            dimension,
            reference,
            values.reference_off,
            treatment,
            values.treatment_off,
            gap(
                impact.map(|x| x.a.absolute_delta),
                impact.map(|x| x.a.percentage_delta)
            )
        ),
        format!(
            "  WITH {} - {}: {:.2} | {}: {:.2} | {}",
            dimension,
            reference,
            values.reference_on,
            treatment,
            values.treatment_on,
            gap(
                impact.map(|x| x.b.absolute_delta),
                impact.map(|x| x.b.percentage_delta)
            )
        ),
    ];

    if let Some(impact) = impact {
        lines.push(format!(
            "  -> Gap changed by {:+.2} {} with {}",
            impact.impact_amplification, metric.unit_label, dimension
        ));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{delta::compute_cross_impact, metrics::THROUGHPUT_METRICS};

    fn values() -> MetricValues {
        MetricValues {
            reference_on: 160.,
            reference_off: 100.,
            treatment_on: 80.,
            treatment_off: 85.,
        }
    }

    #[test]
    fn lines_describe_both_levels() {
        let design = ImpactDesign::default();
        let impact = compute_cross_impact(100., 85., 160., 80.).unwrap();
        let lines = analysis_lines(&THROUGHPUT_METRICS[3], &design, &values(), Some(&impact));

        assert_eq!(lines[0], "Request Rate:");
        assert_eq!(
            lines[1],
            "  W/O LoRA - PRECISE: 100.00 | ROUND ROBIN: 85.00 | Gap: -15.00 (-15.00%)"
        );
        assert_eq!(
            lines[2],
            "  WITH LoRA - PRECISE: 160.00 | ROUND ROBIN: 80.00 | Gap: -80.00 (-50.00%)"
        );
        assert_eq!(lines[3], "  -> Gap changed by -65.00 Requests/sec with LoRA");
    }

    #[test]
    fn skipped_impact_is_reported() {
        let design = ImpactDesign::default();
        let lines = analysis_lines(&THROUGHPUT_METRICS[0], &design, &values(), None);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("Gap: skipped (zero reference)"));
    }

    #[test]
    fn values_require_every_set() {
        let full: MetricSet = vec![("rps", 1.)].into_iter().collect();
        let empty = MetricSet::default();
        assert!(MetricValues::from_sets("rps", &full, &full, &full, &full).is_some());
        assert!(MetricValues::from_sets("rps", &full, &full, &empty, &full).is_none());
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary_lora_impact.json");

        let mut report = ImpactReport::new("summary", &ImpactDesign::default());
        report.metrics.insert(
            "requests_per_sec".into(),
            MetricImpact {
                values: values(),
                impact: compute_cross_impact(100., 85., 160., 80.).ok(),
            },
        );
        report.write(&path).unwrap();

        let written: ImpactReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, report);
    }

    #[test]
    fn unbounded_report_keeps_infinite_percentages() {
        use crate::delta::{DeltaAnalyzer, ZeroReferencePolicy};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary_lora_impact.json");
        let impact = DeltaAnalyzer::new(ZeroReferencePolicy::Unbounded)
            .cross_impact(0., 5., 10., 5.)
            .unwrap();

        let mut report = ImpactReport::new("summary", &ImpactDesign::default());
        report.metrics.insert(
            "requests_per_sec".into(),
            MetricImpact {
                values: MetricValues {
                    reference_on: 10.,
                    reference_off: 0.,
                    treatment_on: 5.,
                    treatment_off: 5.,
                },
                impact,
            },
        );
        report.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#""percentage_delta": "inf""#));
        assert!(!text.contains("null"));

        let written: ImpactReport = serde_json::from_str(&text).unwrap();
        let impact = written.metrics["requests_per_sec"].impact.unwrap();
        assert_eq!(impact.a.percentage_delta, f64::INFINITY);
        assert_eq!(impact.b.percentage_delta, -50.);
        assert_eq!(written, report);
    }
}
