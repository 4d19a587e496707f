use std::path::{Path, PathBuf};

use argh::FromArgs;
use eyre::WrapErr;
use plotters::prelude::*;
use tracing as trc;

use crate::{
    config::{Config, ImpactConfig, ResourcesConfig},
    delta::{DeltaAnalyzer, ZeroReferencePolicy},
    metrics::{Experiment, MetricSet, Stage, THROUGHPUT_METRICS},
    render::{self, ImpactPanel},
    report::{analysis_lines, ImpactReport, MetricImpact, MetricValues},
    resources::ResourceSeries,
};

#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand)]
pub enum Command {
    Impact(ImpactArgs),
    Resources(ResourcesArgs),
}

#[derive(FromArgs, Debug, PartialEq)]
/// Chart reference vs. treatment throughput with the secondary dimension on and off.
#[argh(subcommand, name = "impact")]
pub struct ImpactArgs {
    /// directory holding one sub-directory per experiment
    #[argh(option)]
    results_dir: Option<PathBuf>,
    /// directory the charts and reports are written to
    #[argh(option)]
    plots_dir: Option<PathBuf>,
    /// number of numbered stages to analyze after the summary
    #[argh(option)]
    stages: Option<u32>,
    /// what to do with a zero reference value: error, skip or unbounded
    #[argh(option)]
    zero_reference: Option<ZeroReferencePolicy>,
}

#[derive(FromArgs, Debug, PartialEq)]
/// Chart per-pod resource usage over time.
#[argh(subcommand, name = "resources")]
pub struct ResourcesArgs {
    /// directory holding the resource CSV files
    #[argh(option)]
    data_dir: Option<PathBuf>,
    /// directory the charts are written to
    #[argh(option)]
    plots_dir: Option<PathBuf>,
    /// only pods whose name starts with this prefix are charted
    #[argh(option)]
    pod_prefix: Option<String>,
}

impl Command {
    /// Override the config with the flags given on the command line
    pub fn apply(&self, config: &mut Config) {
        match self {
            Command::Impact(args) => {
                let config = &mut config.impact;
                if let Some(dir) = &args.results_dir {
                    config.results_dir = dir.clone();
                }
                if let Some(dir) = &args.plots_dir {
                    config.plots_dir = dir.clone();
                }
                if let Some(stages) = args.stages {
                    config.stages = stages;
                }
                if let Some(policy) = args.zero_reference {
                    config.zero_reference = policy;
                }
            }
            Command::Resources(args) => {
                let config = &mut config.resources;
                if let Some(dir) = &args.data_dir {
                    config.data_dir = dir.clone();
                }
                if let Some(dir) = &args.plots_dir {
                    config.plots_dir = Some(dir.clone());
                }
                if let Some(prefix) = &args.pod_prefix {
                    config.pod_prefix = prefix.clone();
                }
            }
        }
    }
}

/// Analyze and chart every stage of the impact design
#[trc::instrument(skip(config))]
pub fn impact(config: &ImpactConfig) -> eyre::Result<()> {
    let design = &config.design;
    let stages = Stage::all(config.stages);
    create_dir(&config.plots_dir)?;

    trc::info!(experiments = ?design.experiment_keys(), "Loading experiment data");
    let load = |key: &str| Experiment::load(&config.results_dir, key, &stages);
    let reference_on = load(&design.reference_on)?;
    let reference_off = load(&design.reference_off)?;
    let treatment_on = load(&design.treatment_on)?;
    let treatment_off = load(&design.treatment_off)?;

    let analyzer = DeltaAnalyzer::new(config.zero_reference);
    let metric_names: Vec<&str> = THROUGHPUT_METRICS.iter().map(|m| m.key).collect();

    for &stage in &stages {
        trc::info_span!("Analyzing", %stage).in_scope(|| -> eyre::Result<()> {
            let reference_on = stage_metrics(&reference_on, stage)?;
            let reference_off = stage_metrics(&reference_off, stage)?;
            let treatment_on = stage_metrics(&treatment_on, stage)?;
            let treatment_off = stage_metrics(&treatment_off, stage)?;

            // The dimension being off is level `a`, on is level `b`
            let impacts = analyzer
                .cross_over_metrics(
                    &metric_names,
                    reference_off,
                    treatment_off,
                    reference_on,
                    treatment_on,
                )
                .wrap_err_with(|| format!("Could not analyze stage `{}`", stage))?;

            let mut report = ImpactReport::new(&stage.prefix(), design);
            let mut panels = Vec::with_capacity(THROUGHPUT_METRICS.len());
            for metric in THROUGHPUT_METRICS {
                let values = MetricValues::from_sets(
                    metric.key,
                    reference_on,
                    reference_off,
                    treatment_on,
                    treatment_off,
                )
                .ok_or_else(|| eyre::eyre!("Metric `{}` is missing", metric.key))?;
                let impact = impacts.get(metric.key).copied();

                for line in analysis_lines(metric, design, &values, impact.as_ref()) {
                    trc::info!("{}", line);
                }

                report
                    .metrics
                    .insert(metric.key.to_string(), MetricImpact { values, impact });
                panels.push(ImpactPanel {
                    metric,
                    values,
                    impact,
                });
            }

            let stem = design.file_stem(&stage.prefix());
            let chart_path = config.plots_dir.join(format!("{}_comparison.png", stem));
            {
                let root = BitMapBackend::new(&chart_path, config.image_size).into_drawing_area();
                render::draw_impact_chart(&root, design, &panels)
                    .wrap_err("Could not draw impact chart")?;
                root.present()?;
            }
            report.write(&config.plots_dir.join(format!("{}.json", stem)))?;

            trc::info!("Plot saved to `{}`", chart_path.display());
            Ok(())
        })?;
    }

    Ok(())
}

/// Chart every configured resource CSV
#[trc::instrument(skip(config))]
pub fn resources(config: &ResourcesConfig) -> eyre::Result<()> {
    let plots_dir = config.plots_dir();
    create_dir(&plots_dir)?;

    for csv_name in &config.csv_names {
        trc::info_span!("Plotting", file = %csv_name).in_scope(|| -> eyre::Result<()> {
            let series = ResourceSeries::load(&config.data_dir.join(csv_name), &config.pod_prefix)?;

            let stem = Path::new(csv_name)
                .file_stem()
                .and_then(|x| x.to_str())
                .unwrap_or(csv_name);
            let chart_path = plots_dir.join(format!("{}.png", stem));
            {
                let root = BitMapBackend::new(&chart_path, config.image_size).into_drawing_area();
                render::draw_resource_chart(&root, &series)
                    .wrap_err("Could not draw resource chart")?;
                root.present()?;
            }

            trc::info!("Plot saved to `{}`", chart_path.display());
            Ok(())
        })?;
    }

    Ok(())
}

fn stage_metrics(experiment: &Experiment, stage: Stage) -> eyre::Result<&MetricSet> {
    experiment.stage(stage).ok_or_else(|| {
        eyre::eyre!(
            "Experiment `{}` has no metrics for stage `{}`",
            experiment.key(),
            stage
        )
    })
}

fn create_dir(path: &Path) -> eyre::Result<()> {
    std::fs::create_dir_all(path)
        .wrap_err_with(|| format!("Could not create output directory `{}`", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cli::Args, config::ImpactDesign, report::ImpactReport};

    fn write_summary(results_dir: &Path, key: &str, stage: Stage, requests_per_sec: f64) {
        let dir = results_dir.join(key);
        std::fs::create_dir_all(&dir).unwrap();
        let summary = serde_json::json!({
            "successes": {
                "throughput": {
                    "total_tokens_per_sec": 100. * requests_per_sec,
                    "input_tokens_per_sec": 60. * requests_per_sec,
                    "output_tokens_per_sec": 40. * requests_per_sec,
                    "requests_per_sec": requests_per_sec,
                }
            }
        });
        std::fs::write(dir.join(stage.file_name()), summary.to_string()).unwrap();
    }

    /// An impact config over one numbered stage with every experiment on disk
    fn impact_fixture(root: &Path, reference_off_rps: f64) -> ImpactConfig {
        let config = ImpactConfig {
            results_dir: root.join("results"),
            plots_dir: root.join("plots"),
            stages: 1,
            image_size: (800, 600),
            ..ImpactConfig::default()
        };
        let design = &config.design;
        for &stage in &Stage::all(config.stages) {
            write_summary(&config.results_dir, &design.reference_off, stage, reference_off_rps);
            write_summary(&config.results_dir, &design.treatment_off, stage, 8.5);
            write_summary(&config.results_dir, &design.reference_on, stage, 16.);
            write_summary(&config.results_dir, &design.treatment_on, stage, 8.);
        }
        config
    }

    fn read_report(path: &Path) -> ImpactReport {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn impact_writes_chart_and_report_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = impact_fixture(dir.path(), 10.);
        impact(&config).unwrap();

        for stem in &["summary_lora_impact", "stage_0_lora_impact"] {
            assert!(config
                .plots_dir
                .join(format!("{}_comparison.png", stem))
                .is_file());
            assert!(config.plots_dir.join(format!("{}.json", stem)).is_file());
        }

        let report = read_report(&config.plots_dir.join("summary_lora_impact.json"));
        assert_eq!(report.stage, "summary");
        assert_eq!(report.metrics.len(), THROUGHPUT_METRICS.len());
        let rps = report.metrics["requests_per_sec"].impact.unwrap();
        assert!((rps.impact_amplification - -6.5).abs() < 1e-9);
    }

    #[test]
    fn zero_reference_follows_configured_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = impact_fixture(dir.path(), 0.);
        assert!(impact(&config).is_err());

        config.zero_reference = ZeroReferencePolicy::Skip;
        impact(&config).unwrap();

        assert!(config
            .plots_dir
            .join("summary_lora_impact_comparison.png")
            .is_file());
        let report = read_report(&config.plots_dir.join("summary_lora_impact.json"));
        assert_eq!(report.metrics.len(), THROUGHPUT_METRICS.len());
        assert!(report.metrics.values().all(|m| m.impact.is_none()));
        assert_eq!(report.metrics["requests_per_sec"].values.reference_off, 0.);
    }

    #[test]
    fn file_names_follow_the_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = impact_fixture(dir.path(), 10.);
        config.stages = 0;
        config.design = ImpactDesign {
            dimension_label: "Prefix Cache".into(),
            ..config.design.clone()
        };
        impact(&config).unwrap();

        assert!(config
            .plots_dir
            .join("summary_prefix_cache_impact_comparison.png")
            .is_file());
        assert!(!config.plots_dir.join("stage_0_prefix_cache_impact.json").exists());
    }

    #[test]
    fn resources_writes_one_chart_per_csv() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("cpu_cores.csv"),
            "pod,timestamp,cpu_cores\nms-decode-0,1,0.5\nms-decode-0,2,0.75\nms-decode-1,1,1.25\n",
        )
        .unwrap();
        std::fs::write(
            data_dir.join("memory_gib.csv"),
            "pod,timestamp,memory_gib\nms-decode-0,1,10\ngateway,1,2\n",
        )
        .unwrap();

        let config = ResourcesConfig {
            data_dir: data_dir.clone(),
            csv_names: vec!["cpu_cores.csv".into(), "memory_gib.csv".into()],
            image_size: (640, 480),
            ..ResourcesConfig::default()
        };
        resources(&config).unwrap();

        assert!(data_dir.join("plots").join("cpu_cores.png").is_file());
        assert!(data_dir.join("plots").join("memory_gib.png").is_file());
    }

    #[test]
    fn missing_resource_csv_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResourcesConfig {
            data_dir: dir.path().to_path_buf(),
            csv_names: vec!["net_in_mib.csv".into()],
            ..ResourcesConfig::default()
        };
        let err = resources(&config).unwrap_err();
        assert!(format!("{:?}", err).contains("net_in_mib.csv"));
    }

    #[test]
    fn impact_flags_override_config() {
        let args = Args::from_args(
            &["bench_impact_charts"],
            &[
                "impact",
                "--stages",
                "3",
                "--zero-reference",
                "skip",
                "--plots-dir",
                "out",
            ],
        )
        .unwrap();
        assert_eq!(args.config, None);

        let mut config = Config::default();
        args.command.apply(&mut config);

        assert_eq!(config.impact.stages, 3);
        assert_eq!(config.impact.zero_reference, ZeroReferencePolicy::Skip);
        assert_eq!(config.impact.plots_dir, Path::new("out"));
        assert_eq!(config.impact.results_dir, Path::new("results"));
    }

    #[test]
    fn resources_flags_override_config() {
        let args = Args::from_args(
            &["bench_impact_charts"],
            &[
                "-c",
                "charts.json",
                "resources",
                "--pod-prefix",
                "decode",
                "--data-dir",
                "data",
            ],
        )
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("charts.json")));

        let mut config = Config::default();
        args.command.apply(&mut config);

        assert_eq!(config.resources.pod_prefix, "decode");
        assert_eq!(config.resources.plots_dir(), Path::new("data/plots"));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Args::from_args(
            &["bench_impact_charts"],
            &["impact", "--zero-reference", "ignore"]
        )
        .is_err());
    }

    #[test]
    fn missing_stage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Experiment::load(dir.path(), "missing", &[Stage::Summary]).unwrap_err();
        assert!(format!("{:?}", err).contains("missing"));
    }
}
