//! Run configuration.
//!
//! Every field has a default so a config file only needs to name what it
//! changes. Command line flags are applied on top of the loaded file.

use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::{delta::ZeroReferencePolicy, resources::DEFAULT_CSV_NAMES};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub impact: ImpactConfig,
    pub resources: ResourcesConfig,
}

impl Config {
    /// Read a JSON config file, or use the defaults when no path is given
    pub fn load(path: Option<&Path>) -> eyre::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("Could not read config `{}`", path.display()))?;
                serde_json::from_str(&text)
                    .wrap_err_with(|| format!("Could not parse config `{}`", path.display()))
            }
            None => Ok(Config::default()),
        }
    }
}

/// The four experiments of a 2x2 design and how to label them
///
/// The reference is the scheduling strategy compared against, the dimension
/// is the secondary factor that is either on or off.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ImpactDesign {
    pub reference_label: String,
    pub treatment_label: String,
    pub dimension_label: String,
    pub reference_on: String,
    pub reference_off: String,
    pub treatment_on: String,
    pub treatment_off: String,
}

impl Default for ImpactDesign {
    fn default() -> Self {
        let reference_on = "lora=1-base-groups=80-pods=8".to_string();
        let reference_off = "lora=0-groups=160-pods=8".to_string();
        ImpactDesign {
            reference_label: "PRECISE".into(),
            treatment_label: "ROUND ROBIN".into(),
            dimension_label: "LoRA".into(),
            treatment_on: format!("{}-random", reference_on),
            treatment_off: format!("{}-random", reference_off),
            reference_on,
            reference_off,
        }
    }
}

impl ImpactDesign {
    /// Every experiment key of the design
    pub fn experiment_keys(&self) -> [&str; 4] {
        [
            &self.reference_on,
            &self.reference_off,
            &self.treatment_on,
            &self.treatment_off,
        ]
    }

    /// File stem of a stage's chart and report, e.g. `summary_lora_impact`
    pub fn file_stem(&self, stage_prefix: &str) -> String {
        let dimension: String = self
            .dimension_label
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase();
        format!("{}_{}_impact", stage_prefix, dimension)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ImpactConfig {
    /// Directory holding one sub-directory per experiment
    pub results_dir: PathBuf,
    pub plots_dir: PathBuf,
    /// Number of numbered stages analyzed after the summary
    pub stages: u32,
    pub zero_reference: ZeroReferencePolicy,
    pub design: ImpactDesign,
    pub image_size: (u32, u32),
}

impl Default for ImpactConfig {
    fn default() -> Self {
        ImpactConfig {
            results_dir: "results".into(),
            plots_dir: "plots".into(),
            stages: 17,
            zero_reference: ZeroReferencePolicy::default(),
            design: ImpactDesign::default(),
            image_size: (1600, 1200),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ResourcesConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/plots`
    pub plots_dir: Option<PathBuf>,
    pub pod_prefix: String,
    pub csv_names: Vec<String>,
    pub image_size: (u32, u32),
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        ResourcesConfig {
            data_dir: "benchmarking_data".into(),
            plots_dir: None,
            pod_prefix: "ms".into(),
            csv_names: DEFAULT_CSV_NAMES.iter().map(|&x| x.to_string()).collect(),
            image_size: (1400, 800),
        }
    }
}

impl ResourcesConfig {
    pub fn plots_dir(&self) -> PathBuf {
        self.plots_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("plots"))
    }
}
