//! TOML description of a run.

use anyhow::{bail, Context, Result};
use commensurability_core::{
    AnalysisOptions, AngularVelocity, AxisSet, BackendChoice, IcRecipe, PotentialRecipe,
    SpectralEvaluator, Time,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub dt: Time,
    pub steps: usize,
    #[serde(default)]
    pub pattern_speed: AngularVelocity,
    /// Backend name; resolved from the potential when absent.
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default = "default_chunksize")]
    pub chunksize: usize,
    #[serde(default = "default_progressbar")]
    pub progressbar: bool,
    /// Where to save the image when `-o` is not given.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    pub initial_conditions: IcRecipe,
    pub potential: PotentialRecipe,
    pub axes: BTreeMap<String, AxisSpec>,
}

fn default_chunksize() -> usize {
    1
}

fn default_progressbar() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionName {
    Planar,
    Spatial,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluatorConfig {
    #[serde(default = "default_projection")]
    pub projection: ProjectionName,
    #[serde(default = "default_max_order")]
    pub max_order: u32,
}

fn default_projection() -> ProjectionName {
    ProjectionName::Planar
}

fn default_max_order() -> u32 {
    6
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            projection: default_projection(),
            max_order: default_max_order(),
        }
    }
}

impl EvaluatorConfig {
    pub fn build(&self) -> SpectralEvaluator {
        match self.projection {
            ProjectionName::Planar => SpectralEvaluator::planar(self.max_order),
            ProjectionName::Spatial => SpectralEvaluator::spatial(self.max_order),
        }
    }
}

/// Axis values: an explicit list or an evenly spaced range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Values(Vec<f64>),
    Linspace {
        start: f64,
        stop: f64,
        num: usize,
        /// Drop the first point, e.g. to keep R = 0 out of the grid.
        #[serde(default)]
        skip_first: bool,
    },
}

impl AxisSpec {
    pub fn values(&self) -> Vec<f64> {
        match *self {
            AxisSpec::Values(ref values) => values.clone(),
            AxisSpec::Linspace {
                start,
                stop,
                num,
                skip_first,
            } => {
                let step = if num > 1 {
                    (stop - start) / (num - 1) as f64
                } else {
                    0.0
                };
                let skip = usize::from(skip_first);
                (skip..num)
                    .map(|i| {
                        if i + 1 == num && num > 1 {
                            stop
                        } else {
                            start + step * i as f64
                        }
                    })
                    .collect()
            }
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, spec) in &self.axes {
            if spec.values().is_empty() {
                bail!("Axis \"{name}\" expands to no values.");
            }
        }
        Ok(())
    }

    pub fn axes(&self) -> AxisSet {
        self.axes
            .iter()
            .map(|(name, spec)| (name.clone(), spec.values()))
            .collect()
    }

    pub fn options(&self, progressbar: bool) -> AnalysisOptions {
        AnalysisOptions {
            pattern_speed: self.pattern_speed,
            backend: BackendChoice::from(self.backend.clone()),
            chunksize: self.chunksize,
            progressbar: self.progressbar && progressbar,
        }
    }

    /// `-o` wins, then the `output` key, then the config path with a `.cmsb` extension.
    pub fn output_path(&self, config_path: &Path, cli_output: Option<PathBuf>) -> PathBuf {
        cli_output
            .or_else(|| self.output.clone())
            .unwrap_or_else(|| config_path.with_extension("cmsb"))
    }
}
