//! The run configuration, read from a YAML file.
//!
//! A [`Config`] is validated in full before any model is built and is immutable once a run
//! starts.
use crate::id::{NodeID, RegionID};
use crate::resolution::Resolution;
use crate::solver::{SolveSettings, SolverMethod};
use crate::technology::{InterconnectionType, TechnologyConfig, check_efficiency};
use crate::timeseries::{DateRange, input_err_msg};
use anyhow::{Context, Result, bail, ensure};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The file name under which the final configuration snapshot is written
pub const CONFIG_FILE_NAME: &str = "config.yaml";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_propagation_factor, f64, 1.0);
define_param_default!(default_max_numeric_retries, u8, 3);
define_param_default!(default_objective_scale, f64, 1.0);
define_param_default!(default_relative_capacity, f64, 1.0);
define_param_default!(default_data_dir, PathBuf, PathBuf::from("data"));

/// A region and the network nodes it contains
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region code
    pub code: RegionID,
    /// The nodes (bidding zones) in the region, in modelling order
    pub nodes: Vec<NodeID>,
    /// The minimum fraction of the region's demand to be met by its own production
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_self_sufficiency: Option<f64>,
}

/// Efficiency and scaling for one interconnection type
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterconnectionConfig {
    /// Fraction of power arriving at the destination node
    pub efficiency: f64,
    /// Multiplier applied to the published network limits
    #[serde(default = "default_relative_capacity")]
    pub relative_capacity: f64,
}

/// Factors applied to a coarser stage's solution to form lower bounds for the next stage
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Applied to production and storage capacities
    #[serde(default = "default_propagation_factor")]
    pub capacity: f64,
    /// Applied to state of charge and storage flows
    #[serde(default = "default_propagation_factor")]
    pub soc: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            capacity: default_propagation_factor(),
            soc: default_propagation_factor(),
        }
    }
}

/// Parameters for the optimisation engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Algorithm to use
    #[serde(default)]
    pub method: SolverMethod,
    /// Number of engine threads (0 lets the engine decide)
    #[serde(default)]
    pub threads: u32,
    /// Wall-clock limit per solve in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<f64>,
    /// How many times a solve is repeated after a numerical failure
    #[serde(default = "default_max_numeric_retries")]
    pub max_numeric_retries: u8,
    /// Fixed factor applied to the objective for numerical conditioning
    #[serde(default = "default_objective_scale")]
    pub objective_scale: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::default(),
            threads: 0,
            time_limit: None,
            max_numeric_retries: default_max_numeric_retries(),
            objective_scale: default_objective_scale(),
        }
    }
}

impl SolverConfig {
    /// Engine settings for the first solve attempt
    pub fn solve_settings(&self) -> SolveSettings {
        SolveSettings {
            method: self.method,
            threads: self.threads,
            time_limit: self.time_limit,
            ..SolveSettings::default()
        }
    }
}

/// The configuration of an optimisation run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Scenario name
    pub scenario: String,
    /// The year being modelled
    pub model_year: i32,
    /// Dates to model. Defaults to the whole model year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Regions and their nodes
    pub regions: Vec<RegionConfig>,
    /// Selected technologies and assumptions
    pub technologies: TechnologyConfig,
    /// Interconnection types to model
    #[serde(default)]
    pub interconnections: IndexMap<InterconnectionType, InterconnectionConfig>,
    /// Resolution stages, e.g. `["1D", "1H"]`
    pub resolutions: Vec<String>,
    /// Propagation factors between stages
    #[serde(default)]
    pub propagation: PropagationConfig,
    /// Engine parameters
    #[serde(default)]
    pub solver: SolverConfig,
    /// Root directory of the time series data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Config {
    /// Read and validate a configuration file.
    ///
    /// A relative `data_dir` is resolved against the directory containing the file.
    pub fn from_path<P: AsRef<Path>>(file_path: P) -> Result<Config> {
        let file_path = file_path.as_ref();
        let contents =
            fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
        let mut config: Config =
            serde_yaml::from_str(&contents).with_context(|| input_err_msg(file_path))?;

        if config.data_dir.is_relative() {
            let parent = file_path.parent().unwrap_or(Path::new(""));
            config.data_dir = parent.join(&config.data_dir);
        }

        config
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(config)
    }

    /// The dates to model
    pub fn date_range(&self) -> Result<DateRange> {
        match self.date_range {
            Some(range) => Ok(range),
            None => DateRange::year(self.model_year)
                .with_context(|| format!("Invalid model year {}", self.model_year)),
        }
    }

    /// The resolution stages, coarsest first
    pub fn stages(&self) -> Result<Vec<Resolution>> {
        let mut stages = Vec::with_capacity(self.resolutions.len());
        let mut seen = IndexSet::new();
        for label in &self.resolutions {
            let resolution: Resolution = label.parse()?;
            ensure!(
                seen.insert(resolution),
                "Duplicate resolution '{label}' (same duration as {resolution})"
            );
            stages.push(resolution);
        }
        stages.sort_by(|a, b| b.cmp(a));

        Ok(stages)
    }

    /// All modelled nodes, in region order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeID> {
        self.regions.iter().flat_map(|region| region.nodes.iter())
    }

    /// Check the whole configuration
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.scenario.trim().is_empty(), "scenario must not be empty");

        let range = self.date_range()?;
        ensure!(
            range.start <= range.end,
            "date_range start ({}) is after its end ({})",
            range.start,
            range.end
        );

        check_regions(&self.regions)?;

        ensure!(!self.resolutions.is_empty(), "resolutions is empty");
        self.stages().context("Invalid resolutions")?;

        self.technologies.validate()?;
        ensure!(
            !self.technologies.production.is_empty(),
            "At least one production technology must be selected"
        );

        for (kind, interconnection) in &self.interconnections {
            check_efficiency(&format!("{kind} efficiency"), interconnection.efficiency)?;
            check_proportion(
                &format!("{kind} relative_capacity"),
                interconnection.relative_capacity,
                f64::INFINITY,
            )?;
        }

        check_proportion("propagation.capacity", self.propagation.capacity, 1.0)?;
        check_proportion("propagation.soc", self.propagation.soc, 1.0)?;

        check_solver(&self.solver)?;

        Ok(())
    }

    /// Write the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn check_regions(regions: &[RegionConfig]) -> Result<()> {
    ensure!(!regions.is_empty(), "No regions specified");

    let mut codes = IndexSet::new();
    let mut nodes = IndexSet::new();
    for region in regions {
        ensure!(
            codes.insert(&region.code),
            "Duplicate region code {}",
            region.code
        );
        ensure!(!region.nodes.is_empty(), "Region {} has no nodes", region.code);
        for node in &region.nodes {
            if !nodes.insert(node) {
                bail!("Node {node} appears more than once");
            }
        }
        if let Some(value) = region.min_self_sufficiency {
            check_proportion(
                &format!("min_self_sufficiency for region {}", region.code),
                value,
                1.0,
            )?;
        }
    }

    Ok(())
}

/// Check that a value lies in `[0, max]`
fn check_proportion(name: &str, value: f64, max: f64) -> Result<()> {
    ensure!(
        value >= 0.0 && value <= max,
        "{name} must be between 0 and {max} (got {value})"
    );

    Ok(())
}

fn check_solver(solver: &SolverConfig) -> Result<()> {
    if let Some(time_limit) = solver.time_limit {
        ensure!(
            time_limit.is_finite() && time_limit > 0.0,
            "solver.time_limit must be a finite number greater than zero"
        );
    }
    ensure!(
        solver.objective_scale.is_finite() && solver.objective_scale > 0.0,
        "solver.objective_scale must be a finite number greater than zero"
    );

    Ok(())
}
