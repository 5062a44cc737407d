//! The module responsible for writing output data to disk and reading it back.
//!
//! Each stage gets its own directory under the output directory, named after the stage's
//! resolution:
//!
//! ```text
//! <output>/
//!     metadata.toml
//!     config.yaml                  (once the run is complete)
//!     1D/
//!         log.txt
//!         production_capacities/<node>.csv
//!         storage_capacities/<node>.csv
//!         temporal_results/<node>.csv
//!         temporal_export/<type>.csv
//! ```
use crate::config::{CONFIG_FILE_NAME, Config};
use crate::id::NodeID;
use crate::model::{NodeWarmStart, StorageWarmStart, WarmStart};
use crate::resolution::Resolution;
use crate::results::{
    ExportResults, NodeResults, ProductionCapacity, StageResults, StorageCapacity,
    TemporalResults,
};
use crate::timeseries::{
    TIMESTAMP_COLUMN, TIMESTAMP_FORMAT, input_err_msg, read_time_series_csv,
};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

pub mod metadata;
use metadata::write_metadata;

/// The root folder in which results are placed when no output directory is given
const OUTPUT_DIRECTORY_ROOT: &str = "powerplan_results";

/// Name of the solver log in each stage directory
const SOLVER_LOG_FILE_NAME: &str = "log.txt";

/// Folder holding per-node production capacities
const PRODUCTION_CAPACITIES_DIR: &str = "production_capacities";

/// Folder holding per-node storage capacities
const STORAGE_CAPACITIES_DIR: &str = "storage_capacities";

/// Folder holding per-node temporal results
const TEMPORAL_RESULTS_DIR: &str = "temporal_results";

/// Folder holding per-type interconnection flows
const TEMPORAL_EXPORT_DIR: &str = "temporal_export";

/// Get the default output directory for the configuration at the specified path.
///
/// This is `<results_root>/<config folder name>`, with `results_root` defaulting to
/// `powerplan_results`.
pub fn get_output_dir(config_path: &Path, results_root: Option<&Path>) -> Result<PathBuf> {
    // Use the folder containing the configuration file, or the file stem if it sits in the
    // current folder
    let config_dir = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(config_path);
    let name = config_dir
        .canonicalize()
        .unwrap_or_else(|_| config_dir.to_path_buf());
    let name = if config_dir == config_path {
        name.file_stem()
    } else {
        name.file_name()
    }
    .context("Config path has no file name")?;

    let root = results_root.unwrap_or(Path::new(OUTPUT_DIRECTORY_ROOT));
    Ok(root.join(name))
}

/// Create a new output directory for the run, optionally overwriting existing data.
///
/// # Returns
///
/// `true` if an existing directory was overwritten, `false` otherwise.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    // If the folder already exists, then delete it
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Folder exists and is empty: nothing to do
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. \
            Please delete the folder or pass the --overwrite command-line option."
        );

        fs::remove_dir_all(output_dir).context("Could not delete folder")?;
        true
    } else {
        false
    };

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// Writes stage results and the final configuration to an output directory
#[derive(Debug)]
pub struct DataWriter {
    output_path: PathBuf,
}

impl DataWriter {
    /// Open a writer for the given (existing) output directory and write the run's metadata.
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    /// * `config_path` - Path to the configuration file being run
    pub fn create(output_path: &Path, config_path: &Path) -> Result<Self> {
        write_metadata(output_path, config_path).context("Failed to save metadata")?;

        Ok(Self {
            output_path: output_path.to_path_buf(),
        })
    }

    /// The directory for a stage's results, created if needed
    pub fn stage_dir(&self, resolution: Resolution) -> Result<PathBuf> {
        let dir = self.output_path.join(resolution.to_string());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create {}", dir.display()))?;

        Ok(dir)
    }

    /// Path of the solver log for a stage
    pub fn solver_log_path(&self, resolution: Resolution) -> Result<PathBuf> {
        Ok(self.stage_dir(resolution)?.join(SOLVER_LOG_FILE_NAME))
    }

    /// Write every result table for a stage
    pub fn write_stage(&mut self, results: &StageResults) -> Result<()> {
        let stage_dir = self.stage_dir(results.resolution)?;
        for (node, node_results) in &results.nodes {
            write_node(&stage_dir, node, node_results)?;
        }

        let export_dir = create_subdir(&stage_dir, TEMPORAL_EXPORT_DIR)?;
        for (kind, exports) in &results.exports {
            write_exports(&export_dir.join(format!("{kind}.csv")), exports)?;
        }

        Ok(())
    }

    /// Write a snapshot of the run's configuration
    pub fn write_config(&self, config: &Config) -> Result<()> {
        let file_path = self.output_path.join(CONFIG_FILE_NAME);
        fs::write(&file_path, config.to_yaml()?)
            .with_context(|| format!("Could not write {}", file_path.display()))
    }
}

fn create_subdir(parent: &Path, name: &str) -> Result<PathBuf> {
    let dir = parent.join(name);
    fs::create_dir_all(&dir).with_context(|| format!("Could not create {}", dir.display()))?;

    Ok(dir)
}

fn node_file(dir: &Path, node: &NodeID) -> PathBuf {
    dir.join(format!("{node}.csv"))
}

fn write_node(stage_dir: &Path, node: &NodeID, results: &NodeResults) -> Result<()> {
    let dir = create_subdir(stage_dir, PRODUCTION_CAPACITIES_DIR)?;
    write_rows(&node_file(&dir, node), &results.production_capacities)?;

    let dir = create_subdir(stage_dir, STORAGE_CAPACITIES_DIR)?;
    write_rows(&node_file(&dir, node), &results.storage_capacities)?;

    let dir = create_subdir(stage_dir, TEMPORAL_RESULTS_DIR)?;
    write_temporal(&node_file(&dir, node), &results.temporal)
}

/// Write serialisable rows with a header. An empty file is written if there are no rows.
fn write_rows<T: serde::Serialize>(file_path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!rows.is_empty())
        .from_path(file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// One named column of a temporal table
struct Column<'a> {
    name: String,
    values: ColumnValues<'a>,
}

enum ColumnValues<'a> {
    Values(&'a [f64]),
    Optional(&'a [Option<f64>]),
}

impl ColumnValues<'_> {
    fn format(&self, t: usize) -> String {
        match self {
            Self::Values(values) => values[t].to_string(),
            Self::Optional(values) => values[t].map(|v| v.to_string()).unwrap_or_default(),
        }
    }
}

/// Name of the column holding a storage series
pub fn storage_column(technology: impl std::fmt::Display, series: &str) -> String {
    format!("storage_{technology}_{series}")
}

fn temporal_columns(temporal: &TemporalResults) -> Vec<Column<'_>> {
    fn column(name: String, values: &[f64]) -> Column<'_> {
        Column {
            name,
            values: ColumnValues::Values(values),
        }
    }

    let mut columns = vec![
        column("demand".into(), &temporal.demand),
        column("production_total".into(), &temporal.production_total),
    ];
    for (technology, values) in &temporal.production {
        columns.push(column(format!("production_{technology}"), values));
    }
    for (technology, series) in &temporal.storage {
        columns.push(column(storage_column(technology, "inflow"), &series.inflow));
        columns.push(column(storage_column(technology, "outflow"), &series.outflow));
        columns.push(column(storage_column(technology, "soc"), &series.soc));
        columns.push(Column {
            name: storage_column(technology, "dwell_time"),
            values: ColumnValues::Optional(&series.dwell_time),
        });
    }
    columns.push(column("storage_net_flow".into(), &temporal.storage_net_flow));
    columns.push(column("energy_stored".into(), &temporal.energy_stored));
    columns.push(column("net_export".into(), &temporal.net_export));
    for (kind, values) in &temporal.net_export_by_type {
        columns.push(column(format!("net_export_{kind}"), values));
    }
    columns.push(column("curtailment".into(), &temporal.curtailment));
    columns.push(column(
        "interconnection_losses".into(),
        &temporal.interconnection_losses,
    ));
    columns.push(column("storage_losses".into(), &temporal.storage_losses));

    columns
}

fn write_temporal(file_path: &Path, temporal: &TemporalResults) -> Result<()> {
    let columns = temporal_columns(temporal);
    let mut writer = csv::Writer::from_path(file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    writer.write_record(
        std::iter::once(TIMESTAMP_COLUMN).chain(columns.iter().map(|c| c.name.as_str())),
    )?;
    for (t, timestamp) in temporal.index.iter().enumerate() {
        let timestamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        writer.write_record(
            std::iter::once(timestamp).chain(columns.iter().map(|c| c.values.format(t))),
        )?;
    }
    writer.flush()?;

    Ok(())
}

fn write_exports(file_path: &Path, exports: &ExportResults) -> Result<()> {
    let mut writer = csv::Writer::from_path(file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    let edges = exports.flows.keys().map(ToString::to_string);
    writer.write_record(std::iter::once(TIMESTAMP_COLUMN.to_string()).chain(edges))?;
    for (t, timestamp) in exports.index.iter().enumerate() {
        let timestamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        let flows = exports.flows.values().map(|flows| flows[t].to_string());
        writer.write_record(std::iter::once(timestamp).chain(flows))?;
    }
    writer.flush()?;

    Ok(())
}

fn read_rows<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    // An empty file means no rows
    if fs::metadata(file_path).is_ok_and(|m| m.len() == 0) {
        return Ok(Vec::new());
    }

    csv::Reader::from_path(file_path)
        .with_context(|| input_err_msg(file_path))?
        .deserialize()
        .collect::<Result<_, _>>()
        .with_context(|| input_err_msg(file_path))
}

/// Node IDs for which a stage directory holds temporal results, in sorted order
fn stage_nodes(stage_dir: &Path) -> Result<Vec<NodeID>> {
    let dir = stage_dir.join(TEMPORAL_RESULTS_DIR);
    let entries = fs::read_dir(&dir).with_context(|| input_err_msg(&dir))?;
    let mut nodes = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "csv") {
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                nodes.push(NodeID::from(stem));
            }
        }
    }

    Ok(nodes.into_iter().sorted().collect())
}

/// Re-load the values needed to warm-start a finer stage from a stage's written results
pub fn read_stage_warm_start(stage_dir: &Path, resolution: Resolution) -> Result<WarmStart> {
    let mut nodes = IndexMap::new();
    for node in stage_nodes(stage_dir)? {
        let production: Vec<ProductionCapacity> =
            read_rows(&node_file(&stage_dir.join(PRODUCTION_CAPACITIES_DIR), &node))?;
        let storage_rows: Vec<StorageCapacity> =
            read_rows(&node_file(&stage_dir.join(STORAGE_CAPACITIES_DIR), &node))?;
        let temporal_path = node_file(&stage_dir.join(TEMPORAL_RESULTS_DIR), &node);
        let temporal = read_time_series_csv(&temporal_path)?;

        let mut storage = IndexMap::new();
        for row in storage_rows {
            let series = |name: &str| -> Result<Vec<f64>> {
                let column = storage_column(row.technology, name);
                temporal
                    .column(&column)
                    .map(<[f64]>::to_vec)
                    .with_context(|| format!("Missing column {column}"))
                    .with_context(|| input_err_msg(&temporal_path))
            };
            storage.insert(
                row.technology,
                StorageWarmStart {
                    energy: row.energy,
                    power: row.power,
                    index: temporal.index().to_vec(),
                    soc: series("soc")?,
                    inflow: series("inflow")?,
                    outflow: series("outflow")?,
                },
            );
        }

        nodes.insert(
            node,
            NodeWarmStart {
                production: production
                    .into_iter()
                    .map(|row| ((row.technology, row.climate_zone), row.capacity))
                    .collect(),
                storage,
            },
        );
    }

    Ok(WarmStart { resolution, nodes })
}
