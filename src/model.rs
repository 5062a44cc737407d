//! The optimisation model for a single resolution stage.
//!
//! [`StageModel::build`] reads every node's time series at the stage's resolution and adds the
//! production, storage and interconnection variables, the demand balance and the cost objective
//! to a [`SolverAdapter`]. The returned model holds the handles needed to read the solution back.
use crate::config::Config;
use crate::cost::{
    annualisation_factor, levelised_cost_objective, production_cost, storage_cost,
};
use crate::id::NodeID;
use crate::progress::{ProgressObserver, now};
use crate::resolution::Resolution;
use crate::solver::{Expression, ObjectiveSense, SolverAdapter, VarHandle};
use crate::technology::{InterconnectionType, StorageTechnology};
use crate::timeseries::{DEMAND_COLUMN, DateRange, TimeSeries, TimeSeriesProvider};
use anyhow::{Context, Result, ensure};
use chrono::NaiveDateTime;
use indexmap::{IndexMap, IndexSet};
use log::warn;

pub mod balance;
pub mod interconnection;
pub mod production;
pub mod storage;
pub mod warm_start;
use balance::{add_demand_balance, add_self_sufficiency};
use interconnection::{InterconnectionModel, add_interconnection};
use production::{ProductionModel, add_production};
use storage::{StorageModel, add_storage};
pub use warm_start::{NodeWarmStart, StorageBounds, StorageWarmStart, WarmStart};

/// Variables and expressions for one node
#[derive(Clone, Debug)]
pub struct NodeModel {
    /// Demand per timestamp (MW)
    pub demand: Vec<f64>,
    /// Production capacities and output
    pub production: ProductionModel,
    /// Storage per technology
    pub storage: IndexMap<StorageTechnology, StorageModel>,
    /// Net power drawn into storage, summed over technologies
    pub storage_net_flow: Vec<Expression>,
    /// Energy stored, summed over technologies
    pub energy_stored: Vec<Expression>,
    /// Net export per interconnection type
    pub net_export_by_type: IndexMap<InterconnectionType, Vec<Expression>>,
    /// Net export summed over interconnection types
    pub net_export: Vec<Expression>,
    /// Production left over after demand, storage and export
    pub curtailment: Vec<Expression>,
}

/// The model for one resolution stage
#[derive(Clone, Debug)]
pub struct StageModel {
    /// The stage's resolution
    pub resolution: Resolution,
    /// Timestamps shared by every node
    pub index: Vec<NaiveDateTime>,
    /// Per-node models, in configuration order. Nodes whose data could not be read are absent.
    pub nodes: IndexMap<NodeID, NodeModel>,
    /// Flow variables per interconnection type
    pub interconnections: IndexMap<InterconnectionType, InterconnectionModel>,
    /// Demand over the modelled period scaled to a full year (MWh)
    pub annual_demand: f64,
    /// Factor by which the objective was scaled
    pub objective_scale: f64,
    /// Problems with the input data which did not prevent the model being built
    pub warnings: Vec<String>,
}

/// Log a warning and keep it for the run summary
fn record_warning(warnings: &mut Vec<String>, message: String) {
    warn!("{message}");
    warnings.push(message);
}

/// Add a capacity variable, clamping the lower bound to the upper bound if needed
pub(crate) fn add_capacity_variable(
    solver: &mut dyn SolverAdapter,
    lower: f64,
    upper: f64,
    description: &str,
) -> VarHandle {
    let lower = lower.max(0.0);
    if lower > upper {
        warn!(
            "Lower bound {lower} for {description} exceeds its upper bound {upper}; clamping to \
            the upper bound"
        );
        return solver.create_variable(upper, upper);
    }

    solver.create_variable(lower, upper)
}

impl StageModel {
    /// Build the model for one stage.
    ///
    /// # Arguments
    ///
    /// * `config` - The run configuration
    /// * `provider` - Source of node time series and network limits
    /// * `resolution` - The stage's resolution
    /// * `previous` - Solved values from the previous (coarser) stage, if any
    /// * `solver` - The adapter to which variables and constraints are added
    /// * `progress` - Receives progress messages
    pub fn build(
        config: &Config,
        provider: &dyn TimeSeriesProvider,
        resolution: Resolution,
        previous: Option<&WarmStart>,
        solver: &mut dyn SolverAdapter,
        progress: &mut dyn ProgressObserver,
    ) -> Result<Self> {
        let stage = resolution.to_string();
        let range = config.date_range()?;
        let mut warnings = Vec::new();

        progress.on_progress(&stage, "Reading time series", now());
        let series = read_node_series(config, provider, &range, resolution, &mut warnings)?;
        let (_, first) = series.first().context("No node time series available")?;
        let index = first.index().to_vec();
        let timestep_hours = resolution.hours();

        let production_assumptions = config.technologies.production_assumptions();
        let storage_assumptions = config.technologies.storage_assumptions();

        let mut nodes = IndexMap::new();
        for (node, series) in &series {
            progress.on_progress(&stage, &format!("Building model for {node}"), now());
            let demand = series
                .column(DEMAND_COLUMN)
                .context("Missing demand column")?
                .to_vec();
            let production = add_production(
                solver,
                node,
                series,
                &config.technologies,
                previous,
                config.propagation.capacity,
            );

            let mut storage = IndexMap::new();
            for (technology, assumptions) in &storage_assumptions {
                let bounds = previous.and_then(|previous| {
                    let warm_start = previous.nodes.get(node)?.storage.get(technology)?;
                    Some(warm_start.bounds(
                        previous.resolution,
                        &index,
                        resolution,
                        config.propagation.capacity,
                        config.propagation.soc,
                    ))
                });
                let model = add_storage(
                    solver,
                    index.len(),
                    timestep_hours,
                    assumptions,
                    bounds.as_ref(),
                    &format!("{technology} at {node}"),
                )?;
                storage.insert(*technology, model);
            }

            let storage_net_flow = (0..index.len())
                .map(|t| Expression::sum(storage.values().map(|s| s.net_flow(t))))
                .collect();
            let energy_stored = (0..index.len())
                .map(|t| Expression::sum(storage.values().map(|s| Expression::from(s.soc[t]))))
                .collect();

            nodes.insert(
                node.clone(),
                NodeModel {
                    demand,
                    production,
                    storage,
                    storage_net_flow,
                    energy_stored,
                    net_export_by_type: IndexMap::new(),
                    net_export: Vec::new(),
                    curtailment: Vec::new(),
                },
            );
        }

        // Interconnections between the nodes which were read
        let modelled: IndexSet<NodeID> = nodes.keys().cloned().collect();
        let mut interconnections = IndexMap::new();
        for (kind, interconnection) in &config.interconnections {
            let mut limits = match provider.interconnection_limits(*kind, &range, resolution) {
                Ok(limits) => limits.drop_leap_days(),
                Err(err) => {
                    record_warning(
                        &mut warnings,
                        format!("Skipping {kind} interconnections: {err:#}"),
                    );
                    continue;
                }
            };
            for column in limits.fill_missing() {
                record_warning(
                    &mut warnings,
                    format!("Missing values in {kind} limits for {column} were filled"),
                );
            }
            ensure!(
                limits.index() == index.as_slice(),
                "Timestamps of {kind} limits do not match those of the node time series"
            );
            let model = add_interconnection(solver, &modelled, &limits, interconnection);
            interconnections.insert(*kind, model);
        }

        // Net export and demand balance
        for (node_id, node) in &mut nodes {
            for (kind, interconnection) in &interconnections {
                let exports = (0..index.len())
                    .map(|t| interconnection.net_export(node_id, t))
                    .collect();
                node.net_export_by_type.insert(*kind, exports);
            }
            node.net_export = (0..index.len())
                .map(|t| Expression::sum(node.net_export_by_type.values().map(|e| e[t].clone())))
                .collect();
            node.curtailment = add_demand_balance(
                solver,
                &node.demand,
                &node.production.total,
                &node.storage_net_flow,
                &node.net_export,
            )?;
        }

        for region in &config.regions {
            let Some(minimum) = region.min_self_sufficiency else {
                continue;
            };
            if !region.nodes.iter().any(|node| nodes.contains_key(node)) {
                record_warning(
                    &mut warnings,
                    format!(
                        "No data for any node in region {}; self-sufficiency not applied",
                        region.code
                    ),
                );
                continue;
            }
            add_self_sufficiency(solver, &nodes, &region.nodes, minimum)?;
        }

        // Objective: levelised cost of electricity
        let annualise = annualisation_factor(index.len(), timestep_hours);
        let annual_demand = nodes
            .values()
            .map(|node| node.demand.iter().sum::<f64>())
            .sum::<f64>()
            * timestep_hours
            * annualise;
        ensure!(
            annual_demand > 0.0,
            "Total demand must be greater than zero"
        );

        let mut costs = Vec::new();
        for node in nodes.values() {
            for (technology, zones) in &node.production.capacities {
                let capacity = Expression::sum(zones.values().map(|&var| Expression::from(var)));
                let annual_production =
                    Expression::sum(node.production.by_technology[technology].iter().cloned())
                        .scale(timestep_hours * annualise);
                costs.push(production_cost(
                    &production_assumptions[technology],
                    &capacity,
                    &annual_production,
                ));
            }
            for (technology, storage) in &node.storage {
                costs.push(storage_cost(
                    &storage_assumptions[technology],
                    storage.energy_capacity,
                    storage.power_capacity,
                ));
            }
        }
        let objective_scale = config.solver.objective_scale;
        solver.set_objective(
            levelised_cost_objective(costs, annual_demand, objective_scale),
            ObjectiveSense::Minimise,
        )?;

        progress.on_progress(
            &stage,
            &format!(
                "Model built with {} variables and {} constraints",
                solver.num_variables(),
                solver.num_constraints()
            ),
            now(),
        );

        Ok(Self {
            resolution,
            index,
            nodes,
            interconnections,
            annual_demand,
            objective_scale,
            warnings,
        })
    }
}

/// Read the time series for every configured node.
///
/// Nodes whose data cannot be read are skipped with a warning. The remaining series must share
/// one index.
fn read_node_series(
    config: &Config,
    provider: &dyn TimeSeriesProvider,
    range: &DateRange,
    resolution: Resolution,
    warnings: &mut Vec<String>,
) -> Result<Vec<(NodeID, TimeSeries)>> {
    let mut out: Vec<(NodeID, TimeSeries)> = Vec::new();
    for node in config.nodes() {
        let mut series = match provider.node_series(node, range, resolution) {
            Ok(series) => series.drop_leap_days(),
            Err(err) => {
                record_warning(warnings, format!("Skipping node {node}: {err:#}"));
                continue;
            }
        };
        if series.is_empty() {
            record_warning(warnings, format!("Skipping node {node}: no data in range"));
            continue;
        }
        if series.column(DEMAND_COLUMN).is_none() {
            record_warning(
                warnings,
                format!("Skipping node {node}: missing '{DEMAND_COLUMN}' column"),
            );
            continue;
        }
        for column in series.fill_missing() {
            record_warning(
                warnings,
                format!("Missing values in column {column} for node {node} were filled"),
            );
        }

        if let Some((first_node, first)) = out.first() {
            ensure!(
                series.index() == first.index(),
                "Timestamps for node {node} do not match those for node {first_node}"
            );
        }
        out.push((node.clone(), series));
    }

    ensure!(
        !out.is_empty(),
        "Time series could not be read for any node"
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::fixture::{StubSolver, config, flat_series, single_node_config};
    use crate::progress::RecordingProgress;
    use crate::timeseries::InMemoryProvider;
    use rstest::rstest;

    #[rstest]
    fn build_single_node(single_node_config: Config) {
        let provider = InMemoryProvider::default().with_node("A", flat_series(24, 100.0, 1.0));
        let mut solver = StubSolver::default();
        let mut progress = RecordingProgress::default();
        let model = StageModel::build(
            &single_node_config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut progress,
        )
        .unwrap();

        assert_eq!(model.index.len(), 24);
        assert_eq!(model.nodes.len(), 1);
        // 100 MW over 24 h, annualised
        assert_eq!(model.annual_demand, 100.0 * 8760.0);
        let node = &model.nodes["A"];
        assert_eq!(node.curtailment.len(), 24);
        assert!(node.storage.is_empty());
        assert!(solver.problem().objective().is_some());
        assert!(!progress.records.is_empty());
    }

    #[rstest]
    fn unreadable_node_is_skipped(config: Config) {
        // Only node A has data
        let provider = InMemoryProvider::default().with_node("A", flat_series(24, 100.0, 1.0));
        let mut solver = StubSolver::default();
        let model = StageModel::build(
            &config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut RecordingProgress::default(),
        )
        .unwrap();

        assert_eq!(
            model.nodes.keys().map(NodeID::as_str).collect::<Vec<_>>(),
            ["A"]
        );
        assert!(model.warnings.iter().any(|w| w.starts_with("Skipping node B")));
    }

    #[rstest]
    fn self_sufficiency_skipped_for_region_without_data(mut config: Config) {
        config.regions[0].nodes = vec!["A".into()];
        config.regions.push(RegionConfig {
            code: "BE".into(),
            nodes: vec!["B".into()],
            min_self_sufficiency: Some(0.5),
        });
        let provider = InMemoryProvider::default().with_node("A", flat_series(24, 100.0, 1.0));
        let mut solver = StubSolver::default();
        let model = StageModel::build(
            &config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut RecordingProgress::default(),
        )
        .unwrap();

        assert!(model.warnings.contains(
            &"No data for any node in region BE; self-sufficiency not applied".to_string()
        ));
        // One demand balance row per hour for A and no regional row
        assert_eq!(solver.num_constraints(), 24);
    }

    #[rstest]
    fn self_sufficiency_applied_to_region_with_data(mut config: Config) {
        config.regions[0].min_self_sufficiency = Some(0.5);
        let provider = InMemoryProvider::default().with_node("A", flat_series(24, 100.0, 1.0));
        let mut solver = StubSolver::default();
        let model = StageModel::build(
            &config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut RecordingProgress::default(),
        )
        .unwrap();

        assert!(!model.warnings.iter().any(|w| w.contains("self-sufficiency")));
        assert_eq!(solver.num_constraints(), 25);
    }

    #[rstest]
    fn no_readable_nodes(config: Config) {
        let provider = InMemoryProvider::default();
        let mut solver = StubSolver::default();
        let result = StageModel::build(
            &config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut RecordingProgress::default(),
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "Time series could not be read for any node"
        );
    }

    #[rstest]
    fn mismatched_indexes(config: Config) {
        let provider = InMemoryProvider::default()
            .with_node("A", flat_series(48, 100.0, 1.0))
            .with_node("B", flat_series(24, 100.0, 1.0));
        let mut solver = StubSolver::default();
        let result = StageModel::build(
            &config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut RecordingProgress::default(),
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "Timestamps for node B do not match those for node A"
        );
    }

    #[rstest]
    fn nan_values_are_filled(single_node_config: Config) {
        let mut demand = vec![100.0; 24];
        demand[3] = f64::NAN;
        let series = flat_series(24, 100.0, 1.0)
            .with_column("demand", demand)
            .unwrap();
        let provider = InMemoryProvider::default().with_node("A", series);
        let mut solver = StubSolver::default();
        let model = StageModel::build(
            &single_node_config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut RecordingProgress::default(),
        )
        .unwrap();

        assert!(model.nodes["A"].demand.iter().all(|&d| d == 100.0));
        assert_eq!(model.warnings.len(), 1);
    }

    #[rstest]
    fn zero_demand_rejected(single_node_config: Config) {
        let provider = InMemoryProvider::default().with_node("A", flat_series(24, 0.0, 1.0));
        let mut solver = StubSolver::default();
        let result = StageModel::build(
            &single_node_config,
            &provider,
            Resolution::hourly(),
            None,
            &mut solver,
            &mut RecordingProgress::default(),
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "Total demand must be greater than zero"
        );
    }
}
