//! Solved values for a stage, with the derived curtailment, loss and dwell-time metrics.
use crate::id::{Edge, NodeID};
use crate::model::{NodeModel, StageModel};
use crate::resolution::Resolution;
use crate::solver::{SolverAdapter, TerminationStatus, VarHandle};
use crate::technology::{InterconnectionType, ProductionTechnology, StorageTechnology};
use anyhow::{Context, Result, bail, ensure};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Relative tolerance for rounding noise in recomputed curtailment
const CURTAILMENT_TOLERANCE: f64 = 1e-6;

/// Solved production capacity for one technology and climate zone
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionCapacity {
    /// The technology
    pub technology: ProductionTechnology,
    /// The climate zone
    pub climate_zone: String,
    /// Capacity in MW
    pub capacity: f64,
}

/// Solved storage capacities for one technology
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageCapacity {
    /// The technology
    pub technology: StorageTechnology,
    /// Energy capacity in MWh
    pub energy: f64,
    /// Power capacity in MW
    pub power: f64,
}

/// Solved series for one storage technology at one node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StorageSeries {
    /// Charging power
    pub inflow: Vec<f64>,
    /// Discharging power
    pub outflow: Vec<f64>,
    /// State of charge
    pub soc: Vec<f64>,
    /// Mean hours the released energy spent in storage (only where energy is released)
    pub dwell_time: Vec<Option<f64>>,
}

/// Per-timestamp results for one node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemporalResults {
    /// Timestamps
    pub index: Vec<NaiveDateTime>,
    /// Demand
    pub demand: Vec<f64>,
    /// Production summed over technologies
    pub production_total: Vec<f64>,
    /// Production per technology
    pub production: IndexMap<ProductionTechnology, Vec<f64>>,
    /// Storage series per technology
    pub storage: IndexMap<StorageTechnology, StorageSeries>,
    /// Net power drawn into storage
    pub storage_net_flow: Vec<f64>,
    /// Energy stored over all technologies
    pub energy_stored: Vec<f64>,
    /// Net export summed over interconnection types
    pub net_export: Vec<f64>,
    /// Net export per interconnection type
    pub net_export_by_type: IndexMap<InterconnectionType, Vec<f64>>,
    /// Production neither consumed, stored nor exported
    pub curtailment: Vec<f64>,
    /// Power lost on incoming interconnections
    pub interconnection_losses: Vec<f64>,
    /// Power lost to storage inefficiency
    pub storage_losses: Vec<f64>,
}

/// All results for one node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeResults {
    /// Production capacities
    pub production_capacities: Vec<ProductionCapacity>,
    /// Storage capacities
    pub storage_capacities: Vec<StorageCapacity>,
    /// Per-timestamp values
    pub temporal: TemporalResults,
}

/// Solved flows for one interconnection type
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportResults {
    /// Timestamps
    pub index: Vec<NaiveDateTime>,
    /// Flow per directed edge and timestamp
    pub flows: IndexMap<Edge, Vec<f64>>,
}

/// The results of one solved stage
#[derive(Clone, Debug, PartialEq)]
pub struct StageResults {
    /// The stage's resolution
    pub resolution: Resolution,
    /// How the solve ended
    pub status: TerminationStatus,
    /// Levelised cost of electricity (the objective without its conditioning factor)
    pub objective: f64,
    /// Per-node results
    pub nodes: IndexMap<NodeID, NodeResults>,
    /// Per-interconnection-type flows
    pub exports: IndexMap<InterconnectionType, ExportResults>,
}

/// Read every solved value for a stage out of the adapter
pub fn extract(
    model: &StageModel,
    solver: &dyn SolverAdapter,
    status: TerminationStatus,
) -> Result<StageResults> {
    let values: Option<Vec<f64>> = (0..solver.num_variables())
        .map(|i| solver.value(VarHandle::from_index(i)))
        .collect();
    let Some(values) = values else {
        bail!("The solver did not return a solution (status: {status})");
    };
    let objective = solver
        .objective_value()
        .map_or(f64::NAN, |value| value / model.objective_scale);

    let value = |var: VarHandle| values[var.index()];
    let nodes = model
        .nodes
        .iter()
        .map(|(id, node)| {
            let results = extract_node(model, node, &value)
                .with_context(|| format!("Invalid results for node {id}"))?;
            Ok((id.clone(), results))
        })
        .collect::<Result<_>>()?;

    let exports = model
        .interconnections
        .iter()
        .map(|(kind, interconnection)| {
            let flows = interconnection
                .flows
                .iter()
                .map(|(edge, vars)| (edge.clone(), vars.iter().map(|&v| value(v)).collect()))
                .collect();
            (
                *kind,
                ExportResults {
                    index: model.index.clone(),
                    flows,
                },
            )
        })
        .collect();

    Ok(StageResults {
        resolution: model.resolution,
        status,
        objective,
        nodes,
        exports,
    })
}

fn extract_node<F>(model: &StageModel, node: &NodeModel, value: &F) -> Result<NodeResults>
where
    F: Fn(VarHandle) -> f64,
{
    let n = model.index.len();
    let dt = model.resolution.hours();
    let eval = |exprs: &[crate::solver::Expression]| -> Vec<f64> {
        exprs.iter().map(|e| e.evaluate(value)).collect()
    };

    let production_capacities = node
        .production
        .capacities
        .iter()
        .flat_map(|(technology, zones)| {
            zones.iter().map(|(zone, &var)| ProductionCapacity {
                technology: *technology,
                climate_zone: zone.clone(),
                capacity: value(var),
            })
        })
        .collect();

    let storage_capacities = node
        .storage
        .iter()
        .map(|(technology, storage)| StorageCapacity {
            technology: *technology,
            energy: value(storage.energy_capacity),
            power: value(storage.power_capacity),
        })
        .collect();

    let mut storage_losses = vec![0.0; n];
    let storage = node
        .storage
        .iter()
        .map(|(technology, storage)| {
            let values =
                |vars: &[VarHandle]| -> Vec<f64> { vars.iter().map(|&v| value(v)).collect() };
            let inflow = values(&storage.inflow);
            let outflow = values(&storage.outflow);
            let soc = values(&storage.soc);
            let sqrt_eff = storage.efficiency.sqrt();
            for t in 0..n {
                storage_losses[t] +=
                    (1.0 - sqrt_eff) * inflow[t] + (1.0 / sqrt_eff - 1.0) * outflow[t];
            }
            let dwell_time = dwell_times(&inflow, &outflow, &soc, storage.efficiency, dt);

            (
                *technology,
                StorageSeries {
                    inflow,
                    outflow,
                    soc,
                    dwell_time,
                },
            )
        })
        .collect();

    let net_export_by_type: IndexMap<InterconnectionType, Vec<f64>> = node
        .net_export_by_type
        .iter()
        .map(|(kind, exprs)| (*kind, eval(exprs)))
        .collect();

    let mut interconnection_losses = vec![0.0; n];
    for (kind, exports) in &net_export_by_type {
        let efficiency = model.interconnections[kind].efficiency;
        for (loss, &export) in interconnection_losses.iter_mut().zip(exports) {
            if export < 0.0 {
                *loss += (1.0 / efficiency - 1.0) * export.abs();
            }
        }
    }

    let production = node
        .production
        .by_technology
        .iter()
        .map(|(technology, exprs)| (*technology, eval(exprs)))
        .collect();

    let curtailment = checked_curtailment(
        &eval(&node.curtailment),
        &node.demand,
        &model.index,
        CURTAILMENT_TOLERANCE,
    )?;

    Ok(NodeResults {
        production_capacities,
        storage_capacities,
        temporal: TemporalResults {
            index: model.index.clone(),
            demand: node.demand.clone(),
            production_total: eval(&node.production.total),
            production,
            storage,
            storage_net_flow: eval(&node.storage_net_flow),
            energy_stored: eval(&node.energy_stored),
            net_export: eval(&node.net_export),
            net_export_by_type,
            curtailment,
            interconnection_losses,
            storage_losses,
        },
    })
}

/// Curtailment recomputed from solved values, with rounding noise below `tolerance` set to zero.
///
/// Storage flows are measured at the node, so storage losses already sit inside
/// `storage_net_flow`. Imports enter `net_export` after derating, so interconnection losses sit
/// inside it too. A value further below zero than the tolerance (scaled by demand) means the
/// demand balance does not hold and is an error.
fn checked_curtailment(
    surplus: &[f64],
    demand: &[f64],
    index: &[NaiveDateTime],
    tolerance: f64,
) -> Result<Vec<f64>> {
    surplus
        .iter()
        .zip(demand)
        .zip(index)
        .map(|((&surplus, &demand), timestamp)| {
            ensure!(
                surplus >= -tolerance * (1.0 + demand.abs()),
                "Negative curtailment {surplus} at {timestamp}"
            );
            Ok(surplus.max(0.0))
        })
        .collect()
}

/// A parcel of stored energy and the timestamp index at which it entered storage
struct Parcel {
    energy: f64,
    entered: usize,
}

/// Energy-weighted mean time (in hours) spent in storage by the energy released at each
/// timestamp, treating storage as first in, first out.
///
/// The storage starts holding the cyclic level `soc[last]`, tagged as entering at the first
/// timestamp. At each timestamp, stored inflow (`inflow * sqrt(eff) * dt`) joins the back of the
/// queue, then released energy (`outflow / sqrt(eff) * dt`) is taken from the front. Timestamps
/// without a release have no dwell time.
pub fn dwell_times(
    inflow: &[f64],
    outflow: &[f64],
    soc: &[f64],
    efficiency: f64,
    timestep_hours: f64,
) -> Vec<Option<f64>> {
    const TOLERANCE: f64 = 1e-9;

    let sqrt_eff = efficiency.sqrt();
    let mut queue = VecDeque::new();
    let initial = soc.last().copied().unwrap_or(0.0);
    if initial > TOLERANCE {
        queue.push_back(Parcel {
            energy: initial,
            entered: 0,
        });
    }

    let mut out = Vec::with_capacity(outflow.len());
    for (t, (&charge, &discharge)) in inflow.iter().zip(outflow).enumerate() {
        let stored = charge * sqrt_eff * timestep_hours;
        if stored > TOLERANCE {
            queue.push_back(Parcel {
                energy: stored,
                entered: t,
            });
        }

        let mut remaining = discharge / sqrt_eff * timestep_hours;
        if remaining <= TOLERANCE {
            out.push(None);
            continue;
        }

        let mut released = 0.0;
        let mut weighted_age = 0.0;
        while remaining > TOLERANCE {
            let Some(front) = queue.front_mut() else {
                break;
            };
            let taken = front.energy.min(remaining);
            released += taken;
            weighted_age += taken * (t - front.entered) as f64 * timestep_hours;
            remaining -= taken;
            front.energy -= taken;
            if front.energy <= TOLERANCE {
                queue.pop_front();
            }
        }

        out.push((released > 0.0).then(|| weighted_age / released));
    }

    out
}

/// Check that results satisfy the demand balance within a tolerance
pub fn check_demand_balance(results: &StageResults, tolerance: f64) -> Result<()> {
    for (node, node_results) in &results.nodes {
        let temporal = &node_results.temporal;
        for t in 0..temporal.index.len() {
            let supply = temporal.production_total[t]
                - temporal.storage_net_flow[t]
                - temporal.net_export[t];
            ensure!(
                supply >= temporal.demand[t] - tolerance,
                "Demand not met at {node} at {}: supply {supply}, demand {}",
                temporal.index[t],
                temporal.demand[t]
            );
        }
    }

    Ok(())
}

/// Check that over the whole stage, production less demand and curtailment equals the
/// interconnection and storage losses, within a tolerance relative to total demand.
///
/// Storage is cyclic, so its losses are exactly its net draw over the stage.
pub fn check_energy_conservation(results: &StageResults, tolerance: f64) -> Result<()> {
    let mut surplus = 0.0;
    let mut losses = 0.0;
    let mut total_demand = 0.0;
    for node_results in results.nodes.values() {
        let temporal = &node_results.temporal;
        for t in 0..temporal.index.len() {
            surplus +=
                temporal.production_total[t] - temporal.demand[t] - temporal.curtailment[t];
            losses += temporal.interconnection_losses[t] + temporal.storage_losses[t];
            total_demand += temporal.demand[t];
        }
    }
    ensure!(
        (surplus - losses).abs() <= tolerance * (1.0 + total_demand),
        "Energy is not conserved: production less demand and curtailment is {surplus}, \
         but losses are {losses}"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn no_release_no_dwell_time() {
        let dwell = dwell_times(&[1.0, 0.0], &[0.0, 0.0], &[0.0, 1.0], 1.0, 1.0);
        assert_eq!(dwell, [None, None]);
    }

    #[test]
    fn fifo_release_order() {
        // Perfect efficiency, 1 h steps, empty at the start
        let inflow = [2.0, 1.0, 0.0, 0.0];
        let outflow = [0.0, 0.0, 2.0, 1.0];
        let soc = [2.0, 3.0, 1.0, 0.0];
        let dwell = dwell_times(&inflow, &outflow, &soc, 1.0, 1.0);

        assert_eq!(dwell[0], None);
        assert_eq!(dwell[1], None);
        // The first 2 MWh entered at t = 0 and leave at t = 2
        assert_approx_eq!(f64, dwell[2].unwrap(), 2.0);
        // The 1 MWh from t = 1 leaves at t = 3
        assert_approx_eq!(f64, dwell[3].unwrap(), 2.0);
    }

    #[test]
    fn release_spanning_parcels_is_weighted() {
        // 1 MWh in at t = 0, 3 MWh in at t = 1, 2 MWh out at t = 3 (2 h steps)
        let inflow = [0.5, 1.5, 0.0, 0.0];
        let outflow = [0.0, 0.0, 0.0, 1.0];
        let soc = [1.0, 4.0, 4.0, 0.0];
        let dwell = dwell_times(&inflow, &outflow, &soc, 1.0, 2.0);

        // 1 MWh aged 6 h and 1 MWh aged 4 h
        assert_approx_eq!(f64, dwell[3].unwrap(), 5.0);
    }

    #[test]
    fn initial_level_is_oldest() {
        // Cyclic level of 1 MWh, released at t = 2 with 1 h steps
        let dwell = dwell_times(&[0.0, 0.0, 0.0], &[0.0, 0.0, 1.0], &[1.0, 1.0, 0.0], 1.0, 1.0);
        assert_eq!(dwell, [None, None, None]);

        let dwell = dwell_times(&[0.0, 0.0, 0.0], &[0.0, 0.0, 1.0], &[1.0, 1.0, 1.0], 1.0, 1.0);
        assert_approx_eq!(f64, dwell[2].unwrap(), 2.0);
    }

    #[test]
    fn efficiency_applies_to_both_directions() {
        // 0.81 round trip: 10 MW in stores 9 MWh; 8.1 MW out releases 9 MWh
        let dwell = dwell_times(&[10.0, 0.0], &[0.0, 8.1], &[9.0, 0.0], 0.81, 1.0);
        assert_approx_eq!(f64, dwell[1].unwrap(), 1.0);
    }

    #[test]
    fn unmet_demand_is_reported() {
        let temporal = TemporalResults {
            index: vec![NaiveDateTime::default(); 2],
            demand: vec![10.0, 10.0],
            production_total: vec![12.0, 9.0],
            storage_net_flow: vec![2.0, 0.0],
            net_export: vec![0.0, 0.0],
            ..TemporalResults::default()
        };
        let mut results = StageResults {
            resolution: Resolution::hourly(),
            status: TerminationStatus::Optimal,
            objective: 0.0,
            nodes: [(
                NodeID::from("A"),
                NodeResults {
                    temporal,
                    ..NodeResults::default()
                },
            )]
            .into_iter()
            .collect(),
            exports: IndexMap::new(),
        };
        assert!(check_demand_balance(&results, 1e-9).is_err());

        results.nodes[0].temporal.production_total[1] = 10.0;
        assert!(check_demand_balance(&results, 1e-9).is_ok());
    }

    #[test]
    fn curtailment_noise_is_zeroed() {
        let index = vec![NaiveDateTime::default(); 3];
        let curtailment =
            checked_curtailment(&[2.5, -1e-9, 0.0], &[10.0; 3], &index, 1e-6).unwrap();
        assert_eq!(curtailment, [2.5, 0.0, 0.0]);
    }

    #[test]
    fn negative_curtailment_is_an_error() {
        let index = vec![NaiveDateTime::default(); 2];
        assert!(checked_curtailment(&[0.0, -0.5], &[10.0; 2], &index, 1e-6).is_err());
    }

    /// An exporter A feeding an importer B (efficiency 0.8) which cycles a store (0.81 round
    /// trip) over two hours
    fn importer_with_store() -> StageResults {
        // A produces 30: 10 for its own demand, 20 sent to B of which 16 arrives
        let a = TemporalResults {
            index: vec![NaiveDateTime::default(); 2],
            demand: vec![10.0, 10.0],
            production_total: vec![30.0, 12.0],
            storage_net_flow: vec![0.0, 0.0],
            net_export: vec![20.0, 0.0],
            // 2 MW spilled in the second hour
            curtailment: vec![0.0, 2.0],
            interconnection_losses: vec![0.0, 0.0],
            storage_losses: vec![0.0, 0.0],
            ..TemporalResults::default()
        };
        // B charges 10 at hour 0 (9 stored) and discharges 8.1 at hour 1 (9 released)
        let b = TemporalResults {
            index: vec![NaiveDateTime::default(); 2],
            demand: vec![6.0, 8.1],
            production_total: vec![0.0, 0.0],
            storage_net_flow: vec![10.0, -8.1],
            net_export: vec![-16.0, 0.0],
            curtailment: vec![0.0, 0.0],
            interconnection_losses: vec![4.0, 0.0],
            storage_losses: vec![1.0, 0.9],
            ..TemporalResults::default()
        };
        let node = |temporal| NodeResults {
            temporal,
            ..NodeResults::default()
        };
        StageResults {
            resolution: Resolution::hourly(),
            status: TerminationStatus::Optimal,
            objective: 0.0,
            nodes: [(NodeID::from("A"), node(a)), (NodeID::from("B"), node(b))]
                .into_iter()
                .collect(),
            exports: IndexMap::new(),
        }
    }

    #[test]
    fn losses_account_for_surplus() {
        let mut results = importer_with_store();
        check_demand_balance(&results, 1e-9).unwrap();
        // Surplus of 42 - 34.1 - 2 = 5.9 equals 4 lost in transit and 1.9 in storage
        check_energy_conservation(&results, 1e-9).unwrap();

        // Unreported curtailment breaks the balance
        results.nodes[0].temporal.curtailment[1] = 0.0;
        assert!(check_energy_conservation(&results, 1e-9).is_err());
    }
}
