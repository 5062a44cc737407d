//! Demand balance per node and timestamp, and the optional regional self-sufficiency floor.
use super::NodeModel;
use crate::id::NodeID;
use crate::solver::{ConstraintSense, Expression, SolverAdapter};
use anyhow::Result;
use indexmap::IndexMap;

/// Add `production - storage_net_flow - net_export >= demand` for every timestamp.
///
/// Returns the curtailment expression `production - demand - storage_net_flow - net_export` for
/// each timestamp.
pub fn add_demand_balance(
    solver: &mut dyn SolverAdapter,
    demand: &[f64],
    production: &[Expression],
    storage_net_flow: &[Expression],
    net_export: &[Expression],
) -> Result<Vec<Expression>> {
    let mut curtailment = Vec::with_capacity(demand.len());
    for (t, &demand) in demand.iter().enumerate() {
        let supply = production[t]
            .clone()
            .sub(&storage_net_flow[t])
            .sub(&net_export[t]);
        curtailment.push(supply.clone().add(&Expression::Constant(-demand)));
        solver.add_constraint(supply, ConstraintSense::GreaterEqual, demand)?;
    }

    Ok(curtailment)
}

/// Require `(production - curtailed - storage flow) / demand >= minimum` summed over a region's
/// nodes.
///
/// The demand sum is a constant, so the ratio is linearised by multiplying through by it.
pub fn add_self_sufficiency(
    solver: &mut dyn SolverAdapter,
    nodes: &IndexMap<NodeID, NodeModel>,
    region_nodes: &[NodeID],
    minimum: f64,
) -> Result<()> {
    let mut retained = Expression::default();
    let mut demand = 0.0;
    for node in region_nodes.iter().filter_map(|id| nodes.get(id)) {
        for t in 0..node.demand.len() {
            retained = retained
                .add(&node.production.total[t])
                .sub(&node.curtailment[t])
                .sub(&node.storage_net_flow[t]);
            demand += node.demand[t];
        }
    }

    solver.add_constraint(retained, ConstraintSense::GreaterEqual, minimum * demand)
}
