//! The storage state machine: capacities, charge/discharge flows and a cyclic state of charge.
use super::add_capacity_variable;
use super::warm_start::StorageBounds;
use crate::solver::{ConstraintSense, Expression, SolverAdapter, VarHandle};
use crate::technology::StorageAssumptions;
use anyhow::Result;

/// Variables for one storage technology at one node
#[derive(Clone, Debug)]
pub struct StorageModel {
    /// Energy capacity (MWh)
    pub energy_capacity: VarHandle,
    /// Power capacity (MW), shared by charging and discharging
    pub power_capacity: VarHandle,
    /// Charging power per timestamp
    pub inflow: Vec<VarHandle>,
    /// Discharging power per timestamp
    pub outflow: Vec<VarHandle>,
    /// State of charge per timestamp
    pub soc: Vec<VarHandle>,
    /// Round-trip efficiency
    pub efficiency: f64,
}

impl StorageModel {
    /// Net power drawn into storage at a timestamp (`inflow - outflow`)
    pub fn net_flow(&self, t: usize) -> Expression {
        Expression::from(self.inflow[t]).add_term(self.outflow[t], -1.0)
    }
}

/// Add the variables and constraints for one storage technology.
///
/// `bounds` holds lower bounds from a previous stage and must match the length of the index.
pub fn add_storage(
    solver: &mut dyn SolverAdapter,
    timesteps: usize,
    timestep_hours: f64,
    assumptions: &StorageAssumptions,
    bounds: Option<&StorageBounds>,
    name: &str,
) -> Result<StorageModel> {
    let energy_capacity = add_capacity_variable(
        solver,
        bounds.map_or(0.0, |b| b.energy),
        f64::INFINITY,
        &format!("{name} energy capacity"),
    );
    let power_capacity = add_capacity_variable(
        solver,
        bounds.map_or(0.0, |b| b.power),
        f64::INFINITY,
        &format!("{name} power capacity"),
    );

    let lower = |values: Option<&Vec<f64>>, t: usize| values.map_or(0.0, |v| v[t].max(0.0));
    // Flows at the first timestamp move no energy (see below), so they take no lower bound
    let flow_lower = |values: Option<&Vec<f64>>, t: usize| {
        if t == 0 { 0.0 } else { lower(values, t) }
    };
    let mut inflow = Vec::with_capacity(timesteps);
    let mut outflow = Vec::with_capacity(timesteps);
    let mut soc = Vec::with_capacity(timesteps);
    for t in 0..timesteps {
        inflow
            .push(solver.create_variable(flow_lower(bounds.map(|b| &b.inflow), t), f64::INFINITY));
        outflow
            .push(solver.create_variable(flow_lower(bounds.map(|b| &b.outflow), t), f64::INFINITY));
        soc.push(solver.create_variable(lower(bounds.map(|b| &b.soc), t), f64::INFINITY));
    }

    // Flows limited by power capacity
    for &flow in inflow.iter().chain(&outflow) {
        solver.add_constraint(
            Expression::from(flow).add_term(power_capacity, -1.0),
            ConstraintSense::LessEqual,
            0.0,
        )?;
    }

    // State of charge within its fractional bounds of energy capacity
    for &level in &soc {
        solver.add_constraint(
            Expression::from(level).add_term(energy_capacity, -assumptions.soc_max),
            ConstraintSense::LessEqual,
            0.0,
        )?;
        solver.add_constraint(
            Expression::from(level).add_term(energy_capacity, -assumptions.soc_min),
            ConstraintSense::GreaterEqual,
            0.0,
        )?;
    }

    // soc[t] == soc[t-1] + (inflow[t] * sqrt(eff) - outflow[t] / sqrt(eff)) * dt
    let sqrt_eff = assumptions.roundtrip_efficiency.sqrt();
    for t in 1..timesteps {
        let expr = Expression::from(soc[t])
            .add_term(soc[t - 1], -1.0)
            .add_term(inflow[t], -sqrt_eff * timestep_hours)
            .add_term(outflow[t], timestep_hours / sqrt_eff);
        solver.add_constraint(expr, ConstraintSense::Equal, 0.0)?;
    }

    // Cyclic closure. The first timestamp has no chain link, so its flows must cancel.
    if timesteps > 1 {
        solver.add_constraint(
            Expression::from(soc[0]).add_term(soc[timesteps - 1], -1.0),
            ConstraintSense::Equal,
            0.0,
        )?;
    }
    if let (Some(&charge), Some(&discharge)) = (inflow.first(), outflow.first()) {
        solver.add_constraint(
            Expression::term(charge, sqrt_eff).add_term(discharge, -1.0 / sqrt_eff),
            ConstraintSense::Equal,
            0.0,
        )?;
    }

    Ok(StorageModel {
        energy_capacity,
        power_capacity,
        inflow,
        outflow,
        soc,
        efficiency: assumptions.roundtrip_efficiency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{StubSolver, storage_assumptions};
    use crate::solver::HighsSolver;
    use crate::solver::{ObjectiveSense, SolveSettings, TerminationStatus};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn variable_and_constraint_counts(storage_assumptions: StorageAssumptions) {
        let mut solver = StubSolver::default();
        add_storage(&mut solver, 4, 1.0, &storage_assumptions, None, "lion").unwrap();

        // 2 capacities + 3 series of 4
        assert_eq!(solver.num_variables(), 14);
        // 8 power limits + 8 SoC limits + 3 chain links + closure + first-step flows
        assert_eq!(solver.num_constraints(), 21);
    }

    #[rstest]
    fn lower_bounds_applied(storage_assumptions: StorageAssumptions) {
        let mut solver = StubSolver::default();
        let bounds = StorageBounds {
            energy: 50.0,
            power: 5.0,
            soc: vec![1.0, 2.0, 3.0],
            inflow: vec![0.5, 0.75, -1e-12],
            outflow: vec![0.5, 0.0, 0.25],
        };
        let model = add_storage(
            &mut solver,
            3,
            1.0,
            &storage_assumptions,
            Some(&bounds),
            "lion",
        )
        .unwrap();

        assert_eq!(solver.bounds(model.energy_capacity), (50.0, f64::INFINITY));
        assert_eq!(solver.bounds(model.power_capacity), (5.0, f64::INFINITY));
        assert_eq!(solver.bounds(model.soc[0]).0, 1.0);
        assert_eq!(solver.bounds(model.soc[1]).0, 2.0);
        assert_eq!(solver.bounds(model.inflow[1]).0, 0.75);
        // Tiny negative values from the previous solve are clipped
        assert_eq!(solver.bounds(model.inflow[2]).0, 0.0);
        assert_eq!(solver.bounds(model.outflow[2]).0, 0.25);
    }

    #[rstest]
    fn first_step_flows_are_not_bounded(mut storage_assumptions: StorageAssumptions) {
        storage_assumptions.roundtrip_efficiency = 0.81;
        let bounds = StorageBounds {
            energy: 10.0,
            power: 5.0,
            soc: vec![0.0; 3],
            inflow: vec![2.0; 3],
            outflow: vec![2.0; 3],
        };
        let mut solver = HighsSolver::default();
        let model = add_storage(
            &mut solver,
            3,
            1.0,
            &storage_assumptions,
            Some(&bounds),
            "lion",
        )
        .unwrap();
        assert_eq!(solver.bounds(model.inflow[0]).0, 0.0);
        assert_eq!(solver.bounds(model.outflow[0]).0, 0.0);

        // Losses are penalised, so nothing cycles where nothing is forced to
        let losses = Expression::sum(
            model
                .inflow
                .iter()
                .chain(&model.outflow)
                .map(|&flow| Expression::term(flow, 1.0)),
        );
        solver
            .set_objective(losses, ObjectiveSense::Minimise)
            .unwrap();
        let status = solver
            .solve(&SolveSettings::default(), &mut |_| {})
            .unwrap();
        assert_eq!(status, TerminationStatus::Optimal);
        let value = |var| solver.value(var).unwrap();
        assert_approx_eq!(f64, value(model.inflow[0]), 0.0, epsilon = 1e-7);
        assert_approx_eq!(f64, value(model.outflow[0]), 0.0, epsilon = 1e-7);
    }

    #[rstest]
    fn state_of_charge_is_cyclic(mut storage_assumptions: StorageAssumptions) {
        storage_assumptions.roundtrip_efficiency = 0.81;
        let mut solver = HighsSolver::default();
        let model = add_storage(&mut solver, 3, 2.0, &storage_assumptions, None, "lion").unwrap();

        // Charge 9 MW at t = 1, then discharge at t = 2 to return to the start
        solver
            .add_constraint(
                Expression::from(model.inflow[1]),
                ConstraintSense::Equal,
                9.0,
            )
            .unwrap();
        let flows = Expression::sum(
            model
                .inflow
                .iter()
                .chain(&model.outflow)
                .map(|&flow| Expression::term(flow, 0.01)),
        );
        solver
            .set_objective(
                Expression::from(model.energy_capacity)
                    .add_term(model.power_capacity, 1.0)
                    .add(&flows),
                ObjectiveSense::Minimise,
            )
            .unwrap();
        let status = solver
            .solve(&SolveSettings::default(), &mut |_| {})
            .unwrap();
        assert_eq!(status, TerminationStatus::Optimal);

        let value = |var| solver.value(var).unwrap();
        assert_approx_eq!(
            f64,
            value(model.soc[0]),
            value(model.soc[2]),
            epsilon = 1e-6
        );
        // 9 MW * sqrt(0.81) * 2 h stored, released as 16.2 MWh * 0.9 / 2 h
        assert_approx_eq!(f64, value(model.outflow[2]), 7.29, epsilon = 1e-6);
        assert_approx_eq!(
            f64,
            value(model.soc[1]) - value(model.soc[0]),
            16.2,
            epsilon = 1e-6
        );
    }
}
