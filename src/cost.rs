//! Annualised costs and the levelised-cost objective.
use crate::solver::{Expression, VarHandle};
use crate::technology::{ProductionAssumptions, StorageAssumptions};

/// Hours in a (non-leap) year, used to annualise modelled energy
pub const HOURS_PER_YEAR: f64 = 8760.0;

/// Capital recovery factor: the annuity turning a capital cost into an equivalent annual cost.
///
/// `CRF = wacc / (1 - (1 + wacc)^-lifetime)`, which tends to `1 / lifetime` as `wacc` tends to
/// zero.
pub fn capital_recovery_factor(wacc: f64, lifetime: f64) -> f64 {
    if wacc == 0.0 {
        return 1.0 / lifetime;
    }

    wacc / (1.0 - (1.0 + wacc).powf(-lifetime))
}

/// Annual cost per MW of production capacity, excluding variable costs
pub fn production_cost_per_mw(assumptions: &ProductionAssumptions) -> f64 {
    capital_recovery_factor(assumptions.wacc, assumptions.lifetime) * assumptions.capex
        + assumptions.fixed_om
}

/// Annualised cost of a production technology.
///
/// `capacity` is the sum of the technology's capacity variables and `annual_production` its
/// modelled production scaled to a full year.
pub fn production_cost(
    assumptions: &ProductionAssumptions,
    capacity: &Expression,
    annual_production: &Expression,
) -> Expression {
    capacity
        .clone()
        .scale(production_cost_per_mw(assumptions))
        .add(&annual_production.clone().scale(assumptions.variable_om))
}

/// Annualised cost of a storage technology.
///
/// Fixed O&M is charged as a fraction of the total capital cost.
pub fn storage_cost(
    assumptions: &StorageAssumptions,
    energy_capacity: VarHandle,
    power_capacity: VarHandle,
) -> Expression {
    let factor =
        capital_recovery_factor(assumptions.wacc, assumptions.lifetime) + assumptions.fixed_om;
    Expression::term(energy_capacity, factor * assumptions.energy_capex)
        .add_term(power_capacity, factor * assumptions.power_capex)
}

/// Factor scaling energy over the modelled period to a full year
pub fn annualisation_factor(timesteps: usize, timestep_hours: f64) -> f64 {
    HOURS_PER_YEAR / (timesteps as f64 * timestep_hours)
}

/// The objective: total annualised cost per unit of annual demand, times a conditioning factor
pub fn levelised_cost_objective(
    costs: impl IntoIterator<Item = Expression>,
    annual_demand: f64,
    objective_scale: f64,
) -> Expression {
    Expression::sum(costs).scale(objective_scale / annual_demand)
}
