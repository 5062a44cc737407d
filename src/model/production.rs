//! Production capacity variables and the production they yield.
use super::{WarmStart, add_capacity_variable};
use crate::id::NodeID;
use crate::solver::{Expression, SolverAdapter, VarHandle};
use crate::technology::{ProductionTechnology, TechnologyConfig};
use crate::timeseries::TimeSeries;
use indexmap::IndexMap;
use log::debug;

/// Capacity variables for one technology, keyed by climate zone
pub type ZoneCapacityMap = IndexMap<String, VarHandle>;

/// Production variables and expressions for one node
#[derive(Clone, Debug, Default)]
pub struct ProductionModel {
    /// Capacity variables per technology and climate zone
    pub capacities: IndexMap<ProductionTechnology, ZoneCapacityMap>,
    /// Production per technology and timestamp
    pub by_technology: IndexMap<ProductionTechnology, Vec<Expression>>,
    /// Total production per timestamp
    pub total: Vec<Expression>,
}

/// Add capacity variables for every `<technology>_<zone>` column of a node's series.
///
/// Columns for technologies which are not selected are ignored.
pub fn add_production(
    solver: &mut dyn SolverAdapter,
    node: &NodeID,
    series: &TimeSeries,
    technologies: &TechnologyConfig,
    previous: Option<&WarmStart>,
    capacity_propagation: f64,
) -> ProductionModel {
    let previous = previous.and_then(|warm_start| warm_start.nodes.get(node));
    let mut model = ProductionModel {
        total: vec![Expression::default(); series.len()],
        ..ProductionModel::default()
    };

    for (column, capacity_factors) in series.columns() {
        let Some((technology, zone)) = ProductionTechnology::parse_column(column) else {
            continue;
        };
        if !technologies.production.contains_key(&technology) {
            debug!("Ignoring column {column} for {node}: {technology} is not selected");
            continue;
        }

        let lower = previous.map_or(0.0, |p| {
            p.production_lower_bound(technology, zone, capacity_propagation)
        });
        let upper = technologies.potential(node, technology);
        let capacity = add_capacity_variable(
            solver,
            lower,
            upper,
            &format!("{technology} capacity ({zone}) at {node}"),
        );

        model
            .capacities
            .entry(technology)
            .or_default()
            .insert(zone.to_string(), capacity);

        let production = model
            .by_technology
            .entry(technology)
            .or_insert_with(|| vec![Expression::default(); series.len()]);
        for (t, &factor) in capacity_factors.iter().enumerate() {
            let term = Expression::term(capacity, factor);
            production[t] = std::mem::take(&mut production[t]).add(&term);
            model.total[t] = std::mem::take(&mut model.total[t]).add(&term);
        }
    }

    model
}
