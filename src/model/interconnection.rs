//! Directed exchange between nodes over one interconnection type.
use crate::config::InterconnectionConfig;
use crate::id::{Edge, NodeID};
use crate::solver::{Expression, SolverAdapter, VarHandle};
use crate::timeseries::TimeSeries;
use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};

/// Flow variables for one interconnection type
#[derive(Clone, Debug)]
pub struct InterconnectionModel {
    /// Fraction of the flow arriving at the destination
    pub efficiency: f64,
    /// One variable per timestamp for every modelled edge
    pub flows: IndexMap<Edge, Vec<VarHandle>>,
}

impl InterconnectionModel {
    /// Net export from a node at a timestamp.
    ///
    /// Outgoing flow counts in full; incoming flow counts negatively, derated by efficiency.
    pub fn net_export(&self, node: &NodeID, t: usize) -> Expression {
        let mut expr = Expression::default();
        for (edge, flows) in &self.flows {
            if &edge.from == node {
                expr = expr.add_term(flows[t], 1.0);
            } else if &edge.to == node {
                expr = expr.add_term(flows[t], -self.efficiency);
            }
        }

        expr
    }
}

/// Add a bounded flow variable per timestamp for every edge in `limits` joining two modelled
/// nodes.
///
/// Each flow lies in `[0, limit(t) * relative_capacity]`.
pub fn add_interconnection(
    solver: &mut dyn SolverAdapter,
    nodes: &IndexSet<NodeID>,
    limits: &TimeSeries,
    config: &InterconnectionConfig,
) -> InterconnectionModel {
    let mut flows = IndexMap::new();
    for (column, limit) in limits.columns() {
        let Some(edge) = Edge::parse(column) else {
            warn!("Ignoring interconnection column '{column}': expected FROM-TO");
            continue;
        };
        if edge.from == edge.to {
            warn!("Ignoring interconnection {edge} which starts and ends at the same node");
            continue;
        }
        if !(nodes.contains(&edge.from) && nodes.contains(&edge.to)) {
            debug!("Skipping interconnection {edge}: not between modelled nodes");
            continue;
        }

        let vars = limit
            .iter()
            .map(|&limit| {
                let upper = (limit * config.relative_capacity).max(0.0);
                solver.create_variable(0.0, upper)
            })
            .collect();
        flows.insert(edge, vars);
    }

    InterconnectionModel {
        efficiency: config.efficiency,
        flows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{StubSolver, hourly_index};

    fn nodes() -> IndexSet<NodeID> {
        ["A", "B"].into_iter().map(NodeID::from).collect()
    }

    fn limits() -> TimeSeries {
        TimeSeries::new(hourly_index(2050, 2))
            .unwrap()
            .with_column("A-B", vec![50.0, 40.0])
            .unwrap()
            .with_column("B-A", vec![10.0, 10.0])
            .unwrap()
            .with_column("A-C", vec![100.0, 100.0])
            .unwrap()
            .with_column("bogus", vec![1.0, 1.0])
            .unwrap()
    }

    #[test]
    fn flows_bounded_by_scaled_limits() {
        let mut solver = StubSolver::default();
        let config = InterconnectionConfig {
            efficiency: 0.95,
            relative_capacity: 0.5,
        };
        let model = add_interconnection(&mut solver, &nodes(), &limits(), &config);

        let edges: Vec<String> = model.flows.keys().map(ToString::to_string).collect();
        assert_eq!(edges, ["A-B", "B-A"]);
        let ab = &model.flows[&Edge::parse("A-B").unwrap()];
        assert_eq!(solver.bounds(ab[0]), (0.0, 25.0));
        assert_eq!(solver.bounds(ab[1]), (0.0, 20.0));
    }

    #[test]
    fn net_export_sign_convention() {
        let mut solver = StubSolver::default();
        let config = InterconnectionConfig {
            efficiency: 0.95,
            relative_capacity: 1.0,
        };
        let model = add_interconnection(&mut solver, &nodes(), &limits(), &config);
        let ab = model.flows[&Edge::parse("A-B").unwrap()][0];

        // 10 MW from A to B, nothing from B to A
        let value = |v: VarHandle| if v == ab { 10.0 } else { 0.0 };
        assert_eq!(model.net_export(&"A".into(), 0).evaluate(value), 10.0);
        assert_eq!(model.net_export(&"B".into(), 0).evaluate(value), -9.5);
        assert_eq!(model.net_export(&"C".into(), 0).evaluate(value), 0.0);
    }
}
