//! Lower bounds carried from a solved stage into the next, finer one.
//!
//! Capacities carry over directly. Storage series are aligned to the finer index: flows take the
//! value of the coarse period containing each fine timestamp, while state of charge (a level at
//! the end of each coarse period) is interpolated at the end of each fine period. Fine timestamps
//! before or after the coarse series take the first or last coarse value; fine timestamps whose
//! coarse period is missing from an otherwise covered range get a zero bound.
use crate::id::NodeID;
use crate::resolution::Resolution;
use crate::results::StageResults;
use crate::technology::{ProductionTechnology, StorageTechnology};
use chrono::NaiveDateTime;
use indexmap::IndexMap;

/// Solved values from a previous stage, used to seed lower bounds
#[derive(Clone, Debug, PartialEq)]
pub struct WarmStart {
    /// The resolution of the stage which produced these values
    pub resolution: Resolution,
    /// Per-node values
    pub nodes: IndexMap<NodeID, NodeWarmStart>,
}

/// Solved values for one node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeWarmStart {
    /// Production capacity per technology and climate zone
    pub production: IndexMap<(ProductionTechnology, String), f64>,
    /// Storage capacities and series per technology
    pub storage: IndexMap<StorageTechnology, StorageWarmStart>,
}

/// Solved values for one storage technology at one node
#[derive(Clone, Debug, PartialEq)]
pub struct StorageWarmStart {
    /// Energy capacity (MWh)
    pub energy: f64,
    /// Power capacity (MW)
    pub power: f64,
    /// Timestamps of the series below
    pub index: Vec<NaiveDateTime>,
    /// State of charge at the end of each period
    pub soc: Vec<f64>,
    /// Charging power
    pub inflow: Vec<f64>,
    /// Discharging power
    pub outflow: Vec<f64>,
}

/// Lower bounds for one storage technology in the finer stage
#[derive(Clone, Debug, PartialEq)]
pub struct StorageBounds {
    /// Lower bound on energy capacity
    pub energy: f64,
    /// Lower bound on power capacity
    pub power: f64,
    /// Per-timestamp lower bounds on state of charge
    pub soc: Vec<f64>,
    /// Per-timestamp lower bounds on charging
    pub inflow: Vec<f64>,
    /// Per-timestamp lower bounds on discharging
    pub outflow: Vec<f64>,
}

impl WarmStart {
    /// Collect the values needed for warm starting from a stage's results
    pub fn from_results(results: &StageResults) -> Self {
        let nodes = results
            .nodes
            .iter()
            .map(|(node, node_results)| {
                let production = node_results
                    .production_capacities
                    .iter()
                    .map(|row| ((row.technology, row.climate_zone.clone()), row.capacity))
                    .collect();

                let temporal = &node_results.temporal;
                let storage = node_results
                    .storage_capacities
                    .iter()
                    .filter_map(|row| {
                        let series = temporal.storage.get(&row.technology)?;
                        Some((
                            row.technology,
                            StorageWarmStart {
                                energy: row.energy,
                                power: row.power,
                                index: temporal.index.clone(),
                                soc: series.soc.clone(),
                                inflow: series.inflow.clone(),
                                outflow: series.outflow.clone(),
                            },
                        ))
                    })
                    .collect();

                (
                    node.clone(),
                    NodeWarmStart {
                        production,
                        storage,
                    },
                )
            })
            .collect();

        Self {
            resolution: results.resolution,
            nodes,
        }
    }
}

impl NodeWarmStart {
    /// Lower bound for a production capacity: zero if the zone was not in the previous stage
    pub fn production_lower_bound(
        &self,
        technology: ProductionTechnology,
        zone: &str,
        factor: f64,
    ) -> f64 {
        self.production
            .get(&(technology, zone.to_string()))
            .map_or(0.0, |capacity| capacity * factor)
    }
}

impl StorageWarmStart {
    /// Lower bounds for a finer stage with the given index and resolution
    pub fn bounds(
        &self,
        coarse: Resolution,
        fine_index: &[NaiveDateTime],
        fine: Resolution,
        capacity_factor: f64,
        soc_factor: f64,
    ) -> StorageBounds {
        let scale = |values: Vec<f64>| values.into_iter().map(|v| v * soc_factor).collect();

        StorageBounds {
            energy: self.energy * capacity_factor,
            power: self.power * capacity_factor,
            soc: scale(align_level(
                &self.index,
                &self.soc,
                coarse,
                fine_index,
                fine,
            )),
            inflow: scale(align_rate(&self.index, &self.inflow, coarse, fine_index)),
            outflow: scale(align_rate(&self.index, &self.outflow, coarse, fine_index)),
        }
    }
}

/// Where a fine timestamp falls relative to a coarse index
#[derive(Clone, Copy, Debug, PartialEq)]
enum Position {
    Before,
    Within(usize),
    Gap,
    After,
}

fn locate(coarse_index: &[NaiveDateTime], coarse: Resolution, timestamp: NaiveDateTime) -> Position {
    let (Some(&first), Some(&last)) = (coarse_index.first(), coarse_index.last()) else {
        return Position::Gap;
    };

    let bin = coarse.floor(timestamp, first);
    if bin < first {
        Position::Before
    } else if bin > last {
        Position::After
    } else {
        coarse_index
            .binary_search(&bin)
            .map_or(Position::Gap, Position::Within)
    }
}

/// Align a per-period rate (e.g. a flow) by taking the value of the containing coarse period
pub fn align_rate(
    coarse_index: &[NaiveDateTime],
    values: &[f64],
    coarse: Resolution,
    fine_index: &[NaiveDateTime],
) -> Vec<f64> {
    fine_index
        .iter()
        .map(|&ts| match locate(coarse_index, coarse, ts) {
            Position::Before => values[0],
            Position::Within(i) => values[i],
            Position::After => values[values.len() - 1],
            Position::Gap => 0.0,
        })
        .collect()
}

/// Align an end-of-period level (state of charge) by linear interpolation.
///
/// Coarse values are placed at the end of their periods and evaluated at the end of each fine
/// period.
pub fn align_level(
    coarse_index: &[NaiveDateTime],
    values: &[f64],
    coarse: Resolution,
    fine_index: &[NaiveDateTime],
    fine: Resolution,
) -> Vec<f64> {
    let knots: Vec<NaiveDateTime> = coarse_index
        .iter()
        .map(|&ts| ts + coarse.duration())
        .collect();

    fine_index
        .iter()
        .map(|&ts| match locate(coarse_index, coarse, ts) {
            Position::Gap => 0.0,
            _ => interpolate(&knots, values, ts + fine.duration()),
        })
        .collect()
}

fn interpolate(knots: &[NaiveDateTime], values: &[f64], at: NaiveDateTime) -> f64 {
    match knots.binary_search(&at) {
        Ok(i) => values[i],
        Err(0) => values[0],
        Err(i) if i == knots.len() => values[i - 1],
        Err(i) => {
            let span = (knots[i] - knots[i - 1]).num_seconds() as f64;
            let weight = (at - knots[i - 1]).num_seconds() as f64 / span;
            values[i - 1] + (values[i] - values[i - 1]) * weight
        }
    }
}
