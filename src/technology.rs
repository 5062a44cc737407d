//! Technology variants and their techno-economic assumptions.
//!
//! Each technology is an explicit enum variant. Assumptions are looked up in tables keyed by
//! variant and blended between three scenario sets (conservative, moderate and advanced).
use crate::id::NodeID;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A technology which produces electricity from a variable resource
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProductionTechnology {
    /// Solar photovoltaics
    Pv,
    /// Onshore wind
    Onshore,
    /// Offshore wind
    Offshore,
}

impl ProductionTechnology {
    /// Split a capacity-factor column named `<technology>_<zone>` into technology and zone.
    ///
    /// Returns `None` if the column does not belong to a production technology or has no zone.
    pub fn parse_column(column: &str) -> Option<(Self, &str)> {
        use strum::IntoEnumIterator;

        Self::iter().find_map(|tech| {
            let prefix: &'static str = tech.into();
            let zone = column.strip_prefix(prefix)?.strip_prefix('_')?;
            (!zone.is_empty()).then_some((tech, zone))
        })
    }
}

/// A technology which stores electricity
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageTechnology {
    /// Lithium-ion batteries
    Lion,
    /// Hydrogen (electrolysis, storage and fuel cell)
    Hydrogen,
    /// Pumped hydro storage
    PumpedHydro,
}

/// A physically distinct kind of transmission line
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InterconnectionType {
    /// High-voltage alternating current
    Hvac,
    /// High-voltage direct current
    Hvdc,
}

/// Blend two assumption sets: `weight = 0` gives `self`, `weight = 1` gives `other`
pub trait Interpolate {
    /// Linearly interpolate every numeric field
    #[must_use]
    fn interpolate(&self, other: &Self, weight: f64) -> Self;
}

fn lerp(a: f64, b: f64, weight: f64) -> f64 {
    a + (b - a) * weight
}

/// Techno-economic assumptions for a production technology
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionAssumptions {
    /// Capital cost per MW of capacity
    pub capex: f64,
    /// Fixed operation and maintenance cost per MW per year
    pub fixed_om: f64,
    /// Variable operation and maintenance cost per MWh produced
    #[serde(default)]
    pub variable_om: f64,
    /// Weighted average cost of capital
    pub wacc: f64,
    /// Economic lifetime in years
    pub lifetime: f64,
}

impl Interpolate for ProductionAssumptions {
    fn interpolate(&self, other: &Self, weight: f64) -> Self {
        Self {
            capex: lerp(self.capex, other.capex, weight),
            fixed_om: lerp(self.fixed_om, other.fixed_om, weight),
            variable_om: lerp(self.variable_om, other.variable_om, weight),
            wacc: lerp(self.wacc, other.wacc, weight),
            lifetime: lerp(self.lifetime, other.lifetime, weight),
        }
    }
}

impl ProductionAssumptions {
    fn validate(&self) -> Result<()> {
        check_non_negative("capex", self.capex)?;
        check_non_negative("fixed_om", self.fixed_om)?;
        check_non_negative("variable_om", self.variable_om)?;
        check_wacc(self.wacc)?;
        check_lifetime(self.lifetime)
    }
}

/// Techno-economic assumptions for a storage technology
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageAssumptions {
    /// Capital cost per MWh of energy capacity
    pub energy_capex: f64,
    /// Capital cost per MW of power capacity
    pub power_capex: f64,
    /// Fixed operation and maintenance cost as a fraction of capital cost per year
    pub fixed_om: f64,
    /// Weighted average cost of capital
    pub wacc: f64,
    /// Economic lifetime in years
    pub lifetime: f64,
    /// Round-trip efficiency (the square root is applied on each of charge and discharge)
    pub roundtrip_efficiency: f64,
    /// Minimum state of charge as a fraction of energy capacity
    pub soc_min: f64,
    /// Maximum state of charge as a fraction of energy capacity
    pub soc_max: f64,
}

impl Interpolate for StorageAssumptions {
    fn interpolate(&self, other: &Self, weight: f64) -> Self {
        Self {
            energy_capex: lerp(self.energy_capex, other.energy_capex, weight),
            power_capex: lerp(self.power_capex, other.power_capex, weight),
            fixed_om: lerp(self.fixed_om, other.fixed_om, weight),
            wacc: lerp(self.wacc, other.wacc, weight),
            lifetime: lerp(self.lifetime, other.lifetime, weight),
            roundtrip_efficiency: lerp(
                self.roundtrip_efficiency,
                other.roundtrip_efficiency,
                weight,
            ),
            soc_min: lerp(self.soc_min, other.soc_min, weight),
            soc_max: lerp(self.soc_max, other.soc_max, weight),
        }
    }
}

impl StorageAssumptions {
    fn validate(&self) -> Result<()> {
        check_non_negative("energy_capex", self.energy_capex)?;
        check_non_negative("power_capex", self.power_capex)?;
        check_non_negative("fixed_om", self.fixed_om)?;
        check_wacc(self.wacc)?;
        check_lifetime(self.lifetime)?;
        check_efficiency("roundtrip_efficiency", self.roundtrip_efficiency)?;
        ensure!(
            (0.0..=1.0).contains(&self.soc_min)
                && (0.0..=1.0).contains(&self.soc_max)
                && self.soc_min <= self.soc_max,
            "SoC bounds must satisfy 0 <= soc_min <= soc_max <= 1 (got soc_min = {}, soc_max = {})",
            self.soc_min,
            self.soc_max
        );

        Ok(())
    }
}

/// The three assumption sets between which a scenario is interpolated
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAssumptions<T> {
    /// Assumptions for `scenario_level = -1`
    pub conservative: T,
    /// Assumptions for `scenario_level = 0`
    pub moderate: T,
    /// Assumptions for `scenario_level = 1`
    pub advanced: T,
}

impl<T: Interpolate> ScenarioAssumptions<T> {
    /// Resolve the assumptions for a scenario level in `[-1, 1]`.
    ///
    /// Positive levels move from moderate towards advanced, negative levels towards conservative.
    pub fn resolve(&self, scenario_level: f64) -> T {
        if scenario_level >= 0.0 {
            self.moderate.interpolate(&self.advanced, scenario_level)
        } else {
            self.moderate
                .interpolate(&self.conservative, -scenario_level)
        }
    }

    fn sets(&self) -> [(&'static str, &T); 3] {
        [
            ("conservative", &self.conservative),
            ("moderate", &self.moderate),
            ("advanced", &self.advanced),
        ]
    }
}

/// Production potentials (maximum capacity in MW) per node and technology
pub type PotentialMap = IndexMap<NodeID, IndexMap<ProductionTechnology, f64>>;

/// The technologies selected for a run, with their assumptions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TechnologyConfig {
    /// Where between conservative (-1) and advanced (1) assumptions the scenario lies
    #[serde(default)]
    pub scenario_level: f64,
    /// Production technologies and their assumption sets
    #[serde(default)]
    pub production: IndexMap<ProductionTechnology, ScenarioAssumptions<ProductionAssumptions>>,
    /// Storage technologies and their assumption sets
    #[serde(default)]
    pub storage: IndexMap<StorageTechnology, ScenarioAssumptions<StorageAssumptions>>,
    /// Upper bounds on production capacity. Unlisted entries are unbounded.
    #[serde(default)]
    pub potentials: PotentialMap,
}

impl TechnologyConfig {
    /// Resolved production assumptions for every selected technology
    pub fn production_assumptions(&self) -> IndexMap<ProductionTechnology, ProductionAssumptions> {
        self.production
            .iter()
            .map(|(tech, sets)| (*tech, sets.resolve(self.scenario_level)))
            .collect()
    }

    /// Resolved storage assumptions for every selected technology
    pub fn storage_assumptions(&self) -> IndexMap<StorageTechnology, StorageAssumptions> {
        self.storage
            .iter()
            .map(|(tech, sets)| (*tech, sets.resolve(self.scenario_level)))
            .collect()
    }

    /// The maximum capacity for a technology at a node
    pub fn potential(&self, node: &NodeID, technology: ProductionTechnology) -> f64 {
        self.potentials
            .get(node)
            .and_then(|techs| techs.get(&technology))
            .copied()
            .unwrap_or(f64::INFINITY)
    }

    /// Check the assumption sets and scenario level
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (-1.0..=1.0).contains(&self.scenario_level),
            "scenario_level must be between -1 and 1 (got {})",
            self.scenario_level
        );

        for (tech, sets) in &self.production {
            for (name, assumptions) in sets.sets() {
                assumptions
                    .validate()
                    .with_context(|| format!("Invalid {name} assumptions for {tech}"))?;
            }
        }

        for (tech, sets) in &self.storage {
            for (name, assumptions) in sets.sets() {
                assumptions
                    .validate()
                    .with_context(|| format!("Invalid {name} assumptions for {tech}"))?;
            }
        }

        for (node, techs) in &self.potentials {
            for (tech, potential) in techs {
                ensure!(
                    *potential >= 0.0,
                    "Potential for {tech} at {node} must be non-negative (got {potential})"
                );
            }
        }

        Ok(())
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value >= 0.0,
        "{name} must be a finite number greater than or equal to zero"
    );

    Ok(())
}

fn check_wacc(value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value >= 0.0,
        "wacc must be a finite number greater than or equal to zero"
    );

    Ok(())
}

fn check_lifetime(value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value > 0.0,
        "lifetime must be a finite number greater than zero"
    );

    Ok(())
}

/// Check that an efficiency lies in `(0, 1]`
pub fn check_efficiency(name: &str, value: f64) -> Result<()> {
    ensure!(
        value > 0.0 && value <= 1.0,
        "{name} must be greater than zero and at most one (got {value})"
    );

    Ok(())
}
