//! Fixtures for tests
use crate::config::{Config, RegionConfig};
use crate::solver::{
    ConstraintSense, Expression, ObjectiveSense, ProblemData, SolveEvent, SolveSettings,
    SolverAdapter, TerminationStatus, VarHandle,
};
use crate::technology::{
    ProductionAssumptions, ProductionTechnology, ScenarioAssumptions, StorageAssumptions,
    TechnologyConfig,
};
use crate::timeseries::{DateRange, TimeSeries};
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use rstest::fixture;
use std::cell::RefCell;
use std::rc::Rc;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// Settings passed to each call of [`StubSolver::solve`]
pub type SettingsLog = Rc<RefCell<Vec<SolveSettings>>>;

/// A solver which records the problem and reports scripted statuses.
///
/// When a solution is reported, every variable takes its lower bound (or zero if unbounded
/// below).
#[derive(Default)]
pub struct StubSolver {
    problem: ProblemData,
    statuses: Vec<TerminationStatus>,
    settings_log: SettingsLog,
    last_status: Option<TerminationStatus>,
}

impl StubSolver {
    /// A solver reporting `statuses` on successive solves (the last one repeating) and recording
    /// the settings of each solve in `settings_log`
    pub fn with_statuses(statuses: Vec<TerminationStatus>, settings_log: SettingsLog) -> Self {
        Self {
            statuses,
            settings_log,
            ..Self::default()
        }
    }

    /// The problem built so far
    pub fn problem(&self) -> &ProblemData {
        &self.problem
    }

    fn has_solution(&self) -> bool {
        matches!(
            self.last_status,
            Some(TerminationStatus::Optimal | TerminationStatus::TimeLimit)
        )
    }
}

impl SolverAdapter for StubSolver {
    fn create_variable(&mut self, lower: f64, upper: f64) -> VarHandle {
        self.problem.add_column(lower, upper)
    }

    fn add_constraint(
        &mut self,
        expr: Expression,
        sense: ConstraintSense,
        rhs: f64,
    ) -> Result<()> {
        self.problem.add_row(expr, sense, rhs)
    }

    fn set_objective(&mut self, expr: Expression, sense: ObjectiveSense) -> Result<()> {
        self.problem.set_objective(expr, sense)
    }

    fn solve(
        &mut self,
        settings: &SolveSettings,
        callback: &mut dyn FnMut(SolveEvent),
    ) -> Result<TerminationStatus> {
        let attempt = self.settings_log.borrow().len();
        self.settings_log.borrow_mut().push(settings.clone());
        let status = self
            .statuses
            .get(attempt)
            .or(self.statuses.last())
            .copied()
            .unwrap_or(TerminationStatus::Optimal);
        callback(SolveEvent::Message(format!("stub solve: {status}")));
        self.last_status = Some(status);

        Ok(status)
    }

    fn value(&self, var: VarHandle) -> Option<f64> {
        if !self.has_solution() {
            return None;
        }
        let (lower, _) = self.problem.columns()[var.index()];
        Some(if lower.is_finite() { lower } else { 0.0 })
    }

    fn objective_value(&self) -> Option<f64> {
        if !self.has_solution() {
            return None;
        }
        let (objective, _) = self.problem.objective()?;
        Some(objective.evaluate(|var| self.value(var).unwrap_or_default()))
    }

    fn bounds(&self, var: VarHandle) -> (f64, f64) {
        self.problem.columns()[var.index()]
    }

    fn num_variables(&self) -> usize {
        self.problem.columns().len()
    }

    fn num_constraints(&self) -> usize {
        self.problem.rows().len()
    }
}

/// Midnight on the first of January
pub fn jan_1(year: i32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// `n` hourly timestamps starting at midnight on the first of January
pub fn hourly_index(year: i32, n: usize) -> Vec<NaiveDateTime> {
    (0..n)
        .map(|h| jan_1(year) + TimeDelta::hours(i64::try_from(h).unwrap()))
        .collect()
}

/// `n` hours from the start of 2050 with constant demand and a constant `pv_Z1` capacity factor
pub fn flat_series(n: usize, demand: f64, capacity_factor: f64) -> TimeSeries {
    TimeSeries::new(hourly_index(2050, n))
        .unwrap()
        .with_column("demand", vec![demand; n])
        .unwrap()
        .with_column("pv_Z1", vec![capacity_factor; n])
        .unwrap()
}

#[fixture]
pub fn production_assumptions() -> ProductionAssumptions {
    ProductionAssumptions {
        capex: 1000.0,
        fixed_om: 10.0,
        variable_om: 0.5,
        wacc: 0.0,
        lifetime: 20.0,
    }
}

#[fixture]
pub fn production_sets(
    production_assumptions: ProductionAssumptions,
) -> ScenarioAssumptions<ProductionAssumptions> {
    ScenarioAssumptions {
        conservative: ProductionAssumptions {
            capex: 1500.0,
            ..production_assumptions
        },
        moderate: production_assumptions,
        advanced: ProductionAssumptions {
            capex: 600.0,
            ..production_assumptions
        },
    }
}

#[fixture]
pub fn storage_assumptions() -> StorageAssumptions {
    StorageAssumptions {
        energy_capex: 100.0,
        power_capex: 200.0,
        fixed_om: 0.02,
        wacc: 0.0,
        lifetime: 10.0,
        roundtrip_efficiency: 0.9,
        soc_min: 0.0,
        soc_max: 1.0,
    }
}

#[fixture]
pub fn storage_sets(
    storage_assumptions: StorageAssumptions,
) -> ScenarioAssumptions<StorageAssumptions> {
    ScenarioAssumptions {
        conservative: StorageAssumptions {
            energy_capex: 150.0,
            power_capex: 300.0,
            roundtrip_efficiency: 0.85,
            ..storage_assumptions
        },
        moderate: storage_assumptions,
        advanced: StorageAssumptions {
            energy_capex: 60.0,
            power_capex: 120.0,
            roundtrip_efficiency: 0.95,
            soc_min: 0.05,
            ..storage_assumptions
        },
    }
}

/// A valid configuration: region NL with nodes A and B, the first week of 2050, PV only
#[fixture]
pub fn config() -> Config {
    Config {
        scenario: "test".into(),
        model_year: 2050,
        date_range: Some(DateRange {
            start: jan_1(2050).date(),
            end: NaiveDate::from_ymd_opt(2050, 1, 7).unwrap(),
        }),
        regions: vec![RegionConfig {
            code: "NL".into(),
            nodes: vec!["A".into(), "B".into()],
            min_self_sufficiency: None,
        }],
        technologies: TechnologyConfig {
            scenario_level: 0.0,
            production: [(
                ProductionTechnology::Pv,
                production_sets(production_assumptions()),
            )]
            .into_iter()
            .collect(),
            storage: IndexMap::new(),
            potentials: IndexMap::new(),
        },
        interconnections: IndexMap::new(),
        resolutions: vec!["1D".into(), "1H".into()],
        propagation: Default::default(),
        solver: Default::default(),
        data_dir: "data".into(),
    }
}

/// As [`config`], with node A only
#[fixture]
pub fn single_node_config(mut config: Config) -> Config {
    config.regions[0].nodes.truncate(1);
    config
}
