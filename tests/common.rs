#![allow(dead_code)]
use assert_cmd::cargo_bin_cmd;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use powerplan::config::{
    Config, InterconnectionConfig, PropagationConfig, RegionConfig, SolverConfig,
};
use powerplan::technology::{
    InterconnectionType, ProductionAssumptions, ProductionTechnology, ScenarioAssumptions,
    StorageAssumptions, StorageTechnology, TechnologyConfig,
};
use powerplan::timeseries::{DateRange, TimeSeries};
use std::fs;
use std::path::{Path, PathBuf};

pub fn assert_powerplan_runs(args: &[&str]) {
    cargo_bin_cmd!("powerplan")
        .env("POWERPLAN_USE_DEFAULT_SETTINGS", "1")
        .args(args)
        .assert()
        .success();
}

pub fn assert_powerplan_fails(args: &[&str]) {
    cargo_bin_cmd!("powerplan")
        .env("POWERPLAN_USE_DEFAULT_SETTINGS", "1")
        .args(args)
        .assert()
        .failure();
}

/// Run the program and return what it printed to stdout
pub fn get_powerplan_stdout(args: &[&str]) -> String {
    let output = cargo_bin_cmd!("powerplan")
        .env("POWERPLAN_USE_DEFAULT_SETTINGS", "1")
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success());

    String::from_utf8(output.stdout).unwrap()
}

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2050, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn hourly_index(hours: usize) -> Vec<NaiveDateTime> {
    (0..hours)
        .map(|h| start() + TimeDelta::hours(i64::try_from(h).unwrap()))
        .collect()
}

/// A node series with the given demand and `pv_Z1` capacity factor per hour
pub fn node_series(demand: Vec<f64>, capacity_factor: Vec<f64>) -> TimeSeries {
    TimeSeries::new(hourly_index(demand.len()))
        .unwrap()
        .with_column("demand", demand)
        .unwrap()
        .with_column("pv_Z1", capacity_factor)
        .unwrap()
}

/// PV with capex 1000, fixed O&M 10, variable O&M 0.5, no WACC and a 20-year life
pub fn pv_assumptions() -> ScenarioAssumptions<ProductionAssumptions> {
    let assumptions = ProductionAssumptions {
        capex: 1000.0,
        fixed_om: 10.0,
        variable_om: 0.5,
        wacc: 0.0,
        lifetime: 20.0,
    };
    ScenarioAssumptions {
        conservative: assumptions,
        moderate: assumptions,
        advanced: assumptions,
    }
}

pub fn battery_assumptions() -> ScenarioAssumptions<StorageAssumptions> {
    let assumptions = StorageAssumptions {
        energy_capex: 100.0,
        power_capex: 200.0,
        fixed_om: 0.02,
        wacc: 0.0,
        lifetime: 10.0,
        roundtrip_efficiency: 0.9,
        soc_min: 0.0,
        soc_max: 1.0,
    };
    ScenarioAssumptions {
        conservative: assumptions,
        moderate: assumptions,
        advanced: assumptions,
    }
}

/// A configuration for one region holding `nodes`, covering `days` days from the start of 2050,
/// with PV only
pub fn config(nodes: &[&str], days: u32, resolutions: &[&str]) -> Config {
    Config {
        scenario: "test".into(),
        model_year: 2050,
        date_range: Some(DateRange {
            start: start().date(),
            end: start().date() + TimeDelta::days(i64::from(days) - 1),
        }),
        regions: vec![RegionConfig {
            code: "R".into(),
            nodes: nodes.iter().map(|&node| node.into()).collect(),
            min_self_sufficiency: None,
        }],
        technologies: TechnologyConfig {
            scenario_level: 0.0,
            production: [(ProductionTechnology::Pv, pv_assumptions())]
                .into_iter()
                .collect(),
            storage: IndexMap::new(),
            potentials: IndexMap::new(),
        },
        interconnections: IndexMap::new(),
        resolutions: resolutions.iter().map(ToString::to_string).collect(),
        propagation: PropagationConfig::default(),
        solver: SolverConfig::default(),
        data_dir: "data".into(),
    }
}

/// Add battery storage to a configuration
pub fn with_battery(mut config: Config) -> Config {
    config
        .technologies
        .storage
        .insert(StorageTechnology::Lion, battery_assumptions());
    config
}

/// Add an HVAC interconnection type to a configuration
pub fn with_hvac(mut config: Config, efficiency: f64) -> Config {
    config.interconnections.insert(
        InterconnectionType::Hvac,
        InterconnectionConfig {
            efficiency,
            relative_capacity: 1.0,
        },
    );
    config
}

fn write_series_csv(file_path: &Path, series: &TimeSeries) {
    let mut contents = String::from("timestamp");
    for (name, _) in series.columns() {
        contents.push(',');
        contents.push_str(name);
    }
    contents.push('\n');
    for (t, timestamp) in series.index().iter().enumerate() {
        contents.push_str(&timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
        for (_, values) in series.columns() {
            contents.push_str(&format!(",{}", values[t]));
        }
        contents.push('\n');
    }
    fs::write(file_path, contents).unwrap();
}

/// Write a two-node scenario (A with daytime PV and a battery, B with flat PV, joined by HVAC)
/// to a folder and return the path of its configuration file
pub fn write_two_node_scenario(dir: &Path) -> PathBuf {
    let nodes_dir = dir.join("data/nodes");
    let interconnections_dir = dir.join("data/interconnections");
    fs::create_dir_all(&nodes_dir).unwrap();
    fs::create_dir_all(&interconnections_dir).unwrap();

    let hours = 48;
    let daytime: Vec<f64> = (0..hours)
        .map(|h| if (6..18).contains(&(h % 24)) { 0.8 } else { 0.0 })
        .collect();
    write_series_csv(
        &nodes_dir.join("A.csv"),
        &node_series(vec![50.0; hours], daytime),
    );
    write_series_csv(
        &nodes_dir.join("B.csv"),
        &node_series(vec![30.0; hours], vec![0.5; hours]),
    );
    let limits = TimeSeries::new(hourly_index(hours))
        .unwrap()
        .with_column("A-B", vec![20.0; hours])
        .unwrap()
        .with_column("B-A", vec![20.0; hours])
        .unwrap();
    write_series_csv(&interconnections_dir.join("hvac.csv"), &limits);

    let config_path = dir.join("config.yaml");
    fs::write(
        &config_path,
        "scenario: two_nodes
model_year: 2050
date_range:
  start: 2050-01-01
  end: 2050-01-02
regions:
  - code: R
    nodes: [A, B]
technologies:
  production:
    pv:
      conservative: {capex: 1000.0, fixed_om: 10.0, variable_om: 0.5, wacc: 0.0, lifetime: 20}
      moderate: {capex: 1000.0, fixed_om: 10.0, variable_om: 0.5, wacc: 0.0, lifetime: 20}
      advanced: {capex: 1000.0, fixed_om: 10.0, variable_om: 0.5, wacc: 0.0, lifetime: 20}
  storage:
    lion:
      conservative: &lion {energy_capex: 100.0, power_capex: 200.0, fixed_om: 0.02, wacc: 0.0, lifetime: 10, roundtrip_efficiency: 0.9, soc_min: 0.0, soc_max: 1.0}
      moderate: *lion
      advanced: *lion
interconnections:
  hvac: {efficiency: 0.95}
resolutions: [1D, 1H]
propagation:
  capacity: 0.9
  soc: 0.5
",
    )
    .unwrap();

    config_path
}
