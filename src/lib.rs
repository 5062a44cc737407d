//! Staged least-cost capacity expansion for interconnected electricity regions.
//!
//! A run solves a linear programme once per time resolution, from the coarsest to the finest, and
//! uses each solution to bound the next, finer stage.
use std::path::PathBuf;

pub mod cli;
pub mod config;
pub mod cost;
pub mod id;
pub mod log;
pub mod model;
pub mod output;
pub mod progress;
pub mod resolution;
pub mod results;
pub mod settings;
pub mod solver;
pub mod stager;
pub mod technology;
pub mod timeseries;

#[cfg(test)]
mod fixture;

/// Get the directory in which the program's user configuration is stored.
///
/// Falls back on the current directory if the platform does not define one.
pub fn get_powerplan_config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_default();
    path.push("powerplan");

    path
}
