//! Functionality for running the staged optimisation.
//!
//! Stages are solved from the coarsest resolution to the finest. Each solved stage provides lower
//! bounds for the next, and the run stops at the first stage which cannot be solved.
use crate::config::{Config, SolverConfig};
use crate::model::{StageModel, WarmStart};
use crate::output::DataWriter;
use crate::progress::{ProgressObserver, now};
use crate::resolution::Resolution;
use crate::results::{StageResults, extract};
use crate::solver::{SolveEvent, SolverAdapter, SolverFactory, TerminationStatus};
use crate::timeseries::TimeSeriesProvider;
use anyhow::{Context, Result};
use log::{info, warn};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Where a run has got to
#[derive(Clone, Debug, PartialEq)]
pub enum RunStatus {
    /// Stages are still being solved
    Running,
    /// Every stage was solved
    Complete,
    /// A stage could not be solved; results of earlier stages are kept
    Failed {
        /// The stage which failed
        stage: Resolution,
        /// Why it failed
        reason: String,
    },
}

/// A run of the optimiser over every configured stage
#[derive(Debug)]
pub struct OptimizationRun<'a> {
    /// The run's configuration
    pub config: &'a Config,
    /// Results for each solved stage, coarsest first
    pub stages: Vec<StageResults>,
    /// Where the run has got to
    pub status: RunStatus,
    /// Problems which did not stop the run
    pub warnings: Vec<String>,
}

impl<'a> OptimizationRun<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            config,
            stages: Vec::new(),
            status: RunStatus::Running,
            warnings: Vec::new(),
        }
    }

    /// Results of the finest stage solved so far
    pub fn last_stage(&self) -> Option<&StageResults> {
        self.stages.last()
    }

    fn fail(&mut self, stage: Resolution, error: &StageError) {
        warn!("Stage {stage} failed: {error}");
        self.status = RunStatus::Failed {
            stage,
            reason: error.to_string(),
        };
    }
}

/// Why a stage could not be solved
#[derive(Debug)]
pub enum StageError {
    /// The model could not be built
    Model(anyhow::Error),
    /// The engine returned an error rather than a status
    Solver(anyhow::Error),
    /// The engine stopped with a status which does not yield usable results
    Status(TerminationStatus),
    /// The engine reported numerical trouble on every attempt
    NumericRetriesExhausted {
        /// Number of solves attempted
        attempts: u8,
    },
    /// Solved values could not be read back
    Extraction(anyhow::Error),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(err) => write!(f, "Could not build the model: {err:#}"),
            Self::Solver(err) => write!(f, "The solver failed: {err:#}"),
            Self::Status(status) => write!(f, "The solver stopped with status {status}"),
            Self::NumericRetriesExhausted { attempts } => write!(
                f,
                "The solver reported numerical difficulties on all {attempts} attempts"
            ),
            Self::Extraction(err) => write!(f, "Could not read the solution: {err:#}"),
        }
    }
}

impl Error for StageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Model(err) | Self::Solver(err) | Self::Extraction(err) => Some(err.as_ref()),
            Self::Status(_) | Self::NumericRetriesExhausted { .. } => None,
        }
    }
}

/// Run the optimisation.
///
/// # Arguments
///
/// * `config` - The run configuration
/// * `provider` - Source of time series
/// * `progress` - Receives progress messages
/// * `new_solver` - Creates a fresh solver for each stage
/// * `writer` - If provided, stage results are written as soon as each stage is solved
///
/// # Returns
///
/// The run, which records whether every stage succeeded. An error is only returned if the
/// configuration is invalid or results could not be written.
pub fn run<'a>(
    config: &'a Config,
    provider: &dyn TimeSeriesProvider,
    progress: &mut dyn ProgressObserver,
    new_solver: &mut SolverFactory,
    mut writer: Option<&mut DataWriter>,
) -> Result<OptimizationRun<'a>> {
    config.validate()?;
    let stages = config.stages()?;
    let mut run = OptimizationRun::new(config);

    let mut warm_start: Option<WarmStart> = None;
    for (i, &resolution) in stages.iter().enumerate() {
        info!("Stage {} of {}: {resolution}", i + 1, stages.len());
        let log_file = writer
            .as_deref()
            .map(|writer| writer.solver_log_path(resolution))
            .transpose()?;

        let mut solver = new_solver();
        let outcome = optimise_stage(
            config,
            provider,
            resolution,
            warm_start.as_ref(),
            solver.as_mut(),
            progress,
            log_file,
        );
        let results = match outcome {
            Ok((results, warnings)) => {
                run.warnings.extend(warnings);
                results
            }
            Err(err) => {
                run.fail(resolution, &err);
                progress.on_progress(&resolution.to_string(), &err.to_string(), now());
                return Ok(run);
            }
        };

        if let Some(writer) = writer.as_deref_mut() {
            writer
                .write_stage(&results)
                .with_context(|| format!("Could not write results for stage {resolution}"))?;
        }
        warm_start = Some(WarmStart::from_results(&results));
        run.stages.push(results);
    }

    run.status = RunStatus::Complete;
    if let Some(writer) = writer {
        writer.write_config(config)?;
    }
    info!("All {} stages solved", run.stages.len());

    Ok(run)
}

/// Build, solve and extract one stage.
///
/// Returns the stage's results along with any warnings raised while building the model.
pub fn optimise_stage(
    config: &Config,
    provider: &dyn TimeSeriesProvider,
    resolution: Resolution,
    previous: Option<&WarmStart>,
    solver: &mut dyn SolverAdapter,
    progress: &mut dyn ProgressObserver,
    log_file: Option<PathBuf>,
) -> Result<(StageResults, Vec<String>), StageError> {
    let model = StageModel::build(config, provider, resolution, previous, solver, progress)
        .map_err(StageError::Model)?;
    let status = solve_with_retries(solver, &config.solver, resolution, progress, log_file)?;
    let results = extract(&model, solver, status).map_err(StageError::Extraction)?;
    info!(
        "Stage {resolution} solved with status {status}; objective {}",
        results.objective
    );

    let mut warnings = model.warnings;
    if status == TerminationStatus::TimeLimit {
        warnings.push(format!(
            "Stage {resolution} reached its time limit; results are the best feasible solution \
             found, which may not be optimal"
        ));
    }

    Ok((results, warnings))
}

/// Solve, repeating with escalating numerical focus while the engine reports numerical trouble
fn solve_with_retries(
    solver: &mut dyn SolverAdapter,
    config: &SolverConfig,
    resolution: Resolution,
    progress: &mut dyn ProgressObserver,
    log_file: Option<PathBuf>,
) -> Result<TerminationStatus, StageError> {
    let stage = resolution.to_string();
    let mut settings = config.solve_settings();
    settings.log_file = log_file;

    loop {
        progress.on_progress(
            &stage,
            &format!("Solving (numeric focus {})", settings.numeric_focus),
            now(),
        );
        let status = solver
            .solve(&settings, &mut |event| forward_event(progress, &stage, event))
            .map_err(StageError::Solver)?;

        match status {
            TerminationStatus::Optimal => return Ok(status),
            TerminationStatus::TimeLimit if solver.objective_value().is_some() => {
                warn!("Stage {stage} reached its time limit; using the best solution found");
                return Ok(status);
            }
            TerminationStatus::Numeric if settings.numeric_focus < config.max_numeric_retries => {
                settings.numeric_focus += 1;
                warn!(
                    "Numerical difficulties in stage {stage}; retrying with numeric focus {}",
                    settings.numeric_focus
                );
            }
            TerminationStatus::Numeric => {
                return Err(StageError::NumericRetriesExhausted {
                    attempts: settings.numeric_focus + 1,
                });
            }
            status => return Err(StageError::Status(status)),
        }
    }
}

fn forward_event(progress: &mut dyn ProgressObserver, stage: &str, event: SolveEvent) {
    match event {
        SolveEvent::Message(message) => progress.on_progress(stage, &message, now()),
        SolveEvent::Progress {
            iteration,
            objective,
            gap,
        } => {
            let mut message = String::from("Solver progress:");
            if let Some(iteration) = iteration {
                message.push_str(&format!(" iteration {iteration}"));
            }
            if let Some(objective) = objective {
                message.push_str(&format!(" objective {objective}"));
            }
            if let Some(gap) = gap {
                message.push_str(&format!(" gap {gap}"));
            }
            progress.on_progress(stage, &message, now());
        }
    }
}
