//! The command line interface for the optimiser.
use crate::config::Config;
use crate::log;
use crate::output::{DataWriter, create_output_directory, get_output_dir};
use crate::progress::LogProgress;
use crate::settings::Settings;
use crate::solver::{HighsSolver, SolverAdapter};
use crate::stager::{self, RunStatus};
use crate::timeseries::CsvTimeSeriesProvider;
use ::log::{info, warn};
use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the optimiser.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options for the `run` command
#[derive(Args)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the optimisation described by a configuration file.
    Run {
        /// Path to the configuration file.
        config_path: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Validate a configuration file.
    Validate {
        /// Path to the configuration file.
        config_path: PathBuf,
    },
    /// Manage settings file.
    Settings {
        /// The subcommands for managing the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { config_path, opts } => handle_run_command(&config_path, &opts, None),
            Self::Validate { config_path } => handle_validate_command(&config_path, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start the program
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        command.execute()?;
    } else {
        // No command provided. Show help.
        Cli::command().print_long_help()?;
    }

    Ok(())
}

/// Handle the `run` command.
pub fn handle_run_command(
    config_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    // Load program settings, if not provided
    let mut settings = if let Some(settings) = settings {
        settings
    } else {
        Settings::load().context("Failed to load settings.")?
    };

    // This setting can be overridden by a command-line argument
    if opts.overwrite {
        settings.overwrite = true;
    }

    // Get path to output folder
    let pathbuf: PathBuf;
    let output_path = if let Some(p) = opts.output_dir.as_deref() {
        p
    } else {
        pathbuf = get_output_dir(config_path, Some(&settings.results_root))?;
        &pathbuf
    };

    let overwrite =
        create_output_directory(output_path, settings.overwrite).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;

    // Initialise program logger
    log::init(&settings.log_level, Some(output_path)).context("Failed to initialise logging.")?;

    info!("Starting powerplan v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_path(config_path).context("Failed to load configuration.")?;
    info!("Loaded configuration from {}", config_path.display());
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    let provider = CsvTimeSeriesProvider::new(&config.data_dir);
    let mut writer = DataWriter::create(output_path, config_path)?;
    let mut new_solver = || -> Box<dyn SolverAdapter> { Box::new(HighsSolver::default()) };
    let run = stager::run(
        &config,
        &provider,
        &mut LogProgress,
        &mut new_solver,
        Some(&mut writer),
    )?;

    for warning in &run.warnings {
        warn!("{warning}");
    }
    match &run.status {
        RunStatus::Complete => {
            if let Some(results) = run.last_stage() {
                info!("Levelised cost of electricity: {}", results.objective);
            }
            if run.warnings.is_empty() {
                info!("Optimisation complete!");
            } else {
                warn!(
                    "Optimisation complete with {} warning(s); see above",
                    run.warnings.len()
                );
            }
        }
        RunStatus::Failed { stage, reason } => {
            bail!("Stage {stage} failed: {reason}")
        }
        RunStatus::Running => bail!("The run stopped before every stage was solved"),
    }

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(config_path: &Path, settings: Option<Settings>) -> Result<()> {
    // Load program settings, if not provided
    let settings = if let Some(settings) = settings {
        settings
    } else {
        Settings::load().context("Failed to load settings.")?
    };

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(&settings.log_level, None).context("Failed to initialise logging.")?;

    // Config::from_path validates as it loads
    let config = Config::from_path(config_path).context("Failed to validate configuration.")?;
    let stages: Vec<String> = config.stages()?.iter().map(ToString::to_string).collect();
    info!(
        "Configuration is valid: {} node(s), stages {}",
        config.nodes().count(),
        stages.join(", ")
    );

    Ok(())
}
