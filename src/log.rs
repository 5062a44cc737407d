//! Initialisation and configuration of the program's logging.
//!
//! Messages go to the console (warnings and errors on stderr, everything else on stdout) and,
//! when an output folder is given, to `powerplan_info.log` and `powerplan_debug.log` inside it.
//! The log level comes from the program settings unless `POWERPLAN_LOG_LEVEL` is set.
use anyhow::{Context, Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::{Arguments, Display};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// The default log level for the program.
///
/// Used as a fallback if the user hasn't specified something else with the
/// `POWERPLAN_LOG_LEVEL` environment variable or the settings file.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The environment variable which overrides the log level
const LOG_LEVEL_ENV_VAR: &str = "POWERPLAN_LOG_LEVEL";

/// The file name for the log file containing messages about the ordinary operation of the program
const LOG_INFO_FILE_NAME: &str = "powerplan_info.log";

/// The file name for the log file containing debug messages
const LOG_DEBUG_FILE_NAME: &str = "powerplan_debug.log";

/// Used to indicate whether the logger has been initialised
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Parse a log level name (case insensitive)
fn parse_log_level(level: &str) -> Result<LevelFilter> {
    let level = match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => bail!("Unknown log level: {level}"),
    };

    Ok(level)
}

/// Initialise the program logger using the `fern` logging library.
///
/// # Arguments
///
/// * `log_level_from_settings` - The log level specified in the settings file
/// * `log_file_path` - The folder in which to write log files, if any
pub fn init(log_level_from_settings: &str, log_file_path: Option<&Path>) -> Result<()> {
    // The environment variable takes precedence over the settings file
    let log_level = env::var(LOG_LEVEL_ENV_VAR)
        .unwrap_or_else(|_| log_level_from_settings.to_string());
    let log_level = parse_log_level(&log_level)?;

    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let use_colour_stdout = std::io::stdout().is_terminal();
    let use_colour_stderr = std::io::stderr().is_terminal();

    let mut dispatch = Dispatch::new()
        // Anything less severe than a warning goes to stdout
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, use_colour_stdout, &colours);
                })
                .level(log_level)
                .chain(std::io::stdout()),
        )
        // Warnings and errors go to stderr
        .chain(
            Dispatch::new()
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, use_colour_stderr, &colours);
                })
                .level(log_level.min(LevelFilter::Warn))
                .chain(std::io::stderr()),
        );

    if let Some(log_file_path) = log_file_path {
        let info_path = log_file_path.join(LOG_INFO_FILE_NAME);
        let debug_path = log_file_path.join(LOG_DEBUG_FILE_NAME);
        dispatch = dispatch
            .chain(
                Dispatch::new()
                    .format(write_log_plain)
                    .level(log_level.min(LevelFilter::Info))
                    .chain(
                        fern::log_file(&info_path)
                            .with_context(|| format!("Could not open {}", info_path.display()))?,
                    ),
            )
            .chain(
                Dispatch::new()
                    .filter(|metadata| metadata.level() == LevelFilter::Debug)
                    .format(write_log_plain)
                    .level(log_level)
                    .chain(
                        fern::log_file(&debug_path)
                            .with_context(|| format!("Could not open {}", debug_path.display()))?,
                    ),
            );
    }

    dispatch.apply().context("Logger already initialised")?;
    LOGGER_INIT
        .set(())
        .ok()
        .context("Logger already initialised")?;

    Ok(())
}

/// Write a log message, with the level in colour if enabled
fn write_log_colour(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    use_colour: bool,
    colours: &ColoredLevelConfig,
) {
    if use_colour {
        write_log(out, colours.color(record.level()), record.target(), message);
    } else {
        write_log(out, record.level(), record.target(), message);
    }
}

/// Write a log message without colour
fn write_log_plain(out: FormatCallback, message: &Arguments, record: &Record) {
    write_log(out, record.level(), record.target(), message);
}

fn write_log<T: Display>(out: FormatCallback, level: T, target: &str, message: &Arguments) {
    let timestamp = Local::now().format("%H:%M:%S");
    out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
}
