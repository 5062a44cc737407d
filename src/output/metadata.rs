//! Write run and program metadata to a TOML file.
//!
//! The metadata records which configuration was run, when, and by which version of the program.
//! It is written as `metadata.toml` in the output directory.
use anyhow::{Context, Result};
use chrono::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// The output filename used for metadata.
pub const METADATA_FILE_NAME: &str = "metadata.toml";

#[derive(Serialize)]
struct Metadata<'a> {
    run: RunMetadata<'a>,
    program: ProgramMetadata,
}

/// Information about the run
#[derive(Serialize)]
struct RunMetadata<'a> {
    /// Path to the configuration file
    config_path: &'a Path,
    /// The date and time on which the run started
    datetime: String,
}

impl<'a> RunMetadata<'a> {
    fn new(config_path: &'a Path) -> Self {
        Self {
            config_path,
            datetime: Local::now().to_rfc2822(),
        }
    }
}

#[derive(Serialize)]
struct ProgramMetadata {
    name: &'static str,
    version: &'static str,
    is_debug: bool,
}

impl Default for ProgramMetadata {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            is_debug: cfg!(debug_assertions),
        }
    }
}

/// Write metadata to `metadata.toml` in the given output directory.
///
/// # Arguments
///
/// * `output_path` - Directory where `metadata.toml` will be written.
/// * `config_path` - Path to the configuration that was run.
pub fn write_metadata(output_path: &Path, config_path: &Path) -> Result<()> {
    let metadata = Metadata {
        run: RunMetadata::new(config_path),
        program: ProgramMetadata::default(),
    };
    let file_path = output_path.join(METADATA_FILE_NAME);
    fs::write(&file_path, toml::to_string(&metadata)?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}
