//! CLI commands for the program settings file.
use crate::settings::{Settings, get_settings_file_path};
use anyhow::Result;
use clap::Subcommand;

/// The available subcommands for managing the settings file.
#[derive(Subcommand)]
pub enum SettingsSubcommands {
    /// Show the default settings, with documentation.
    ShowDefault,
    /// Print the path to the settings file.
    Path,
}

impl SettingsSubcommands {
    /// Execute the supplied settings subcommand
    pub fn execute(self) -> Result<()> {
        match self {
            Self::ShowDefault => print!("{}", Settings::default_file_contents()),
            Self::Path => println!("{}", get_settings_file_path().display()),
        }

        Ok(())
    }
}
