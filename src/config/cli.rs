//!
//! CLI configuration commands for ChatMux.
//!
//! - `config init` - Write the commented example configuration
//! - `config show` - Display the effective configuration
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::paths;
use crate::config::Config;
use crate::error::{ProxyError, Result};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

/* --- types ----------------------------------------------------------------------------------- */

///
/// CLI configuration command handler.
pub struct ConfigCli;

/* --- implementations --------------------------------------------------------------------- */

impl ConfigCli {
    /// Handle the `config init` command
    ///
    /// Writes the example configuration to the user config path. An existing
    /// file is only replaced when `force` is set or the user confirms.
    pub fn init(force: bool) -> Result<()> {
        let config_file = paths::user_config_file()?;

        if config_file.exists() && !force {
            println!("Configuration file already exists at:");
            println!("   {}", config_file.display());
            println!();

            if !Self::confirm("Do you want to overwrite the existing configuration?")? {
                println!("Configuration setup cancelled.");
                return Ok(());
            }
        }

        Self::write_example(&config_file)?;

        println!("[OK] Configuration saved to: {}", config_file.display());
        println!("Run 'chatmux validate' to verify your configuration.");
        Ok(())
    }

    /// Handle the `config show` command
    pub fn show() -> Result<()> {
        let config = Config::load()?;
        print!("{}", Self::render(&config)?);
        Ok(())
    }

    /// Effective configuration as TOML with the resolved credential home
    pub fn render(config: &Config) -> Result<String> {
        let body = toml::to_string_pretty(config)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize configuration: {}", e)))?;
        let home = paths::auth_home_dir(config)?;

        Ok(format!("# Effective ChatMux configuration\n# credential home: {}\n\n{}", home.display(), body))
    }

    /// Write the example configuration to `path`, creating parent directories
    pub fn write_example(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            paths::ensure_directory_exists(dir)?;
        }

        fs::write(path, Config::example_toml()).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to write configuration file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /* --- private methods ----------------------------------------------------------------- */

    fn confirm(message: &str) -> Result<bool> {
        print!("{} [y/N]: ", message);
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;

        Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

/* --- tests ----------------------------------------------------------------------------------- */
