pub use model::*;

mod model;

use std::convert::{TryFrom, TryInto};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::Config;

use crate::error::SettingsError;

/// Layers `configuration/base`, then either `--config` or `configuration/{APP_ENVIRONMENT}`, then `APP__`-prefixed
/// environment variables.
#[tracing::instrument(level = "info")]
pub fn get_settings(options: &CliOptions) -> Result<Settings, SettingsError> {
    let base_path = std::env::current_dir()?;
    let configuration_directory = base_path.join("configuration");

    let mut builder =
        Config::builder().add_source(config::File::from(configuration_directory.join("base")).required(true));

    builder = match &options.config {
        Some(config_path) => {
            let config_path = PathBuf::from(config_path);
            builder.add_source(config::File::from(config_path).required(true))
        },

        None => {
            let environment: Environment = std::env::var("APP_ENVIRONMENT")
                .unwrap_or_else(|_| "local".into())
                .try_into()?;
            builder.add_source(config::File::from(configuration_directory.join(environment.as_ref())).required(true))
        },
    };

    // Add in settings from environment variables (with a prefix of APP and '__' as separator)
    // E.g. `APP__PLANNER__BEAM_SIZE=50` would set `Settings.planner.beam_size`
    builder = builder.add_source(config::Environment::with_prefix("app").separator("__"));

    let settings = builder.build()?.try_deserialize()?;
    Ok(settings)
}

#[derive(Debug, Clone, Parser)]
#[command(version, author = "Damon Rolfs", about = "Plans and transitions blueprints for a schema.")]
pub struct CliOptions {
    /// override environment-based configuration file to load.
    /// Default behavior is to load configuration based on `APP_ENVIRONMENT` envvar.
    #[arg(short, long)]
    pub config: Option<String>,

    /// schema whose blueprints are managed
    #[arg(short, long)]
    pub schema_name: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Validate a user blueprint and initialize the schema's blueprint versioning.
    Bootstrap {
        #[arg(short, long)]
        blueprint: PathBuf,
    },

    /// Print the versioning record and the active blueprint.
    Show,

    /// Pin a serialized blueprint as the next stable version, bypassing the transition state machine.
    Force {
        #[arg(short, long)]
        blueprint: PathBuf,
    },

    /// Run one replan against fixed workload and metrics inputs.
    Plan {
        #[arg(short, long)]
        workload: PathBuf,

        #[arg(short, long)]
        metrics: PathBuf,

        /// per-engine latency predictions keyed by query text
        #[arg(short, long)]
        latencies: PathBuf,

        /// predicted serverless bytes and oltp pages accessed per query
        #[arg(short, long)]
        data_access: Option<PathBuf>,

        /// start the transition and drive it against simulated provisioning
        #[arg(long)]
        accept: bool,
    },

    /// Remove every persisted blueprint asset of the schema.
    Delete,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

impl AsRef<str> for Environment {
    fn as_ref(&self) -> &str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = SettingsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(SettingsError::Environment(other.to_string())),
        }
    }
}
