use clap::Parser;
use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::path::PathBuf;

/// Connection settings for the Genie space. All three are required and come
/// from the environment; there are no defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct GenieConfig {
    pub databricks_instance: String,
    pub genie_space_id: String,
    pub databricks_token: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Natural-language question for Genie; prompts on stdin when omitted
    pub query: Option<String>,

    /// Continue an existing conversation instead of starting a new one
    #[arg(long)]
    pub conversation_id: Option<String>,

    /// Also fetch the executed results of the generated SQL
    #[arg(long)]
    pub fetch_results: bool,

    /// Seconds between status polls
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,

    /// Maximum seconds to wait for Genie to finish
    #[arg(long, default_value_t = 600)]
    pub poll_timeout: u64,

    /// Write the report to this markdown file as well as stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Override DATABRICKS_INSTANCE
    #[arg(long)]
    pub instance: Option<String>,

    /// Override GENIE_SPACE_ID
    #[arg(long)]
    pub space_id: Option<String>,
}

impl GenieConfig {
    /// Reads DATABRICKS_INSTANCE, GENIE_SPACE_ID and DATABRICKS_TOKEN from the
    /// environment.
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config: GenieConfig = Config::builder()
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;

        // Override with command line args if provided; the token is only ever
        // taken from the environment.
        if let Some(instance) = &args.instance {
            config.databricks_instance = instance.clone();
        }
        if let Some(space_id) = &args.space_id {
            config.genie_space_id = space_id.clone();
        }

        Ok(config)
    }
}
