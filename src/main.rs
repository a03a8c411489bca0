//! llm-relay command-line tool
//!
//! Writes configuration templates and validates configuration files.

use clap::Parser;
use llm_relay::cli::{Cli, Command, generate_config_template, summarize};
use llm_relay::{config::Config, telemetry};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Configuration template written to {}", path);
                }
                None => print!("{}", template),
            }
        }
        Some(Command::Check) | None => {
            let config = Config::from_file(&cli.config)?;
            telemetry::init(&config.observability.log_level);
            tracing::info!(
                path = %cli.config,
                providers = config.providers.len(),
                strategy = config.strategy.kind_name(),
                "Configuration is valid"
            );
            print!("{}", summarize(&config));
        }
    }

    Ok(())
}
