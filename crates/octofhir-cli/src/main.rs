mod cli;
mod commands;
mod config;
mod context;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands, ConfigCommands};
use config::Settings;
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli)?;
    observability::init_tracing(&settings.log_level);

    match &cli.command {
        Commands::Status => commands::gateway::status(&settings).await?,
        Commands::Tools => commands::gateway::tools(&settings).await?,
        Commands::Sync(args) => commands::sync::sync(&settings, args).await?,
        Commands::Summary => commands::sync::summary(&settings).await?,
        Commands::Query(args) => commands::query::query(&settings, args).await?,
        Commands::Ask(args) => commands::query::ask(&settings, args).await?,
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => {
                let not_set = "(not set)";
                println!("{}: {}", "Profile".cyan(), settings.profile);
                println!(
                    "{}: {}",
                    "Server".cyan(),
                    settings.server.as_deref().unwrap_or(not_set)
                );
                println!(
                    "{}: {}",
                    "Patient".cyan(),
                    settings.patient.as_deref().unwrap_or(not_set)
                );
                println!("{}: {}", "Store".cyan(), settings.store.display());
                println!("{}: {:?}", "Format".cyan(), settings.format);
                println!("{}: {}", "Log level".cyan(), settings.log_level);
                println!(
                    "{}: {}",
                    "Token".cyan(),
                    if settings.token.is_some() { "(set)" } else { not_set }
                );
            }
            ConfigCommands::Set(set_args) => {
                let mut cfg = config::load_profile(&cli.profile)?;
                cfg.set(&set_args.key, &set_args.value)?;
                config::save_profile(&cli.profile, &cfg)?;
                output::print_success(&format!("Set {} = {}", set_args.key, set_args.value));
            }
        },
    }

    Ok(())
}
