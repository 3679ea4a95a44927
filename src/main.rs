use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use trialmatch::{MatchConfig, MatchOptions, MatchService, TrialView};

mod cli;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = cli::Args::parse();

    let config = MatchConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let service = MatchService::from_config(config)?;

    let span = tracing::info_span!("command", name = ?args.command);
    let _guard = span.enter();

    match args.command {
        cli::Command::Match {
            description,
            top_k,
            threshold,
        } => {
            let options = MatchOptions {
                top_k,
                min_score: threshold,
            };
            let response = service.match_with(&description, options).map_err(|e| {
                tracing::error!(kind = ?e.kind(), "match failed: {e}");
                e
            })?;
            print_json(&response)
        }

        cli::Command::Trial { id } => match service.trial(&id)? {
            Some(record) => print_json(&TrialView::from(&record)),
            None => bail!("trial {} not found", id),
        },

        cli::Command::Stats => print_json(&service.stats()?),

        cli::Command::Warm => {
            service.initialize()?;
            tracing::info!("corpus vectors ready");
            Ok(())
        }
    }
}
