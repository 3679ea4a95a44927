use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML config. Written with defaults if missing.
    #[clap(short, long, global = true, default_value = "trialmatch.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Rank trials against a patient description
    Match {
        /// Free-text patient description
        description: String,

        /// Number of results (overrides config)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum score (overrides config)
        #[clap(short, long)]
        threshold: Option<f32>,
    },

    /// Show a single trial
    Trial {
        /// Trial identifier, e.g. NCT01234567
        id: String,
    },

    /// Print corpus statistics
    Stats,

    /// Load the corpus and build the vector cache ahead of time
    Warm,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_match() {
        let args = Args::parse_from([
            "trialmatch",
            "match",
            "adult with heart failure",
            "-k",
            "3",
            "--config",
            "custom.yaml",
        ]);

        assert_eq!(args.config, PathBuf::from("custom.yaml"));
        let Command::Match {
            description,
            top_k,
            threshold,
        } = args.command
        else {
            panic!("expected match command");
        };
        assert_eq!(description, "adult with heart failure");
        assert_eq!(top_k, Some(3));
        assert_eq!(threshold, None);
    }

    #[test]
    fn test_default_config_path() {
        let args = Args::parse_from(["trialmatch", "stats"]);
        assert_eq!(args.config, PathBuf::from("trialmatch.yaml"));
        assert!(matches!(args.command, Command::Stats));
    }
}
