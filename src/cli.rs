use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "weather-pipeline",
    version,
    about = "Hourly weather fetch, anomaly scoring and S3 publish"
)]
pub struct Cli {
    #[command(flatten)]
    pub globals: GlobalArgs,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,
    #[arg(long, global = true)]
    pub bucket: Option<String>,
    #[arg(long, global = true)]
    pub region: Option<String>,
    #[arg(long, global = true)]
    pub key: Option<String>,
    /// S3-compatible endpoint, e.g. a local MinIO.
    #[arg(long, global = true)]
    pub endpoint_url: Option<String>,
    #[arg(long, global = true)]
    pub contamination: Option<f64>,
    #[arg(long, global = true)]
    pub seed: Option<u64>,
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,
}

impl GlobalArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            data_root: self.data_root.clone(),
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            key: self.key.clone(),
            endpoint_url: self.endpoint_url.clone(),
            contamination: self.contamination,
            seed: self.seed,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Full run: fetch, persist, score, publish, verify (default).
    Run,
    /// Upload an existing scored artifact and verify it.
    Publish(PublishArgs),
    /// Score a raw CSV offline.
    Score(ScoreArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Defaults to the configured processed CSV.
    #[arg(long)]
    pub artifact: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ScoreArgs {
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_has_no_subcommand() {
        let cli = Cli::try_parse_from(["weather-pipeline"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.globals.overrides().bucket.is_none());
    }

    #[test]
    fn global_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "weather-pipeline",
            "publish",
            "--artifact",
            "out.csv",
            "--bucket",
            "other-bucket",
            "--contamination",
            "0.1",
            "--max-attempts",
            "2",
        ])
        .unwrap();
        let overrides = cli.globals.overrides();
        assert_eq!(overrides.bucket.as_deref(), Some("other-bucket"));
        assert_eq!(overrides.contamination, Some(0.1));
        assert_eq!(overrides.max_attempts, Some(2));
        match cli.command {
            Some(Commands::Publish(args)) => {
                assert_eq!(args.artifact, Some(PathBuf::from("out.csv")))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn score_requires_input_and_output() {
        assert!(Cli::try_parse_from(["weather-pipeline", "score", "--input", "a.csv"]).is_err());
        let cli = Cli::try_parse_from([
            "weather-pipeline",
            "score",
            "--input",
            "a.csv",
            "--output",
            "b.csv",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Score(_))));
    }
}
